//! Account-level reads and name resolution

use std::collections::BTreeMap;

use serde_json::{Value, json};
use tracing::debug;

use super::{CodecksClient, account_record};
use crate::{
    Error, Result,
    query::{
        Record, Selection, extract_collection, extract_entities, related_ids, relation_key,
        resolve_ref, root_id, select_entities,
    },
    security::tag_text,
};

/// Upper bound for activity feed requests
const MAX_ACTIVITY: usize = 100;
/// Names listed in a "not found" error
const MAX_SUGGESTIONS: usize = 20;

/// A named entity used to resolve user input to ids
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Named {
    /// Upstream id
    pub id: String,
    /// Display name
    pub name: String,
    /// Owning project, for decks
    pub project_id: Option<String>,
}

/// Name-to-id tables fetched in one query
#[derive(Debug, Clone, Default)]
pub struct Lookups {
    /// Decks
    pub decks: Vec<Named>,
    /// Projects
    pub projects: Vec<Named>,
    /// Milestones
    pub milestones: Vec<Named>,
    /// Account members
    pub users: Vec<Named>,
}

fn find<'a>(items: &'a [Named], name: &str, kind: &str) -> Result<&'a Named> {
    let wanted = name.trim();
    items
        .iter()
        .find(|item| item.name.trim().eq_ignore_ascii_case(wanted))
        .ok_or_else(|| {
            // account-supplied names are untrusted text
            let available: Vec<String> = items
                .iter()
                .take(MAX_SUGGESTIONS)
                .map(|i| tag_text(&i.name))
                .collect();
            Error::NotFound(format!(
                "{kind} {name:?} not found; available: {}",
                if available.is_empty() {
                    "none".to_string()
                } else {
                    available.join(", ")
                }
            ))
        })
}

impl Lookups {
    /// Resolve a deck name
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` when no deck has this name.
    pub fn deck(&self, name: &str) -> Result<&Named> {
        find(&self.decks, name, "deck")
    }

    /// Resolve a deck name, optionally within one project
    pub fn deck_in(&self, name: &str, project_id: Option<&str>) -> Result<&Named> {
        match project_id {
            None => self.deck(name),
            Some(pid) => {
                let scoped: Vec<Named> = self
                    .decks
                    .iter()
                    .filter(|d| d.project_id.as_deref() == Some(pid))
                    .cloned()
                    .collect();
                let found = find(&scoped, name, "deck")?;
                self.decks
                    .iter()
                    .find(|d| d.id == found.id)
                    .ok_or_else(|| Error::NotFound(format!("deck {name:?} not found")))
            }
        }
    }

    /// Resolve a project name
    pub fn project(&self, name: &str) -> Result<&Named> {
        find(&self.projects, name, "project")
    }

    /// Ids of the decks a project owns
    #[must_use]
    pub fn project_deck_ids(&self, project_id: &str) -> Vec<String> {
        self.decks
            .iter()
            .filter(|d| d.project_id.as_deref() == Some(project_id))
            .map(|d| d.id.clone())
            .collect()
    }

    /// Resolve a milestone name
    pub fn milestone(&self, name: &str) -> Result<&Named> {
        find(&self.milestones, name, "milestone")
    }

    /// Resolve an account member by name
    pub fn user(&self, name: &str) -> Result<&Named> {
        find(&self.users, name, "user")
    }
}

fn named(record: &Record, name_key: &str) -> Option<Named> {
    Some(Named {
        id: record.get("id")?.as_str()?.to_string(),
        name: record
            .get(name_key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        project_id: related_ids(record, "project").into_iter().next(),
    })
}

fn ref_name(response: &Value, entity: &str, id: Option<&String>, field: &str) -> Value {
    id.and_then(|id| resolve_ref(response, entity, id))
        .and_then(|r| r.get(field))
        .cloned()
        .unwrap_or(Value::Null)
}

impl CodecksClient {
    /// Fetch decks, projects, milestones and members in one query
    pub async fn fetch_lookups(&self) -> Result<Lookups> {
        let response = self
            .query_account(vec![
                Selection::relation("decks", Selection::fields(["title", "project"])),
                Selection::relation("projects", Selection::fields(["name"])),
                Selection::relation("milestones", Selection::fields(["name"])),
                Selection::relation(
                    "roles",
                    vec![
                        Selection::field("role"),
                        Selection::relation("user", Selection::fields(["name"])),
                    ],
                ),
            ])
            .await?;

        let collect = |singular: &str, plural: &str, name_key: &str| -> Result<Vec<Named>> {
            Ok(extract_collection(&response, singular, plural)?
                .iter()
                .filter_map(|r| named(r, name_key))
                .collect())
        };
        let lookups = Lookups {
            decks: collect("deck", "decks", "title")?,
            projects: collect("project", "projects", "name")?,
            milestones: collect("milestone", "milestones", "name")?,
            users: collect("user", "users", "name")?,
        };
        debug!(
            decks = lookups.decks.len(),
            projects = lookups.projects.len(),
            milestones = lookups.milestones.len(),
            users = lookups.users.len(),
            "Fetched lookups"
        );
        Ok(lookups)
    }

    /// All decks with their project
    pub async fn list_decks(&self) -> Result<Vec<Record>> {
        let response = self
            .query_account(vec![Selection::relation(
                "decks",
                vec![
                    Selection::field("title"),
                    Selection::relation("project", Selection::fields(["name"])),
                ],
            )])
            .await?;

        Ok(extract_collection(&response, "deck", "decks")?
            .iter()
            .map(|deck| {
                let project_id = related_ids(deck, "project").into_iter().next();
                let project_name = ref_name(&response, "project", project_id.as_ref(), "name");
                record(json!({
                    "id": deck.get("id"),
                    "title": deck.get("title"),
                    "project_id": project_id,
                    "project_name": project_name,
                }))
            })
            .collect())
    }

    /// All projects with the decks they own
    pub async fn list_projects(&self) -> Result<Vec<Record>> {
        let response = self
            .query_account(vec![Selection::relation(
                "projects",
                vec![
                    Selection::field("name"),
                    Selection::relation("decks", Selection::fields(["title"])),
                ],
            )])
            .await?;

        let mut projects = Vec::new();
        for project in extract_collection(&response, "project", "projects")? {
            let deck_ids = related_ids(&project, "decks");
            let decks: Vec<Value> = select_entities(&response, "deck", &deck_ids)?
                .into_iter()
                .map(|d| json!({"id": d.get("id"), "title": d.get("title")}))
                .collect();
            projects.push(record(json!({
                "id": project.get("id"),
                "name": project.get("name"),
                "deck_count": decks.len(),
                "decks": decks,
            })));
        }
        Ok(projects)
    }

    /// All milestones
    pub async fn list_milestones(&self) -> Result<Vec<Record>> {
        let response = self
            .query_account(vec![Selection::relation(
                "milestones",
                Selection::fields(["name", "date"]),
            )])
            .await?;

        Ok(extract_collection(&response, "milestone", "milestones")?
            .iter()
            .map(|m| {
                record(json!({
                    "id": m.get("id"),
                    "name": m.get("name"),
                    "date": m.get("date"),
                }))
            })
            .collect())
    }

    /// All tags
    pub async fn list_tags(&self) -> Result<Vec<Record>> {
        let response = self
            .query_account(vec![Selection::relation(
                "tags",
                Selection::fields(["tag", "color"]),
            )])
            .await?;

        Ok(extract_collection(&response, "tag", "tags")?
            .iter()
            .map(|t| {
                let name = t.get("tag").or_else(|| t.get("name")).cloned();
                record(json!({"id": t.get("id"), "name": name, "color": t.get("color")}))
            })
            .collect())
    }

    /// Most recent account activity, newest first
    pub async fn list_activity(&self, limit: usize) -> Result<Vec<Record>> {
        if limit == 0 || limit > MAX_ACTIVITY {
            return Err(Error::validation(format!(
                "limit must be between 1 and {MAX_ACTIVITY}"
            )));
        }
        let filter = json!({"$order": "-createdAt", "$limit": limit});
        let response = self
            .query_account(vec![Selection::filtered(
                "activities",
                filter.clone(),
                vec![
                    Selection::field("type"),
                    Selection::field("createdAt"),
                    Selection::relation("card", Selection::fields(["title"])),
                    Selection::relation("changer", Selection::fields(["name"])),
                ],
            )])
            .await?;

        let account = account_record(&response)?;
        let key = relation_key("activities", Some(&filter));
        let entries = match account.get(&key) {
            Some(_) => select_entities(&response, "activity", &related_ids(account, &key))?,
            None => extract_entities(&response, "activity")?,
        };

        Ok(entries
            .iter()
            .take(limit)
            .map(|a| {
                let card_id = related_ids(a, "card").into_iter().next();
                let changer_id = related_ids(a, "changer").into_iter().next();
                record(json!({
                    "id": a.get("id"),
                    "type": a.get("type"),
                    "created_at": a.get("createdAt"),
                    "card_title": ref_name(&response, "card", card_id.as_ref(), "title"),
                    "card_id": card_id,
                    "changer": ref_name(&response, "user", changer_id.as_ref(), "name"),
                }))
            })
            .collect())
    }

    /// Account name plus active card counts per status
    pub async fn account_overview(&self) -> Result<Value> {
        let filter = json!({"visibility": "default"});
        let response = self
            .query_account(vec![
                Selection::field("name"),
                Selection::filtered("cards", filter.clone(), Selection::fields(["status"])),
                Selection::relation("decks", Selection::fields(["title"])),
                Selection::relation("projects", Selection::fields(["name"])),
            ])
            .await?;

        let account_id = root_id(&response, "account")?;
        let account = account_record(&response)?;
        let card_ids = related_ids(account, &relation_key("cards", Some(&filter)));
        let cards = select_entities(&response, "card", &card_ids)?;

        let mut by_status: BTreeMap<String, usize> = BTreeMap::new();
        for card in &cards {
            let status = card
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            *by_status.entry(status.to_string()).or_default() += 1;
        }

        Ok(json!({
            "account": {"id": account_id, "name": account.get("name")},
            "projects": related_ids(account, "projects").len(),
            "decks": related_ids(account, "decks").len(),
            "cards": cards.len(),
            "by_status": by_status,
        }))
    }
}

fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        _ => Record::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use pretty_assertions::assert_eq;

    fn lookups_response() -> Value {
        json!({
            "_root": {"account": "acc"},
            "account": {"acc": {"decks": ["d-1", "d-2"], "projects": ["p-1"]}},
            "deck": {
                "d-1": {"title": "Backlog", "project": "p-1"},
                "d-2": {"title": "Sprint", "project": "p-2"}
            },
            "project": {"p-1": {"name": "Game"}, "p-2": {"name": "Tools"}},
            "milestone": {"m-1": {"name": "Alpha"}},
            "user": {"u-1": {"name": "Ana"}}
        })
    }

    #[tokio::test]
    async fn resolves_names_case_insensitively() {
        let transport = ScriptedTransport::new(vec![Ok(lookups_response())]);
        let lookups = client(&transport).fetch_lookups().await.unwrap();

        assert_eq!(lookups.deck("sprint").unwrap().id, "d-2");
        assert_eq!(lookups.project("GAME").unwrap().id, "p-1");
        assert_eq!(lookups.project_deck_ids("p-1"), vec!["d-1".to_string()]);
        assert_eq!(lookups.milestone("alpha").unwrap().id, "m-1");
        assert_eq!(lookups.user("ana").unwrap().id, "u-1");
        assert!(lookups.deck_in("Sprint", Some("p-1")).is_err());
        assert_eq!(lookups.deck_in("Backlog", Some("p-1")).unwrap().id, "d-1");
    }

    #[tokio::test]
    async fn unknown_deck_names_the_alternatives() {
        let transport = ScriptedTransport::new(vec![Ok(lookups_response())]);
        let lookups = client(&transport).fetch_lookups().await.unwrap();
        let err = lookups.deck("Icebox").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(
            err.to_string()
                .contains("[USER_DATA]Backlog[/USER_DATA], [USER_DATA]Sprint[/USER_DATA]")
        );
    }

    #[tokio::test]
    async fn decks_carry_project_names() {
        let transport = ScriptedTransport::new(vec![Ok(lookups_response())]);
        let decks = client(&transport).list_decks().await.unwrap();
        assert_eq!(decks.len(), 2);
        assert_eq!(decks[0]["project_name"], "Game");
        assert_eq!(decks[1]["title"], "Sprint");
    }

    #[tokio::test]
    async fn projects_own_their_decks() {
        let transport = ScriptedTransport::new(vec![Ok(json!({
            "project": {"p-1": {"name": "Game", "decks": ["d-2", "d-1"]}},
            "deck": {"d-1": {"title": "Backlog"}, "d-2": {"title": "Sprint"}}
        }))]);
        let projects = client(&transport).list_projects().await.unwrap();
        assert_eq!(projects[0]["deck_count"], 2);
        assert_eq!(projects[0]["decks"][0]["title"], "Sprint");
    }

    #[tokio::test]
    async fn tags_accept_plural_container() {
        let transport = ScriptedTransport::new(vec![Ok(json!({
            "tags": {"t-1": {"tag": "bug", "color": "red"}}
        }))]);
        let tags = client(&transport).list_tags().await.unwrap();
        assert_eq!(tags[0]["name"], "bug");
    }

    #[tokio::test]
    async fn activity_limit_is_validated_before_any_call() {
        let transport = ScriptedTransport::new(vec![]);
        assert!(client(&transport).list_activity(0).await.is_err());
        assert!(client(&transport).list_activity(500).await.is_err());
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn activity_follows_relation_order() {
        let key = r#"activities({"$limit":2,"$order":"-createdAt"})"#;
        let transport = ScriptedTransport::new(vec![Ok(json!({
            "_root": {"account": "acc"},
            "account": {"acc": {key: ["a-2", "a-1"]}},
            "activity": {
                "a-1": {"type": "cardCreated", "card": "c-1", "changer": "u-1"},
                "a-2": {"type": "cardDone", "card": "c-1", "changer": "u-1"}
            },
            "card": {"c-1": {"title": "Inventory"}},
            "user": {"u-1": {"name": "Ana"}}
        }))]);
        let activity = client(&transport).list_activity(2).await.unwrap();
        assert_eq!(activity[0]["type"], "cardDone");
        assert_eq!(activity[0]["card_title"], "Inventory");
        assert_eq!(activity[1]["changer"], "Ana");
    }

    #[tokio::test]
    async fn overview_counts_cards_per_status() {
        let key = r#"cards({"visibility":"default"})"#;
        let transport = ScriptedTransport::new(vec![Ok(json!({
            "_root": {"account": "acc"},
            "account": {"acc": {"name": "Studio", key: ["c-1", "c-2", "c-3"], "decks": ["d-1"]}},
            "card": {
                "c-1": {"status": "done"},
                "c-2": {"status": "started"},
                "c-3": {"status": "done"}
            }
        }))]);
        let overview = client(&transport).account_overview().await.unwrap();
        assert_eq!(overview["cards"], 3);
        assert_eq!(overview["decks"], 1);
        assert_eq!(overview["by_status"], json!({"done": 2, "started": 1}));
        assert_eq!(overview["account"]["name"], "Studio");
    }
}
