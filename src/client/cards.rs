//! Card reads: filtered lists, single cards, conversations

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

use super::{
    CodecksClient, account_record,
    model::{
        CardDetail, CardStatus, Priority, SortField, card_selection, days_before, normalize_card,
        parse_timestamp,
    },
};
use crate::{
    Error, Result,
    query::{Record, Selection, related_ids, relation_key, select_entities},
    security::{validate_identifier, validate_optional_text},
};

/// Owner filter value meaning "unassigned"
const UNASSIGNED: &str = "none";

/// Card list filters as accepted from callers
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CardFilter {
    /// Comma-separated statuses
    pub status: Option<String>,
    /// Comma-separated priorities
    pub priority: Option<String>,
    /// Deck name
    pub deck: Option<String>,
    /// Project name
    pub project: Option<String>,
    /// Milestone name
    pub milestone: Option<String>,
    /// Owner name, or `none` for unassigned cards
    pub owner: Option<String>,
    /// Tag name
    pub tag: Option<String>,
    /// Free text matched against title and body
    pub search: Option<String>,
    /// Only cards not updated for this many days
    pub stale_days: Option<u32>,
    /// Only children of this card
    pub parent: Option<String>,
    /// Only top-level cards
    pub hero_only: bool,
    /// Archived instead of active cards
    pub archived: bool,
    /// Attach a status histogram
    pub include_stats: bool,
    /// Sort field
    pub sort: Option<String>,
    /// Maximum number of cards returned
    pub limit: Option<usize>,
}

/// Result of [`CodecksClient::list_cards`]
#[derive(Debug, Clone, Serialize)]
pub struct CardList {
    /// Matching cards
    pub cards: Vec<Record>,
    /// Matches before `limit` was applied
    pub count: usize,
    /// Status histogram of all matches
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<BTreeMap<String, usize>>,
}

/// Filters after validation; nothing here has touched the network
struct Plan {
    statuses: Option<Vec<CardStatus>>,
    priorities: Option<Vec<Priority>>,
    deck: Option<String>,
    project: Option<String>,
    milestone: Option<String>,
    owner: Option<String>,
    tag: Option<String>,
    search: Option<String>,
    stale_cutoff: Option<DateTime<Utc>>,
    parent: Option<String>,
    hero_only: bool,
    archived: bool,
    include_stats: bool,
    sort: Option<SortField>,
    limit: Option<usize>,
}

impl Plan {
    fn new(filter: &CardFilter, now: DateTime<Utc>) -> Result<Self> {
        let parent = filter
            .parent
            .as_deref()
            .map(validate_identifier)
            .transpose()?
            .map(str::to_string);
        if filter.limit == Some(0) {
            return Err(Error::validation("limit must be at least 1"));
        }
        Ok(Self {
            statuses: filter
                .status
                .as_deref()
                .map(CardStatus::parse_list)
                .transpose()?,
            priorities: filter
                .priority
                .as_deref()
                .map(Priority::parse_list)
                .transpose()?,
            deck: validate_optional_text(filter.deck.as_deref(), "deck")?,
            project: validate_optional_text(filter.project.as_deref(), "project")?,
            milestone: validate_optional_text(filter.milestone.as_deref(), "milestone")?,
            owner: validate_optional_text(filter.owner.as_deref(), "owner")?,
            tag: validate_optional_text(filter.tag.as_deref(), "tag")?,
            search: validate_optional_text(filter.search.as_deref(), "search")?
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty()),
            stale_cutoff: filter
                .stale_days
                .map(|days| days_before(now, days, "stale_days"))
                .transpose()?,
            parent,
            hero_only: filter.hero_only,
            archived: filter.archived,
            include_stats: filter.include_stats,
            sort: filter.sort.as_deref().map(str::parse).transpose()?,
            limit: filter.limit,
        })
    }

    fn needs_lookups(&self) -> bool {
        self.deck.is_some() || self.project.is_some() || self.milestone.is_some()
    }
}

/// Ids resolved from names
#[derive(Default)]
struct Resolved {
    deck_id: Option<String>,
    project_decks: Option<HashSet<String>>,
    milestone_id: Option<String>,
}

fn str_of<'a>(card: &'a Record, key: &str) -> Option<&'a str> {
    card.get(key).and_then(Value::as_str)
}

fn has_tag(card: &Record, tag: &str) -> bool {
    let wanted = tag.trim_start_matches('#');
    card.get("tags").and_then(Value::as_array).is_some_and(|tags| {
        tags.iter()
            .filter_map(Value::as_str)
            .any(|t| t.trim_start_matches('#').eq_ignore_ascii_case(wanted))
    })
}

/// Client-side predicate; server-side filters have already been applied
fn matches(card: &Record, plan: &Plan, resolved: &Resolved) -> bool {
    if let Some(statuses) = &plan.statuses {
        let status = str_of(card, "status").and_then(|s| s.parse::<CardStatus>().ok());
        if !status.is_some_and(|s| statuses.contains(&s)) {
            return false;
        }
    }
    if let Some(priorities) = &plan.priorities {
        if !priorities.contains(&Priority::from_upstream(card.get("priority"))) {
            return false;
        }
    }
    if let Some(deck_id) = &resolved.deck_id {
        if str_of(card, "deck_id") != Some(deck_id.as_str()) {
            return false;
        }
    }
    if let Some(decks) = &resolved.project_decks {
        if !str_of(card, "deck_id").is_some_and(|d| decks.contains(d)) {
            return false;
        }
    }
    if let Some(milestone_id) = &resolved.milestone_id {
        if str_of(card, "milestone_id") != Some(milestone_id.as_str()) {
            return false;
        }
    }
    if let Some(owner) = &plan.owner {
        let matched = if owner.eq_ignore_ascii_case(UNASSIGNED) {
            str_of(card, "owner_id").is_none()
        } else {
            str_of(card, "owner_name").is_some_and(|name| name.eq_ignore_ascii_case(owner))
        };
        if !matched {
            return false;
        }
    }
    if let Some(tag) = &plan.tag {
        if !has_tag(card, tag) {
            return false;
        }
    }
    if let Some(needle) = &plan.search {
        let hit = ["title", "content"].iter().any(|field| {
            str_of(card, field).is_some_and(|text| text.to_lowercase().contains(needle.as_str()))
        });
        if !hit {
            return false;
        }
    }
    if let Some(cutoff) = plan.stale_cutoff {
        if !parse_timestamp(card.get("updated_at")).is_some_and(|updated| updated < cutoff) {
            return false;
        }
    }
    if let Some(parent) = &plan.parent {
        if str_of(card, "parent_id") != Some(parent.as_str()) {
            return false;
        }
    }
    if plan.hero_only && str_of(card, "parent_id").is_some() {
        return false;
    }
    true
}

/// Status histogram
fn status_stats(cards: &[Record]) -> BTreeMap<String, usize> {
    let mut stats = BTreeMap::new();
    for card in cards {
        let status = str_of(card, "status").unwrap_or("unknown");
        *stats.entry(status.to_string()).or_default() += 1;
    }
    stats
}

impl CodecksClient {
    /// List cards matching `filter`.
    ///
    /// Single-valued status, visibility and a resolved deck go to the
    /// server; everything else is filtered here.
    pub async fn list_cards(&self, filter: &CardFilter) -> Result<CardList> {
        self.list_cards_at(filter, Utc::now()).await
    }

    pub(crate) async fn list_cards_at(
        &self,
        filter: &CardFilter,
        now: DateTime<Utc>,
    ) -> Result<CardList> {
        let plan = Plan::new(filter, now)?;

        let mut resolved = Resolved::default();
        if plan.needs_lookups() {
            let lookups = self.fetch_lookups().await?;
            if let Some(project) = &plan.project {
                let project = lookups.project(project)?;
                resolved.project_decks =
                    Some(lookups.project_deck_ids(&project.id).into_iter().collect());
            }
            if let Some(deck) = &plan.deck {
                resolved.deck_id = Some(lookups.deck(deck)?.id.clone());
            }
            if let Some(milestone) = &plan.milestone {
                resolved.milestone_id = Some(lookups.milestone(milestone)?.id.clone());
            }
        }

        let mut server = Map::new();
        server.insert(
            "visibility".into(),
            json!(if plan.archived { "archived" } else { "default" }),
        );
        if let Some([single]) = plan.statuses.as_deref() {
            server.insert("status".into(), json!(single.as_str()));
        }
        if let Some(deck_id) = &resolved.deck_id {
            server.insert("deckId".into(), json!(deck_id));
        }
        let server = Value::Object(server);

        let detail = CardDetail {
            content: plan.search.is_some(),
            threads: false,
        };
        let cards = self.fetch_cards(&server, detail).await?;
        let fetched = cards.len();

        let mut cards: Vec<Record> = cards
            .into_iter()
            .filter(|card| matches(card, &plan, &resolved))
            .collect();

        if let Some(sort) = plan.sort {
            cards.sort_by(|a, b| sort.compare(a, b));
        }

        let count = cards.len();
        let stats = plan.include_stats.then(|| status_stats(&cards));
        if let Some(limit) = plan.limit {
            cards.truncate(limit);
        }
        debug!(fetched, matched = count, returned = cards.len(), "Listed cards");

        Ok(CardList { cards, count, stats })
    }

    /// Run a filtered card query and normalize the account's card relation
    pub(crate) async fn fetch_cards(
        &self,
        filter: &Value,
        detail: CardDetail,
    ) -> Result<Vec<Record>> {
        let response = self
            .query_account(vec![Selection::filtered(
                "cards",
                filter.clone(),
                card_selection(detail),
            )])
            .await?;

        let account = account_record(&response)?;
        let key = relation_key("cards", Some(filter));
        if !account.contains_key(&key) {
            return Err(Error::protocol(format!(
                "account record has no `{key}` relation"
            )));
        }
        let ids = related_ids(account, &key);
        Ok(select_entities(&response, "card", &ids)?
            .iter()
            .filter_map(|raw| {
                let id = raw.get("id")?.as_str()?;
                Some(normalize_card(&response, id, raw, detail))
            })
            .collect())
    }

    /// Fetch one card with its body and comment threads
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` when no card has this id, including
    /// archived cards.
    pub async fn get_card(&self, card_id: &str, detail: CardDetail) -> Result<Record> {
        let card_id = validate_identifier(card_id)?;
        let filter = json!({"cardId": card_id});
        self.fetch_cards(&filter, detail)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound(format!("card {card_id} not found")))
    }

    /// Comment threads of one card
    pub async fn list_conversations(&self, card_id: &str) -> Result<Value> {
        let card = self
            .get_card(
                card_id,
                CardDetail {
                    content: false,
                    threads: true,
                },
            )
            .await?;
        let threads = card.get("threads").cloned().unwrap_or_else(|| json!([]));
        let open = threads
            .as_array()
            .map_or(0, |t| t.iter().filter(|t| t["is_closed"] == false).count());
        Ok(json!({
            "card_id": card.get("id"),
            "title": card.get("title"),
            "open": open,
            "threads": threads,
        }))
    }
}
