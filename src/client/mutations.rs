//! Card mutations

use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use super::{
    CodecksClient, created_id,
    model::{CardDetail, CardStatus, FieldUpdate, Priority, Severity},
};
use crate::{
    Error, Result,
    security::{
        strip_control_chars, validate_identifier, validate_identifiers, validate_optional_text,
        validate_text,
    },
    transport::{ApiRequest, AuthMode},
};

/// Largest accepted effort estimate
const MAX_EFFORT: u64 = 1000;

/// Input for [`CodecksClient::create_card`]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NewCard {
    /// Card title (first line of the content)
    pub title: String,
    /// Body text
    pub content: Option<String>,
    /// Target deck name
    pub deck: Option<String>,
    /// Project the deck belongs to; alone it selects the project's first deck
    pub project: Option<String>,
    /// Severity, report endpoint only
    pub severity: Option<String>,
    /// Create through the user-report endpoint with the report token
    pub use_report: bool,
}

/// Input for [`CodecksClient::update_card`].
///
/// An absent field is left unchanged; the string `"null"` clears it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CardUpdate {
    /// New status
    pub status: Option<String>,
    /// `a`, `b`, `c` or `null`
    pub priority: Option<String>,
    /// Effort estimate, number or `"null"`
    pub effort: Option<Value>,
    /// Owner name or `"null"`
    pub owner: Option<String>,
    /// Milestone name or `"null"`
    pub milestone: Option<String>,
    /// Target deck name
    pub deck: Option<String>,
    /// Comma-separated tags or `"null"`
    pub tags: Option<String>,
    /// Parent card id or `"null"` to detach
    pub parent: Option<String>,
    /// New title
    pub title: Option<String>,
    /// New body or `"null"`
    pub content: Option<String>,
}

/// Validated update; nothing resolved yet
#[derive(Debug)]
struct ParsedUpdate {
    status: Option<CardStatus>,
    priority: FieldUpdate<Priority>,
    effort: FieldUpdate<u64>,
    owner: FieldUpdate<String>,
    milestone: FieldUpdate<String>,
    deck: Option<String>,
    tags: FieldUpdate<Vec<String>>,
    parent: FieldUpdate<String>,
    title: Option<String>,
    content: FieldUpdate<String>,
}

fn parse_effort(value: Option<&Value>) -> Result<FieldUpdate<u64>> {
    let invalid = || Error::validation(format!("effort must be a whole number up to {MAX_EFFORT}"));
    let effort = match value {
        None | Some(Value::Null) => return Ok(FieldUpdate::Keep),
        Some(Value::String(s)) if s.trim().eq_ignore_ascii_case("null") => {
            return Ok(FieldUpdate::Clear);
        }
        Some(Value::String(s)) => s.trim().parse::<u64>().map_err(|_| invalid())?,
        Some(Value::Number(n)) => n.as_u64().ok_or_else(invalid)?,
        Some(_) => return Err(invalid()),
    };
    if effort > MAX_EFFORT {
        return Err(invalid());
    }
    Ok(FieldUpdate::Set(effort))
}

impl ParsedUpdate {
    fn new(update: &CardUpdate) -> Result<Self> {
        let title = match update.title.as_deref() {
            Some(t) if t.trim().eq_ignore_ascii_case("null") => {
                return Err(Error::validation("title cannot be cleared"));
            }
            Some(t) => Some(non_empty_title(t)?),
            None => None,
        };
        Ok(Self {
            status: update.status.as_deref().map(str::parse).transpose()?,
            priority: FieldUpdate::from_arg(update.priority.as_deref()).try_map(|p| p.parse())?,
            effort: parse_effort(update.effort.as_ref())?,
            owner: FieldUpdate::from_arg(update.owner.as_deref())
                .try_map(|o| validate_text(&o, "owner"))?,
            milestone: FieldUpdate::from_arg(update.milestone.as_deref())
                .try_map(|m| validate_text(&m, "milestone"))?,
            deck: validate_optional_text(update.deck.as_deref(), "deck")?,
            tags: FieldUpdate::from_arg(update.tags.as_deref()).try_map(|t| parse_tags(&t))?,
            parent: FieldUpdate::from_arg(update.parent.as_deref())
                .try_map(|p| validate_identifier(&p).map(str::to_string))?,
            title,
            content: FieldUpdate::from_arg(update.content.as_deref())
                .try_map(|c| validate_text(&c, "content"))?,
        })
    }

    fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.priority.is_keep()
            && self.effort.is_keep()
            && self.owner.is_keep()
            && self.milestone.is_keep()
            && self.deck.is_none()
            && self.tags.is_keep()
            && self.parent.is_keep()
            && self.title.is_none()
            && self.content.is_keep()
    }

    fn touches_content(&self) -> bool {
        self.title.is_some() || !self.content.is_keep()
    }

    fn needs_lookups(&self) -> bool {
        matches!(self.owner, FieldUpdate::Set(_))
            || matches!(self.milestone, FieldUpdate::Set(_))
            || self.deck.is_some()
    }
}

pub(super) fn non_empty_title(title: &str) -> Result<String> {
    let title = validate_text(title, "title")?;
    let title = title.trim();
    if title.is_empty() {
        return Err(Error::validation("title must not be empty"));
    }
    if title.contains('\n') {
        return Err(Error::validation("title must be a single line"));
    }
    Ok(title.to_string())
}

fn parse_tags(input: &str) -> Result<Vec<String>> {
    let mut tags: Vec<String> = Vec::new();
    for tag in input.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let tag = validate_text(tag.trim_start_matches('#'), "tag")?;
        if !tags.iter().any(|t| t.eq_ignore_ascii_case(&tag)) {
            tags.push(tag);
        }
    }
    Ok(tags)
}

/// Card content is the title line followed by the body
pub(crate) fn compose_content(title: &str, body: Option<&str>) -> String {
    match body.map(str::trim).filter(|b| !b.is_empty()) {
        Some(body) => format!("{title}\n\n{body}"),
        None => title.to_string(),
    }
}

/// Split content into title line and body
fn split_content(content: &str) -> (&str, Option<&str>) {
    match content.split_once('\n') {
        Some((title, body)) => {
            let body = body.trim_start_matches(['\n', '\r']);
            (title.trim_end(), (!body.is_empty()).then_some(body))
        }
        None => (content, None),
    }
}

fn clearable<T>(update: &FieldUpdate<T>, f: impl FnOnce(&T) -> Value) -> Option<Value> {
    match update {
        FieldUpdate::Keep => None,
        FieldUpdate::Clear => Some(Value::Null),
        FieldUpdate::Set(v) => Some(f(v)),
    }
}

impl CodecksClient {
    /// Create a card, either in a deck or through the user-report endpoint
    pub async fn create_card(&self, new: &NewCard) -> Result<Value> {
        let title = non_empty_title(&new.title)?;
        let body = validate_optional_text(new.content.as_deref(), "content")?;
        let content = compose_content(&title, body.as_deref());

        if new.use_report {
            return self.create_via_report(new, &title, &content).await;
        }
        if new.severity.is_some() {
            return Err(Error::validation(
                "severity is only supported together with use_report",
            ));
        }

        let deck = validate_optional_text(new.deck.as_deref(), "deck")?;
        let project = validate_optional_text(new.project.as_deref(), "project")?;
        let deck_id = if deck.is_some() || project.is_some() {
            let lookups = self.fetch_lookups().await?;
            let project_id = project
                .as_deref()
                .map(|p| lookups.project(p).map(|p| p.id.clone()))
                .transpose()?;
            match (&deck, &project_id) {
                (Some(deck), pid) => Some(lookups.deck_in(deck, pid.as_deref())?.id.clone()),
                (None, Some(pid)) => Some(
                    lookups
                        .project_deck_ids(pid)
                        .into_iter()
                        .next()
                        .ok_or_else(|| Error::NotFound(format!("project {pid} has no decks")))?,
                ),
                (None, None) => None,
            }
        } else {
            None
        };

        let card_id = self.create_raw(&content, deck_id.as_deref(), None).await?;
        info!(card_id = %card_id, "Created card");
        Ok(json!({"card_id": card_id, "title": title, "deck_id": deck_id}))
    }

    async fn create_via_report(&self, new: &NewCard, title: &str, content: &str) -> Result<Value> {
        if new.deck.is_some() || new.project.is_some() {
            return Err(Error::validation(
                "deck and project cannot be combined with use_report",
            ));
        }
        let severity = new
            .severity
            .as_deref()
            .map(str::parse::<Severity>)
            .transpose()?
            .unwrap_or(Severity::None);
        let token = self
            .config
            .codecks
            .report_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                Error::Setup(
                    "CODECKS_REPORT_TOKEN is not set; it is required for use_report".into(),
                )
            })?;

        let request = ApiRequest::dispatch(
            self.report_url(token),
            json!({"content": content, "severity": severity.to_upstream()}),
        )
        .with_auth(AuthMode::None);
        let result = self.transport.request(request).await?;
        let card_id = created_id(&result)?;
        info!(card_id = %card_id, "Created card through report endpoint");
        Ok(json!({"card_id": card_id, "title": title, "via": "report"}))
    }

    /// Dispatch `cards/create` and return the new id
    pub(crate) async fn create_raw(
        &self,
        content: &str,
        deck_id: Option<&str>,
        parent_id: Option<&str>,
    ) -> Result<String> {
        let payload = json!({
            "content": content,
            "deckId": deck_id,
            "parentCardId": parent_id,
            "userId": self.config.codecks.user_id,
            "assigneeId": null,
            "priority": null,
            "effort": null,
            "putOnHand": false,
            "masterTags": [],
            "attachments": [],
            "childCards": [],
        });
        let result = self.dispatch("cards/create", payload).await?;
        created_id(&result)
    }

    /// Resolve a parsed update into upstream field names
    async fn update_fields(&self, parsed: &ParsedUpdate) -> Result<Map<String, Value>> {
        let lookups = if parsed.needs_lookups() {
            Some(self.fetch_lookups().await?)
        } else {
            None
        };

        let mut fields = Map::new();
        if let Some(status) = parsed.status {
            fields.insert("status".into(), json!(status.as_str()));
        }
        if let Some(v) = clearable(&parsed.priority, |p| p.to_upstream()) {
            fields.insert("priority".into(), v);
        }
        if let Some(v) = clearable(&parsed.effort, |e| json!(e)) {
            fields.insert("effort".into(), v);
        }
        if let Some(v) = clearable(&parsed.tags, |t| json!(t)) {
            // clearing tags means an empty tag list
            fields.insert("masterTags".into(), if v.is_null() { json!([]) } else { v });
        }
        if let Some(v) = clearable(&parsed.parent, |p| json!(p)) {
            fields.insert("parentCardId".into(), v);
        }
        if let Some(lookups) = &lookups {
            if let FieldUpdate::Set(owner) = &parsed.owner {
                fields.insert("assigneeId".into(), json!(lookups.user(owner)?.id));
            }
            if let FieldUpdate::Set(milestone) = &parsed.milestone {
                fields.insert("milestoneId".into(), json!(lookups.milestone(milestone)?.id));
            }
            if let Some(deck) = &parsed.deck {
                fields.insert("deckId".into(), json!(lookups.deck(deck)?.id));
            }
        }
        if matches!(parsed.owner, FieldUpdate::Clear) {
            fields.insert("assigneeId".into(), Value::Null);
        }
        if matches!(parsed.milestone, FieldUpdate::Clear) {
            fields.insert("milestoneId".into(), Value::Null);
        }
        Ok(fields)
    }

    async fn send_update(&self, card_id: &str, fields: &Map<String, Value>) -> Result<Value> {
        let mut payload = fields.clone();
        payload.insert("id".into(), json!(card_id));
        self.dispatch("cards/update", Value::Object(payload)).await
    }

    /// Apply the supplied fields to one card
    pub async fn update_card(&self, card_id: &str, update: &CardUpdate) -> Result<Value> {
        let card_id = validate_identifier(card_id)?;
        let parsed = ParsedUpdate::new(update)?;
        if parsed.is_empty() {
            return Err(Error::validation("no fields to update"));
        }

        let mut fields = self.update_fields(&parsed).await?;
        if parsed.touches_content() {
            let current = self
                .get_card(
                    card_id,
                    CardDetail {
                        content: true,
                        threads: false,
                    },
                )
                .await?;
            let existing = current
                .get("content")
                .and_then(Value::as_str)
                .map(strip_control_chars)
                .unwrap_or_default();
            let (old_title, old_body) = split_content(&existing);
            let title = parsed.title.as_deref().unwrap_or(old_title);
            let body = match &parsed.content {
                FieldUpdate::Keep => old_body,
                FieldUpdate::Clear => None,
                FieldUpdate::Set(body) => Some(body.as_str()),
            };
            fields.insert("content".into(), json!(compose_content(title, body)));
        }

        self.send_update(card_id, &fields).await?;
        let changed: Vec<&String> = fields.keys().collect();
        info!(card_id, fields = ?changed, "Updated card");
        Ok(json!({"card_id": card_id, "updated_fields": changed}))
    }

    /// Apply the same update to several cards, one call per card.
    ///
    /// Stops at the first failure unless `continue_on_error` is set.
    /// `ok` is true when at least one card was updated.
    pub async fn update_cards_batch(
        &self,
        card_ids: &[String],
        update: &CardUpdate,
        continue_on_error: bool,
    ) -> Result<Value> {
        let card_ids = validate_identifiers(card_ids)?;
        let parsed = ParsedUpdate::new(update)?;
        if parsed.is_empty() {
            return Err(Error::validation("no fields to update"));
        }
        if parsed.touches_content() {
            return Err(Error::validation(
                "title and content cannot be changed in a batch update",
            ));
        }
        let fields = self.update_fields(&parsed).await?;

        let mut results = Vec::with_capacity(card_ids.len());
        let mut updated = 0usize;
        let mut failed = 0usize;
        for card_id in &card_ids {
            match self.send_update(card_id, &fields).await {
                Ok(_) => {
                    updated += 1;
                    results.push(json!({"card_id": card_id, "ok": true}));
                }
                Err(e) => {
                    failed += 1;
                    warn!(card_id = %card_id, error = %e, "Batch update failed");
                    results.push(json!({
                        "card_id": card_id,
                        "ok": false,
                        "error": e.to_string(),
                        "error_type": e.kind(),
                    }));
                    if !continue_on_error {
                        break;
                    }
                }
            }
        }

        let mut summary = json!({
            "ok": updated > 0,
            "updated": updated,
            "failed": failed,
            "skipped": card_ids.len() - results.len(),
            "results": results,
        });
        if updated == 0 {
            summary["error"] = json!(format!("none of {} cards were updated", card_ids.len()));
        }
        Ok(summary)
    }

    /// Set cards to `done`
    pub async fn mark_done(&self, card_ids: &[String]) -> Result<Value> {
        self.set_status(card_ids, CardStatus::Done).await
    }

    /// Set cards to `started`
    pub async fn mark_started(&self, card_ids: &[String]) -> Result<Value> {
        self.set_status(card_ids, CardStatus::Started).await
    }

    async fn set_status(&self, card_ids: &[String], status: CardStatus) -> Result<Value> {
        let update = CardUpdate {
            status: Some(status.as_str().to_string()),
            ..CardUpdate::default()
        };
        self.update_cards_batch(card_ids, &update, true).await
    }

    async fn set_visibility(&self, card_id: &str, visibility: &str) -> Result<Value> {
        self.dispatch(
            "cards/update",
            json!({"id": card_id, "visibility": visibility}),
        )
        .await
    }

    /// Move a card to the archive
    pub async fn archive_card(&self, card_id: &str) -> Result<Value> {
        let card_id = validate_identifier(card_id)?;
        self.set_visibility(card_id, "archived").await?;
        Ok(json!({"card_id": card_id, "archived": true}))
    }

    /// Restore an archived card
    pub async fn unarchive_card(&self, card_id: &str) -> Result<Value> {
        let card_id = validate_identifier(card_id)?;
        self.set_visibility(card_id, "default").await?;
        Ok(json!({"card_id": card_id, "archived": false}))
    }

    /// Archive, then permanently remove a card.
    ///
    /// # Errors
    ///
    /// If removal fails after the archive step, returns
    /// `Error::PartialFailure`: the card stays archived.
    pub async fn delete_card(&self, card_id: &str) -> Result<Value> {
        let card_id = validate_identifier(card_id)?;
        self.set_visibility(card_id, "archived").await?;
        if let Err(e) = self
            .dispatch(
                "cards/bulkUpdate",
                json!({"ids": [card_id], "visibility": "deleted"}),
            )
            .await
        {
            warn!(card_id, error = %e, "Card archived but removal failed");
            return Err(Error::PartialFailure {
                completed: format!("card {card_id} was archived but is not deleted"),
                source: Box::new(e),
            });
        }
        info!(card_id, "Deleted card");
        Ok(json!({"card_id": card_id, "deleted": true}))
    }
}
