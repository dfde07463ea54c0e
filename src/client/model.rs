//! Domain enums and card normalization

use std::{cmp::Ordering, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::{
    Error, Result,
    query::{Record, Selection, related_ids, resolve_ref},
};

/// Card workflow status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardStatus {
    /// Not started
    NotStarted,
    /// Started
    Started,
    /// Done
    Done,
    /// Blocked
    Blocked,
    /// Waiting for review
    InReview,
    /// In progress
    InProgress,
}

impl CardStatus {
    /// All statuses, in workflow order
    pub const ALL: [Self; 6] = [
        Self::NotStarted,
        Self::Started,
        Self::InProgress,
        Self::InReview,
        Self::Blocked,
        Self::Done,
    ];

    /// Wire name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Started => "started",
            Self::Done => "done",
            Self::Blocked => "blocked",
            Self::InReview => "in_review",
            Self::InProgress => "in_progress",
        }
    }

    /// Parse a comma-separated list such as `"started,blocked"`
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` for an unknown value or an empty list.
    pub fn parse_list(input: &str) -> Result<Vec<Self>> {
        parse_csv(input, "status")
    }
}

impl fmt::Display for CardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CardStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == wanted)
            .ok_or_else(|| {
                Error::validation(format!(
                    "unknown status {s:?}; expected one of: {}",
                    names(&Self::ALL, Self::as_str)
                ))
            })
    }
}

/// Card priority; `None` is stored upstream as null
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// High
    A,
    /// Medium
    B,
    /// Low
    C,
    /// Unset
    None,
}

impl Priority {
    /// All priorities, highest first
    pub const ALL: [Self; 4] = [Self::A, Self::B, Self::C, Self::None];

    /// Wire name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::A => "a",
            Self::B => "b",
            Self::C => "c",
            Self::None => "none",
        }
    }

    /// Upstream representation
    #[must_use]
    pub fn to_upstream(self) -> Value {
        match self {
            Self::None => Value::Null,
            other => Value::String(other.as_str().to_string()),
        }
    }

    /// Read the upstream field; null and unknown values count as unset
    #[must_use]
    pub fn from_upstream(value: Option<&Value>) -> Self {
        value
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
            .unwrap_or(Self::None)
    }

    /// Parse a comma-separated list such as `"a,b"`
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` for an unknown value or an empty list.
    pub fn parse_list(input: &str) -> Result<Vec<Self>> {
        parse_csv(input, "priority")
    }
}

impl FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == wanted)
            .ok_or_else(|| {
                Error::validation(format!(
                    "unknown priority {s:?}; expected one of: {}",
                    names(&Self::ALL, Self::as_str)
                ))
            })
    }
}

/// Severity accepted by the user-report endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Critical
    Critical,
    /// High
    High,
    /// Low
    Low,
    /// Unset
    None,
}

impl Severity {
    const ALL: [Self; 4] = [Self::Critical, Self::High, Self::Low, Self::None];

    fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Low => "low",
            Self::None => "none",
        }
    }

    /// Upstream representation
    #[must_use]
    pub fn to_upstream(self) -> Value {
        match self {
            Self::None => Value::Null,
            other => Value::String(other.as_str().to_string()),
        }
    }
}

impl FromStr for Severity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == wanted)
            .ok_or_else(|| {
                Error::validation(format!(
                    "unknown severity {s:?}; expected one of: {}",
                    names(&Self::ALL, Self::as_str)
                ))
            })
    }
}

/// Discipline lanes a feature is split into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    /// Programming
    Code,
    /// Game and UX design
    Design,
    /// Visual assets
    Art,
    /// Sound and music
    Audio,
}

impl Lane {
    /// Display label used in lane card titles
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Code => "Code",
            Self::Design => "Design",
            Self::Art => "Art",
            Self::Audio => "Audio",
        }
    }

    /// Checklist seeded into the lane card body
    #[must_use]
    pub fn checklist(self) -> &'static str {
        match self {
            Self::Code => "- [] Implementation\n- [] Tests\n- [] Review",
            Self::Design => "- [] Requirements\n- [] Flow and balancing\n- [] Sign-off",
            Self::Art => "- [] Concept\n- [] Final assets\n- [] Integration",
            Self::Audio => "- [] Sound design\n- [] Mix\n- [] Integration",
        }
    }
}

/// Optional field update: absent keeps, the string `"null"` clears
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FieldUpdate<T> {
    /// Leave unchanged
    #[default]
    Keep,
    /// Clear the field
    Clear,
    /// Set a new value
    Set(T),
}

impl FieldUpdate<String> {
    /// Interpret a raw argument
    #[must_use]
    pub fn from_arg(arg: Option<&str>) -> Self {
        match arg {
            None => Self::Keep,
            Some(v) if v.trim().eq_ignore_ascii_case("null") => Self::Clear,
            Some(v) => Self::Set(v.to_string()),
        }
    }
}

impl<T> FieldUpdate<T> {
    /// Fallible map over the `Set` value
    pub fn try_map<U>(self, f: impl FnOnce(T) -> Result<U>) -> Result<FieldUpdate<U>> {
        Ok(match self {
            Self::Keep => FieldUpdate::Keep,
            Self::Clear => FieldUpdate::Clear,
            Self::Set(v) => FieldUpdate::Set(f(v)?),
        })
    }

    /// Whether anything changes
    #[must_use]
    pub fn is_keep(&self) -> bool {
        matches!(self, Self::Keep)
    }
}

/// Sort keys for card lists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    /// Last update, newest first
    Updated,
    /// Creation, newest first
    Created,
    /// Title
    Title,
    /// Status
    Status,
    /// Priority, `a` first
    Priority,
    /// Effort, smallest first
    Effort,
    /// Deck name
    Deck,
    /// Owner name
    Owner,
}

impl FromStr for SortField {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "updated" | "updated_at" => Self::Updated,
            "created" | "created_at" => Self::Created,
            "title" => Self::Title,
            "status" => Self::Status,
            "priority" => Self::Priority,
            "effort" => Self::Effort,
            "deck" | "deck_name" => Self::Deck,
            "owner" | "owner_name" => Self::Owner,
            other => {
                return Err(Error::validation(format!(
                    "unknown sort field {other:?}; expected updated, created, title, status, \
                     priority, effort, deck or owner"
                )));
            }
        })
    }
}

impl SortField {
    /// Newest-first fields sort descending
    #[must_use]
    pub fn descending(self) -> bool {
        matches!(self, Self::Updated | Self::Created)
    }

    /// Compare two normalized cards; missing values always sort last
    #[must_use]
    pub fn compare(self, a: &Record, b: &Record) -> Ordering {
        let key = match self {
            Self::Updated => "updated_at",
            Self::Created => "created_at",
            Self::Title => "title",
            Self::Status => "status",
            Self::Priority => {
                let pa = Priority::from_upstream(a.get("priority"));
                let pb = Priority::from_upstream(b.get("priority"));
                return pa.cmp(&pb);
            }
            Self::Effort => {
                let ea = a.get("effort").and_then(Value::as_f64);
                let eb = b.get("effort").and_then(Value::as_f64);
                return missing_last(ea, eb, |x, y| x.total_cmp(y));
            }
            Self::Deck => "deck_name",
            Self::Owner => "owner_name",
        };
        let sa = a.get(key).and_then(Value::as_str);
        let sb = b.get(key).and_then(Value::as_str);
        if self.descending() {
            missing_last(sa, sb, |x, y| y.cmp(x))
        } else {
            missing_last(sa, sb, |x, y| compare_text(x, y))
        }
    }
}

fn missing_last<T>(a: Option<T>, b: Option<T>, cmp: impl Fn(&T, &T) -> Ordering) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => cmp(&x, &y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Case-insensitive comparison with a case-sensitive tiebreak
fn compare_text(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

fn parse_csv<T: FromStr<Err = Error> + PartialEq>(input: &str, field: &str) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for part in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let value = part.parse()?;
        if !out.contains(&value) {
            out.push(value);
        }
    }
    if out.is_empty() {
        return Err(Error::validation(format!("{field} filter is empty")));
    }
    Ok(out)
}

fn names<T: Copy>(all: &[T], name: fn(T) -> &'static str) -> String {
    all.iter().map(|v| name(*v)).collect::<Vec<_>>().join(", ")
}

/// Parse an upstream timestamp
#[must_use]
pub fn parse_timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    let raw = value?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Longest look-back accepted for day windows
pub const MAX_WINDOW_DAYS: u32 = 3650;

/// The instant `days` days before `now`
///
/// # Errors
///
/// Returns `Error::Validation` naming `field` when `days` is outside
/// `1..=MAX_WINDOW_DAYS`.
pub fn days_before(now: DateTime<Utc>, days: u32, field: &str) -> Result<DateTime<Utc>> {
    let invalid =
        || Error::validation(format!("{field} must be between 1 and {MAX_WINDOW_DAYS}"));
    if days == 0 || days > MAX_WINDOW_DAYS {
        return Err(invalid());
    }
    chrono::Duration::try_days(i64::from(days))
        .and_then(|span| now.checked_sub_signed(span))
        .ok_or_else(invalid)
}

/// How much of a card to fetch and render
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CardDetail {
    /// Include the body text
    pub content: bool,
    /// Include comment threads
    pub threads: bool,
}

/// Card attributes selected by every card query
#[must_use]
pub fn card_selection(detail: CardDetail) -> Vec<Selection> {
    let mut fields = Selection::fields([
        "title",
        "status",
        "priority",
        "effort",
        "createdAt",
        "lastUpdatedAt",
        "visibility",
        "masterTags",
    ]);
    fields.push(Selection::relation(
        "deck",
        vec![
            Selection::field("title"),
            Selection::relation("project", Selection::fields(["name"])),
        ],
    ));
    fields.push(Selection::relation("assignee", Selection::fields(["name"])));
    fields.push(Selection::relation("milestone", Selection::fields(["name"])));
    fields.push(Selection::relation("parentCard", Selection::fields(["title"])));
    fields.push(Selection::relation(
        "childCards",
        Selection::fields(["title", "status"]),
    ));
    if detail.content {
        fields.push(Selection::field("content"));
    }
    if detail.threads {
        fields.push(Selection::relation(
            "resolvables",
            vec![
                Selection::field("isClosed"),
                Selection::field("createdAt"),
                Selection::relation("creator", Selection::fields(["name"])),
                Selection::relation(
                    "entries",
                    vec![
                        Selection::field("content"),
                        Selection::field("createdAt"),
                        Selection::relation("author", Selection::fields(["name"])),
                    ],
                ),
            ],
        ));
    }
    fields
}

fn single_ref(record: &Record, key: &str) -> Option<String> {
    related_ids(record, key).into_iter().next()
}

fn ref_field(response: &Value, entity: &str, id: Option<&str>, field: &str) -> Value {
    id.and_then(|id| resolve_ref(response, entity, id))
        .and_then(|r| r.get(field))
        .cloned()
        .unwrap_or(Value::Null)
}

fn opt_string(value: Option<String>) -> Value {
    value.map_or(Value::Null, Value::String)
}

/// Render an upstream card record into the flat card shape returned by
/// every card-producing operation.
#[must_use]
pub fn normalize_card(response: &Value, id: &str, raw: &Record, detail: CardDetail) -> Record {
    let deck_id = single_ref(raw, "deck");
    let owner_id = single_ref(raw, "assignee");
    let milestone_id = single_ref(raw, "milestone");
    let parent_id = single_ref(raw, "parentCard");
    let project_id = deck_id
        .as_deref()
        .and_then(|d| resolve_ref(response, "deck", d))
        .and_then(|deck| single_ref(deck, "project"));

    let sub_cards: Vec<Value> = related_ids(raw, "childCards")
        .into_iter()
        .map(|child| {
            json!({
                "id": child,
                "title": ref_field(response, "card", Some(&child), "title"),
                "status": ref_field(response, "card", Some(&child), "status"),
            })
        })
        .collect();

    let mut card = Map::new();
    card.insert("id".into(), json!(id));
    card.insert("title".into(), raw.get("title").cloned().unwrap_or(Value::Null));
    card.insert("status".into(), raw.get("status").cloned().unwrap_or(Value::Null));
    card.insert(
        "priority".into(),
        json!(Priority::from_upstream(raw.get("priority")).as_str()),
    );
    card.insert("effort".into(), raw.get("effort").cloned().unwrap_or(Value::Null));
    card.insert(
        "deck_name".into(),
        ref_field(response, "deck", deck_id.as_deref(), "title"),
    );
    card.insert("deck_id".into(), opt_string(deck_id));
    card.insert(
        "project_name".into(),
        ref_field(response, "project", project_id.as_deref(), "name"),
    );
    card.insert("project_id".into(), opt_string(project_id));
    card.insert(
        "owner_name".into(),
        ref_field(response, "user", owner_id.as_deref(), "name"),
    );
    card.insert("owner_id".into(), opt_string(owner_id));
    card.insert(
        "milestone_name".into(),
        ref_field(response, "milestone", milestone_id.as_deref(), "name"),
    );
    card.insert("milestone_id".into(), opt_string(milestone_id));
    card.insert("parent_id".into(), opt_string(parent_id));
    card.insert(
        "tags".into(),
        raw.get("masterTags").cloned().unwrap_or_else(|| json!([])),
    );
    card.insert(
        "archived".into(),
        json!(raw.get("visibility").and_then(Value::as_str) == Some("archived")),
    );
    card.insert(
        "created_at".into(),
        raw.get("createdAt").cloned().unwrap_or(Value::Null),
    );
    card.insert(
        "updated_at".into(),
        raw.get("lastUpdatedAt").cloned().unwrap_or(Value::Null),
    );
    card.insert("sub_cards".into(), Value::Array(sub_cards));

    if detail.content {
        card.insert("content".into(), raw.get("content").cloned().unwrap_or(Value::Null));
    }
    if detail.threads {
        card.insert("threads".into(), Value::Array(threads(response, raw)));
    }
    card
}

fn threads(response: &Value, raw: &Record) -> Vec<Value> {
    related_ids(raw, "resolvables")
        .into_iter()
        .filter_map(|thread_id| {
            let thread = resolve_ref(response, "resolvable", &thread_id)?;
            let creator = single_ref(thread, "creator");
            let messages: Vec<Value> = related_ids(thread, "entries")
                .into_iter()
                .filter_map(|entry_id| {
                    let entry = resolve_ref(response, "resolvableEntry", &entry_id)?;
                    let author = single_ref(entry, "author");
                    Some(json!({
                        "author": ref_field(response, "user", author.as_deref(), "name"),
                        "content": entry.get("content").cloned().unwrap_or(Value::Null),
                        "created_at": entry.get("createdAt").cloned().unwrap_or(Value::Null),
                    }))
                })
                .collect();
            Some(json!({
                "id": thread_id,
                "is_closed": thread.get("isClosed").and_then(Value::as_bool).unwrap_or(false),
                "creator": ref_field(response, "user", creator.as_deref(), "name"),
                "created_at": thread.get("createdAt").cloned().unwrap_or(Value::Null),
                "messages": messages,
            }))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(value: Value) -> Record {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn status_lists_parse_and_reject_unknown_values() {
        assert_eq!(
            CardStatus::parse_list("started, blocked,started").unwrap(),
            vec![CardStatus::Started, CardStatus::Blocked]
        );
        assert_eq!("IN_REVIEW".parse::<CardStatus>().unwrap(), CardStatus::InReview);
        let err = CardStatus::parse_list("started,finished").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("finished"));
        assert!(CardStatus::parse_list(" , ").is_err());
    }

    #[test]
    fn day_windows_are_bounded() {
        let now: DateTime<Utc> = "2026-10-18T12:00:00Z".parse().unwrap();
        let week_ago: DateTime<Utc> = "2026-10-11T12:00:00Z".parse().unwrap();
        assert_eq!(days_before(now, 7, "stale_days").unwrap(), week_ago);
        assert!(days_before(now, MAX_WINDOW_DAYS, "stale_days").is_ok());
        for days in [0, MAX_WINDOW_DAYS + 1, u32::MAX] {
            let err = days_before(now, days, "stale_days").unwrap_err();
            assert!(err.to_string().contains("stale_days must be between 1 and"));
        }
    }

    #[test]
    fn priority_round_trips_through_upstream_null() {
        assert_eq!(Priority::None.to_upstream(), Value::Null);
        assert_eq!(Priority::from_upstream(Some(&Value::Null)), Priority::None);
        assert_eq!(Priority::from_upstream(Some(&json!("b"))), Priority::B);
        assert!("d".parse::<Priority>().is_err());
    }

    #[test]
    fn field_update_distinguishes_absent_from_null() {
        assert_eq!(FieldUpdate::from_arg(None), FieldUpdate::Keep);
        assert_eq!(FieldUpdate::from_arg(Some("null")), FieldUpdate::Clear);
        assert_eq!(
            FieldUpdate::from_arg(Some("a")),
            FieldUpdate::Set("a".to_string())
        );
    }

    #[test]
    fn sorting_puts_missing_values_last() {
        let a = record(json!({"title": "beta", "updated_at": "2026-01-02T00:00:00Z"}));
        let b = record(json!({"title": "Alpha", "updated_at": null}));
        let c = record(json!({"title": null, "updated_at": "2026-03-01T00:00:00Z"}));

        let mut cards = vec![a.clone(), b.clone(), c.clone()];
        cards.sort_by(|x, y| SortField::Title.compare(x, y));
        assert_eq!(cards, vec![b.clone(), a.clone(), c.clone()]);

        let mut cards = vec![a.clone(), b.clone(), c.clone()];
        cards.sort_by(|x, y| SortField::Updated.compare(x, y));
        assert_eq!(cards, vec![c, a, b]);
    }

    #[test]
    fn unknown_sort_field_is_rejected() {
        assert!("velocity".parse::<SortField>().is_err());
        assert_eq!("Created".parse::<SortField>().unwrap(), SortField::Created);
    }

    #[test]
    fn normalizes_references_children_and_threads() {
        let response = json!({
            "card": {
                "c-1": {
                    "title": "Inventory",
                    "status": "started",
                    "priority": "a",
                    "effort": 3,
                    "deck": "d-1",
                    "assignee": "u-1",
                    "milestone": null,
                    "childCards": ["c-2"],
                    "resolvables": ["r-1"],
                    "masterTags": ["ui"],
                    "visibility": "default",
                    "content": "Inventory\n\nGrid layout",
                    "lastUpdatedAt": "2026-10-01T10:00:00Z"
                },
                "c-2": {"title": "[Code] Inventory", "status": "not_started"}
            },
            "deck": {"d-1": {"title": "Sprint", "project": "p-1"}},
            "project": {"p-1": {"name": "Game"}},
            "user": {"u-1": {"name": "Ana"}, "u-2": {"name": "Bo"}},
            "resolvable": {"r-1": {"isClosed": false, "creator": "u-2", "entries": ["e-1"]}},
            "resolvableEntry": {"e-1": {"content": "Looks good", "author": "u-1"}}
        });
        let raw = response["card"]["c-1"].as_object().unwrap();
        let card = normalize_card(
            &response,
            "c-1",
            raw,
            CardDetail {
                content: true,
                threads: true,
            },
        );

        assert_eq!(card["deck_name"], "Sprint");
        assert_eq!(card["project_name"], "Game");
        assert_eq!(card["owner_name"], "Ana");
        assert_eq!(card["milestone_name"], Value::Null);
        assert_eq!(card["priority"], "a");
        assert_eq!(card["archived"], false);
        assert_eq!(
            card["sub_cards"],
            json!([{"id": "c-2", "title": "[Code] Inventory", "status": "not_started"}])
        );
        assert_eq!(card["threads"][0]["creator"], "Bo");
        assert_eq!(card["threads"][0]["messages"][0]["author"], "Ana");
        assert_eq!(card["content"], "Inventory\n\nGrid layout");
    }

    #[test]
    fn lean_detail_omits_content_and_threads() {
        let response = json!({"card": {"c-1": {"title": "x"}}});
        let raw = response["card"]["c-1"].as_object().unwrap();
        let card = normalize_card(&response, "c-1", raw, CardDetail::default());
        assert!(!card.contains_key("content"));
        assert!(!card.contains_key("threads"));
        assert_eq!(card["priority"], "none");
        assert_eq!(card["tags"], json!([]));
    }
}
