//! Tool catalogue and argument dispatch
//!
//! Each tool maps its JSON arguments onto one [`CodecksClient`] operation.
//! Results are sanitized, normalized and finalized in the configured
//! contract mode; failures become error envelopes.

use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::{
    Error, Result,
    client::{
        CardDetail, CardFilter, CardUpdate, CodecksClient, NewCard, PmFocusOptions,
        ScaffoldRequest, SplitRequest, StandupOptions,
    },
    config::ContractMode,
    contract,
    protocol::{Tool, ToolAnnotations},
    query::Record,
    security::{sanitize_card, sanitize_cards, sanitize_fields},
};

/// Side effects of a tool, surfaced as annotations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
    /// Safe to repeat
    Idempotent,
    Destructive,
}

impl Access {
    fn annotations(self) -> ToolAnnotations {
        ToolAnnotations {
            read_only_hint: Some(self == Self::Read),
            destructive_hint: Some(self == Self::Destructive),
            idempotent_hint: Some(matches!(self, Self::Read | Self::Idempotent)),
            open_world_hint: Some(true),
        }
    }
}

fn tool(name: &str, description: &str, access: Access, input_schema: Value) -> Tool {
    Tool {
        name: name.to_string(),
        description: description.to_string(),
        input_schema,
        annotations: Some(access.annotations()),
    }
}

fn no_args() -> Value {
    json!({"type": "object", "properties": {}})
}

fn card_id_schema() -> Value {
    json!({"type": "string", "description": "Card id (UUID)"})
}

fn card_ids_schema() -> Value {
    json!({
        "type": "array",
        "items": {"type": "string"},
        "minItems": 1,
        "description": "Card ids (UUIDs)"
    })
}

/// Arguments: a single `card_id`
fn card_id_args() -> Value {
    json!({"type": "object", "properties": {"card_id": card_id_schema()}, "required": ["card_id"]})
}

fn card_ids_args() -> Value {
    json!({
        "type": "object",
        "properties": {"card_ids": card_ids_schema()},
        "required": ["card_ids"]
    })
}

fn lane_properties() -> Value {
    json!({
        "code_deck": {"type": "string", "description": "Deck for the code lane"},
        "design_deck": {"type": "string", "description": "Deck for the design lane"},
        "art_deck": {"type": "string", "description": "Deck for the art lane"},
        "audio_deck": {"type": "string", "description": "Deck for the audio lane"},
        "skip_art": {"type": "boolean", "default": false},
        "skip_audio": {"type": "boolean", "default": false}
    })
}

/// Union of two property maps
fn merge(mut base: Value, extra: Value) -> Value {
    if let (Value::Object(base), Value::Object(extra)) = (&mut base, extra) {
        base.extend(extra);
    }
    base
}

fn update_properties() -> Value {
    json!({
        "status": {
            "type": "string",
            "enum": ["not_started", "started", "in_progress", "in_review", "blocked", "done"]
        },
        "priority": {"type": "string", "description": "a, b, c or \"null\" to clear"},
        "effort": {
            "type": ["integer", "string"],
            "description": "Effort estimate or \"null\" to clear"
        },
        "owner": {"type": "string", "description": "Owner name or \"null\" to unassign"},
        "milestone": {"type": "string", "description": "Milestone name or \"null\" to clear"},
        "deck": {"type": "string", "description": "Move to this deck"},
        "tags": {"type": "string", "description": "Comma-separated tags or \"null\" to clear"},
        "parent": {"type": "string", "description": "Parent card id or \"null\" to detach"}
    })
}

/// Every tool the server offers
#[must_use]
#[allow(clippy::too_many_lines)]
pub fn catalogue() -> Vec<Tool> {
    use Access::{Destructive, Idempotent, Read, Write};

    vec![
        tool(
            "account_overview",
            "Account name with deck, project and active card counts per status.",
            Read,
            no_args(),
        ),
        tool(
            "list_cards",
            "List cards with optional filters. Statuses and priorities accept comma-separated values; owner \"none\" matches unassigned cards.",
            Read,
            json!({
                "type": "object",
                "properties": {
                    "status": {"type": "string", "description": "e.g. \"started,blocked\""},
                    "priority": {"type": "string", "description": "e.g. \"a,b\" or \"none\""},
                    "deck": {"type": "string"},
                    "project": {"type": "string"},
                    "milestone": {"type": "string"},
                    "owner": {"type": "string"},
                    "tag": {"type": "string"},
                    "search": {"type": "string", "description": "Matched against title and body"},
                    "stale_days": {"type": "integer", "minimum": 1, "maximum": 3650},
                    "parent": {"type": "string", "description": "Only children of this card"},
                    "hero_only": {"type": "boolean", "default": false},
                    "archived": {"type": "boolean", "default": false},
                    "include_stats": {"type": "boolean", "default": false},
                    "sort": {
                        "type": "string",
                        "enum": [
                            "updated", "created", "title", "status",
                            "priority", "effort", "deck", "owner"
                        ]
                    },
                    "limit": {"type": "integer", "minimum": 1}
                }
            }),
        ),
        tool(
            "get_card",
            "Fetch one card with its body and, optionally, its comment threads.",
            Read,
            json!({
                "type": "object",
                "properties": {
                    "card_id": card_id_schema(),
                    "include_content": {"type": "boolean", "default": true},
                    "include_conversations": {"type": "boolean", "default": false}
                },
                "required": ["card_id"]
            }),
        ),
        tool("list_decks", "List decks with their project.", Read, no_args()),
        tool("list_projects", "List projects and the decks they own.", Read, no_args()),
        tool("list_milestones", "List milestones.", Read, no_args()),
        tool("list_tags", "List account tags.", Read, no_args()),
        tool(
            "list_activity",
            "Most recent account activity, newest first.",
            Read,
            json!({
                "type": "object",
                "properties": {
                    "limit": {"type": "integer", "minimum": 1, "maximum": 100, "default": 20}
                }
            }),
        ),
        tool(
            "list_conversations",
            "Comment threads on a card.",
            Read,
            card_id_args(),
        ),
        tool(
            "pm_focus",
            "What needs attention: blocked, in-review, stale and suggested next cards. Counts are totals before `limit` is applied.",
            Read,
            json!({
                "type": "object",
                "properties": {
                    "project": {"type": "string"},
                    "owner": {"type": "string"},
                    "limit": {"type": "integer", "minimum": 1, "maximum": 50, "default": 5},
                    "stale_days": {"type": "integer", "minimum": 1, "maximum": 3650, "default": 14}
                }
            }),
        ),
        tool(
            "standup",
            "Recently done, in-progress and blocked cards.",
            Read,
            json!({
                "type": "object",
                "properties": {
                    "days": {"type": "integer", "minimum": 1, "maximum": 30, "default": 2},
                    "project": {"type": "string"},
                    "owner": {"type": "string"}
                }
            }),
        ),
        tool("list_hand", "Cards in your hand, in queue order.", Read, no_args()),
        tool(
            "add_to_hand",
            "Append cards to your hand. Cards already there keep their position.",
            Idempotent,
            card_ids_args(),
        ),
        tool(
            "remove_from_hand",
            "Remove cards from your hand.",
            Idempotent,
            card_ids_args(),
        ),
        tool(
            "create_card",
            "Create a card. Without a deck or project the card is created outside any deck.",
            Write,
            json!({
                "type": "object",
                "properties": {
                    "title": {"type": "string", "maxLength": 500},
                    "content": {"type": "string"},
                    "deck": {"type": "string"},
                    "project": {"type": "string"},
                    "severity": {
                        "type": "string",
                        "enum": ["critical", "high", "low", "none"],
                        "description": "Only with use_report"
                    },
                    "use_report": {
                        "type": "boolean",
                        "default": false,
                        "description": "Create through the user-report endpoint"
                    }
                },
                "required": ["title"]
            }),
        ),
        tool(
            "update_card",
            "Update fields of one card. Omitted fields stay unchanged; the string \"null\" clears a field.",
            Write,
            json!({
                "type": "object",
                "properties": merge(
                    json!({
                        "card_id": card_id_schema(),
                        "title": {"type": "string", "maxLength": 500},
                        "content": {"type": "string", "description": "New body or \"null\""}
                    }),
                    update_properties(),
                ),
                "required": ["card_id"]
            }),
        ),
        tool(
            "update_cards",
            "Apply the same update to several cards in order. Stops at the first failure unless continue_on_error is set.",
            Write,
            json!({
                "type": "object",
                "properties": merge(
                    json!({
                        "card_ids": card_ids_schema(),
                        "continue_on_error": {"type": "boolean", "default": false}
                    }),
                    update_properties(),
                ),
                "required": ["card_ids"]
            }),
        ),
        tool(
            "mark_done",
            "Set cards to done.",
            Idempotent,
            card_ids_args(),
        ),
        tool(
            "mark_started",
            "Set cards to started.",
            Idempotent,
            card_ids_args(),
        ),
        tool(
            "archive_card",
            "Move a card to the archive.",
            Idempotent,
            card_id_args(),
        ),
        tool(
            "unarchive_card",
            "Restore an archived card.",
            Idempotent,
            card_id_args(),
        ),
        tool(
            "delete_card",
            "Archive and then permanently delete a card. If the second step fails the card stays archived.",
            Destructive,
            card_id_args(),
        ),
        tool(
            "create_comment",
            "Start a comment thread on a card.",
            Write,
            json!({
                "type": "object",
                "properties": {
                    "card_id": card_id_schema(),
                    "content": {"type": "string", "maxLength": 10000}
                },
                "required": ["card_id", "content"]
            }),
        ),
        tool(
            "reply_comment",
            "Reply to a comment thread.",
            Write,
            json!({
                "type": "object",
                "properties": {
                    "thread_id": {"type": "string"},
                    "content": {"type": "string", "maxLength": 10000}
                },
                "required": ["thread_id", "content"]
            }),
        ),
        tool(
            "close_comment",
            "Close a comment thread.",
            Idempotent,
            json!({
                "type": "object",
                "properties": {"thread_id": {"type": "string"}, "card_id": card_id_schema()},
                "required": ["thread_id", "card_id"]
            }),
        ),
        tool(
            "reopen_comment",
            "Reopen a closed comment thread.",
            Idempotent,
            json!({
                "type": "object",
                "properties": {"thread_id": {"type": "string"}, "card_id": card_id_schema()},
                "required": ["thread_id", "card_id"]
            }),
        ),
        tool(
            "scaffold_feature",
            "Create a hero card plus one child card per lane (code, design, art, audio). Cards created before a failure are kept.",
            Write,
            json!({
                "type": "object",
                "properties": merge(
                    json!({
                        "title": {"type": "string", "maxLength": 500},
                        "description": {"type": "string"},
                        "deck": {"type": "string", "description": "Deck of the hero card"}
                    }),
                    lane_properties(),
                ),
                "required": ["title", "deck"]
            }),
        ),
        tool(
            "split_features",
            "Scaffold lanes under every card in a deck that has no children yet. dry_run only lists them.",
            Write,
            json!({
                "type": "object",
                "properties": merge(
                    json!({
                        "deck": {"type": "string"},
                        "dry_run": {"type": "boolean", "default": false}
                    }),
                    lane_properties(),
                ),
                "required": ["deck"]
            }),
        ),
    ]
}

/// Whether `name` is in the catalogue
#[must_use]
pub fn has_tool(name: &str) -> bool {
    catalogue().iter().any(|t| t.name == name)
}

/// Parse tool arguments; missing or null arguments mean all defaults
fn parse_args<T: DeserializeOwned>(arguments: Value) -> Result<T> {
    let arguments = if arguments.is_null() {
        json!({})
    } else {
        arguments
    };
    serde_json::from_value(arguments)
        .map_err(|e| Error::Validation(format!("invalid arguments: {e}")))
}

#[derive(Deserialize)]
struct CardIdArgs {
    card_id: String,
}

#[derive(Deserialize)]
struct CardIdsArgs {
    card_ids: Vec<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
struct GetCardArgs {
    card_id: String,
    #[serde(default = "default_true")]
    include_content: bool,
    #[serde(default)]
    include_conversations: bool,
}

#[derive(Deserialize)]
struct ActivityArgs {
    #[serde(default = "default_activity_limit")]
    limit: usize,
}

fn default_activity_limit() -> usize {
    20
}

#[derive(Deserialize)]
struct UpdateArgs {
    card_id: String,
    #[serde(flatten)]
    update: CardUpdate,
}

#[derive(Deserialize)]
struct BatchArgs {
    card_ids: Vec<String>,
    #[serde(default)]
    continue_on_error: bool,
    #[serde(flatten)]
    update: CardUpdate,
}

#[derive(Deserialize)]
struct NewCommentArgs {
    card_id: String,
    content: String,
}

#[derive(Deserialize)]
struct ReplyArgs {
    thread_id: String,
    content: String,
}

#[derive(Deserialize)]
struct ThreadArgs {
    thread_id: String,
    card_id: String,
}

fn records(list: Vec<Record>) -> Value {
    Value::Array(list.into_iter().map(Value::Object).collect())
}

/// Tag the named fields of every record
fn guard_records(list: &[Record], fields: &[&str]) -> Value {
    records(list.iter().map(|r| sanitize_fields(r, fields)).collect())
}

/// Sanitize the card lists stored under `keys`
fn guard_sections(mut value: Value, keys: &[&str]) -> Value {
    for key in keys {
        if let Some(Value::Array(cards)) = value.get_mut(*key) {
            for card in cards.iter_mut() {
                if let Value::Object(record) = card {
                    *record = sanitize_card(record);
                }
            }
        }
    }
    value
}

/// Tag record titles, descending into nested `lanes`
fn guard_title_list(items: &mut [Value]) {
    for item in items {
        if let Value::Object(record) = item {
            *record = sanitize_fields(record, &["title"]);
            if let Some(Value::Array(lanes)) = record.get_mut("lanes") {
                guard_title_list(lanes);
            }
        }
    }
}

/// Tag the titles in the lists stored under `keys`
fn guard_titles(mut value: Value, keys: &[&str]) -> Value {
    for key in keys {
        if let Some(Value::Array(items)) = value.get_mut(*key) {
            guard_title_list(items);
        }
    }
    value
}

fn guard_object(value: Value, guard: impl Fn(&Record) -> Record) -> Value {
    match value {
        Value::Object(record) => Value::Object(guard(&record)),
        other => other,
    }
}

/// Routes tool calls to the client and shapes every result
pub struct ToolServer {
    client: CodecksClient,
    mode: ContractMode,
}

impl ToolServer {
    /// Create a tool server; the contract mode comes from the client's config
    #[must_use]
    pub fn new(client: CodecksClient) -> Self {
        let mode = client.config().contract.mode;
        Self { client, mode }
    }

    /// Run one tool and return its finalized envelope.
    ///
    /// Never fails: errors are reported inside the envelope.
    pub async fn call(&self, name: &str, arguments: Value) -> Value {
        info!(tool = name, "Tool call");
        match self.run(name, arguments).await {
            Ok(result) => contract::finalize(result, self.mode),
            Err(e) => {
                warn!(tool = name, kind = e.kind(), error = %e, "Tool failed");
                contract::error_envelope(&e.to_string(), e.kind())
            }
        }
    }

    #[allow(clippy::too_many_lines)]
    async fn run(&self, name: &str, args: Value) -> Result<Value> {
        let client = &self.client;
        let value = match name {
            "account_overview" => {
                let mut overview = client.account_overview().await?;
                if let Some(account) = overview.get_mut("account") {
                    *account = guard_object(account.take(), |r| sanitize_fields(r, &["name"]));
                }
                overview
            }
            "list_cards" => {
                let filter: CardFilter = parse_args(args)?;
                let mut list = client.list_cards(&filter).await?;
                list.cards = sanitize_cards(&list.cards);
                serde_json::to_value(list)?
            }
            "get_card" => {
                let a: GetCardArgs = parse_args(args)?;
                let detail = CardDetail {
                    content: a.include_content,
                    threads: a.include_conversations,
                };
                Value::Object(sanitize_card(&client.get_card(&a.card_id, detail).await?))
            }
            "list_decks" => guard_records(&client.list_decks().await?, &["title", "project_name"]),
            "list_projects" => guard_records(&client.list_projects().await?, &["name"]),
            "list_milestones" => guard_records(&client.list_milestones().await?, &["name"]),
            "list_tags" => guard_records(&client.list_tags().await?, &["name"]),
            "list_activity" => {
                let a: ActivityArgs = parse_args(args)?;
                guard_records(&client.list_activity(a.limit).await?, &["card_title", "changer"])
            }
            "list_conversations" => {
                let a: CardIdArgs = parse_args(args)?;
                guard_object(client.list_conversations(&a.card_id).await?, sanitize_card)
            }
            "pm_focus" => {
                let options: PmFocusOptions = parse_args(args)?;
                guard_sections(
                    client.pm_focus(&options).await?,
                    &["blocked", "in_review", "stale", "suggested"],
                )
            }
            "standup" => {
                let options: StandupOptions = parse_args(args)?;
                guard_sections(
                    client.standup(&options).await?,
                    &["recently_done", "in_progress", "blocked"],
                )
            }
            "list_hand" => records(sanitize_cards(&client.list_hand().await?)),
            "add_to_hand" => {
                let a: CardIdsArgs = parse_args(args)?;
                client.add_to_hand(&a.card_ids).await?
            }
            "remove_from_hand" => {
                let a: CardIdsArgs = parse_args(args)?;
                client.remove_from_hand(&a.card_ids).await?
            }
            "create_card" => {
                let new: NewCard = parse_args(args)?;
                client.create_card(&new).await?
            }
            "update_card" => {
                let a: UpdateArgs = parse_args(args)?;
                client.update_card(&a.card_id, &a.update).await?
            }
            "update_cards" => {
                let a: BatchArgs = parse_args(args)?;
                client
                    .update_cards_batch(&a.card_ids, &a.update, a.continue_on_error)
                    .await?
            }
            "mark_done" => {
                let a: CardIdsArgs = parse_args(args)?;
                client.mark_done(&a.card_ids).await?
            }
            "mark_started" => {
                let a: CardIdsArgs = parse_args(args)?;
                client.mark_started(&a.card_ids).await?
            }
            "archive_card" => {
                let a: CardIdArgs = parse_args(args)?;
                client.archive_card(&a.card_id).await?
            }
            "unarchive_card" => {
                let a: CardIdArgs = parse_args(args)?;
                client.unarchive_card(&a.card_id).await?
            }
            "delete_card" => {
                let a: CardIdArgs = parse_args(args)?;
                client.delete_card(&a.card_id).await?
            }
            "create_comment" => {
                let a: NewCommentArgs = parse_args(args)?;
                client.create_comment(&a.card_id, &a.content).await?
            }
            "reply_comment" => {
                let a: ReplyArgs = parse_args(args)?;
                client.reply_comment(&a.thread_id, &a.content).await?
            }
            "close_comment" => {
                let a: ThreadArgs = parse_args(args)?;
                client.close_comment(&a.thread_id, &a.card_id).await?
            }
            "reopen_comment" => {
                let a: ThreadArgs = parse_args(args)?;
                client.reopen_comment(&a.thread_id, &a.card_id).await?
            }
            "scaffold_feature" => {
                let request: ScaffoldRequest = parse_args(args)?;
                client.scaffold_feature(&request).await?
            }
            "split_features" => {
                let request: SplitRequest = parse_args(args)?;
                guard_titles(client.split_features(&request).await?, &["features", "results"])
            }
            _ => return Err(Error::NotFound(format!("unknown tool: {name}"))),
        };
        Ok(value)
    }
}
