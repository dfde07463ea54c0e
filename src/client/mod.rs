//! Domain operations over the Codecks API
//!
//! [`CodecksClient`] owns one [`Transport`] and the immutable [`Config`].
//! Every operation validates its input first, then issues query or
//! dispatch calls through the adapter in [`crate::query`]. Results are plain
//! JSON records; sanitizing and envelope shaping happen in the tool layer.

mod cards;
mod comments;
mod dashboard;
mod hand;
mod lookups;
pub mod model;
mod mutations;
mod scaffold;

pub use cards::{CardFilter, CardList};
pub use dashboard::{PmFocusOptions, StandupOptions};
pub use lookups::{Lookups, Named};
pub use model::{CardDetail, CardStatus, FieldUpdate, Lane, Priority, Severity, SortField};
pub use mutations::{CardUpdate, NewCard};
pub use scaffold::{LaneDecks, ScaffoldRequest, SplitRequest};

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::debug;

use crate::{
    Error, Result,
    config::Config,
    query::{Record, Selection, build_query, resolve_ref, root_id},
    transport::{ApiRequest, Transport},
};

/// Codecks API client
#[derive(Clone)]
pub struct CodecksClient {
    transport: Arc<dyn Transport>,
    config: Arc<Config>,
}

impl CodecksClient {
    /// Create a client over a transport
    pub fn new(transport: Arc<dyn Transport>, config: Arc<Config>) -> Self {
        Self { transport, config }
    }

    /// Shared configuration
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    fn base_url(&self) -> &str {
        self.config.codecks.base_url.trim_end_matches('/')
    }

    /// Run a read query rooted at the account
    async fn query_account(&self, fields: Vec<Selection>) -> Result<Value> {
        let query = build_query(&[Selection::relation("account", fields)]);
        let url = format!("{}/", self.base_url());
        self.transport
            .request(ApiRequest::query(url, json!({ "query": query })))
            .await
    }

    /// Send a mutation to `dispatch/<path>`
    async fn dispatch(&self, path: &str, payload: Value) -> Result<Value> {
        self.send_dispatch(path, payload, false).await
    }

    /// Mutation that is safe to repeat verbatim
    async fn dispatch_idempotent(&self, path: &str, payload: Value) -> Result<Value> {
        self.send_dispatch(path, payload, true).await
    }

    async fn send_dispatch(&self, path: &str, payload: Value, idempotent: bool) -> Result<Value> {
        debug!(operation = path, idempotent, "Dispatching mutation");
        let url = format!("{}/dispatch/{path}", self.base_url());
        self.transport
            .request(ApiRequest::dispatch(url, payload).idempotent(idempotent))
            .await
    }

    fn report_url(&self, token: &str) -> String {
        format!(
            "{}/user-report/v1/create-report?token={token}",
            self.base_url()
        )
    }

    /// Configured user id; needed for hand queue and comment operations
    fn user_id(&self) -> Result<&str> {
        self.config
            .codecks
            .user_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                Error::Setup(
                    "CODECKS_USER_ID is not set; it is required for hand queue and comment \
                     operations"
                        .to_string(),
                )
            })
    }
}

/// The root account record of a query response
fn account_record(response: &Value) -> Result<&Record> {
    let id = root_id(response, "account")?;
    resolve_ref(response, "account", &id)
        .ok_or_else(|| Error::protocol(format!("account `{id}` missing from response")))
}

/// Id of a freshly created entity, as returned by dispatch endpoints
fn created_id(result: &Value) -> Result<String> {
    result
        .pointer("/payload/id")
        .or_else(|| result.get("id"))
        .or_else(|| result.get("cardId"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::protocol("create response carried no id"))
}
