//! Upstream transport
//!
//! [`Transport`] is the seam between domain operations and the network.
//! [`HttpTransport`] is the production implementation; tests substitute a
//! scripted one.

mod http;
mod retry;

pub use self::http::HttpTransport;
pub use self::retry::{AttemptError, RetryPolicy, with_retry};

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;

use crate::Result;

/// How a request authenticates against the upstream service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Session token and account headers
    Session,
    /// Credential travels in the URL (report endpoint)
    None,
}

/// A single logical upstream call
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// HTTP method
    pub method: Method,
    /// Absolute URL
    pub url: String,
    /// JSON body
    pub body: Option<Value>,
    /// Safe to repeat verbatim; governs retry eligibility
    pub idempotent: bool,
    /// Authentication mode
    pub auth: AuthMode,
}

impl ApiRequest {
    /// Read query against the query endpoint (idempotent)
    #[must_use]
    pub fn query(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            body: Some(body),
            idempotent: true,
            auth: AuthMode::Session,
        }
    }

    /// Mutation against a dispatch endpoint (not idempotent unless marked)
    #[must_use]
    pub fn dispatch(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            body: Some(body),
            idempotent: false,
            auth: AuthMode::Session,
        }
    }

    /// Override idempotency
    #[must_use]
    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }

    /// Override authentication mode
    #[must_use]
    pub fn with_auth(mut self, auth: AuthMode) -> Self {
        self.auth = auth;
        self
    }
}

/// Transport trait for upstream communication
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and return the parsed JSON body
    async fn request(&self, request: ApiRequest) -> Result<Value>;
}
