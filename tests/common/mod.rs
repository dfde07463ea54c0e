//! Fake Codecks upstream for end-to-end tool tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use tokio::net::TcpListener;

use codecks_mcp::{
    client::CodecksClient, config::Config, server::ToolServer, transport::HttpTransport,
};

pub const USER: &str = "00000000-0000-0000-0000-0000000000aa";

/// One request as the upstream saw it
#[derive(Debug, Clone)]
pub struct Seen {
    pub path: String,
    pub headers: HeaderMap,
    pub body: Value,
}

#[derive(Clone, Default)]
struct Stub {
    replies: Arc<Mutex<VecDeque<(u16, Value)>>>,
    seen: Arc<Mutex<Vec<Seen>>>,
}

async fn handler(State(stub): State<Stub>, uri: Uri, headers: HeaderMap, body: String) -> Response {
    stub.seen.lock().unwrap().push(Seen {
        path: uri.to_string(),
        headers,
        body: serde_json::from_str(&body).unwrap_or(Value::Null),
    });
    let (status, reply) = stub
        .replies
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or((500, json!({"error": "script exhausted"})));
    (StatusCode::from_u16(status).unwrap(), reply.to_string()).into_response()
}

/// Upstream that answers every request with the next scripted reply
pub struct Upstream {
    pub url: String,
    stub: Stub,
}

impl Upstream {
    pub async fn start(replies: Vec<(u16, Value)>) -> Self {
        let stub = Stub {
            replies: Arc::new(Mutex::new(replies.into())),
            ..Stub::default()
        };
        let app = Router::new().fallback(handler).with_state(stub.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { url, stub }
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.stub.seen.lock().unwrap().clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.seen().into_iter().map(|s| s.path).collect()
    }

    /// Tool server talking to this upstream over real HTTP
    pub fn server(&self) -> ToolServer {
        let mut config = Config::default();
        config.codecks.base_url = self.url.clone();
        config.codecks.token = Some("tok".into());
        config.codecks.account = Some("studio".into());
        config.codecks.user_id = Some(USER.into());
        config.http.max_retries = 0;
        config.http.retry_base_delay = Duration::from_millis(1);
        let config = Arc::new(config);
        let transport = HttpTransport::new(Arc::clone(&config)).unwrap();
        ToolServer::new(CodecksClient::new(Arc::new(transport), config))
    }
}

/// Card id with a recognisable suffix
pub fn id(n: u32) -> String {
    format!("00000000-0000-0000-0000-{n:012}")
}

/// Query response listing `cards` under the account relation `key`
pub fn cards_response(key: &str, cards: &[(String, Value)]) -> Value {
    let ids: Vec<&String> = cards.iter().map(|(id, _)| id).collect();
    let mut map = serde_json::Map::new();
    for (id, card) in cards {
        map.insert(id.clone(), card.clone());
    }
    json!({
        "_root": {"account": "acc"},
        "account": {"acc": {key: ids}},
        "card": map,
        "deck": {"d-1": {"title": "Backlog", "project": "p-1"}},
        "user": {"u-1": {"name": "Ana"}}
    })
}

/// Lookup response with one project, two decks and one member
pub fn lookups_response() -> Value {
    json!({
        "_root": {"account": "acc"},
        "account": {"acc": {"decks": ["d-1", "d-2"], "projects": ["p-1"], "milestones": [], "roles": []}},
        "deck": {
            "d-1": {"title": "Backlog", "project": "p-1"},
            "d-2": {"title": "Code", "project": "p-1"}
        },
        "project": {"p-1": {"name": "Game"}},
        "user": {"u-1": {"name": "Ana"}}
    })
}
