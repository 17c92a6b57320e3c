use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use allocation_client::RATE_LIMIT_MARKER;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;

/// How the mock answers one request for an address.
#[derive(Debug, Clone)]
pub enum MockReply {
    Allocation(String),
    GraphQlError,
    Status(u16),
    RateLimitMarker,
    /// Never answers within any sane client timeout.
    Hang,
}

#[derive(Default)]
struct MockState {
    scripts: HashMap<String, Vec<MockReply>>,
    hits: Mutex<HashMap<String, usize>>,
    proxy_authorizations: Mutex<Vec<String>>,
}

/// In-process GraphQL endpoint with per-address scripted replies.
///
/// Requests are matched on the address inside `identifierWalletAddresses`.
/// Once a script runs out its last reply repeats; unscripted addresses get an
/// allocation of `1.0`. Because routing only looks at the path, the server
/// also answers absolute-form requests, so it can stand in for an HTTP proxy.
pub struct MockGraphql {
    pub addr: SocketAddr,
    state: Arc<MockState>,
}

pub const QUERY_TEMPLATE: &str = "query {{ zoraTokenAllocation(identifierWalletAddresses: [\"{address}\"]) {{ totalTokensEarned {{ totalTokens }} }} }}";

impl MockGraphql {
    pub async fn start(scripts: Vec<(&str, Vec<MockReply>)>) -> Self {
        let state = Arc::new(MockState {
            scripts: scripts
                .into_iter()
                .map(|(address, replies)| (address.to_string(), replies))
                .collect(),
            ..Default::default()
        });

        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .expect("mock listener should bind");
        let addr = listener.local_addr().expect("mock listener has an address");

        let app = Router::new()
            .route("/graphql", post(graphql))
            .with_state(state.clone());

        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { addr, state }
    }

    pub fn endpoint(&self) -> String {
        format!("http://{}/graphql", self.addr)
    }

    pub fn hits(&self, address: &str) -> usize {
        self.state
            .hits
            .lock()
            .unwrap()
            .get(address)
            .copied()
            .unwrap_or(0)
    }

    pub fn proxy_authorizations(&self) -> Vec<String> {
        self.state.proxy_authorizations.lock().unwrap().clone()
    }
}

async fn graphql(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let query = body["query"].as_str().unwrap_or_default();
    let address = extract_address(query).unwrap_or_default();

    if let Some(auth) = headers
        .get("proxy-authorization")
        .and_then(|value| value.to_str().ok())
    {
        state
            .proxy_authorizations
            .lock()
            .unwrap()
            .push(auth.to_string());
    }

    let attempt = {
        let mut hits = state.hits.lock().unwrap();
        let count = hits.entry(address.clone()).or_insert(0);
        *count += 1;
        *count - 1
    };

    let reply = match state.scripts.get(&address) {
        Some(replies) if !replies.is_empty() => replies[attempt.min(replies.len() - 1)].clone(),
        _ => MockReply::Allocation("1.0".to_string()),
    };

    match reply {
        MockReply::Allocation(amount) => Json(json!({
            "data": {
                "zoraTokenAllocation": {
                    "totalTokensEarned": { "totalTokens": amount }
                }
            }
        }))
        .into_response(),
        MockReply::GraphQlError => Json(json!({
            "errors": [{ "message": format!("invalid address {address}") }]
        }))
        .into_response(),
        MockReply::Status(status) => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, "mock error").into_response()
        }
        MockReply::RateLimitMarker => Json(json!({
            "message": format!("{RATE_LIMIT_MARKER} 30 seconds")
        }))
        .into_response(),
        MockReply::Hang => {
            tokio::time::sleep(Duration::from_secs(60)).await;
            StatusCode::GATEWAY_TIMEOUT.into_response()
        }
    }
}

fn extract_address(query: &str) -> Option<String> {
    let (_, rest) = query.split_once("[\"")?;
    let (address, _) = rest.split_once("\"]")?;
    Some(address.to_string())
}

/// A loopback port with nothing listening on it.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind(("127.0.0.1", 0))
        .await
        .expect("listener should bind");
    listener.local_addr().expect("listener has an address")
}
