use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use serde_json::json;

use crate::{
    GraphqlRequest, GraphqlTransport, ProxyRotator, ProxyUrl, QueryTemplate, RawResponse,
    RequestExecutor, TransportError,
};

/// One scripted reply. The last step of a script repeats once it runs out.
#[derive(Debug, Clone)]
pub enum Step {
    Status(u16),
    Allocation(String),
    GraphQlError,
    Timeout,
    ProxyFailure,
    TransportFailure,
    Panic,
}

#[derive(Default)]
struct Inner {
    scripts: HashMap<String, Vec<Step>>,
    calls: HashMap<String, Vec<Option<String>>>,
}

/// In-memory transport keyed by address. Pair it with the `{address}`
/// template so the query text is the address itself.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    inner: Arc<Mutex<Inner>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, address: &str, steps: Vec<Step>) -> Self {
        self.inner
            .lock()
            .unwrap()
            .scripts
            .insert(address.to_string(), steps);
        self
    }

    pub fn calls(&self, address: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .calls
            .get(address)
            .map_or(0, Vec::len)
    }

    pub fn proxies_seen(&self, address: &str) -> Vec<Option<String>> {
        self.inner
            .lock()
            .unwrap()
            .calls
            .get(address)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl GraphqlTransport for ScriptedTransport {
    async fn post(
        &self,
        proxy: Option<&ProxyUrl>,
        request: &GraphqlRequest,
    ) -> Result<RawResponse, TransportError> {
        let address = request.query.clone();
        let step = {
            let mut guard = self.inner.lock().unwrap();
            let inner = &mut *guard;
            let calls = inner.calls.entry(address.clone()).or_default();
            calls.push(proxy.map(|p| p.as_str().to_string()));
            let attempt = calls.len() - 1;
            match inner.scripts.get(&address) {
                Some(steps) if !steps.is_empty() => steps[attempt.min(steps.len() - 1)].clone(),
                _ => Step::Allocation("1.0".to_string()),
            }
        };

        match step {
            Step::Status(status) => Ok(RawResponse {
                status,
                body: String::new(),
            }),
            Step::Allocation(amount) => Ok(RawResponse {
                status: 200,
                body: allocation_body(&amount),
            }),
            Step::GraphQlError => Ok(RawResponse {
                status: 200,
                body: json!({ "errors": [{ "message": "invalid address" }] }).to_string(),
            }),
            Step::Timeout => Err(TransportError::Timeout {
                message: "operation timed out".to_string(),
            }),
            Step::ProxyFailure => Err(TransportError::ProxyConnect {
                message: "connection refused".to_string(),
            }),
            Step::TransportFailure => Err(TransportError::Other {
                message: "connection reset by peer".to_string(),
            }),
            Step::Panic => panic!("scripted panic for {address}"),
        }
    }
}

pub fn allocation_body(amount: &str) -> String {
    json!({
        "data": {
            "zoraTokenAllocation": {
                "totalTokensEarned": { "totalTokens": amount }
            }
        }
    })
    .to_string()
}

pub fn executor_with(transport: ScriptedTransport, proxies: Vec<String>) -> RequestExecutor {
    RequestExecutor::new(
        Arc::new(transport),
        Arc::new(ProxyRotator::new(proxies)),
        Arc::new(QueryTemplate::parse("{address}").unwrap()),
    )
}
