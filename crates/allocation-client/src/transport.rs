use std::{collections::HashMap, error::Error as StdError, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, Proxy, Url};
use snafu::Snafu;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{GraphqlRequest, ProxyUrl};

/// Status and body of a completed HTTP exchange, whatever the status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Snafu)]
pub enum TransportError {
    #[snafu(display("request timed out: {message}"))]
    Timeout { message: String },

    #[snafu(display("proxy connection failed: {message}"))]
    ProxyConnect { message: String },

    #[snafu(display("invalid proxy {proxy}: {message}"))]
    InvalidProxy { proxy: String, message: String },

    #[snafu(display("{message}"))]
    Other { message: String },
}

/// Sends one GraphQL POST, optionally through a proxy.
#[async_trait]
pub trait GraphqlTransport: Send + Sync {
    async fn post(
        &self,
        proxy: Option<&ProxyUrl>,
        request: &GraphqlRequest,
    ) -> Result<RawResponse, TransportError>;
}

/// `reqwest` transport against a fixed endpoint.
///
/// reqwest binds proxies per `Client`, so one client is built lazily for each
/// distinct proxy (and one for direct mode) and reused afterwards.
pub struct HttpTransport {
    endpoint: Url,
    timeout: Duration,
    clients: RwLock<HashMap<Option<ProxyUrl>, Client>>,
}

impl HttpTransport {
    pub fn new(endpoint: Url, timeout: Duration) -> Self {
        tracing::info!(endpoint = %endpoint, timeout = ?timeout, "creating GraphQL transport");
        Self {
            endpoint,
            timeout,
            clients: RwLock::new(HashMap::new()),
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn client_for(&self, proxy: Option<&ProxyUrl>) -> Result<Client, TransportError> {
        let key = proxy.cloned();
        if let Some(client) = self.clients.read().await.get(&key) {
            return Ok(client.clone());
        }

        let client = build_client(proxy, self.timeout)?;
        debug!(proxy = %crate::display_proxy(proxy), "built HTTP client");

        let mut clients = self.clients.write().await;
        Ok(clients.entry(key).or_insert(client).clone())
    }
}

#[async_trait]
impl GraphqlTransport for HttpTransport {
    async fn post(
        &self,
        proxy: Option<&ProxyUrl>,
        request: &GraphqlRequest,
    ) -> Result<RawResponse, TransportError> {
        let client = self.client_for(proxy).await?;
        let via_proxy = proxy.is_some();

        let response = client
            .post(self.endpoint.clone())
            .json(request)
            .send()
            .await
            .map_err(|err| classify(&err, via_proxy))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|err| classify(&err, via_proxy))?;

        Ok(RawResponse { status, body })
    }
}

fn build_client(proxy: Option<&ProxyUrl>, timeout: Duration) -> Result<Client, TransportError> {
    let builder = Client::builder().timeout(timeout);
    let builder = match proxy {
        // Ignore HTTP_PROXY and friends so direct mode really is direct.
        None => builder.no_proxy(),
        Some(proxy) => {
            let proxy_config =
                Proxy::all(proxy.as_str()).map_err(|err| TransportError::InvalidProxy {
                    proxy: proxy.redacted().to_string(),
                    message: error_chain(&err),
                })?;
            builder.proxy(proxy_config)
        }
    };

    builder.build().map_err(|err| TransportError::Other {
        message: format!("failed to build HTTP client: {}", error_chain(&err)),
    })
}

/// Timeouts and proxy connect failures are retryable, anything else is not.
fn classify(err: &reqwest::Error, via_proxy: bool) -> TransportError {
    let message = error_chain(err);
    if err.is_timeout() {
        TransportError::Timeout { message }
    } else if via_proxy && err.is_connect() {
        TransportError::ProxyConnect { message }
    } else {
        TransportError::Other { message }
    }
}

fn error_chain(err: &dyn StdError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
