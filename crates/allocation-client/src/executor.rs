use std::{
    ops::Range,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::{
    display_proxy, outcome::tokens_earned, token_amount_display, FailureReason, FetchOutcome,
    GraphqlTransport, ProxyRotator, ProxyUrl, QueryTemplate, RawResponse, TransportError,
    RATE_LIMIT_MARKER,
};

pub const DEFAULT_MAX_TRANSIENT_RETRIES: u32 = 3;

const TIMEOUT_JITTER_SECS: Range<f64> = 1.0..2.0;
const PROXY_ERROR_JITTER_SECS: Range<f64> = 0.5..1.5;
const RESPONSE_EXCERPT_CHARS: usize = 100;

/// Issues the query for one address and classifies what came back.
///
/// Timeouts and proxy connection failures are retried here with a fresh
/// proxy. Rate limiting is returned on first sight and left to the batch
/// layer.
#[derive(Clone)]
pub struct RequestExecutor {
    transport: Arc<dyn GraphqlTransport>,
    proxies: Arc<ProxyRotator>,
    query: Arc<QueryTemplate>,
    max_transient_retries: u32,
    proxy_rng: Option<Arc<Mutex<StdRng>>>,
}

impl RequestExecutor {
    pub fn new(
        transport: Arc<dyn GraphqlTransport>,
        proxies: Arc<ProxyRotator>,
        query: Arc<QueryTemplate>,
    ) -> Self {
        Self {
            transport,
            proxies,
            query,
            max_transient_retries: DEFAULT_MAX_TRANSIENT_RETRIES,
            proxy_rng: None,
        }
    }

    /// Draws proxies from a seeded generator shared by all clones, making
    /// the selection sequence reproducible.
    #[must_use]
    pub fn with_proxy_seed(mut self, seed: u64) -> Self {
        self.proxy_rng = Some(Arc::new(Mutex::new(StdRng::seed_from_u64(seed))));
        self
    }

    #[must_use]
    pub fn with_max_transient_retries(mut self, max_transient_retries: u32) -> Self {
        self.max_transient_retries = max_transient_retries;
        self
    }

    pub fn max_transient_retries(&self) -> u32 {
        self.max_transient_retries
    }

    fn initial_proxy(&self) -> Option<ProxyUrl> {
        match &self.proxy_rng {
            Some(rng) => {
                let mut rng = rng.lock().unwrap_or_else(PoisonError::into_inner);
                self.proxies.initial_with(&mut *rng)
            }
            None => self.proxies.initial(),
        }
    }

    fn next_proxy(&self, current: Option<&ProxyUrl>) -> Option<ProxyUrl> {
        match &self.proxy_rng {
            Some(rng) => {
                let mut rng = rng.lock().unwrap_or_else(PoisonError::into_inner);
                self.proxies.next_with(&mut *rng, current)
            }
            None => self.proxies.next(current),
        }
    }

    pub async fn fetch(&self, address: &str) -> FetchOutcome {
        let request = self.query.request_for(address);
        let max_retries = self.max_transient_retries;
        let mut current_proxy = self.initial_proxy();
        let mut retries = 0u32;

        while retries <= max_retries {
            let proxy_display = display_proxy(current_proxy.as_ref()).to_string();

            let error = match self.transport.post(current_proxy.as_ref(), &request).await {
                Ok(response) => return classify_response(address, response, proxy_display),
                Err(error) => error,
            };

            match error {
                TransportError::Timeout { message } => {
                    warn!(address, proxy = %proxy_display, error = %message, "request timed out");
                    retries += 1;
                    if retries > max_retries {
                        error!(address, "timeout max retries exceeded");
                        return FetchOutcome::TransientExhausted {
                            address: address.to_string(),
                            reason: FailureReason::Timeout,
                            last_proxy: proxy_display,
                        };
                    }
                    let wait = jitter(TIMEOUT_JITTER_SECS);
                    let next_proxy = self.next_proxy(current_proxy.as_ref());
                    info!(
                        address,
                        attempt = retries,
                        max_retries,
                        wait_secs = wait.as_secs_f64(),
                        next_proxy = %display_proxy(next_proxy.as_ref()),
                        "retrying after timeout"
                    );
                    tokio::time::sleep(wait).await;
                    current_proxy = next_proxy;
                }
                TransportError::ProxyConnect { message } => {
                    warn!(address, proxy = %proxy_display, error = %message, "proxy connection error");
                    retries += 1;
                    if retries > max_retries {
                        error!(address, "proxy connection error max retries exceeded");
                        return FetchOutcome::TransientExhausted {
                            address: address.to_string(),
                            reason: FailureReason::ProxyConnection { message },
                            last_proxy: proxy_display,
                        };
                    }
                    let wait = jitter(PROXY_ERROR_JITTER_SECS);
                    let next_proxy = self.next_proxy(current_proxy.as_ref());
                    info!(
                        address,
                        attempt = retries,
                        max_retries,
                        wait_secs = wait.as_secs_f64(),
                        next_proxy = %display_proxy(next_proxy.as_ref()),
                        "retrying with new proxy"
                    );
                    tokio::time::sleep(wait).await;
                    current_proxy = next_proxy;
                }
                TransportError::InvalidProxy { proxy, message } => {
                    error!(address, proxy = %proxy, error = %message, "invalid proxy");
                    return FetchOutcome::PermanentError {
                        address: address.to_string(),
                        reason: FailureReason::InvalidProxy { proxy, message },
                        status: None,
                        last_proxy: proxy_display,
                    };
                }
                TransportError::Other { message } => {
                    // Not retried: only timeouts and proxy failures count as transient.
                    error!(address, proxy = %proxy_display, error = %message, "client error");
                    return FetchOutcome::PermanentError {
                        address: address.to_string(),
                        reason: FailureReason::Transport { message },
                        status: None,
                        last_proxy: proxy_display,
                    };
                }
            }
        }

        error!(address, "retry loop ended unexpectedly");
        FetchOutcome::TransientExhausted {
            address: address.to_string(),
            reason: FailureReason::RetryLoopExhausted,
            last_proxy: display_proxy(current_proxy.as_ref()).to_string(),
        }
    }
}

/// Maps a completed HTTP exchange onto an outcome.
pub fn classify_response(address: &str, response: RawResponse, last_proxy: String) -> FetchOutcome {
    let RawResponse { status, body } = response;

    if status == 429 || body.contains(RATE_LIMIT_MARKER) {
        warn!(address, proxy = %last_proxy, status, "rate limit detected, deferring to batch retry");
        return FetchOutcome::RateLimited {
            address: address.to_string(),
            status,
            last_proxy,
        };
    }

    if status != 200 {
        error!(
            address,
            proxy = %last_proxy,
            status,
            response = %excerpt(&body),
            "HTTP error"
        );
        return FetchOutcome::PermanentError {
            address: address.to_string(),
            reason: FailureReason::HttpStatus { status },
            status: Some(status),
            last_proxy,
        };
    }

    let payload: Value = match serde_json::from_str(&body) {
        Ok(payload) => payload,
        Err(err) => {
            error!(
                address,
                proxy = %last_proxy,
                error = %err,
                response = %excerpt(&body),
                "JSON decode error"
            );
            return FetchOutcome::PermanentError {
                address: address.to_string(),
                reason: FailureReason::JsonDecode {
                    message: err.to_string(),
                },
                status: Some(status),
                last_proxy,
            };
        }
    };

    if let Some(errors) = payload.get("errors") {
        warn!(
            address,
            proxy = %last_proxy,
            errors = %errors,
            response = %excerpt(&body),
            "GraphQL error"
        );
        return FetchOutcome::PermanentError {
            address: address.to_string(),
            reason: FailureReason::GraphQl {
                errors: errors.to_string(),
            },
            status: Some(status),
            last_proxy,
        };
    }

    if tokens_earned(&payload).is_none() {
        warn!(
            address,
            proxy = %last_proxy,
            response = %excerpt(&body),
            "unexpected 200 response structure"
        );
        return FetchOutcome::PermanentError {
            address: address.to_string(),
            reason: FailureReason::UnexpectedShape,
            status: Some(status),
            last_proxy,
        };
    }

    info!(
        address,
        proxy = %last_proxy,
        tokens = %token_amount_display(&payload),
        "fetched allocation"
    );
    FetchOutcome::Success {
        address: address.to_string(),
        payload,
    }
}

fn jitter(range: Range<f64>) -> Duration {
    Duration::from_secs_f64(rand::thread_rng().gen_range(range))
}

fn excerpt(body: &str) -> String {
    let mut chars = body.chars();
    let head: String = chars.by_ref().take(RESPONSE_EXCERPT_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
