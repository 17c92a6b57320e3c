use std::collections::BTreeMap;

use tracing::{debug, error, info, warn};

use crate::{parse_token_amount, FetchOutcome};

/// Address to token amount for every usable success, plus run counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunResult {
    pub amounts: BTreeMap<String, f64>,
    pub processed: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub total_tokens: f64,
}

impl RunResult {
    pub fn log_summary(&self) {
        info!("--- Summary ---");
        info!(total = self.processed, "total addresses processed");
        info!(count = self.success_count, "successfully retrieved token data");
        info!(count = self.error_count, "errors, timeouts, rate limits or missing data");
        info!(
            total_tokens = %format!("{:.6}", self.total_tokens),
            "total tokens from successful results"
        );
    }
}

/// Folds the outcomes of a whole run into a [`RunResult`].
///
/// Failures are logged and counted, never raised. If one address succeeds
/// more than once the later amount wins, and the totals are taken from the
/// final map.
pub fn aggregate(outcomes: &[FetchOutcome]) -> RunResult {
    info!(outcomes = outcomes.len(), "processing final results");

    let mut amounts = BTreeMap::new();
    let mut error_count = 0;

    for outcome in outcomes {
        match outcome {
            FetchOutcome::Success { address, payload } => match parse_token_amount(payload) {
                Ok(amount) => {
                    if let Some(previous) = amounts.insert(address.clone(), amount) {
                        debug!(address = %address, previous, amount, "duplicate address, keeping latest amount");
                    }
                }
                Err(err) => {
                    warn!(address = %address, error = %err, "unusable token amount");
                    error_count += 1;
                }
            },
            FetchOutcome::RateLimited {
                address,
                status,
                last_proxy,
            } => {
                error!(address = %address, status, last_proxy = %last_proxy, "processing failed: still rate limited");
                error_count += 1;
            }
            FetchOutcome::PermanentError {
                address,
                reason,
                status,
                last_proxy,
            } => {
                error!(
                    address = %address,
                    reason = %reason,
                    status = ?status,
                    last_proxy = %last_proxy,
                    "processing failed"
                );
                error_count += 1;
            }
            FetchOutcome::TransientExhausted {
                address,
                reason,
                last_proxy,
            } => {
                error!(address = %address, reason = %reason, last_proxy = %last_proxy, "processing failed");
                error_count += 1;
            }
        }
    }

    RunResult {
        processed: outcomes.len(),
        success_count: amounts.len(),
        error_count,
        total_tokens: amounts.values().sum(),
        amounts,
    }
}
