use std::{ops::Range, time::Duration};

use tracing::{error, info, warn};

use crate::{FailureReason, FetchOutcome, RequestExecutor};

pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_BASE_RETRY_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_PERSISTENT_RETRIES: u32 = 50;

const UNKNOWN_PROXY: &str = "n/a";

/// Contiguous, non-overlapping split of the address list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlan {
    total: usize,
    batch_size: usize,
}

impl BatchPlan {
    pub fn new(total: usize, batch_size: usize) -> Self {
        Self {
            total,
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn batch_count(&self) -> usize {
        self.total.div_ceil(self.batch_size)
    }

    /// Index ranges of each batch; the last one may be short.
    pub fn ranges(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        (0..self.total)
            .step_by(self.batch_size)
            .map(|start| start..(start + self.batch_size).min(self.total))
    }
}

/// Runs batches of fetches and re-dispatches rate-limited addresses after a
/// linearly growing delay shared by the whole batch.
#[derive(Clone)]
pub struct BatchRetryOrchestrator {
    executor: RequestExecutor,
    base_delay: Duration,
    max_persistent_retries: u32,
}

impl BatchRetryOrchestrator {
    pub fn new(executor: RequestExecutor, base_delay: Duration, max_persistent_retries: u32) -> Self {
        Self {
            executor,
            base_delay,
            max_persistent_retries,
        }
    }

    /// Fetches every address of `addresses`, batch by batch, and returns the
    /// terminal outcome of each entry.
    pub async fn run_all(&self, addresses: &[String], batch_size: usize) -> Vec<FetchOutcome> {
        let plan = BatchPlan::new(addresses.len(), batch_size);
        let total_batches = plan.batch_count();
        let mut outcomes = Vec::with_capacity(addresses.len());

        for (index, range) in plan.ranges().enumerate() {
            let batch = &addresses[range];
            outcomes.extend(self.run_batch(batch, index + 1, total_batches).await);
        }

        outcomes
    }

    /// Processes one batch until every entry reaches a terminal outcome.
    ///
    /// Work is tracked per slot, so a duplicated address gets its own fetch
    /// and its own outcome. Returns one outcome per entry, order unspecified.
    pub async fn run_batch(
        &self,
        addresses: &[String],
        batch_number: usize,
        total_batches: usize,
    ) -> Vec<FetchOutcome> {
        let (Some(first), Some(last)) = (addresses.first(), addresses.last()) else {
            return Vec::new();
        };
        info!(
            batch = batch_number,
            total_batches,
            first = %first,
            last = %last,
            size = addresses.len(),
            "processing batch"
        );

        let max_retries = self.max_persistent_retries;
        let mut finished: Vec<Option<FetchOutcome>> = vec![None; addresses.len()];
        let mut outstanding: Vec<usize> = (0..addresses.len()).collect();
        let mut round = 0u32;

        while !outstanding.is_empty() && round <= max_retries {
            if round > 0 {
                let wait = self.base_delay.saturating_mul(round);
                warn!(
                    batch = batch_number,
                    rate_limited = outstanding.len(),
                    attempt = round,
                    max_retries,
                    wait_secs = wait.as_secs_f64(),
                    "rate limit hit, backing off before retry"
                );
                tokio::time::sleep(wait).await;
            }

            let handles: Vec<_> = outstanding
                .iter()
                .map(|&slot| {
                    let executor = self.executor.clone();
                    let address = addresses[slot].clone();
                    (slot, tokio::spawn(async move { executor.fetch(&address).await }))
                })
                .collect();

            let mut still_limited = Vec::new();
            for (slot, handle) in handles {
                let address = &addresses[slot];
                let outcome = match handle.await {
                    Ok(outcome) => outcome,
                    Err(join_err) => {
                        error!(batch = batch_number, address = %address, error = %join_err, "fetch task failed");
                        FetchOutcome::PermanentError {
                            address: address.clone(),
                            reason: FailureReason::TaskFailed {
                                message: join_err.to_string(),
                            },
                            status: None,
                            last_proxy: UNKNOWN_PROXY.to_string(),
                        }
                    }
                };

                finished[slot] = match outcome {
                    FetchOutcome::RateLimited { .. } if round < max_retries => {
                        still_limited.push(slot);
                        None
                    }
                    FetchOutcome::RateLimited {
                        address,
                        status,
                        last_proxy,
                    } => {
                        error!(
                            batch = batch_number,
                            address = %address,
                            "max persistent retries reached, marking as failed"
                        );
                        Some(FetchOutcome::PermanentError {
                            address,
                            reason: FailureReason::PersistentRateLimit { rounds: round + 1 },
                            status: Some(status),
                            last_proxy,
                        })
                    }
                    terminal => Some(terminal),
                };
            }

            outstanding = still_limited;
            round += 1;
        }

        info!(batch = batch_number, rounds = round, "batch finished");
        finished.into_iter().flatten().collect()
    }
}
