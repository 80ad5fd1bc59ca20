use std::sync::Arc;
use std::time::Duration;

use kuberack_common::{OperationScope, ProvisionError};
use kuberack_providers::inventory::{OperationHandle, OperationStatus};
use kuberack_providers::ComputeProvider;
use tokio::time::{sleep, Instant};

/// How an operation is polled until it reaches DONE.
#[derive(Clone, Debug, PartialEq)]
pub struct PollPolicy {
    pub interval: Duration,
    /// Upper bound for the delay when `backoff_factor` grows it.
    pub max_interval: Duration,
    /// Multiplier applied to the delay after each pending poll (1.0 = fixed interval).
    pub backoff_factor: f64,
    /// Maximum time spent waiting on one operation; `None` polls forever.
    pub timeout: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(1),
            backoff_factor: 1.0,
            timeout: Some(Duration::from_secs(600)),
        }
    }
}

impl PollPolicy {
    pub fn fixed(interval: Duration) -> Self {
        Self {
            interval,
            max_interval: interval,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, factor: f64, max_interval: Duration) -> Self {
        self.backoff_factor = factor.max(1.0);
        self.max_interval = max_interval.max(self.interval);
        self
    }

    fn next_delay(&self, current: Duration) -> Duration {
        current.mul_f64(self.backoff_factor).min(self.max_interval)
    }
}

/// Polls asynchronous compute operations to completion.
///
/// Zonal, regional and global operations share the same loop; only the scope
/// handed to `ComputeProvider::get_operation` differs.
#[derive(Clone)]
pub struct OperationWaiter {
    compute: Arc<dyn ComputeProvider>,
    policy: PollPolicy,
}

impl OperationWaiter {
    pub fn new(compute: Arc<dyn ComputeProvider>, policy: PollPolicy) -> Self {
        Self { compute, policy }
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    pub async fn wait(&self, handle: &OperationHandle) -> Result<OperationStatus, ProvisionError> {
        self.wait_until_done(&handle.scope, &handle.name).await
    }

    pub async fn wait_until_done(
        &self,
        scope: &OperationScope,
        name: &str,
    ) -> Result<OperationStatus, ProvisionError> {
        let started = Instant::now();
        let mut delay = self.policy.interval;
        let mut polls: u32 = 0;
        tracing::debug!(%scope, operation = name, "waiting for operation");

        loop {
            polls += 1;
            let status = self
                .compute
                .get_operation(scope, name)
                .await
                .map_err(|e| {
                    ProvisionError::Provider(format!(
                        "polling {} operation {}: {:#}",
                        scope, name, e
                    ))
                })?;

            if status.is_done() {
                if let Some(details) = &status.error {
                    tracing::error!(%scope, operation = name, polls, %details, "operation failed");
                    return Err(ProvisionError::OperationFailed {
                        scope: scope.clone(),
                        name: name.to_string(),
                        details: details.clone(),
                    });
                }
                tracing::debug!(
                    %scope,
                    operation = name,
                    polls,
                    waited_ms = started.elapsed().as_millis() as u64,
                    "operation done"
                );
                return Ok(status);
            }

            let pause = match self.policy.timeout {
                Some(timeout) => {
                    let waited = started.elapsed();
                    if waited >= timeout {
                        tracing::warn!(%scope, operation = name, polls, ?waited, "operation timed out");
                        return Err(ProvisionError::OperationTimeout {
                            scope: scope.clone(),
                            name: name.to_string(),
                            waited,
                        });
                    }
                    delay.min(timeout - waited)
                }
                None => delay,
            };
            sleep(pause).await;
            delay = self.policy.next_delay(delay);
        }
    }
}
