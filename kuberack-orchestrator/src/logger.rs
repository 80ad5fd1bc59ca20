use std::future::Future;
use std::time::Instant;

use kuberack_common::{Identity, ProvisionError, ProvisionStep};

/// Start/complete log pair for one workflow step.
pub struct StepLog {
    identity: String,
    step: ProvisionStep,
    started: Instant,
}

impl StepLog {
    pub fn start(identity: &Identity, step: ProvisionStep) -> Self {
        tracing::info!(identity = %identity, step = %step, status = "in_progress", "workflow step");
        Self {
            identity: identity.to_string(),
            step,
            started: Instant::now(),
        }
    }

    pub fn duration_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn complete(self) {
        tracing::info!(
            identity = %self.identity,
            step = %self.step,
            status = "success",
            duration_ms = self.duration_ms(),
            "workflow step"
        );
    }

    pub fn fail(self, err: &ProvisionError) {
        tracing::error!(
            identity = %self.identity,
            step = %self.step,
            status = "failed",
            duration_ms = self.duration_ms(),
            error_code = err.code(),
            error = %err,
            "workflow step"
        );
    }
}

/// Run one step: log it, and tag any error with the identity and step.
pub async fn track_step<T, F>(
    identity: &Identity,
    step: ProvisionStep,
    fut: F,
) -> Result<T, ProvisionError>
where
    F: Future<Output = Result<T, ProvisionError>>,
{
    let log = StepLog::start(identity, step);
    match fut.await {
        Ok(value) => {
            log.complete();
            Ok(value)
        }
        Err(err) => {
            log.fail(&err);
            Err(err.at_step(identity.as_str(), step))
        }
    }
}
