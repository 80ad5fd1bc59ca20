use std::sync::Arc;

use futures_util::StreamExt;
use kuberack_common::bus::{CommandProvisionLab, CommandType, CHANNEL_LAB_COMMANDS};

use crate::workflow::{ProvisionOutcome, ProvisioningWorkflow};

/// Decode one pub/sub payload. Unknown or malformed messages yield `None`.
pub fn parse_command(payload: &str) -> Option<CommandProvisionLab> {
    let event_json: serde_json::Value = serde_json::from_str(payload).ok()?;
    match event_json["type"].as_str().unwrap_or("") {
        t if t == CommandType::ProvisionLab.as_str() => serde_json::from_value(event_json).ok(),
        _ => None,
    }
}

/// Subscribe to the lab command channel and spawn one run per command.
/// Returns when the subscription stream ends.
pub async fn run(redis_client: redis::Client, workflow: Arc<ProvisioningWorkflow>) -> anyhow::Result<()> {
    let mut pubsub = redis_client.get_async_pubsub().await?;
    pubsub.subscribe(CHANNEL_LAB_COMMANDS).await?;
    tracing::info!(channel = CHANNEL_LAB_COMMANDS, "listening for lab commands");

    let mut stream = pubsub.on_message();
    while let Some(msg) = stream.next().await {
        let payload: String = match msg.get_payload() {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "unreadable lab command payload");
                continue;
            }
        };
        let Some(cmd) = parse_command(&payload) else {
            tracing::warn!(%payload, "ignoring unknown lab command");
            continue;
        };

        let workflow = workflow.clone();
        tokio::spawn(async move {
            let correlation_id = cmd.correlation_id.as_deref().unwrap_or("");
            match workflow.provision(&cmd.identity).await {
                Ok(ProvisionOutcome::Provisioned(report)) => {
                    tracing::info!(identity = %report.identity, correlation_id, "lab provisioned");
                }
                Ok(ProvisionOutcome::AlreadyProvisioned) => {
                    tracing::info!(identity = %cmd.identity, correlation_id, "lab already provisioned");
                }
                Err(err) => {
                    tracing::error!(identity = %cmd.identity, correlation_id, error = %err, "lab provisioning failed");
                }
            }
        });
    }
    Ok(())
}
