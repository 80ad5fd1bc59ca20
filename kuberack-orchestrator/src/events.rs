use anyhow::Context;
use async_trait::async_trait;
use kuberack_common::bus::{LabEventEnvelope, CHANNEL_LAB_EVENTS};
use redis::AsyncCommands;

/// Outbound lab lifecycle events (consumed e.g. by the mail delivery service).
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, evt: &LabEventEnvelope) -> anyhow::Result<()>;
}

pub struct RedisEventPublisher {
    redis_client: redis::Client,
}

impl RedisEventPublisher {
    pub fn new(redis_client: redis::Client) -> Self {
        Self { redis_client }
    }
}

#[async_trait]
impl EventPublisher for RedisEventPublisher {
    async fn publish(&self, evt: &LabEventEnvelope) -> anyhow::Result<()> {
        let mut conn = self
            .redis_client
            .get_multiplexed_async_connection()
            .await
            .context("Failed to connect to Redis (publisher)")?;
        let payload = serde_json::to_string(evt)?;

        let _: () = conn.publish(CHANNEL_LAB_EVENTS, payload).await?;
        Ok(())
    }
}
