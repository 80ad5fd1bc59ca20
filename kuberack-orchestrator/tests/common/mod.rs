#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use kuberack_common::bus::LabEventEnvelope;
use kuberack_common::ProvisionError;
use kuberack_orchestrator::events::EventPublisher;
use kuberack_orchestrator::keys::{KeyPair, KeyPairGenerator};
use kuberack_orchestrator::settings::LabSettings;
use kuberack_orchestrator::waiter::PollPolicy;
use kuberack_orchestrator::workflow::ProvisioningWorkflow;
use kuberack_providers::memory::MemoryRecordStore;
use kuberack_providers::mock::MockComputeProvider;
use tokio::sync::Mutex;

pub const ALICE: &str = "alice@example.com";
pub const ALICE_MASTER: &str = "alice-example-com-k8s-master";
pub const ALICE_WORKER1: &str = "alice-example-com-instance-1";
pub const ALICE_WORKER2: &str = "alice-example-com-instance-2";

pub struct Harness {
    pub compute: Arc<MockComputeProvider>,
    pub store: Arc<MemoryRecordStore>,
    pub workflow: ProvisioningWorkflow,
}

pub fn harness(compute: MockComputeProvider) -> Harness {
    harness_with_policy(compute, PollPolicy::default())
}

pub fn harness_with_policy(compute: MockComputeProvider, poll: PollPolicy) -> Harness {
    let compute = Arc::new(compute);
    let store = Arc::new(MemoryRecordStore::new());
    let workflow = ProvisioningWorkflow::new(
        compute.clone(),
        store.clone(),
        LabSettings::default(),
        poll,
    );
    Harness {
        compute,
        store,
        workflow,
    }
}

/// Collects published events instead of sending them anywhere.
#[derive(Default)]
pub struct RecordingPublisher {
    pub events: Mutex<Vec<LabEventEnvelope>>,
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, evt: &LabEventEnvelope) -> anyhow::Result<()> {
        self.events.lock().await.push(evt.clone());
        Ok(())
    }
}

/// Publisher whose transport is always down.
pub struct BrokenPublisher;

#[async_trait]
impl EventPublisher for BrokenPublisher {
    async fn publish(&self, _evt: &LabEventEnvelope) -> anyhow::Result<()> {
        anyhow::bail!("redis unreachable")
    }
}

/// Key generator with an exhausted entropy source.
pub struct FailingKeys;

impl KeyPairGenerator for FailingKeys {
    fn generate(&self, _comment: &str) -> Result<KeyPair, ProvisionError> {
        Err(ProvisionError::KeyGenerationFailed(
            "entropy source unavailable".to_string(),
        ))
    }
}
