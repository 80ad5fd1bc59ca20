use std::sync::Arc;

use chrono::Utc;
use kuberack_common::bus::{LabEventEnvelope, LabEventType};
use kuberack_common::{Identity, LabRole, ProvisionError, ProvisionStep, ProvisioningRecord};
use kuberack_providers::{ComputeProvider, RecordStore};
use serde::Serialize;
use tracing::Instrument;

use crate::access_token::{self, LabClaims};
use crate::events::EventPublisher;
use crate::instance_template::build_instance_spec;
use crate::keys::{Ed25519KeyGenerator, KeyPair, KeyPairGenerator};
use crate::logger::track_step;
use crate::network::NetworkBootstrap;
use crate::record::RecordRepository;
use crate::settings::LabSettings;
use crate::waiter::{OperationWaiter, PollPolicy};

const EVENT_SOURCE: &str = "orchestrator";

/// Addressing and credentials of a freshly provisioned lab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabReport {
    pub identity: String,
    pub master_name: String,
    pub master_address: String,
    pub worker1_name: String,
    pub worker1_address: String,
    pub worker2_name: String,
    pub worker2_address: String,
    /// EdDSA JWT signed with the lab's signing key.
    pub access_token: String,
}

impl LabReport {
    pub fn address(&self, role: LabRole) -> &str {
        match role {
            LabRole::Master => &self.master_address,
            LabRole::Worker1 => &self.worker1_address,
            LabRole::Worker2 => &self.worker2_address,
        }
    }

    pub fn name(&self, role: LabRole) -> &str {
        match role {
            LabRole::Master => &self.master_name,
            LabRole::Worker1 => &self.worker1_name,
            LabRole::Worker2 => &self.worker2_name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    Provisioned(LabReport),
    /// A record for the identity already existed; nothing was created.
    AlreadyProvisioned,
}

#[derive(Debug, Clone)]
struct ResolvedNode {
    name: String,
    address: String,
}

/// Drives one identity's lab from nothing to three running, addressed VMs.
///
/// Every completed step is merged into the provisioning record before the
/// next one starts. Record existence is the only idempotency gate: a run that
/// failed halfway leaves its partial record behind and later calls for the
/// same identity return `AlreadyProvisioned`.
pub struct ProvisioningWorkflow {
    compute: Arc<dyn ComputeProvider>,
    records: RecordRepository,
    keys: Arc<dyn KeyPairGenerator>,
    waiter: OperationWaiter,
    network: NetworkBootstrap,
    lab: LabSettings,
    events: Option<Arc<dyn EventPublisher>>,
}

impl ProvisioningWorkflow {
    pub fn new(
        compute: Arc<dyn ComputeProvider>,
        store: Arc<dyn RecordStore>,
        lab: LabSettings,
        poll: PollPolicy,
    ) -> Self {
        Self {
            waiter: OperationWaiter::new(compute.clone(), poll),
            compute,
            records: RecordRepository::new(store),
            keys: Arc::new(Ed25519KeyGenerator),
            network: NetworkBootstrap::new(),
            lab,
            events: None,
        }
    }

    pub fn with_key_generator(mut self, keys: Arc<dyn KeyPairGenerator>) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_event_publisher(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn records(&self) -> &RecordRepository {
        &self.records
    }

    pub fn lab(&self) -> &LabSettings {
        &self.lab
    }

    pub async fn provision(&self, raw_identity: &str) -> Result<ProvisionOutcome, ProvisionError> {
        let identity = Identity::parse(raw_identity)?;
        let span = tracing::info_span!("provision", identity = %identity);
        let result = self.run(&identity).instrument(span).await;
        self.announce(&identity, &result).await;
        result
    }

    async fn run(&self, identity: &Identity) -> Result<ProvisionOutcome, ProvisionError> {
        let claimed = track_step(identity, ProvisionStep::CheckIdempotency, self.claim(identity))
            .await?;
        if !claimed {
            return Ok(ProvisionOutcome::AlreadyProvisioned);
        }

        let ssh = track_step(identity, ProvisionStep::GenerateSshKeys, async {
            let pair = self.keys.generate(&self.lab.ssh_user)?;
            self.records
                .merge_set(
                    identity,
                    &ProvisioningRecord {
                        ssh_public_key: Some(pair.authorized_key.clone()),
                        ssh_private_key: Some(pair.openssh_private_key.clone()),
                        ..Default::default()
                    },
                )
                .await?;
            Ok::<_, ProvisionError>(pair)
        })
        .await?;

        track_step(
            identity,
            ProvisionStep::CreateNetwork,
            self.network
                .ensure_network(self.compute.as_ref(), &self.waiter, &self.lab.network),
        )
        .await?;
        track_step(
            identity,
            ProvisionStep::CreateSubnet,
            self.network
                .ensure_subnetwork(self.compute.as_ref(), &self.waiter, &self.lab.network),
        )
        .await?;

        let image = track_step(identity, ProvisionStep::CreateMaster, async {
            let image = self.source_image().await?;
            self.create_node(LabRole::Master, identity, &ssh, &image)
                .await?;
            Ok::<_, ProvisionError>(image)
        })
        .await?;

        // Workers are independent of each other. Both are driven to completion
        // (and persisted) even if the other fails, then the first error wins.
        let (worker1, worker2) = tokio::join!(
            track_step(
                identity,
                ProvisionStep::CreateWorker1,
                self.create_node(LabRole::Worker1, identity, &ssh, &image),
            ),
            track_step(
                identity,
                ProvisionStep::CreateWorker2,
                self.create_node(LabRole::Worker2, identity, &ssh, &image),
            ),
        );
        worker1?;
        worker2?;

        let [master, worker1, worker2] = track_step(
            identity,
            ProvisionStep::ResolveAddresses,
            self.resolve_addresses(identity),
        )
        .await?;

        let access_token = track_step(identity, ProvisionStep::GenerateSigningKeys, async {
            let pair = self.keys.generate(&identity.name_prefix())?;
            self.records
                .merge_set(
                    identity,
                    &ProvisioningRecord {
                        jwt_public_key: Some(pair.public_key_pem.clone()),
                        jwt_private_key: Some(pair.private_key_pem.clone()),
                        ..Default::default()
                    },
                )
                .await?;
            let claims = LabClaims::new(
                identity,
                [
                    master.address.as_str(),
                    worker1.address.as_str(),
                    worker2.address.as_str(),
                ],
                self.lab.token_ttl,
            );
            access_token::issue(&claims, &pair.private_key_pem)
        })
        .await?;

        track_step(identity, ProvisionStep::Done, async {
            self.records
                .merge_set(
                    identity,
                    &ProvisioningRecord {
                        completed_at: Some(Utc::now()),
                        ..Default::default()
                    },
                )
                .await
        })
        .await?;

        Ok(ProvisionOutcome::Provisioned(LabReport {
            identity: identity.to_string(),
            master_name: master.name,
            master_address: master.address,
            worker1_name: worker1.name,
            worker1_address: worker1.address,
            worker2_name: worker2.name,
            worker2_address: worker2.address,
            access_token,
        }))
    }

    /// Existence fast path, then the atomic create-if-absent claim.
    async fn claim(&self, identity: &Identity) -> Result<bool, ProvisionError> {
        if self.records.exists(identity).await? {
            tracing::info!(identity = %identity, "record exists: nothing to be done");
            return Ok(false);
        }
        let claimed = self.records.claim(identity).await?;
        if !claimed {
            tracing::warn!(identity = %identity, "record claimed by a concurrent run");
        }
        Ok(claimed)
    }

    async fn source_image(&self) -> Result<String, ProvisionError> {
        let resolved = self
            .compute
            .resolve_source_image(&self.lab.source_image)
            .await
            .map_err(|e| {
                ProvisionError::Provider(format!(
                    "resolving image {}: {:#}",
                    self.lab.source_image, e
                ))
            })?;
        Ok(resolved.unwrap_or_else(|| self.lab.source_image.clone()))
    }

    async fn create_node(
        &self,
        role: LabRole,
        identity: &Identity,
        ssh: &KeyPair,
        image: &str,
    ) -> Result<String, ProvisionError> {
        let spec = build_instance_spec(role, identity, &ssh.authorized_key, &self.lab, image);
        let handle = self.compute.create_instance(&spec).await.map_err(|e| {
            ProvisionError::Provider(format!("creating instance {}: {:#}", spec.name, e))
        })?;
        tracing::info!(instance = %spec.name, role = %role, operation = %handle.name, "instance create issued");

        self.waiter.wait(&handle).await?;
        self.records
            .merge_set(identity, &role.operation_patch(&handle.name))
            .await?;
        Ok(handle.name)
    }

    async fn resolve_addresses(
        &self,
        identity: &Identity,
    ) -> Result<[ResolvedNode; 3], ProvisionError> {
        let mut nodes = Vec::with_capacity(3);
        for role in LabRole::ALL {
            let name = role.instance_name(identity);
            let details = self
                .compute
                .get_instance(&self.lab.zone, &name)
                .await
                .map_err(|e| ProvisionError::Provider(format!("reading instance {}: {:#}", name, e)))?;
            let address = details
                .first_external_address()
                .ok_or_else(|| ProvisionError::AddressResolutionFailed {
                    instance: name.clone(),
                })?
                .to_string();
            tracing::info!(instance = %name, role = %role, %address, "external address resolved");
            nodes.push(ResolvedNode { name, address });
        }

        let [master, worker1, worker2]: [ResolvedNode; 3] = nodes
            .try_into()
            .map_err(|_| ProvisionError::Provider("expected three lab instances".to_string()))?;

        self.records
            .merge_set(
                identity,
                &ProvisioningRecord {
                    master_address: Some(master.address.clone()),
                    worker1_address: Some(worker1.address.clone()),
                    worker2_address: Some(worker2.address.clone()),
                    ..Default::default()
                },
            )
            .await?;
        Ok([master, worker1, worker2])
    }

    async fn announce(
        &self,
        identity: &Identity,
        result: &Result<ProvisionOutcome, ProvisionError>,
    ) {
        let Some(events) = &self.events else {
            return;
        };
        let evt = match result {
            Ok(ProvisionOutcome::Provisioned(report)) => LabEventEnvelope::new(
                LabEventType::LabProvisioned,
                identity.as_str(),
                serde_json::json!({
                    "master_name": report.master_name,
                    "master_address": report.master_address,
                    "worker1_name": report.worker1_name,
                    "worker1_address": report.worker1_address,
                    "worker2_name": report.worker2_name,
                    "worker2_address": report.worker2_address,
                }),
                EVENT_SOURCE,
            ),
            Ok(ProvisionOutcome::AlreadyProvisioned) => return,
            Err(err) => LabEventEnvelope::new(
                LabEventType::LabProvisionFailed,
                identity.as_str(),
                serde_json::json!({
                    "error_code": err.code(),
                    "step": err.step().map(|s| s.as_str()),
                    "error_message": err.to_string(),
                }),
                EVENT_SOURCE,
            ),
        };
        // The lab state is already durable; a lost notification must not fail the run.
        if let Err(e) = events.publish(&evt).await {
            tracing::warn!(identity = %identity, event = evt.event_type.as_str(), error = %e, "failed to publish lab event");
        }
    }
}
