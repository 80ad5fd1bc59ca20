use kuberack_common::ProvisionError;
use kuberack_providers::resources::{NetworkSpec, SubnetworkSpec};
use kuberack_providers::ComputeProvider;
use tokio::sync::OnceCell;

use crate::waiter::OperationWaiter;

/// Shared dataplane network every lab attaches its second interface to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkPlan {
    pub network: String,
    pub subnetwork: String,
    pub region: String,
    pub ip_cidr_range: String,
}

impl NetworkPlan {
    pub fn dataplane(region: &str) -> Self {
        Self {
            network: "dataplane".to_string(),
            subnetwork: "dataplane".to_string(),
            region: region.to_string(),
            ip_cidr_range: "10.129.0.0/20".to_string(),
        }
    }

    pub fn network_ref(&self) -> String {
        format!("global/networks/{}", self.network)
    }

    pub fn subnetwork_ref(&self) -> String {
        format!("regions/{}/subnetworks/{}", self.region, self.subnetwork)
    }

    /// Custom mode: subnets are created explicitly, never per region automatically.
    pub fn network_spec(&self) -> NetworkSpec {
        NetworkSpec {
            name: self.network.clone(),
            auto_create_subnetworks: false,
        }
    }

    pub fn subnetwork_spec(&self) -> SubnetworkSpec {
        SubnetworkSpec {
            name: self.subnetwork.clone(),
            region: self.region.clone(),
            network: self.network_ref(),
            ip_cidr_range: self.ip_cidr_range.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnsureOutcome {
    Created,
    AlreadyPresent,
}

/// Creates the shared network and subnetwork at most once per owning workflow.
///
/// Resources the provider already reports are never re-created. A failed
/// attempt leaves the cell empty so a later run tries again.
#[derive(Default)]
pub struct NetworkBootstrap {
    network: OnceCell<EnsureOutcome>,
    subnetwork: OnceCell<EnsureOutcome>,
}

fn provider_err(what: &str, err: anyhow::Error) -> ProvisionError {
    ProvisionError::Provider(format!("{}: {:#}", what, err))
}

impl NetworkBootstrap {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn ensure_network(
        &self,
        compute: &dyn ComputeProvider,
        waiter: &OperationWaiter,
        plan: &NetworkPlan,
    ) -> Result<EnsureOutcome, ProvisionError> {
        self.network
            .get_or_try_init(|| async {
                if compute
                    .network_exists(&plan.network)
                    .await
                    .map_err(|e| provider_err("checking network", e))?
                {
                    tracing::info!(network = %plan.network, "dataplane network already present");
                    return Ok(EnsureOutcome::AlreadyPresent);
                }
                let handle = compute
                    .create_network(&plan.network_spec())
                    .await
                    .map_err(|e| provider_err("creating network", e))?;
                waiter.wait(&handle).await?;
                tracing::info!(network = %plan.network, operation = %handle.name, "dataplane network created");
                Ok::<_, ProvisionError>(EnsureOutcome::Created)
            })
            .await
            .copied()
    }

    pub async fn ensure_subnetwork(
        &self,
        compute: &dyn ComputeProvider,
        waiter: &OperationWaiter,
        plan: &NetworkPlan,
    ) -> Result<EnsureOutcome, ProvisionError> {
        self.subnetwork
            .get_or_try_init(|| async {
                if compute
                    .subnetwork_exists(&plan.region, &plan.subnetwork)
                    .await
                    .map_err(|e| provider_err("checking subnetwork", e))?
                {
                    tracing::info!(subnetwork = %plan.subnetwork_ref(), "dataplane subnetwork already present");
                    return Ok(EnsureOutcome::AlreadyPresent);
                }
                let handle = compute
                    .create_subnetwork(&plan.subnetwork_spec())
                    .await
                    .map_err(|e| provider_err("creating subnetwork", e))?;
                waiter.wait(&handle).await?;
                tracing::info!(subnetwork = %plan.subnetwork_ref(), operation = %handle.name, "dataplane subnetwork created");
                Ok::<_, ProvisionError>(EnsureOutcome::Created)
            })
            .await
            .copied()
    }
}
