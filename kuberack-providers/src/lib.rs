use anyhow::Result;
use async_trait::async_trait;

pub use kuberack_common::OperationScope;

/// Document body exchanged with a record store.
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// Compute control plane consumed by the provisioning workflow.
///
/// Creation calls return as soon as the provider accepted the request; the
/// returned handle is polled through `get_operation` until it reports DONE.
#[async_trait]
pub trait ComputeProvider: Send + Sync {
    async fn create_network(&self, spec: &resources::NetworkSpec) -> Result<inventory::OperationHandle>;

    async fn create_subnetwork(
        &self,
        spec: &resources::SubnetworkSpec,
    ) -> Result<inventory::OperationHandle>;

    async fn create_instance(
        &self,
        spec: &resources::InstanceSpec,
    ) -> Result<inventory::OperationHandle>;

    async fn get_operation(
        &self,
        scope: &OperationScope,
        name: &str,
    ) -> Result<inventory::OperationStatus>;

    async fn get_instance(&self, zone: &str, name: &str) -> Result<inventory::InstanceDetails>;

    // Optional: existence checks for the shared dataplane resources.
    // Default implementation returns false (caller always attempts creation).
    async fn network_exists(&self, _name: &str) -> Result<bool> {
        Ok(false)
    }

    async fn subnetwork_exists(&self, _region: &str, _name: &str) -> Result<bool> {
        Ok(false)
    }

    // Optional: provider-specific boot image resolution (e.g. image name -> selfLink).
    // Default implementation returns None (caller falls back to the configured image).
    async fn resolve_source_image(&self, _image: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Durable document store holding provisioning records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn doc_exists(&self, collection: &str, key: &str) -> Result<bool>;

    async fn doc_get(&self, collection: &str, key: &str) -> Result<Option<Fields>>;

    /// Create the document if absent, otherwise merge `fields` over the stored ones.
    async fn doc_merge_set(&self, collection: &str, key: &str, fields: Fields) -> Result<()>;

    /// Atomic create-if-absent. Returns true only for the call that created the document.
    async fn doc_create_if_absent(&self, collection: &str, key: &str, fields: Fields)
        -> Result<bool>;
}

pub mod resources {
    use std::collections::BTreeMap;

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct NetworkSpec {
        pub name: String,
        pub auto_create_subnetworks: bool,
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct SubnetworkSpec {
        pub name: String,
        pub region: String,
        /// Network reference, e.g. `global/networks/dataplane`.
        pub network: String,
        pub ip_cidr_range: String,
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct BootDisk {
        pub source_image: String,
        pub disk_size_gb: u64,
        pub auto_delete: bool,
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct NetworkInterfaceSpec {
        /// Subnetwork reference, e.g. `regions/us-central1/subnetworks/default`.
        pub subnetwork: String,
        /// Name of the ONE_TO_ONE_NAT access config attached to this interface.
        pub access_config_name: String,
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct MetadataItem {
        pub key: String,
        pub value: String,
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct ServiceAccountSpec {
        pub email: String,
        pub scopes: Vec<String>,
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct InstanceSpec {
        pub name: String,
        pub zone: String,
        /// Partial URL, e.g. `zones/us-central1-a/machineTypes/n1-standard-2`.
        pub machine_type: String,
        pub can_ip_forward: bool,
        pub boot_disk: BootDisk,
        pub network_interfaces: Vec<NetworkInterfaceSpec>,
        pub metadata: Vec<MetadataItem>,
        pub service_account: ServiceAccountSpec,
        pub labels: BTreeMap<String, String>,
    }

    impl InstanceSpec {
        pub fn metadata_value(&self, key: &str) -> Option<&str> {
            self.metadata
                .iter()
                .find(|item| item.key == key)
                .map(|item| item.value.as_str())
        }
    }
}

pub mod inventory {
    use serde::Deserialize;

    use super::OperationScope;

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct OperationHandle {
        pub name: String,
        pub scope: OperationScope,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
    #[serde(rename_all = "UPPERCASE")]
    pub enum OperationState {
        Pending,
        Running,
        Done,
    }

    #[derive(Clone, Debug)]
    pub struct OperationStatus {
        pub name: String,
        pub state: OperationState,
        /// Error payload reported by the provider on a failed terminal operation.
        pub error: Option<serde_json::Value>,
        /// Raw operation resource as returned by the provider.
        pub payload: serde_json::Value,
    }

    impl OperationStatus {
        pub fn is_done(&self) -> bool {
            self.state == OperationState::Done
        }
    }

    #[derive(Clone, Debug, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct AccessConfig {
        #[serde(default)]
        pub name: Option<String>,
        #[serde(default, rename = "natIP")]
        pub nat_ip: Option<String>,
    }

    #[derive(Clone, Debug, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct NetworkInterface {
        #[serde(default, rename = "networkIP")]
        pub network_ip: Option<String>,
        #[serde(default)]
        pub access_configs: Vec<AccessConfig>,
    }

    #[derive(Clone, Debug, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct InstanceDetails {
        pub name: String,
        #[serde(default)]
        pub status: Option<String>,
        #[serde(default)]
        pub network_interfaces: Vec<NetworkInterface>,
    }

    impl InstanceDetails {
        /// NAT address of the first access config of the first interface, if non-empty.
        pub fn first_external_address(&self) -> Option<&str> {
            self.network_interfaces
                .first()?
                .access_configs
                .first()?
                .nat_ip
                .as_deref()
                .map(str::trim)
                .filter(|ip| !ip.is_empty())
        }
    }

}

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub mod memory;

#[cfg(any(test, feature = "gce"))]
pub mod gce;

#[cfg(feature = "postgres")]
pub mod postgres;
