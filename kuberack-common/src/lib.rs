use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod bus;
pub mod error;

pub use error::ProvisionError;

/// Document collection holding one provisioning record per identity.
pub const RECORD_COLLECTION: &str = "dataplane";

// --- Identity ---

/// Longest prefix that still fits a 63-character compute resource name once the
/// longest role suffix is appended.
pub const MAX_PREFIX_LEN: usize = 63 - "-k8s-master".len();

/// Tenant key a lab is provisioned for (typically an email address).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    pub fn parse(raw: &str) -> Result<Self, ProvisionError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ProvisionError::InvalidIdentity(
                "identity must not be empty".to_string(),
            ));
        }
        // Instance names derive from the prefix and must start with a letter.
        if !trimmed.starts_with(|c: char| c.is_ascii_alphabetic()) {
            return Err(ProvisionError::InvalidIdentity(format!(
                "identity {:?} must start with an ASCII letter",
                trimmed
            )));
        }
        if trimmed.chars().count() > MAX_PREFIX_LEN {
            return Err(ProvisionError::InvalidIdentity(format!(
                "identity {:?} is longer than {} characters",
                trimmed, MAX_PREFIX_LEN
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Resource-safe prefix: lowercase, every char outside `[a-z0-9]` becomes `-`.
    ///
    /// Compute resource names and label values reject `@` and `.`, so
    /// `alice@example.com` becomes `alice-example-com`.
    ///
    /// The mapping is lossy: `a.b@x.io` and `a-b@x.io` share `a-b-x-io`. Records
    /// stay separate, but the second identity's instance creation fails with
    /// "already exists" at CreateMaster.
    pub fn name_prefix(&self) -> String {
        self.0
            .chars()
            .map(|c| {
                let c = c.to_ascii_lowercase();
                if c.is_ascii_lowercase() || c.is_ascii_digit() {
                    c
                } else {
                    '-'
                }
            })
            .collect()
    }
}

impl TryFrom<String> for Identity {
    type Error = ProvisionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Identity::parse(&value)
    }
}

impl From<Identity> for String {
    fn from(value: Identity) -> Self {
        value.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// --- Lab roles ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabRole {
    Master,
    Worker1,
    Worker2,
}

impl LabRole {
    pub const ALL: [LabRole; 3] = [LabRole::Master, LabRole::Worker1, LabRole::Worker2];

    pub fn as_str(&self) -> &'static str {
        match self {
            LabRole::Master => "master",
            LabRole::Worker1 => "worker1",
            LabRole::Worker2 => "worker2",
        }
    }

    fn name_suffix(&self) -> &'static str {
        match self {
            LabRole::Master => "k8s-master",
            LabRole::Worker1 => "instance-1",
            LabRole::Worker2 => "instance-2",
        }
    }

    pub fn instance_name(&self, identity: &Identity) -> String {
        format!("{}-{}", identity.name_prefix(), self.name_suffix())
    }

    /// Partial record carrying this role's creation operation name.
    pub fn operation_patch(&self, operation_name: &str) -> ProvisioningRecord {
        let value = Some(operation_name.to_string());
        match self {
            LabRole::Master => ProvisioningRecord {
                master_operation_name: value,
                ..Default::default()
            },
            LabRole::Worker1 => ProvisioningRecord {
                worker1_operation_name: value,
                ..Default::default()
            },
            LabRole::Worker2 => ProvisioningRecord {
                worker2_operation_name: value,
                ..Default::default()
            },
        }
    }
}

impl fmt::Display for LabRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Operation scopes ---

/// Jurisdiction an asynchronous cloud operation must be queried under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum OperationScope {
    Zonal { zone: String },
    Regional { region: String },
    Global,
}

impl fmt::Display for OperationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationScope::Zonal { zone } => write!(f, "zonal({})", zone),
            OperationScope::Regional { region } => write!(f, "regional({})", region),
            OperationScope::Global => f.write_str("global"),
        }
    }
}

// --- Workflow steps ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionStep {
    CheckIdempotency,
    GenerateSshKeys,
    CreateNetwork,
    CreateSubnet,
    CreateMaster,
    CreateWorker1,
    CreateWorker2,
    ResolveAddresses,
    GenerateSigningKeys,
    Done,
}

impl ProvisionStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisionStep::CheckIdempotency => "check_idempotency",
            ProvisionStep::GenerateSshKeys => "generate_ssh_keys",
            ProvisionStep::CreateNetwork => "create_network",
            ProvisionStep::CreateSubnet => "create_subnet",
            ProvisionStep::CreateMaster => "create_master",
            ProvisionStep::CreateWorker1 => "create_worker1",
            ProvisionStep::CreateWorker2 => "create_worker2",
            ProvisionStep::ResolveAddresses => "resolve_addresses",
            ProvisionStep::GenerateSigningKeys => "generate_signing_keys",
            ProvisionStep::Done => "done",
        }
    }

    pub fn create_step(role: LabRole) -> Self {
        match role {
            LabRole::Master => ProvisionStep::CreateMaster,
            LabRole::Worker1 => ProvisionStep::CreateWorker1,
            LabRole::Worker2 => ProvisionStep::CreateWorker2,
        }
    }
}

impl fmt::Display for ProvisionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Provisioning record ---

/// Durable per-identity document.
///
/// Every field is optional and unset fields are skipped on serialization, so
/// a sparsely populated value is also the partial patch handed to a merge write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_private_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt_public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt_private_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_operation_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker1_operation_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker2_operation_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker1_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker2_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ProvisioningRecord {
    pub fn operation_name(&self, role: LabRole) -> Option<&str> {
        match role {
            LabRole::Master => self.master_operation_name.as_deref(),
            LabRole::Worker1 => self.worker1_operation_name.as_deref(),
            LabRole::Worker2 => self.worker2_operation_name.as_deref(),
        }
    }

    pub fn address(&self, role: LabRole) -> Option<&str> {
        match role {
            LabRole::Master => self.master_address.as_deref(),
            LabRole::Worker1 => self.worker1_address.as_deref(),
            LabRole::Worker2 => self.worker2_address.as_deref(),
        }
    }

    /// Document fields as a JSON object, only the populated ones.
    pub fn to_fields(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }

    pub fn from_fields(
        fields: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::Value::Object(fields))
    }
}
