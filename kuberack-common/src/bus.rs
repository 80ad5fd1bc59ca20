use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -----------------------------------------------------------------------------
// Channels
// -----------------------------------------------------------------------------

pub const CHANNEL_LAB_COMMANDS: &str = "lab_commands";
pub const CHANNEL_LAB_EVENTS: &str = "lab_events";

// -----------------------------------------------------------------------------
// Commands (CMD:*)
// -----------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum CommandType {
    #[serde(rename = "CMD:PROVISION_LAB")]
    ProvisionLab,
}

impl CommandType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandType::ProvisionLab => "CMD:PROVISION_LAB",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CommandProvisionLab {
    #[serde(rename = "type")]
    pub command_type: CommandType,
    pub identity: String,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

// -----------------------------------------------------------------------------
// Lab events (EVT:*)
// -----------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum LabEventType {
    #[serde(rename = "EVT:LAB_PROVISIONED")]
    LabProvisioned,
    #[serde(rename = "EVT:LAB_PROVISION_FAILED")]
    LabProvisionFailed,
}

impl LabEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LabEventType::LabProvisioned => "EVT:LAB_PROVISIONED",
            LabEventType::LabProvisionFailed => "EVT:LAB_PROVISION_FAILED",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LabEventEnvelope {
    pub event_id: Uuid,
    #[serde(rename = "type")]
    pub event_type: LabEventType,
    pub occurred_at: DateTime<Utc>,
    pub identity: String,
    pub payload: serde_json::Value,
    pub source: String,
}

impl LabEventEnvelope {
    pub fn new(
        event_type: LabEventType,
        identity: &str,
        payload: serde_json::Value,
        source: &str,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            occurred_at: Utc::now(),
            identity: identity.to_string(),
            payload,
            source: source.to_string(),
        }
    }
}
