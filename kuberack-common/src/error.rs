use std::time::Duration;

use thiserror::Error;

use crate::{OperationScope, ProvisionStep};

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    #[error("signing lab access token failed: {0}")]
    TokenSigningFailed(String),

    #[error("{scope} operation {name} failed: {details}")]
    OperationFailed {
        scope: OperationScope,
        name: String,
        details: serde_json::Value,
    },

    #[error("{scope} operation {name} still pending after {waited:?}")]
    OperationTimeout {
        scope: OperationScope,
        name: String,
        waited: Duration,
    },

    #[error("no external address reported for instance {instance}")]
    AddressResolutionFailed { instance: String },

    #[error("record store unavailable: {0}")]
    RecordStoreUnavailable(String),

    #[error("record {0} not found")]
    RecordNotFound(String),

    #[error("provider call failed: {0}")]
    Provider(String),

    #[error("provisioning {identity} failed at {step}: {source}")]
    Step {
        identity: String,
        step: ProvisionStep,
        #[source]
        source: Box<ProvisionError>,
    },
}

impl ProvisionError {
    pub fn at_step(self, identity: &str, step: ProvisionStep) -> Self {
        match self {
            // Keep the innermost step; it names where the run actually stopped.
            already @ ProvisionError::Step { .. } => already,
            other => ProvisionError::Step {
                identity: identity.to_string(),
                step,
                source: Box::new(other),
            },
        }
    }

    /// Underlying error kind with step context stripped.
    pub fn root(&self) -> &ProvisionError {
        match self {
            ProvisionError::Step { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn step(&self) -> Option<ProvisionStep> {
        match self {
            ProvisionError::Step { step, .. } => Some(*step),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self.root() {
            ProvisionError::InvalidIdentity(_) => "INVALID_IDENTITY",
            ProvisionError::KeyGenerationFailed(_) => "KEY_GENERATION_FAILED",
            ProvisionError::TokenSigningFailed(_) => "TOKEN_SIGNING_FAILED",
            ProvisionError::OperationFailed { .. } => "OPERATION_FAILED",
            ProvisionError::OperationTimeout { .. } => "OPERATION_TIMEOUT",
            ProvisionError::AddressResolutionFailed { .. } => "ADDRESS_RESOLUTION_FAILED",
            ProvisionError::RecordStoreUnavailable(_) => "RECORD_STORE_UNAVAILABLE",
            ProvisionError::RecordNotFound(_) => "RECORD_NOT_FOUND",
            ProvisionError::Provider(_) => "PROVIDER_ERROR",
            ProvisionError::Step { .. } => "PROVISIONING_FAILED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_context_wraps_once() {
        let err = ProvisionError::AddressResolutionFailed {
            instance: "alice-example-com-k8s-master".to_string(),
        }
        .at_step("alice@example.com", ProvisionStep::ResolveAddresses)
        .at_step("alice@example.com", ProvisionStep::Done);

        assert_eq!(err.step(), Some(ProvisionStep::ResolveAddresses));
        assert_eq!(err.code(), "ADDRESS_RESOLUTION_FAILED");
        assert!(err.to_string().contains("resolve_addresses"));
        assert!(err.to_string().contains("alice@example.com"));
    }
}
