use std::sync::Arc;

use kuberack_common::{Identity, ProvisionError, ProvisioningRecord, RECORD_COLLECTION};
use kuberack_providers::RecordStore;

/// Typed access to the per-identity provisioning record.
///
/// Store failures surface as `RecordStoreUnavailable` so an unreachable store
/// is never mistaken for an absent record.
#[derive(Clone)]
pub struct RecordRepository {
    store: Arc<dyn RecordStore>,
    collection: String,
}

fn unavailable(action: &str, identity: &Identity, err: anyhow::Error) -> ProvisionError {
    ProvisionError::RecordStoreUnavailable(format!("{} {}: {:#}", action, identity, err))
}

impl RecordRepository {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self::with_collection(store, RECORD_COLLECTION)
    }

    pub fn with_collection(store: Arc<dyn RecordStore>, collection: &str) -> Self {
        Self {
            store,
            collection: collection.to_string(),
        }
    }

    pub async fn exists(&self, identity: &Identity) -> Result<bool, ProvisionError> {
        self.store
            .doc_exists(&self.collection, identity.as_str())
            .await
            .map_err(|e| unavailable("checking record", identity, e))
    }

    pub async fn get(&self, identity: &Identity) -> Result<ProvisioningRecord, ProvisionError> {
        let fields = self
            .store
            .doc_get(&self.collection, identity.as_str())
            .await
            .map_err(|e| unavailable("reading record", identity, e))?
            .ok_or_else(|| ProvisionError::RecordNotFound(identity.to_string()))?;
        ProvisioningRecord::from_fields(fields).map_err(|e| {
            ProvisionError::RecordStoreUnavailable(format!("malformed record {}: {}", identity, e))
        })
    }

    /// Merge the populated fields of `patch`; unset fields are left untouched.
    pub async fn merge_set(
        &self,
        identity: &Identity,
        patch: &ProvisioningRecord,
    ) -> Result<(), ProvisionError> {
        let fields = patch.to_fields();
        if fields.is_empty() {
            return Ok(());
        }
        self.store
            .doc_merge_set(&self.collection, identity.as_str(), fields)
            .await
            .map_err(|e| unavailable("writing record", identity, e))
    }

    /// Create the record carrying only the identity field, if nobody else has.
    ///
    /// Returns false when the record already existed; the caller must then
    /// treat the identity as already provisioned.
    pub async fn claim(&self, identity: &Identity) -> Result<bool, ProvisionError> {
        let seed = ProvisioningRecord {
            identity: Some(identity.to_string()),
            ..Default::default()
        };
        self.store
            .doc_create_if_absent(&self.collection, identity.as_str(), seed.to_fields())
            .await
            .map_err(|e| unavailable("claiming record", identity, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kuberack_providers::memory::MemoryRecordStore;

    fn alice() -> Identity {
        Identity::parse("alice@example.com").unwrap()
    }

    #[tokio::test]
    async fn claim_then_merge_keeps_identity() {
        let repo = RecordRepository::new(Arc::new(MemoryRecordStore::new()));
        assert!(!repo.exists(&alice()).await.unwrap());
        assert!(repo.claim(&alice()).await.unwrap());
        assert!(!repo.claim(&alice()).await.unwrap());

        repo.merge_set(
            &alice(),
            &ProvisioningRecord {
                ssh_public_key: Some("ssh-ed25519 AAAA kuberack".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let record = repo.get(&alice()).await.unwrap();
        assert_eq!(record.identity.as_deref(), Some("alice@example.com"));
        assert_eq!(record.ssh_public_key.as_deref(), Some("ssh-ed25519 AAAA kuberack"));
        assert!(record.ssh_private_key.is_none());
    }

    #[tokio::test]
    async fn get_missing_record_is_not_found() {
        let repo = RecordRepository::new(Arc::new(MemoryRecordStore::new()));
        assert!(matches!(
            repo.get(&alice()).await,
            Err(ProvisionError::RecordNotFound(id)) if id == "alice@example.com"
        ));
    }

    #[tokio::test]
    async fn store_outage_is_distinct_from_absence() {
        let store = Arc::new(MemoryRecordStore::new());
        store.set_unavailable(true);
        let repo = RecordRepository::new(store);
        assert!(matches!(
            repo.exists(&alice()).await,
            Err(ProvisionError::RecordStoreUnavailable(_))
        ));
        assert!(matches!(
            repo.get(&alice()).await,
            Err(ProvisionError::RecordStoreUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn empty_patch_is_not_written() {
        let store = Arc::new(MemoryRecordStore::new());
        let repo = RecordRepository::new(store.clone());
        repo.merge_set(&alice(), &ProvisioningRecord::default())
            .await
            .unwrap();
        assert_eq!(store.write_count(), 0);
        assert!(!repo.exists(&alice()).await.unwrap());
    }
}
