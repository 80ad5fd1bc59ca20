use crate::{Fields, RecordStore};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// Process-local record store.
///
/// Writes take the map's write lock, so concurrent merges on one key are
/// serialised (last merge wins per field).
#[derive(Default)]
pub struct MemoryRecordStore {
    docs: RwLock<HashMap<(String, String), Fields>>,
    unavailable: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail, as if the backing store could not be reached.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of successful mutating calls (merges and winning claims).
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub async fn insert(&self, collection: &str, key: &str, fields: Fields) {
        self.docs
            .write()
            .await
            .insert((collection.to_string(), key.to_string()), fields);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("memory store marked unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn doc_exists(&self, collection: &str, key: &str) -> Result<bool> {
        self.check_available()?;
        Ok(self
            .docs
            .read()
            .await
            .contains_key(&(collection.to_string(), key.to_string())))
    }

    async fn doc_get(&self, collection: &str, key: &str) -> Result<Option<Fields>> {
        self.check_available()?;
        Ok(self
            .docs
            .read()
            .await
            .get(&(collection.to_string(), key.to_string()))
            .cloned())
    }

    async fn doc_merge_set(&self, collection: &str, key: &str, fields: Fields) -> Result<()> {
        self.check_available()?;
        let mut docs = self.docs.write().await;
        let doc = docs
            .entry((collection.to_string(), key.to_string()))
            .or_default();
        for (field, value) in fields {
            doc.insert(field, value);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn doc_create_if_absent(
        &self,
        collection: &str,
        key: &str,
        fields: Fields,
    ) -> Result<bool> {
        self.check_available()?;
        let mut docs = self.docs.write().await;
        let id = (collection.to_string(), key.to_string());
        if docs.contains_key(&id) {
            return Ok(false);
        }
        docs.insert(id, fields);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
}
