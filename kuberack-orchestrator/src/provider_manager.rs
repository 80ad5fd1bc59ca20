use std::sync::Arc;

use anyhow::{bail, Context, Result};
use kuberack_providers::memory::MemoryRecordStore;
use kuberack_providers::{ComputeProvider, RecordStore};

use crate::settings::Settings;

pub struct ProviderManager;

impl ProviderManager {
    pub fn compute_provider(settings: &Settings) -> Result<Arc<dyn ComputeProvider>> {
        match settings.provider.to_lowercase().as_str() {
            #[cfg(feature = "provider-gce")]
            "gce" => {
                let token = settings
                    .gce_access_token
                    .clone()
                    .context("GCE_ACCESS_TOKEN or GCE_ACCESS_TOKEN_FILE must be set for PROVIDER=gce")?;
                let provider =
                    kuberack_providers::gce::GceProvider::new(settings.lab.project.clone(), token)?;
                Ok(Arc::new(provider))
            }
            #[cfg(feature = "provider-mock")]
            "mock" => Ok(Arc::new(kuberack_providers::mock::MockComputeProvider::new())),
            other => bail!("unsupported PROVIDER '{}' (not compiled in or unknown)", other),
        }
    }

    pub async fn record_store(settings: &Settings) -> Result<Arc<dyn RecordStore>> {
        match settings.record_store.to_lowercase().as_str() {
            #[cfg(feature = "store-postgres")]
            "postgres" => {
                let database_url = settings
                    .database_url
                    .as_deref()
                    .context("DATABASE_URL must be set for RECORD_STORE=postgres")?;
                let pool = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(5)
                    .connect(database_url)
                    .await
                    .context("failed to connect to Postgres")?;
                sqlx::migrate!("../sqlx-migrations")
                    .run(&pool)
                    .await
                    .context("failed to run migrations")?;
                tracing::info!("record store: postgres");
                Ok(Arc::new(kuberack_providers::postgres::PostgresRecordStore::new(pool)))
            }
            "memory" => {
                tracing::warn!("record store: memory (records are lost on restart)");
                Ok(Arc::new(MemoryRecordStore::new()))
            }
            other => bail!("unsupported RECORD_STORE '{}' (not compiled in or unknown)", other),
        }
    }
}
