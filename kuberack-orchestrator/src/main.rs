use std::sync::Arc;

use anyhow::Context;
use kuberack_orchestrator::events::RedisEventPublisher;
use kuberack_orchestrator::http::{self, AppState};
use kuberack_orchestrator::listener;
use kuberack_orchestrator::provider_manager::ProviderManager;
use kuberack_orchestrator::settings::Settings;
use kuberack_orchestrator::workflow::ProvisioningWorkflow;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let settings = Settings::from_env()?;
    tracing::info!(
        provider = %settings.provider,
        record_store = %settings.record_store,
        project = %settings.lab.project,
        zone = %settings.lab.zone,
        "starting kuberack orchestrator"
    );

    let compute = ProviderManager::compute_provider(&settings)?;
    let store = ProviderManager::record_store(&settings).await?;
    let mut workflow =
        ProvisioningWorkflow::new(compute, store, settings.lab.clone(), settings.poll.clone());

    let redis_client = match settings.redis_url.as_deref() {
        Some(url) => Some(redis::Client::open(url).context("invalid REDIS_URL")?),
        None => {
            tracing::warn!("REDIS_URL not set: command listener and lab events disabled");
            None
        }
    };
    if let Some(client) = &redis_client {
        workflow = workflow.with_event_publisher(Arc::new(RedisEventPublisher::new(client.clone())));
    }
    let workflow = Arc::new(workflow);

    if let Some(client) = redis_client {
        let workflow = workflow.clone();
        tokio::spawn(async move {
            if let Err(e) = listener::run(client, workflow).await {
                tracing::error!(error = %e, "lab command listener stopped");
            }
        });
    }

    let app = http::router(AppState { workflow });
    let listener = tokio::net::TcpListener::bind(settings.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.listen_addr))?;
    tracing::info!(addr = %settings.listen_addr, "http listening");
    axum::serve(listener, app).await?;
    Ok(())
}
