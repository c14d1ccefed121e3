//! Image Builder
//!
//! REST API translating compose requests for the image build service

use anyhow::{Context, Result};
use image_builder::clients::{
    ComplianceClient, ComposerClient, ContentSourcesClient, LazyToken, ProvisioningClient,
};
use image_builder::distribution::DistributionRegistry;
use image_builder::quota::QuotaGuard;
use image_builder::storage::{MemoryStore, PostgresStore, Store};
use image_builder::{create_router, AppState, ComposeService, Config, Metrics};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const MAX_DB_CONNECTIONS: u32 = 10;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "image_builder=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;

    info!("Starting Image Builder");
    info!("Build service URL: {}", config.composer_url);
    info!("Distributions directory: {}", config.distributions_dir.display());

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => Arc::new(
            PostgresStore::connect(url, MAX_DB_CONNECTIONS, config.run_migrations)
                .await
                .context("Failed to initialize database storage")?,
        ),
        None => {
            warn!("DATABASE_URL not set, composes are kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let distributions = DistributionRegistry::load(&config.distributions_dir)
        .context("Failed to load distributions")?;

    let token = config.composer_token_url.as_ref().map(|url| {
        LazyToken::new(
            url.clone(),
            config.composer_client_id.clone(),
            config.composer_client_secret.clone(),
        )
    });

    match &config.quota_file {
        Some(path) => info!("Quota file: {}", path.display()),
        None => warn!("QUOTA_FILE not set, compose quotas are disabled"),
    }

    let service = ComposeService {
        store,
        composer: Arc::new(ComposerClient::new(&config.composer_url, token)),
        provisioning: Arc::new(ProvisioningClient::new(config.provisioning_url.clone())),
        content: Arc::new(ContentSourcesClient::new(config.content_sources_url.clone())),
        compliance: Arc::new(ComplianceClient::new(config.compliance_url.clone())),
        distributions,
        quota: QuotaGuard::new(config.quota_file.clone()),
        targets: config.upload_targets(),
        metrics: Metrics::new().context("Failed to register metrics")?,
    };

    // Create router
    let app = create_router(AppState { service });

    // Start API server
    let listener = tokio::net::TcpListener::bind(config.listen_address)
        .await
        .context("Failed to bind to address")?;

    info!("Image Builder API running on http://{}", config.listen_address);

    axum::serve(listener, app)
        .await
        .context("Server error")?;

    Ok(())
}
