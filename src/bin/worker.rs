use std::{sync::Arc, time::Duration};

use tokio::signal;
use tracing_subscriber::EnvFilter;

use signflow::{
    config::AppConfig, db, default_handlers, finalizer::CertificateSigner,
    models::TenantCertificate, notify::TracingNotifier, state::AppState, storage::S3Storage,
    Worker,
};

/// Placeholder signing capability for deployments without a real signing
/// service wired in; passes the artifact through unchanged.
struct PassthroughSigner;

#[async_trait::async_trait]
impl CertificateSigner for PassthroughSigner {
    async fn sign(
        &self,
        bytes: Vec<u8>,
        _certificate: &TenantCertificate,
    ) -> anyhow::Result<Vec<u8>> {
        Ok(bytes)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "worker",
        database_url = %config.redacted_database_url(),
        s3_bucket = %config.s3_bucket,
        webhook_max_attempts = config.webhook_max_attempts,
        "loaded configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    let storage = Arc::new(S3Storage::connect(&config).await);

    let state = Arc::new(AppState::new(
        pool,
        config,
        storage,
        Arc::new(TracingNotifier),
        Arc::new(PassthroughSigner),
    ));
    let worker = Worker::new(state, default_handlers(), Duration::from_secs(2));

    tokio::select! {
        _ = worker.run() => {}
        _ = signal::ctrl_c() => {
            tracing::info!("worker received shutdown signal");
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
