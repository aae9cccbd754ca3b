use std::sync::Arc;

use diesel::{
    pg::PgConnection,
    r2d2::{ConnectionManager, PooledConnection},
};

use crate::{
    config::AppConfig,
    db::PgPool,
    error::{CoreError, CoreResult},
    finalizer::CertificateSigner,
    notify::NotificationSender,
    storage::ObjectStorage,
};

type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub storage: Arc<dyn ObjectStorage>,
    pub notifier: Arc<dyn NotificationSender>,
    pub cert_signer: Arc<dyn CertificateSigner>,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        config: AppConfig,
        storage: Arc<dyn ObjectStorage>,
        notifier: Arc<dyn NotificationSender>,
        cert_signer: Arc<dyn CertificateSigner>,
    ) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            storage,
            notifier,
            cert_signer,
            http: reqwest::Client::new(),
        }
    }

    pub fn db(&self) -> CoreResult<PgPooledConnection> {
        self.pool
            .get()
            .map_err(|err| CoreError::Pool(err.to_string()))
    }
}
