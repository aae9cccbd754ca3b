use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use once_cell::sync::Lazy;
use serde_json::json;
use tokio::sync::Mutex;
use uuid::Uuid;

use signflow::config::AppConfig;
use signflow::db::{self, PgPool};
use signflow::finalizer::CertificateSigner;
use signflow::models::{
    Document, NewDocument, NewSigner, NewTenantCertificate, NewWebhookConfig, Signer,
    TenantCertificate, WebhookDeliveryLog, DOCUMENT_DRAFT, SIGNER_PENDING,
};
use signflow::notify::{CodeChannel, NotificationSender};
use signflow::state::AppState;
use signflow::storage::ObjectStorage;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

#[derive(Default)]
pub struct FakeStorage {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl FakeStorage {
    pub async fn put(&self, key: &str, bytes: Vec<u8>) {
        let mut guard = self.objects.lock().await;
        guard.insert(key.to_string(), bytes);
    }

    #[allow(dead_code)]
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let guard = self.objects.lock().await;
        guard.get(key).cloned()
    }
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        _content_type: Option<String>,
    ) -> Result<()> {
        self.put(key, bytes).await;
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let guard = self.objects.lock().await;
        guard
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow!("object {key} missing"))
    }

    async fn signed_url(&self, key: &str, expires_in: Duration) -> Result<String> {
        Ok(format!(
            "https://fake-storage/{key}?expires_in={}",
            expires_in.as_secs()
        ))
    }
}

#[derive(Default)]
pub struct FakeNotifier {
    pub sent_codes: Mutex<Vec<(String, String)>>,
    pub signing_requests: Mutex<Vec<Uuid>>,
}

#[async_trait]
impl NotificationSender for FakeNotifier {
    async fn send_code(&self, _channel: CodeChannel, destination: &str, code: &str) -> Result<()> {
        let mut guard = self.sent_codes.lock().await;
        guard.push((destination.to_string(), code.to_string()));
        Ok(())
    }

    async fn send_signing_request(&self, signer: &Signer, _document: &Document) -> Result<()> {
        let mut guard = self.signing_requests.lock().await;
        guard.push(signer.id);
        Ok(())
    }
}

/// Marks the artifact instead of actually embedding a signature, so tests
/// can tell original and signed bytes apart.
pub struct StampSigner;

#[async_trait]
impl CertificateSigner for StampSigner {
    async fn sign(&self, bytes: Vec<u8>, _certificate: &TenantCertificate) -> Result<Vec<u8>> {
        let mut signed = b"SIGNED:".to_vec();
        signed.extend(bytes);
        Ok(signed)
    }
}

pub struct TestApp {
    pub state: AppState,
    storage: Arc<FakeStorage>,
    notifier: Arc<FakeNotifier>,
}

impl TestApp {
    /// Returns None (skipping the test) when TEST_DATABASE_URL is unset.
    pub async fn new() -> Result<Option<Self>> {
        let Ok(database_url) = env::var("TEST_DATABASE_URL") else {
            eprintln!("TEST_DATABASE_URL not set; skipping integration test");
            return Ok(None);
        };

        let config = AppConfig {
            database_url: database_url.clone(),
            database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
            verification_code_ttl_minutes: 15,
            verification_max_attempts: 5,
            webhook_timeout_seconds: 2,
            webhook_max_attempts: 5,
            webhook_base_backoff_seconds: 1,
            require_witness_signatures: false,
            sweep_interval_seconds: 60,
            aws_endpoint_url: None,
            aws_access_key_id: None,
            aws_secret_access_key: None,
            aws_region: "us-east-1".to_string(),
            s3_bucket: "test-bucket".to_string(),
        };

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let storage = Arc::new(FakeStorage::default());
        let notifier = Arc::new(FakeNotifier::default());
        let state = AppState::new(
            pool,
            config,
            storage.clone(),
            notifier.clone(),
            Arc::new(StampSigner),
        );

        Ok(Some(Self {
            state,
            storage,
            notifier,
        }))
    }

    pub fn storage(&self) -> Arc<FakeStorage> {
        self.storage.clone()
    }

    pub fn notifier(&self) -> Arc<FakeNotifier> {
        self.notifier.clone()
    }

    pub async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }

    pub async fn insert_document(
        &self,
        tenant_id: Uuid,
        signing_mode: &str,
        closure_mode: &str,
        expires_at: Option<NaiveDateTime>,
    ) -> Result<Uuid> {
        let signing_mode = signing_mode.to_string();
        let closure_mode = closure_mode.to_string();
        self.with_conn(move |conn| {
            let document = NewDocument {
                id: Uuid::new_v4(),
                tenant_id,
                title: "Service agreement".to_string(),
                status: DOCUMENT_DRAFT.to_string(),
                signing_mode,
                closure_mode,
                reminder_interval_hours: None,
                signing_language: "en".to_string(),
                original_hash: "deadbeef".to_string(),
                expires_at,
            };
            diesel::insert_into(signflow::schema::documents::table)
                .values(&document)
                .execute(conn)
                .context("failed to insert document")?;
            Ok(document.id)
        })
        .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn insert_signer(
        &self,
        document_id: Uuid,
        name: &str,
        auth_method: &str,
        role: &str,
        position: i32,
        cpf: Option<&str>,
    ) -> Result<Uuid> {
        let name = name.to_string();
        let auth_method = auth_method.to_string();
        let role = role.to_string();
        let cpf = cpf.map(str::to_string);
        self.with_conn(move |conn| {
            let signer = NewSigner {
                id: Uuid::new_v4(),
                document_id,
                email: format!("{}@example.com", name.to_lowercase().replace(' ', ".")),
                name,
                phone: None,
                cpf,
                role,
                auth_method,
                request_cpf: false,
                request_phone: false,
                request_email: true,
                position,
                status: SIGNER_PENDING.to_string(),
            };
            diesel::insert_into(signflow::schema::signers::table)
                .values(&signer)
                .execute(conn)
                .context("failed to insert signer")?;
            Ok(signer.id)
        })
        .await
    }

    pub async fn insert_webhook_config(
        &self,
        tenant_id: Uuid,
        url: &str,
        events: &[&str],
    ) -> Result<Uuid> {
        let url = url.to_string();
        let events = json!(events);
        self.with_conn(move |conn| {
            let config = NewWebhookConfig {
                id: Uuid::new_v4(),
                tenant_id,
                url,
                events,
                secret: "whsec_test".to_string(),
                active: true,
            };
            diesel::insert_into(signflow::schema::webhook_configs::table)
                .values(&config)
                .execute(conn)
                .context("failed to insert webhook config")?;
            Ok(config.id)
        })
        .await
    }

    pub async fn insert_certificate(&self, tenant_id: Uuid, expires_at: NaiveDateTime) -> Result<Uuid> {
        self.with_conn(move |conn| {
            let certificate = NewTenantCertificate {
                id: Uuid::new_v4(),
                tenant_id,
                subject: "CN=Test Tenant".to_string(),
                issuer: "CN=Test CA".to_string(),
                expires_at,
                credential: "encrypted-credential".to_string(),
            };
            diesel::insert_into(signflow::schema::tenant_certificates::table)
                .values(&certificate)
                .execute(conn)
                .context("failed to insert certificate")?;
            Ok(certificate.id)
        })
        .await
    }

    pub async fn load_document(&self, document_id: Uuid) -> Result<Document> {
        self.with_conn(move |conn| {
            signflow::schema::documents::table
                .find(document_id)
                .first(conn)
                .context("failed to load document")
        })
        .await
    }

    pub async fn load_signer(&self, signer_id: Uuid) -> Result<Signer> {
        self.with_conn(move |conn| {
            signflow::schema::signers::table
                .find(signer_id)
                .first(conn)
                .context("failed to load signer")
        })
        .await
    }

    pub async fn load_signers(&self, document_id: Uuid) -> Result<Vec<Signer>> {
        self.with_conn(move |conn| {
            signflow::schema::signers::table
                .filter(signflow::schema::signers::document_id.eq(document_id))
                .order(signflow::schema::signers::position.asc())
                .load(conn)
                .context("failed to load signers")
        })
        .await
    }

    pub async fn jobs_by_type(&self, ty: &str) -> Result<Vec<signflow::models::Job>> {
        let ty = ty.to_string();
        self.with_conn(move |conn| {
            signflow::schema::jobs::table
                .filter(signflow::schema::jobs::job_type.eq(&ty))
                .load(conn)
                .context("failed to load jobs")
        })
        .await
    }

    pub async fn delivery_logs(&self) -> Result<Vec<WebhookDeliveryLog>> {
        self.with_conn(move |conn| {
            signflow::schema::webhook_delivery_logs::table
                .order(signflow::schema::webhook_delivery_logs::attempt_number.asc())
                .load(conn)
                .context("failed to load delivery logs")
        })
        .await
    }
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|err| anyhow!("failed to run migrations: {err}"))?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE webhook_delivery_logs, webhook_configs, tenant_certificates, signers, documents, jobs RESTART IDENTITY CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}
