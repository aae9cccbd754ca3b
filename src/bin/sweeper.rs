use std::time::Duration;

use tokio::{signal, time::sleep};
use tracing_subscriber::EnvFilter;

use signflow::{
    config::AppConfig, db, db::PgPool, workers::reminders::enqueue_due_reminders,
    workflow::sweep_expired,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "sweeper",
        database_url = %config.redacted_database_url(),
        interval_seconds = config.sweep_interval_seconds,
        "loaded configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    let interval = Duration::from_secs(config.sweep_interval_seconds);

    tokio::select! {
        _ = run(pool, interval) => {}
        _ = signal::ctrl_c() => {
            tracing::info!("sweeper received shutdown signal");
        }
    }

    Ok(())
}

async fn run(pool: PgPool, interval: Duration) {
    loop {
        match pool.get() {
            Ok(mut conn) => {
                match sweep_expired(&mut conn) {
                    Ok(expired) if !expired.is_empty() => {
                        tracing::info!(count = expired.len(), "expired overdue documents");
                    }
                    Ok(_) => {}
                    Err(err) => tracing::error!(error = %err, "expiry sweep failed"),
                }
                match enqueue_due_reminders(&mut conn) {
                    Ok(enqueued) if enqueued > 0 => {
                        tracing::info!(enqueued, "queued reminder jobs");
                    }
                    Ok(_) => {}
                    Err(err) => tracing::error!(error = %err, "reminder scan failed"),
                }
            }
            Err(err) => tracing::error!(error = %err, "sweeper could not reach the database"),
        }
        sleep(interval).await;
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
