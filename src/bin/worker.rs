use std::{sync::Arc, time::Duration};

use tokio::signal;
use tracing_subscriber::EnvFilter;

use workcore::config::AppConfig;
use workcore::db;
use workcore::hints::{InMemoryOriginHints, InMemoryVisitTracker};
use workcore::jobs::PgTaskClient;
use workcore::state::AppState;
use workcore::{default_handlers, Worker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "worker",
        storage_dsn = %config.redacted_storage_dsn(),
        pool_size = 1,
        notify_max_attempts = config.notify_max_attempts,
        "loaded configuration"
    );
    let pool = db::init_pool_with_size(&config.task_queue_dsn, 1)?;

    let tasks = Arc::new(PgTaskClient::new(pool.clone()));
    let state = Arc::new(AppState::new(
        pool,
        config,
        tasks,
        Arc::new(InMemoryOriginHints::default()),
        Arc::new(InMemoryVisitTracker::default()),
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
