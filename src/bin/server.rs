use std::net::SocketAddr;
use std::sync::Arc;

use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use tokio::net::TcpListener;
use tower::make::Shared;
use tracing_subscriber::EnvFilter;

use workcore::config::AppConfig;
use workcore::db;
use workcore::hints::{InMemoryOriginHints, PgVisitTracker};
use workcore::jobs::PgTaskClient;
use workcore::routes;
use workcore::state::AppState;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "server",
        storage_dsn = %config.redacted_storage_dsn(),
        pool_size = config.database_max_pool_size,
        server_host = %config.server_host,
        server_port = config.server_port,
        query_deadline_secs = config.query_deadline_secs,
        "loaded configuration"
    );

    let pool = db::init_pool_with_size(&config.storage_dsn, config.database_max_pool_size)?;
    {
        let mut conn = pool.get()?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|err| anyhow::anyhow!("failed to run migrations: {err}"))?;
    }

    let tasks = Arc::new(PgTaskClient::new(pool.clone()));
    let visits = Arc::new(PgVisitTracker::new(pool.clone()));
    let state = AppState::new(
        pool,
        config,
        tasks,
        Arc::new(InMemoryOriginHints::default()),
        visits,
    );

    let listen_addr: SocketAddr = {
        let config = state.config.clone();
        format!("{}:{}", config.server_host, config.server_port).parse()?
    };
    let router = routes::create_router(state);

    let listener = TcpListener::bind(listen_addr).await?;
    tracing::info!("listening on {}", listen_addr);

    axum::serve(listener, Shared::new(router)).await?;
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
