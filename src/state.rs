use std::sync::Arc;

use diesel::{
    pg::PgConnection,
    r2d2::{ConnectionManager, PooledConnection},
};

use crate::{
    config::AppConfig,
    db::PgPool,
    error::{AppError, AppResult},
    hints::{OriginHints, VisitTracker},
    jobs::TaskClient,
};

pub type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub tasks: Arc<dyn TaskClient>,
    pub origin_hints: Arc<dyn OriginHints>,
    pub visits: Arc<dyn VisitTracker>,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        config: AppConfig,
        tasks: Arc<dyn TaskClient>,
        origin_hints: Arc<dyn OriginHints>,
        visits: Arc<dyn VisitTracker>,
    ) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            tasks,
            origin_hints,
            visits,
        }
    }

    pub fn db(&self) -> AppResult<PgPooledConnection> {
        self.pool
            .get()
            .map_err(|err| AppError::transient(format!("database pool error: {err}")))
    }
}
