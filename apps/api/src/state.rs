use crate::config::Config;
use crate::db::Database;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Config,
}
