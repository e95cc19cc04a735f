pub mod health;
pub mod query;

use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use crate::config::CorsConfig;
use crate::state::AppState;
use crate::users::handlers;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Users API
        .route("/users", post(handlers::handle_create_user))
        .route("/users/", post(handlers::handle_create_user))
        .route("/users/search", post(handlers::handle_search_similar))
        .route(
            "/users/:id",
            get(handlers::handle_get_user)
                .put(handlers::handle_update_user)
                .delete(handlers::handle_delete_user),
        )
        // Raw query demos
        .route("/query/:id", get(query::handle_select_query))
        .route("/test", get(query::handle_first_user))
        .with_state(state)
}

pub fn cors_layer(config: &CorsConfig) -> CorsLayer {
    match config {
        CorsConfig::Permissive => CorsLayer::permissive(),
        CorsConfig::AllowList(origins) => {
            let origins: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|o| match o.parse::<HeaderValue>() {
                    Ok(v) => Some(v),
                    Err(_) => {
                        warn!("Ignoring invalid CORS origin '{o}'");
                        None
                    }
                })
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    }
}
