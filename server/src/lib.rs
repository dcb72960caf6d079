//! Breed classification HTTP service
//!
//! Routes:
//! - `GET /` service identity
//! - `GET /health` model load status, always 200
//! - `POST /predict` top-5 breeds for a multipart `image`
//! - `POST /species` cattle or buffalo for a multipart `image`

pub mod routes;
pub mod state;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::SharedState;

/// Build the application router
pub fn build_router(state: SharedState) -> Router {
    let body_limit = state.config.max_upload_bytes();

    Router::new()
        .route("/", get(routes::root::root))
        .route("/health", get(routes::health::health_check))
        .route("/predict", post(routes::predict::predict))
        .route("/species", post(routes::predict::species))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}
