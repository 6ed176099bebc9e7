mod detect;
mod health;
mod index;

use crate::server::SharedState;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

// Large enough for a phone photo; the default 2 MB limit is not.
const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/", get(index::index_page))
        .route("/detect", post(detect::detect_image))
        .route("/health", get(health::healthcheck))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}
