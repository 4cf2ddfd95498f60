mod health;
mod metrics;

use crate::server::SharedState;
use axum::{routing::get, Router};

pub use health::healthcheck;
pub use metrics::metrics_handler;

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/health", get(healthcheck))
        .route("/metrics", get(metrics_handler))
}
