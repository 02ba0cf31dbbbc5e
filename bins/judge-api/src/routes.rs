//! Route table for the Submission API.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::{get_submission, health, submit};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/submissions", post(submit))
        .route("/submissions/:id", get(get_submission))
        .route("/health", get(health))
}
