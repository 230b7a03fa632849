//! Settings endpoint
//!
//! A small HTTP surface for field configuration: a status page, a
//! settings form, and the save handler that merges the form into the
//! configuration store and restarts the bridge.

pub mod settings;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::AppState;

/// Create the server router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(settings::status_page))
        .route("/settings", get(settings::settings_page))
        .route("/save", post(settings::save_settings))
        .with_state(state)
}
