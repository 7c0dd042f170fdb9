//! Route handlers for the HTTP API.

pub mod channels;
pub mod events;
pub mod sessions;
pub mod tools;

use axum::Json;
use serde_json::{json, Value};

/// GET /health
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
