use axum::response::Response;

use crate::{error::Result, handlers::response::Envelope};

/// Liveness probe.
pub async fn health() -> Result<Response> {
    Envelope::new(sonic_rs::json!({ "status": "ok" })).ok()
}
