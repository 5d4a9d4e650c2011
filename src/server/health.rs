//! Health check endpoint for liveness probes.

use axum::Json;

/// Returns the JSON string `"ok"` while the server is accepting connections.
pub async fn health_handler() -> Json<&'static str> {
    Json("ok")
}
