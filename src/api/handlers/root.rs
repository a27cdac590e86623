use axum::response::IntoResponse;
use serde_json::json;

use crate::api::response::ok_message;

/// Liveness banner for the bare root path.
pub async fn root() -> impl IntoResponse {
    ok_message("App running successfully", json!({}))
}
