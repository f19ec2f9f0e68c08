use axum::extract::State;
use axum::Json;
use serde_json::Value;

use crate::diagnostics;
use crate::error::ServiceError;
use crate::AppState;

pub async fn about() -> Json<Value> {
    Json(diagnostics::get_about_info())
}

pub async fn health(State(state): State<AppState>) -> Result<Json<Value>, ServiceError> {
    let db = state.db.clone();
    let health = tokio::task::spawn_blocking(move || diagnostics::get_health(&db))
        .await
        .map_err(|e| ServiceError::Internal(format!("health task failed: {e}")))??;
    Ok(Json(health))
}
