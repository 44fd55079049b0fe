use super::AppState;
use crate::orchestrator::PoolStatus;
use axum::Json;
use axum::extract::State;
use std::sync::Arc;

pub async fn handle_health() -> &'static str {
    "ok"
}

/// GET /manager/api/status - 凭证池、分类配额与缓存的快照（密钥已脱敏）
pub async fn handle_status(State(state): State<Arc<AppState>>) -> Json<PoolStatus> {
    Json(state.orchestrator.status().await)
}
