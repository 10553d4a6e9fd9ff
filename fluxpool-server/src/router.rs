use axum::{
    extract::State, http::StatusCode, response::IntoResponse, routing::get, routing::post, Json,
    Router,
};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/readyz", get(readiness_check))
        .route("/admin/daily-refresh/reset", post(reset_daily_refresh))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({"status": "ok"})))
}

async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let (postgres, redis) = tokio::join!(state.ping_postgres(), state.ping_redis());
    let ready = postgres.ok && redis.ok;
    let status = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (
        status,
        Json(serde_json::json!({
            "status": if ready { "ready" } else { "not_ready" },
            "postgres": postgres,
            "redis": redis,
        })),
    )
}

async fn reset_daily_refresh(State(state): State<AppState>) -> impl IntoResponse {
    match state.daily_refresh() {
        Some(worker) => {
            worker.reset_schedule();
            (StatusCode::ACCEPTED, Json(serde_json::json!({"status": "reset", "schedule": worker.schedule()})))
        },
        None => (StatusCode::NOT_FOUND, Json(serde_json::json!({"status": "disabled"}))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_liveness_needs_no_dependencies() {
        let response = health_check().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
