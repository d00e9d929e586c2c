//! HTTP surface: `/info`, `/ws`, `/task/:name`, `/result/:id`, `/healthz`.
//! Grounded on the teacher's router assembly in `daemon/src/rest/mod.rs` and
//! its `AppContext`-as-state convention (`daemon/src/lib.rs`).

pub mod ws;

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;

use crate::hub::SharedHub;
use crate::worker::SharedMasterHandle;

/// Shared application state passed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub hub: SharedHub,
    pub master: SharedMasterHandle,
    pub allowed_origins: Arc<Vec<String>>,
    pub started_at: Instant,
}

/// Assembles the router. `url_path_root` is prepended to every route;
/// `/` yields the routes unprefixed.
pub fn build_router(state: AppState, url_path_root: &str) -> Router {
    let root = normalize_root(url_path_root);

    let router = Router::new()
        .route(&format!("{root}/info"), get(info))
        .route(&format!("{root}/ws"), get(ws::upgrade))
        .route(&format!("{root}/task/{{name}}"), post(submit_task))
        .route(&format!("{root}/result/{{id}}"), get(get_result))
        .route(&format!("{root}/healthz"), get(healthz))
        .layer(CorsLayer::permissive())
        .with_state(state);

    router
}

fn normalize_root(raw: &str) -> String {
    let trimmed = raw.trim_end_matches('/');
    trimmed.to_string()
}

async fn info(State(state): State<AppState>) -> impl IntoResponse {
    let master_info = state.master.info().await;
    format!(
        "concd — concordance notification hub and worker pool master (pool_size={})",
        master_info.pool_size
    )
}

async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    let master_info = state.master.info().await;
    Json(serde_json::json!({
        "uptimeSeconds": state.started_at.elapsed().as_secs(),
        "poolSize": master_info.pool_size,
        "workersIdle": master_info.workers.iter().filter(|w| w.idle).count(),
        "queued": master_info.queued,
    }))
}

async fn submit_task(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: axum::body::Bytes,
) -> impl IntoResponse {
    let args: serde_json::Value = if body.is_empty() {
        serde_json::Value::Null
    } else {
        match serde_json::from_slice(&body) {
            Ok(v) => v,
            Err(err) => {
                return (StatusCode::BAD_REQUEST, err.to_string()).into_response();
            }
        }
    };

    match state.master.submit(name, args).await {
        Ok(task) => Json(task).into_response(),
        Err(crate::error::MasterError::QueueFull) => {
            (StatusCode::SERVICE_UNAVAILABLE, "queue full").into_response()
        }
        Err(crate::error::MasterError::Disabled) => {
            (StatusCode::SERVICE_UNAVAILABLE, "task queuing is disabled").into_response()
        }
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

async fn get_result(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> impl IntoResponse {
    match state.master.get(&task_id).await {
        Some(task) => Json(task).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_trailing_slash() {
        assert_eq!(normalize_root("/"), "");
        assert_eq!(normalize_root("/concd/"), "/concd");
        assert_eq!(normalize_root("/concd"), "/concd");
    }
}
