//! WebSocket upgrade handler: validates the `Origin` header against the
//! configured allow-list, then hands the connection to the hub. Grounded on
//! the teacher's `accept_async_with_config` path in `daemon/src/ipc/mod.rs`,
//! adapted to `axum::extract::ws` since the rest of this surface is already
//! an `axum` router.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::http::AppState;
use crate::types::CacheIdent;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(rename = "corpusId")]
    pub corpus_id: String,
    #[serde(rename = "cacheKey")]
    pub cache_key: String,
}

pub async fn upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if !origin_allowed(&headers, &state.allowed_origins) {
        return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
    }

    let ident = CacheIdent::new(query.corpus_id, query.cache_key);
    let hub = state.hub.clone();

    ws.on_upgrade(move |socket| async move {
        hub.register(ident, socket).await;
    })
}

/// The `Origin` header must be string-equal to one of the configured
/// allowed origins. An empty allow-list refuses every upgrade.
fn origin_allowed(headers: &HeaderMap, allowed: &[String]) -> bool {
    let Some(origin) = headers.get(axum::http::header::ORIGIN).and_then(|v| v.to_str().ok())
    else {
        return false;
    };
    allowed.iter().any(|allowed_origin| allowed_origin == origin)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unlisted_origin() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::ORIGIN, "https://evil.example".parse().unwrap());
        let allowed = vec!["https://corpus.example".to_string()];
        assert!(!origin_allowed(&headers, &allowed));
    }

    #[test]
    fn accepts_exact_match() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::ORIGIN, "https://corpus.example".parse().unwrap());
        let allowed = vec!["https://corpus.example".to_string()];
        assert!(origin_allowed(&headers, &allowed));
    }

    #[test]
    fn rejects_missing_origin() {
        let headers = HeaderMap::new();
        let allowed = vec!["https://corpus.example".to_string()];
        assert!(!origin_allowed(&headers, &allowed));
    }
}
