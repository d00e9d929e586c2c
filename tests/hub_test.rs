//! End-to-end notification hub scenarios: a real `axum` server bound to a
//! loopback port, driven with a `tokio-tungstenite` client, backed by a
//! fake in-memory store instead of Redis.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use concd::error::ConcCacheError;
use concd::http::{build_router, AppState};
use concd::hub::Hub;
use concd::store::ConcCacheStore;
use concd::types::StatusRecord;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;

struct ScriptedStore {
    records: Mutex<Vec<Result<StatusRecord, String>>>,
    idx: AtomicUsize,
}

#[async_trait]
impl ConcCacheStore for ScriptedStore {
    async fn get_status(
        &self,
        _corpus_id: &str,
        _cache_key: &str,
    ) -> Result<StatusRecord, ConcCacheError> {
        let i = self.idx.fetch_add(1, Ordering::SeqCst);
        let records = self.records.lock().unwrap();
        match records.get(i) {
            Some(Ok(r)) => Ok(r.clone()),
            Some(Err(e)) => Err(ConcCacheError::Malformed(e.clone())),
            None => Err(ConcCacheError::NotFound),
        }
    }
}

fn rec(last_update: i64, finished: bool) -> StatusRecord {
    StatusRecord {
        task_id: String::new(),
        conc_size: 5,
        full_size: 100,
        rel_conc_size: 0.05,
        arf: 2.0,
        curr_wait: 0.0,
        created: 0,
        last_update,
        pid: 0,
        finished,
        error: String::new(),
    }
}

async fn spawn_server(store: ScriptedStore) -> (String, tokio::task::JoinHandle<()>) {
    let hub = Hub::spawn(Arc::new(store));
    let master: Arc<dyn concd::worker::TaskMaster> = Arc::new(concd::worker::NullMaster);

    let state = AppState {
        hub,
        master,
        allowed_origins: Arc::new(vec!["https://corpus.example".to_string()]),
        started_at: std::time::Instant::now(),
    };

    let router = build_router(state, "/");
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (format!("ws://{addr}/ws?corpusId=foo&cacheKey=bar"), handle)
}

#[tokio::test]
async fn happy_watch_then_done() {
    let store = ScriptedStore {
        records: Mutex::new(vec![
            Ok(rec(10, false)),
            Ok(rec(11, false)),
            Ok(rec(11, false)),
            Ok(rec(12, true)),
        ]),
        idx: AtomicUsize::new(0),
    };

    let (url, _server) = spawn_server(store).await;

    let request = build_request(&url);
    let (mut ws, _) = tokio_tungstenite::connect_async(request).await.unwrap();

    let mut frames = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended early")
            .unwrap()
        {
            Message::Text(text) => frames.push(text.to_string()),
            Message::Close(frame) => {
                let frame = frame.expect("expected a close frame with code/reason");
                assert_eq!(frame.code, CloseCode::Normal);
                assert_eq!(frame.reason.as_ref(), "DONE");
                break;
            }
            _ => {}
        }
    }

    assert_eq!(frames.len(), 3, "the duplicate last_update=11 record must not produce a frame");
}

#[tokio::test]
async fn store_error_closes_with_1011() {
    let store = ScriptedStore {
        records: Mutex::new(vec![]),
        idx: AtomicUsize::new(0),
    };

    let (url, _server) = spawn_server(store).await;
    let request = build_request(&url);
    let (mut ws, _) = tokio_tungstenite::connect_async(request).await.unwrap();

    loop {
        match tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended early")
            .unwrap()
        {
            Message::Close(frame) => {
                let frame = frame.expect("expected a close frame with code/reason");
                assert_eq!(u16::from(frame.code), 1011);
                return;
            }
            _ => {}
        }
    }
}

#[tokio::test]
async fn upgrade_rejected_for_unlisted_origin() {
    let store = ScriptedStore {
        records: Mutex::new(vec![Ok(rec(1, true))]),
        idx: AtomicUsize::new(0),
    };
    let (url, _server) = spawn_server(store).await;

    let request = build_request_with_origin(&url, "https://evil.example");
    let err = tokio_tungstenite::connect_async(request).await.unwrap_err();
    match err {
        tokio_tungstenite::tungstenite::Error::Http(response) => {
            assert_eq!(response.status(), 403);
        }
        other => panic!("expected an HTTP 403 rejection, got {other:?}"),
    }
}

fn build_request(url: &str) -> tokio_tungstenite::tungstenite::http::Request<()> {
    build_request_with_origin(url, "https://corpus.example")
}

fn build_request_with_origin(
    url: &str,
    origin: &str,
) -> tokio_tungstenite::tungstenite::http::Request<()> {
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    let mut request = url.into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Origin", origin.parse().unwrap());
    request
}
