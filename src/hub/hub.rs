//! Serial registry of active sessions and their watchdogs, keyed by
//! `MD5(corpusId ‖ cacheKey)`. A single event-loop task owns both maps so
//! register/unregister never race — the same single-owner-task shape the
//! teacher uses for its scheduler queue and event broadcaster.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocket;
use tokio::sync::{mpsc, oneshot};

use crate::hash::registry_key;
use crate::hub::session::Session;
use crate::hub::watchdog::{Watchdog, WatchdogHandle};
use crate::store::ConcCacheStore;
use crate::types::{CacheIdent, ConcEvent};

enum HubEvent {
    Register {
        ident: CacheIdent,
        ws: WebSocket,
        done: oneshot::Sender<()>,
    },
    Unregister {
        key: String,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

struct RegisteredSession {
    stop_tx: mpsc::Sender<()>,
}

/// Front door to the hub's single owning task. Cheaply cloneable.
#[derive(Clone)]
pub struct Hub {
    tx: mpsc::Sender<HubEvent>,
}

pub type SharedHub = Arc<Hub>;

impl Hub {
    /// Spawns the hub's event loop and returns a handle to it.
    pub fn spawn(store: Arc<dyn ConcCacheStore>) -> SharedHub {
        let (tx, mut rx) = mpsc::channel::<HubEvent>(256);

        tokio::spawn(async move {
            let mut sessions: HashMap<String, RegisteredSession> = HashMap::new();
            let mut watchdogs: HashMap<String, WatchdogHandle> = HashMap::new();

            while let Some(event) = rx.recv().await {
                match event {
                    HubEvent::Register { ident, ws, done } => {
                        let key = registry_key(&ident.corpus_id, &ident.cache_key);

                        if let Some(old_watchdog) = watchdogs.remove(&key) {
                            tracing::warn!(key = %key, "duplicate registration, stopping displaced watchdog");
                            old_watchdog.stop().await;
                        }
                        if let Some(old_session) = sessions.remove(&key) {
                            let _ = old_session.stop_tx.send(()).await;
                        }

                        let (event_tx, event_rx) = mpsc::channel::<ConcEvent>(1);
                        let (stop_tx, stop_rx) = mpsc::channel::<()>(1);

                        let watchdog_handle =
                            Watchdog::spawn_default(ident.clone(), store.clone(), event_tx);
                        watchdogs.insert(key.clone(), watchdog_handle);
                        sessions.insert(key.clone(), RegisteredSession { stop_tx });

                        let tx_for_cleanup = tx.clone();
                        let session_ident = ident.clone();
                        tokio::spawn(async move {
                            let session = Session::new(session_ident);
                            let exit = session.run(ws, event_rx, stop_rx).await;
                            tracing::debug!(key = %key, ?exit, "session ended");
                            let _ = tx_for_cleanup.send(HubEvent::Unregister { key }).await;
                        });

                        let _ = done.send(());
                    }
                    HubEvent::Unregister { key } => {
                        if let Some(watchdog) = watchdogs.remove(&key) {
                            watchdog.stop().await;
                        }
                        sessions.remove(&key);
                    }
                    HubEvent::Shutdown { done } => {
                        for (_, watchdog) in watchdogs.drain() {
                            watchdog.stop().await;
                        }
                        for (_, session) in sessions.drain() {
                            let _ = session.stop_tx.send(()).await;
                        }
                        let _ = done.send(());
                        return;
                    }
                }
            }
        });

        Arc::new(Hub { tx })
    }

    /// Registers a new WebSocket peer and its watchdog. Returns once the
    /// session has been accepted by the hub's event loop (the session then
    /// runs to completion on its own spawned task).
    pub async fn register(&self, ident: CacheIdent, ws: WebSocket) {
        let (done_tx, done_rx) = oneshot::channel();
        if self
            .tx
            .send(HubEvent::Register {
                ident,
                ws,
                done: done_tx,
            })
            .await
            .is_err()
        {
            return;
        }
        let _ = done_rx.await;
    }

    /// Stops every session and watchdog, waiting up to `timeout` for the
    /// hub's event loop to confirm completion.
    pub async fn shutdown(&self, timeout: Duration) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(HubEvent::Shutdown { done: done_tx }).await.is_err() {
            return;
        }
        let _ = tokio::time::timeout(timeout, done_rx).await;
    }
}
