//! One WebSocket peer bound to one [`CacheIdent`]. Forwards watchdog events
//! as JSON, applies monotonic-update gating, and enforces the idle timeout.
//! Modeled on the per-connection `tokio::select!` loop in the teacher's
//! `daemon/src/ipc/mod.rs::handle_connection`.

use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::types::{CacheIdent, ConcEvent, ConcStatusResponse};

const IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const CLOSE_NORMAL: u16 = 1000;
const CLOSE_INTERNAL_ERROR: u16 = 1011;

pub struct Session {
    pub ident: CacheIdent,
}

/// Why the session's run loop exited — used by the caller to decide whether
/// to ask the hub to stop the watchdog too (it always should; kept as an
/// enum for clearer logging at the call site).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionExit {
    Finished,
    StoreError,
    IdleTimeout,
    SocketError,
    Stopped,
}

impl Session {
    pub fn new(ident: CacheIdent) -> Self {
        Self { ident }
    }

    /// Drives one peer to completion. Consumes `ws` and `inbox`; the caller
    /// is expected to have registered `inbox`'s sender half with the hub
    /// before calling this.
    pub async fn run(
        &self,
        mut ws: WebSocket,
        mut inbox: mpsc::Receiver<ConcEvent>,
        mut stop: mpsc::Receiver<()>,
    ) -> SessionExit {
        let mut last_seen_update = i64::MIN;

        loop {
            tokio::select! {
                _ = stop.recv() => {
                    let _ = ws.close().await;
                    return SessionExit::Stopped;
                }
                event = inbox.recv() => {
                    let Some(event) = event else {
                        let _ = ws.close().await;
                        return SessionExit::Stopped;
                    };

                    if let Some(message) = event.error {
                        send_close(&mut ws, CLOSE_INTERNAL_ERROR, &message).await;
                        return SessionExit::StoreError;
                    }

                    let Some(record) = event.record else {
                        continue;
                    };

                    if record.last_update <= last_seen_update {
                        continue;
                    }
                    last_seen_update = record.last_update;

                    let body = ConcStatusResponse::from(&record);
                    let text = match serde_json::to_string(&body) {
                        Ok(text) => text,
                        Err(err) => {
                            send_close(&mut ws, CLOSE_INTERNAL_ERROR, &err.to_string()).await;
                            return SessionExit::StoreError;
                        }
                    };

                    if ws.send(Message::Text(text.into())).await.is_err() {
                        return SessionExit::SocketError;
                    }

                    if record.finished {
                        send_close(&mut ws, CLOSE_NORMAL, "DONE").await;
                        return SessionExit::Finished;
                    }
                }
                _ = tokio::time::sleep(IDLE_TIMEOUT) => {
                    tracing::debug!(corpus_id = %self.ident.corpus_id, cache_key = %self.ident.cache_key, "session idle timeout");
                    let _ = ws.close().await;
                    return SessionExit::IdleTimeout;
                }
                incoming = ws.next() => {
                    match incoming {
                        Some(Ok(Message::Close(_))) => return SessionExit::Stopped,
                        None | Some(Err(_)) => return SessionExit::SocketError,
                        _ => {}
                    }
                }
            }
        }
    }
}

async fn send_close(ws: &mut WebSocket, code: u16, reason: &str) {
    let _ = ws
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.to_string().into(),
        })))
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_codes_match_contract() {
        assert_eq!(CLOSE_NORMAL, 1000);
        assert_eq!(CLOSE_INTERNAL_ERROR, 1011);
    }
}
