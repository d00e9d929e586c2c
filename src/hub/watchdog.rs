//! Per-session poller translating the pull-based external store into a
//! push-based event stream. Modeled on the interval/select cancellation
//! shape used throughout the teacher's connection-handling loops.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

use crate::store::ConcCacheStore;
use crate::types::{CacheIdent, ConcEvent};

const DEFAULT_POLL_PERIOD: Duration = Duration::from_secs(1);

/// Handle used by the hub to stop a running watchdog.
pub struct WatchdogHandle {
    stop_tx: Option<oneshot::Sender<()>>,
    task: tokio::task::JoinHandle<()>,
}

impl WatchdogHandle {
    /// Requests the watchdog to stop and waits for its task to exit.
    pub async fn stop(mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.task.await;
    }
}

pub struct Watchdog;

impl Watchdog {
    /// Spawns the polling loop and returns a handle to stop it. Emits
    /// `ConcEvent`s on `sink` until a store error, a finished record, or an
    /// explicit stop is observed.
    pub fn spawn(
        ident: CacheIdent,
        store: std::sync::Arc<dyn ConcCacheStore>,
        sink: mpsc::Sender<ConcEvent>,
        period: Duration,
    ) -> WatchdogHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut stop_rx => {
                        return;
                    }
                    _ = tick.tick() => {
                        match store.get_status(&ident.corpus_id, &ident.cache_key).await {
                            Ok(record) => {
                                let finished = record.finished;
                                if sink.send(ConcEvent::record(&ident, record)).await.is_err() {
                                    return;
                                }
                                if finished {
                                    return;
                                }
                            }
                            Err(err) => {
                                let _ = sink.send(ConcEvent::error(&ident, err.to_string())).await;
                                return;
                            }
                        }
                    }
                }
            }
        });

        WatchdogHandle {
            stop_tx: Some(stop_tx),
            task,
        }
    }

    pub fn spawn_default(
        ident: CacheIdent,
        store: std::sync::Arc<dyn ConcCacheStore>,
        sink: mpsc::Sender<ConcEvent>,
    ) -> WatchdogHandle {
        Self::spawn(ident, store, sink, DEFAULT_POLL_PERIOD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConcCacheError;
    use crate::types::StatusRecord;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct SeqStore {
        records: Vec<StatusRecord>,
        idx: AtomicUsize,
    }

    #[async_trait]
    impl ConcCacheStore for SeqStore {
        async fn get_status(
            &self,
            _corpus_id: &str,
            _cache_key: &str,
        ) -> Result<StatusRecord, ConcCacheError> {
            let i = self.idx.fetch_add(1, Ordering::SeqCst);
            self.records
                .get(i)
                .cloned()
                .ok_or(ConcCacheError::NotFound)
        }
    }

    fn rec(last_update: i64, finished: bool) -> StatusRecord {
        StatusRecord {
            task_id: String::new(),
            conc_size: 1,
            full_size: 10,
            rel_conc_size: 0.1,
            arf: 1.0,
            curr_wait: 0.0,
            created: 0,
            last_update,
            pid: 0,
            finished,
            error: String::new(),
        }
    }

    #[tokio::test]
    async fn stops_on_finished_record() {
        let store = Arc::new(SeqStore {
            records: vec![rec(10, false), rec(11, true)],
            idx: AtomicUsize::new(0),
        });
        let (tx, mut rx) = mpsc::channel(8);
        let handle = Watchdog::spawn(
            CacheIdent::new("c", "k"),
            store,
            tx,
            Duration::from_millis(5),
        );

        let first = rx.recv().await.unwrap();
        assert_eq!(first.record.unwrap().last_update, 10);
        let second = rx.recv().await.unwrap();
        assert!(second.record.unwrap().finished);
        assert!(rx.recv().await.is_none());
        handle.stop().await;
    }

    #[tokio::test]
    async fn stops_on_store_error() {
        let store = Arc::new(SeqStore {
            records: vec![],
            idx: AtomicUsize::new(0),
        });
        let (tx, mut rx) = mpsc::channel(8);
        let handle = Watchdog::spawn(
            CacheIdent::new("c", "k"),
            store,
            tx,
            Duration::from_millis(5),
        );
        let event = rx.recv().await.unwrap();
        assert!(event.error.is_some());
        assert!(rx.recv().await.is_none());
        handle.stop().await;
    }
}
