//! Owns the worker pool and the task table: dispatches queued tasks to idle
//! workers, enforces per-task deadlines, and reaps old finished records.
//! Grounded on the teacher's `process_pool.rs` (pool shape) and
//! `scheduler/queue.rs` (single-owner-task-plus-typed-request pattern, the
//! `Shared*` `Arc` alias convention).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::error::MasterError;
use crate::types::{MasterInfo, Task, TaskStatus, WorkerInfo, WorkerState};
use crate::worker::worker::{Worker, WorkerEvent};

const DEADLINE_TICK: Duration = Duration::from_secs(1);
const DEADLINE_ERROR: &str = "Task execution limit reached";

/// Operations available on either a real [`Master`] or a [`NullMaster`].
#[async_trait]
pub trait TaskMaster: Send + Sync {
    async fn submit(&self, fn_name: String, args: serde_json::Value) -> Result<Task, MasterError>;
    async fn get(&self, task_id: &str) -> Option<Task>;
    async fn info(&self) -> MasterInfo;
    async fn reload(&self);
    async fn stop(&self);
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

enum MasterRequest {
    Submit {
        fn_name: String,
        args: serde_json::Value,
        reply: oneshot::Sender<Result<Task, MasterError>>,
    },
    Get {
        task_id: String,
        reply: oneshot::Sender<Option<Task>>,
    },
    Info {
        reply: oneshot::Sender<MasterInfo>,
    },
    Reload,
    Stop {
        done: oneshot::Sender<()>,
    },
}

struct Slot {
    worker: Worker,
    task_started_at: Option<i64>,
}

/// Front door to the master's single event-loop task. Cheaply cloneable.
#[derive(Clone)]
pub struct Master {
    tx: mpsc::Sender<MasterRequest>,
}

pub type SharedMasterHandle = Arc<dyn TaskMaster>;

pub struct MasterConfig {
    pub pool_size: usize,
    pub program: String,
    pub program_args: Vec<String>,
    pub exec_max_seconds: u64,
    pub task_result_persist_max_seconds: u64,
}

impl From<&crate::config::Config> for MasterConfig {
    fn from(config: &crate::config::Config) -> Self {
        let wm = &config.worker_master;
        Self {
            pool_size: wm.pool_size.max(0) as usize,
            program: wm.program.clone(),
            program_args: wm.program_args.clone(),
            exec_max_seconds: wm.exec_max_seconds,
            task_result_persist_max_seconds: wm.task_result_persist_max_seconds,
        }
    }
}

impl Master {
    /// Forks `pool_size` workers, waiting for each to report ready (started
    /// successfully) or error before returning, then starts the event loop.
    /// Fixes the source's unsynchronized pool startup.
    pub async fn start(config: MasterConfig) -> (Arc<Self>, usize) {
        let (event_tx, mut event_rx) = mpsc::channel::<(usize, WorkerEvent)>(256);
        let mut slots = Vec::with_capacity(config.pool_size);
        let mut ready_count = 0usize;

        for id in 0..config.pool_size {
            let mut worker = Worker::new(id, config.program.clone(), config.program_args.clone());
            match worker.start(event_tx.clone()).await {
                Ok(()) => ready_count += 1,
                Err(err) => {
                    tracing::warn!(worker_id = id, error = %err, "worker failed to start");
                }
            }
            slots.push(Slot {
                worker,
                task_started_at: None,
            });
        }

        let (tx, mut rx) = mpsc::channel::<MasterRequest>(256);
        let (dispatch_tx, mut dispatch_rx) = mpsc::channel::<()>(config.pool_size.max(1) + 1);

        let exec_max_seconds = config.exec_max_seconds as i64;
        let task_result_persist_max_seconds = config.task_result_persist_max_seconds as i64;
        let pool_size = config.pool_size;
        let program = config.program.clone();
        let program_args = config.program_args.clone();

        tokio::spawn(async move {
            let mut slots = slots;
            let mut tasks: HashMap<String, Task> = HashMap::new();
            let mut queue: VecDeque<String> = VecDeque::new();
            let mut tick = tokio::time::interval(DEADLINE_TICK);

            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        sweep_deadlines(&mut slots, &mut tasks, exec_max_seconds, &dispatch_tx, &program, &program_args, &event_tx).await;
                        reap_old_tasks(&mut tasks, task_result_persist_max_seconds);
                    }
                    _ = dispatch_rx.recv() => {
                        dispatch(&mut slots, &mut tasks, &mut queue).await;
                    }
                    event = event_rx.recv() => {
                        let Some((worker_id, event)) = event else {
                            // All senders (the loop's own retained clone
                            // included) are gone; nothing left to manage.
                            return;
                        };
                        handle_worker_event(&mut slots, &mut tasks, worker_id, event);
                        let _ = dispatch_tx.try_send(());
                    }
                    request = rx.recv() => {
                        let Some(request) = request else {
                            // Every `Master` handle was dropped without an
                            // explicit stop(); shut the pool down.
                            for slot in &mut slots {
                                slot.worker.stop().await;
                            }
                            return;
                        };
                        match request {
                            MasterRequest::Submit { fn_name, args, reply } => {
                                if queue.len() >= pool_size {
                                    let _ = reply.send(Err(MasterError::QueueFull));
                                    continue;
                                }
                                let t = now();
                                let task = Task::new(Uuid::new_v4().to_string(), fn_name, args, t);
                                queue.push_back(task.task_id.clone());
                                tasks.insert(task.task_id.clone(), task.clone());
                                let _ = dispatch_tx.try_send(());
                                let _ = reply.send(Ok(task));
                            }
                            MasterRequest::Get { task_id, reply } => {
                                let _ = reply.send(tasks.get(&task_id).cloned());
                            }
                            MasterRequest::Info { reply } => {
                                let workers = slots.iter().map(|s| WorkerInfo {
                                    pid: s.worker.pid(),
                                    idle: s.worker.is_idle(),
                                    current_task_id: s.worker.current_task_id.clone(),
                                }).collect();
                                let _ = reply.send(MasterInfo {
                                    pool_size,
                                    workers,
                                    queued: queue.len(),
                                });
                            }
                            MasterRequest::Reload => {
                                for slot in &slots {
                                    slot.worker.reload();
                                }
                            }
                            MasterRequest::Stop { done } => {
                                for slot in &mut slots {
                                    slot.worker.stop().await;
                                }
                                let _ = done.send(());
                                return;
                            }
                        }
                    }
                }
            }
        });

        (Arc::new(Self { tx }), ready_count)
    }
}

async fn dispatch(slots: &mut [Slot], tasks: &mut HashMap<String, Task>, queue: &mut VecDeque<String>) {
    for slot in slots.iter_mut() {
        if !slot.worker.is_idle() {
            continue;
        }
        let Some(task_id) = queue.pop_front() else {
            return;
        };
        let Some(task) = tasks.get_mut(&task_id) else {
            continue;
        };
        task.status = TaskStatus::Running;
        task.updated = now();
        if let Err(err) = slot
            .worker
            .call(task.task_id.clone(), task.fn_name.clone(), task.args.clone())
            .await
        {
            task.status = TaskStatus::Finished;
            task.error = err.to_string();
            task.updated = now();
            continue;
        }
        slot.task_started_at = Some(now());
    }
}

fn handle_worker_event(
    slots: &mut [Slot],
    tasks: &mut HashMap<String, Task>,
    worker_id: usize,
    event: WorkerEvent,
) {
    let Some(slot) = slots.get_mut(worker_id) else {
        return;
    };

    match event {
        WorkerEvent::Status(status) => {
            let is_done = status.state().map(WorkerState::is_done).unwrap_or(false);
            if !is_done {
                return;
            }
            if let Some(task) = tasks.get_mut(&status.task_id) {
                task.status = TaskStatus::Finished;
                task.error = status.error.unwrap_or_default();
                task.result = status.result.unwrap_or(serde_json::Value::Null);
                task.updated = now();
            }
            if slot.worker.current_task_id.as_deref() == Some(status.task_id.as_str()) {
                slot.worker.current_task_id = None;
                slot.task_started_at = None;
            }
        }
        WorkerEvent::Gone { reason } => {
            if let Some(task_id) = slot.worker.current_task_id.take() {
                if let Some(task) = tasks.get_mut(&task_id) {
                    task.status = TaskStatus::Finished;
                    task.error = reason;
                    task.updated = now();
                }
            }
            slot.task_started_at = None;
        }
    }
}

async fn sweep_deadlines(
    slots: &mut [Slot],
    tasks: &mut HashMap<String, Task>,
    exec_max_seconds: i64,
    dispatch_tx: &mpsc::Sender<()>,
    program: &str,
    program_args: &[String],
    event_tx: &mpsc::Sender<(usize, WorkerEvent)>,
) {
    let t = now();
    for slot in slots.iter_mut() {
        let Some(started_at) = slot.task_started_at else {
            continue;
        };
        if t - started_at <= exec_max_seconds {
            continue;
        }

        let abandoned_task_id = slot.worker.current_task_id.take();
        slot.task_started_at = None;
        slot.worker.stop().await;

        if let Some(task_id) = abandoned_task_id {
            if let Some(task) = tasks.get_mut(&task_id) {
                task.status = TaskStatus::Finished;
                task.error = DEADLINE_ERROR.to_string();
                task.updated = now();
            }
        }

        let mut fresh = Worker::new(slot.worker.id, program.to_string(), program_args.to_vec());
        if let Err(err) = fresh.start(event_tx.clone()).await {
            tracing::error!(worker_id = fresh.id, error = %err, "failed to restart worker after deadline breach");
        }
        slot.worker = fresh;
        let _ = dispatch_tx.try_send(());
    }
}

fn reap_old_tasks(tasks: &mut HashMap<String, Task>, retention_seconds: i64) {
    let t = now();
    tasks.retain(|_, task| {
        !(task.is_finished() && t - task.updated > retention_seconds)
    });
}

#[async_trait]
impl TaskMaster for Master {
    async fn submit(&self, fn_name: String, args: serde_json::Value) -> Result<Task, MasterError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(MasterRequest::Submit { fn_name, args, reply })
            .await
            .map_err(|_| MasterError::Disabled)?;
        rx.await.map_err(|_| MasterError::Disabled)?
    }

    async fn get(&self, task_id: &str) -> Option<Task> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(MasterRequest::Get {
                task_id: task_id.to_string(),
                reply,
            })
            .await
            .ok()?;
        rx.await.ok().flatten()
    }

    async fn info(&self) -> MasterInfo {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(MasterRequest::Info { reply }).await.is_err() {
            return MasterInfo {
                pool_size: 0,
                workers: Vec::new(),
                queued: 0,
            };
        }
        rx.await.unwrap_or(MasterInfo {
            pool_size: 0,
            workers: Vec::new(),
            queued: 0,
        })
    }

    async fn reload(&self) {
        let _ = self.tx.send(MasterRequest::Reload).await;
    }

    async fn stop(&self) {
        let (done, rx) = oneshot::channel();
        if self.tx.send(MasterRequest::Stop { done }).await.is_err() {
            return;
        }
        let _ = rx.await;
    }
}

/// No-op stand-in selected when task queuing is disabled (`poolSize <= 0`).
pub struct NullMaster;

#[async_trait]
impl TaskMaster for NullMaster {
    async fn submit(&self, _fn_name: String, _args: serde_json::Value) -> Result<Task, MasterError> {
        Err(MasterError::Disabled)
    }

    async fn get(&self, _task_id: &str) -> Option<Task> {
        None
    }

    async fn info(&self) -> MasterInfo {
        MasterInfo {
            pool_size: 0,
            workers: Vec::new(),
            queued: 0,
        }
    }

    async fn reload(&self) {}

    async fn stop(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_master_rejects_submit() {
        let master = NullMaster;
        let err = master
            .submit("calc".to_string(), serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, MasterError::Disabled));
    }

    #[tokio::test]
    async fn reaper_drops_old_finished_tasks() {
        let mut tasks = HashMap::new();
        let mut t = Task::new("a".to_string(), "f".to_string(), serde_json::json!({}), 0);
        t.status = TaskStatus::Finished;
        t.updated = 0;
        tasks.insert("a".to_string(), t);

        reap_old_tasks(&mut tasks, 0);
        assert!(tasks.is_empty());
    }
}
