//! Shared data types used by both the notification hub and the worker pool
//! master: cache identifiers, progress snapshots, and task/worker records.

use serde::{Deserialize, Serialize};

/// Identifies one concordance computation stream.
///
/// `cache_file_path` is informational only — the authoritative progress
/// source is the external key/value store, keyed by `corpus_id`/`cache_key`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheIdent {
    pub corpus_id: String,
    pub cache_key: String,
    #[serde(default)]
    pub cache_file_path: String,
}

impl CacheIdent {
    pub fn new(corpus_id: impl Into<String>, cache_key: impl Into<String>) -> Self {
        Self {
            corpus_id: corpus_id.into(),
            cache_key: cache_key.into(),
            cache_file_path: String::new(),
        }
    }
}

/// A snapshot of one computation's progress, read from the external store.
///
/// `last_update` is an opaque, source-defined monotonic integer — no unit
/// conversion is performed on it anywhere in this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRecord {
    #[serde(default)]
    pub task_id: String,
    pub conc_size: i64,
    pub full_size: i64,
    pub rel_conc_size: f64,
    pub arf: f64,
    #[serde(default)]
    pub curr_wait: f64,
    pub created: i64,
    pub last_update: i64,
    #[serde(default)]
    pub pid: i64,
    #[serde(default)]
    pub finished: bool,
    #[serde(default)]
    pub error: String,
}

/// One event emitted by a [`crate::hub::watchdog::Watchdog`]. Exactly one of
/// `record`/`error` is populated.
#[derive(Debug, Clone)]
pub struct ConcEvent {
    pub corpus_id: String,
    pub cache_key: String,
    pub record: Option<StatusRecord>,
    pub error: Option<String>,
}

impl ConcEvent {
    pub fn record(ident: &CacheIdent, record: StatusRecord) -> Self {
        Self {
            corpus_id: ident.corpus_id.clone(),
            cache_key: ident.cache_key.clone(),
            record: Some(record),
            error: None,
        }
    }

    pub fn error(ident: &CacheIdent, error: impl Into<String>) -> Self {
        Self {
            corpus_id: ident.corpus_id.clone(),
            cache_key: ident.cache_key.clone(),
            record: None,
            error: Some(error.into()),
        }
    }
}

/// JSON body written to the browser on every gated status update.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConcStatusResponse {
    pub fullsize: i64,
    pub concsize: i64,
    pub relconcsize: f64,
    #[serde(default)]
    pub conc_persistence_op_id: String,
    #[serde(default)]
    pub messages: Vec<String>,
    #[serde(default)]
    pub user_owns_conc: bool,
    #[serde(default, rename = "Q")]
    pub q: Vec<String>,
    pub finished: bool,
    pub arf: f64,
}

impl From<&StatusRecord> for ConcStatusResponse {
    fn from(r: &StatusRecord) -> Self {
        Self {
            fullsize: r.full_size,
            concsize: r.conc_size,
            relconcsize: r.rel_conc_size,
            finished: r.finished,
            arf: r.arf,
            ..Default::default()
        }
    }
}

/// One-way lifecycle of a [`Task`]: no back edges. Serializes as the wire
/// integers `0|1|2`, matching [`WorkerState`]'s numeric convention below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum TaskStatus {
    Waiting = 0,
    Running = 1,
    Finished = 2,
}

impl From<TaskStatus> for u8 {
    fn from(status: TaskStatus) -> Self {
        status as u8
    }
}

impl TryFrom<u8> for TaskStatus {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TaskStatus::Waiting),
            1 => Ok(TaskStatus::Running),
            2 => Ok(TaskStatus::Finished),
            other => Err(format!("invalid task status: {other}")),
        }
    }
}

/// A queued or executed request to a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    #[serde(rename = "taskID")]
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(rename = "fn")]
    pub fn_name: String,
    pub args: serde_json::Value,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub result: serde_json::Value,
    pub created: i64,
    pub updated: i64,
}

impl Task {
    pub fn new(task_id: String, fn_name: String, args: serde_json::Value, now: i64) -> Self {
        Self {
            task_id,
            status: TaskStatus::Waiting,
            fn_name,
            args,
            error: String::new(),
            result: serde_json::Value::Null,
            created: now,
            updated: now,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status == TaskStatus::Finished
    }
}

/// Status codes a worker reports for itself or for the task it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum WorkerState {
    Idle = 0,
    Running = 1,
    Stopped = 2,
}

impl WorkerState {
    pub fn is_done(self) -> bool {
        matches!(self, WorkerState::Idle | WorkerState::Stopped)
    }
}

/// One response line read from a worker's stdout.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerStatus {
    #[serde(rename = "taskID")]
    pub task_id: String,
    pub status: u8,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
}

impl WorkerStatus {
    pub fn state(&self) -> Option<WorkerState> {
        match self.status {
            0 => Some(WorkerState::Idle),
            1 => Some(WorkerState::Running),
            2 => Some(WorkerState::Stopped),
            _ => None,
        }
    }
}

/// Command line written to a worker's stdin.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerCommand {
    #[serde(rename = "fn")]
    pub fn_name: String,
    pub args: serde_json::Value,
    pub task_id: String,
}

/// Snapshot of one worker returned by [`crate::worker::master::Master::info`].
#[derive(Debug, Clone, Serialize)]
pub struct WorkerInfo {
    pub pid: Option<u32>,
    pub idle: bool,
    pub current_task_id: Option<String>,
}

/// Snapshot of the whole pool returned by [`crate::worker::master::Master::info`].
#[derive(Debug, Clone, Serialize)]
pub struct MasterInfo {
    pub pool_size: usize,
    pub workers: Vec<WorkerInfo>,
    pub queued: usize,
}
