//! One long-lived child process and its newline-delimited JSON pipes.
//! Grounded on the teacher's `McpClient` (`daemon/src/mcp/client.rs`) for
//! the line-write/line-read shape, generalized from request/response RPC to
//! a persistent bidirectional stream, and on `daemon/src/session/claude.rs`
//! for Unix signal handling.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::{mpsc, Mutex};

use crate::error::MasterError;
use crate::types::{WorkerCommand, WorkerStatus};

/// Default cap on a single response line before it's treated as a protocol
/// error. Configurable per-worker via [`Worker::spawn`].
pub const DEFAULT_MAX_LINE_BYTES: usize = 16 * 1024;

/// Event delivered to the master's event loop from a worker's reader task.
#[derive(Debug)]
pub enum WorkerEvent {
    Status(WorkerStatus),
    /// The reader hit EOF, a read error, or a line over the cap — in all
    /// cases the worker should be treated as gone.
    Gone { reason: String },
}

pub struct Worker {
    pub id: usize,
    program: String,
    args: Vec<String>,
    child: Option<Child>,
    stdin: Option<Arc<Mutex<ChildStdin>>>,
    pid: AtomicU32,
    reader: Option<tokio::task::JoinHandle<()>>,
    pub current_task_id: Option<String>,
    max_line_bytes: usize,
}

impl Worker {
    pub fn new(id: usize, program: String, args: Vec<String>) -> Self {
        Self {
            id,
            program,
            args,
            child: None,
            stdin: None,
            pid: AtomicU32::new(0),
            reader: None,
            current_task_id: None,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        let pid = self.pid.load(Ordering::SeqCst);
        if pid == 0 {
            None
        } else {
            Some(pid)
        }
    }

    pub fn is_idle(&self) -> bool {
        self.current_task_id.is_none()
    }

    /// Forks the child, wires stdin/stdout, and starts the stdout reader
    /// task, which forwards parsed [`WorkerStatus`] lines (or a terminal
    /// `Gone` event) tagged with this worker's id to `events`.
    pub async fn start(&mut self, events: mpsc::Sender<(usize, WorkerEvent)>) -> Result<(), MasterError> {
        let mut child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MasterError::SpawnFailed(e.to_string()))?;

        let pid = child.id().unwrap_or(0);
        self.pid.store(pid, Ordering::SeqCst);

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MasterError::SpawnFailed("no stdin pipe".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MasterError::SpawnFailed("no stdout pipe".to_string()))?;

        self.stdin = Some(Arc::new(Mutex::new(stdin)));

        let worker_id = self.id;
        let max_line_bytes = self.max_line_bytes;
        self.reader = Some(tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            loop {
                let mut line = String::new();
                match read_capped_line(&mut reader, &mut line, max_line_bytes).await {
                    Ok(0) => {
                        let _ = events
                            .send((worker_id, WorkerEvent::Gone { reason: "stdout closed".to_string() }))
                            .await;
                        return;
                    }
                    Ok(_) => {
                        let trimmed = line.trim_end();
                        if trimmed.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<WorkerStatus>(trimmed) {
                            Ok(status) => {
                                if events.send((worker_id, WorkerEvent::Status(status))).await.is_err() {
                                    return;
                                }
                            }
                            Err(err) => {
                                let _ = events
                                    .send((
                                        worker_id,
                                        WorkerEvent::Gone {
                                            reason: format!("malformed response line: {err}"),
                                        },
                                    ))
                                    .await;
                            }
                        }
                    }
                    Err(err) => {
                        let _ = events
                            .send((worker_id, WorkerEvent::Gone { reason: err.to_string() }))
                            .await;
                        return;
                    }
                }
            }
        }));

        self.child = Some(child);
        self.current_task_id = None;
        Ok(())
    }

    /// Writes one command line to the child's stdin.
    pub async fn call(
        &mut self,
        task_id: String,
        fn_name: String,
        args: serde_json::Value,
    ) -> Result<(), MasterError> {
        let Some(stdin) = &self.stdin else {
            return Err(MasterError::SpawnFailed("worker has no stdin".to_string()));
        };
        let command = WorkerCommand {
            fn_name,
            args,
            task_id: task_id.clone(),
        };
        let mut line = serde_json::to_string(&command)
            .map_err(|e| MasterError::SpawnFailed(e.to_string()))?;
        line.push('\n');

        let mut guard = stdin.lock().await;
        guard
            .write_all(line.as_bytes())
            .await
            .map_err(|e| MasterError::SpawnFailed(e.to_string()))?;
        guard
            .flush()
            .await
            .map_err(|e| MasterError::SpawnFailed(e.to_string()))?;
        drop(guard);

        self.current_task_id = Some(task_id);
        Ok(())
    }

    /// Kills the child and tears down its pipes. Idempotent.
    pub async fn stop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(mut child) = self.child.take() {
            let _ = child.kill().await;
        }
        self.stdin = None;
        self.pid.store(0, Ordering::SeqCst);
        self.current_task_id = None;
    }

    /// Sends SIGHUP to the child. No-op on non-Unix targets and if the
    /// child isn't running.
    pub fn reload(&self) {
        #[cfg(unix)]
        {
            if let Some(pid) = self.pid() {
                unsafe {
                    libc::kill(pid as libc::pid_t, libc::SIGHUP);
                }
            }
        }
    }
}

/// Reads one line, erroring instead of growing the buffer past `max_bytes`.
async fn read_capped_line<R: AsyncBufReadExt + Unpin>(
    reader: &mut R,
    line: &mut String,
    max_bytes: usize,
) -> std::io::Result<usize> {
    let mut total = 0usize;
    loop {
        let mut chunk = String::new();
        let n = reader.read_line(&mut chunk).await?;
        if n == 0 {
            return Ok(total);
        }
        total += n;
        let ended_in_newline = chunk.ends_with('\n');
        line.push_str(&chunk);
        if total > max_bytes {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("response line exceeded {max_bytes} bytes"),
            ));
        }
        if ended_in_newline {
            return Ok(total);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_one_line_at_a_time() {
        let mut reader = BufReader::new(std::io::Cursor::new(b"one\ntwo\n".to_vec()));
        let mut line = String::new();
        read_capped_line(&mut reader, &mut line, 1024).await.unwrap();
        assert_eq!(line, "one\n");

        let mut line2 = String::new();
        read_capped_line(&mut reader, &mut line2, 1024).await.unwrap();
        assert_eq!(line2, "two\n");
    }

    #[tokio::test]
    async fn rejects_line_over_cap() {
        let body = format!("{}\n", "x".repeat(100));
        let mut reader = BufReader::new(std::io::Cursor::new(body.into_bytes()));
        let mut line = String::new();
        let err = read_capped_line(&mut reader, &mut line, 16).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }
}
