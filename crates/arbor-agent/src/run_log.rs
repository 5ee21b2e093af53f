use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use arbor_core::event::{EventBus, TraceEvent};
use arbor_core::types::RunId;

/// JSONL trace logger.
///
/// Subscribes to the EventBus and appends one JSON object per trace event of
/// a single run to `{log_dir}/{run_id}.jsonl`. Lines are flushed as they are
/// written, so a crashed run still leaves a readable trace.
pub struct TraceLogger {
    log_dir: PathBuf,
}

#[derive(Serialize)]
struct TraceLine<'a> {
    timestamp: String,
    #[serde(flatten)]
    event: &'a TraceEvent,
}

impl TraceLogger {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
        }
    }

    pub fn path_for(&self, run_id: &RunId) -> PathBuf {
        self.log_dir.join(format!("{}.jsonl", run_id))
    }

    /// Subscribe to `event_bus` now and write the run's trace on a new task.
    ///
    /// Subscribing happens before the task is spawned, so every event
    /// published after this call returns reaches the file.
    pub fn spawn(
        self,
        event_bus: &EventBus,
        run_id: RunId,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let rx = event_bus.subscribe();
        tokio::spawn(self.run(rx, run_id, cancel))
    }

    /// Drain `rx` into the trace file until cancelled or the bus closes.
    /// Pending events are written before cancellation is honoured.
    pub async fn run(
        self,
        mut rx: broadcast::Receiver<TraceEvent>,
        run_id: RunId,
        cancel: CancellationToken,
    ) {
        if let Err(e) = tokio::fs::create_dir_all(&self.log_dir).await {
            error!(error = %e, dir = %self.log_dir.display(), "Failed to create trace directory");
            return;
        }
        let path = self.path_for(&run_id);
        let mut writer = match open(&path).await {
            Ok(w) => w,
            Err(e) => {
                error!(error = %e, path = %path.display(), "Failed to open trace file");
                return;
            }
        };
        info!(path = %path.display(), "Trace logger started");

        loop {
            tokio::select! {
                biased;
                result = rx.recv() => match result {
                    Ok(event) => {
                        if event.run_id() != &run_id {
                            continue;
                        }
                        let line = TraceLine { timestamp: Utc::now().to_rfc3339(), event: &event };
                        let Ok(json) = serde_json::to_string(&line) else { continue };
                        if let Err(e) = writer.write_all(format!("{}\n", json).as_bytes()).await {
                            error!(error = %e, "Failed to write trace line");
                            break;
                        }
                        if let Err(e) = writer.flush().await {
                            error!(error = %e, "Failed to flush trace");
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        debug!(skipped = n, "Trace logger lagged, skipped events");
                    }
                    Err(RecvError::Closed) => {
                        debug!("EventBus closed, trace logger stopping");
                        break;
                    }
                },
                _ = cancel.cancelled() => {
                    debug!("Trace logger cancelled");
                    break;
                }
            }
        }

        writer.flush().await.ok();
        debug!(path = %path.display(), "Trace logger finished");
    }
}

async fn open(path: &Path) -> std::io::Result<tokio::io::BufWriter<tokio::fs::File>> {
    let file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    Ok(tokio::io::BufWriter::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_writes_only_matching_run() {
        let dir = tempfile::tempdir().unwrap();
        let bus = EventBus::new(64);
        let cancel = CancellationToken::new();
        let run_id = RunId::from("run-1");

        let logger = TraceLogger::new(dir.path());
        let path = logger.path_for(&run_id);
        let handle = logger.spawn(&bus, run_id.clone(), cancel.clone());

        bus.publish(TraceEvent::RunStarted {
            run_id: run_id.clone(),
            graph: "agent".into(),
            objective: "2+2".into(),
        });
        bus.publish(TraceEvent::RunStarted {
            run_id: RunId::from("other"),
            graph: "agent".into(),
            objective: "ignored".into(),
        });
        bus.publish(TraceEvent::RunFinished {
            run_id: run_id.clone(),
            graph: "agent".into(),
            steps: 3,
            total_tokens: 12,
            errors: 0,
        });
        cancel.cancel();
        handle.await.unwrap();

        let content = std::fs::read_to_string(path).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "run_started");
        assert_eq!(lines[0]["objective"], "2+2");
        assert!(lines[0]["timestamp"].is_string());
        assert_eq!(lines[1]["event"], "run_finished");
        assert_eq!(lines[1]["steps"], 3);
    }
}
