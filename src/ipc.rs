//! IPC Bus: accepts events from auxiliary co-processes that cannot call
//! the aggregator directly, via a filesystem drop-box under the OS temp
//! directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::events::{now_ms, Event, EventBody, Source};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Inbound message shape written by auxiliary co-processes.
#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "sessionId", alias = "session_id")]
    session_id: Option<String>,
    timestamp: Option<i64>,
    #[allow(dead_code)]
    source: Option<String>,
    data: Option<serde_json::Value>,
}

fn filename_pattern() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^msg-\d+-[A-Za-z0-9]+\.json$").unwrap())
}

pub fn bus_dir(session_id: &str) -> PathBuf {
    std::env::temp_dir().join(format!("tracewrap-{session_id}"))
}

/// Start the poll loop. Returns once `cancel` fires, after removing the
/// drop-box directory.
pub async fn run(
    session_id: String,
    events: mpsc::Sender<Event>,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let dir = bus_dir(&session_id);
    std::fs::create_dir_all(&dir)?;

    let mut interval = tokio::time::interval(POLL_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                poll_once(&dir, &session_id, &events);
            }
        }
    }

    let _ = std::fs::remove_dir_all(&dir);
    Ok(())
}

fn poll_once(dir: &Path, session_id: &str, events: &mpsc::Sender<Event>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !filename_pattern().is_match(name) {
            continue;
        }

        match parse_message(&path, session_id) {
            Ok(event) => {
                if let Err(e) = events.try_send(event) {
                    tracing::warn!(file = %path.display(), error = %e, "dropping IPC event: aggregator channel full or closed");
                }
            }
            Err(reason) => {
                tracing::warn!(file = %path.display(), %reason, "dropping invalid IPC message");
            }
        }

        // Deletion races (the file having already vanished, ENOENT) are
        // tolerated — another poll tick or the producer itself may have
        // cleaned up first.
        let _ = std::fs::remove_file(&path);
    }
}

fn parse_message(path: &Path, session_id: &str) -> Result<Event, String> {
    let contents = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    let raw: RawMessage = serde_json::from_str(&contents).map_err(|e| e.to_string())?;

    let body = match raw.kind.as_str() {
        "session_start" => EventBody::SessionStart { display_name: None },
        "session_end" => EventBody::SessionEnd {
            exit_code: None,
            events_processed: 0,
        },
        "tool_execution" => {
            let data = raw.data.unwrap_or(serde_json::Value::Null);
            EventBody::ToolExecution {
                execution_id: data
                    .get("execution_id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                tool_name: data
                    .get("tool_name")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                parameters: data.get("parameters").cloned().unwrap_or(serde_json::Value::Null),
                result_summary: data
                    .get("result_summary")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                duration_ms: data.get("duration_ms").and_then(|v| v.as_u64()).unwrap_or(0),
            }
        }
        "file_read_start" | "file_write_start" | "file_create_start" | "file_delete_start"
        | "file_edit_start" => {
            let data = raw.data.unwrap_or(serde_json::Value::Null);
            let path = data.get("path").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            match raw.kind.as_str() {
                "file_read_start" => EventBody::FileReadStart { path },
                "file_write_start" => EventBody::FileWriteStart { path },
                "file_create_start" => EventBody::FileCreateStart { path },
                "file_delete_start" => EventBody::FileDeleteStart { path },
                _ => EventBody::FileEditStart { path },
            }
        }
        "file_read_complete" | "file_write_complete" | "file_create_complete" => {
            let data = raw.data.unwrap_or(serde_json::Value::Null);
            let path = data.get("path").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let size = data.get("size").and_then(|v| v.as_u64()).unwrap_or(0);
            match raw.kind.as_str() {
                "file_read_complete" => EventBody::FileReadComplete { path, size },
                "file_write_complete" => EventBody::FileWriteComplete { path, size },
                _ => EventBody::FileCreateComplete { path, size },
            }
        }
        "file_delete_complete" => {
            let data = raw.data.unwrap_or(serde_json::Value::Null);
            EventBody::FileDeleteComplete {
                path: data.get("path").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            }
        }
        "file_edit_complete" => {
            let data = raw.data.unwrap_or(serde_json::Value::Null);
            let diff = data.get("diff");
            EventBody::FileEditComplete {
                path: data.get("path").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                size: data.get("size").and_then(|v| v.as_u64()).unwrap_or(0),
                diff: crate::events::DiffSummary {
                    additions: diff.and_then(|d| d.get("additions")).and_then(|v| v.as_u64()).unwrap_or(0) as u32,
                    deletions: diff.and_then(|d| d.get("deletions")).and_then(|v| v.as_u64()).unwrap_or(0) as u32,
                },
            }
        }
        "file_read_error" | "file_write_error" | "file_create_error" | "file_delete_error"
        | "file_edit_error" => {
            let data = raw.data.unwrap_or(serde_json::Value::Null);
            let path = data.get("path").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let message = data.get("message").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            match raw.kind.as_str() {
                "file_read_error" => EventBody::FileReadError { path, message },
                "file_write_error" => EventBody::FileWriteError { path, message },
                "file_create_error" => EventBody::FileCreateError { path, message },
                "file_delete_error" => EventBody::FileDeleteError { path, message },
                _ => EventBody::FileEditError { path, message },
            }
        }
        "bash_command" => {
            let data = raw.data.unwrap_or(serde_json::Value::Null);
            EventBody::BashCommand {
                command: data.get("command").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                args: data
                    .get("args")
                    .and_then(|v| v.as_array())
                    .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                    .unwrap_or_default(),
                working_dir: data
                    .get("working_dir")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                exit_code: data.get("exit_code").and_then(|v| v.as_i64()).map(|v| v as i32),
                stdout: crate::events::BodyCapture::Empty,
                stderr: crate::events::BodyCapture::Empty,
                sanitized: false,
            }
        }
        other => return Err(format!("unrecognized IPC message type {other:?}")),
    };

    let mut event = Event::new(
        raw.session_id.unwrap_or_else(|| session_id.to_string()),
        Source::Ipc,
        body,
    );
    event.timestamp = raw.timestamp.unwrap_or_else(now_ms);
    Ok(event)
}
