//! The event model: the tagged union that flows from every producer
//! (proxy, IPC bus, supervisor, coordinator) through the aggregator to the
//! writer.
//!
//! `Event` carries the fields required by every line of the log (`type`
//! lives on `body`'s tag via `#[serde(flatten)]`, `timestamp`, `session_id`,
//! `source`, plus the optional `id`/`correlations`/`performance`/`parent_id`
//! from §6). `EventBody` is the per-variant payload.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::provider::Provider;

/// Producer tag, per the data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Proxy,
    Ipc,
    Supervisor,
    Internal,
}

/// Performance enrichment attached by the aggregator to any event bearing a
/// duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Performance {
    pub category: PerfCategory,
    /// Percentile (0-100) among same-type events seen so far this session.
    pub percentile: f64,
    pub trend: Trend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerfCategory {
    Fast,
    Medium,
    Slow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Stable,
    Improving,
    Degrading,
}

/// Filesystem operation kind, shared by all five `file_*` event families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileOp {
    Read,
    Write,
    Create,
    Delete,
    Edit,
}

impl FileOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileOp::Read => "read",
            FileOp::Write => "write",
            FileOp::Create => "create",
            FileOp::Delete => "delete",
            FileOp::Edit => "edit",
        }
    }
}

/// Additions/deletions summary attached to `file_edit_*` events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub additions: u32,
    pub deletions: u32,
}

/// The per-variant payload. The `type` discriminant is produced by serde's
/// adjacently-untagged-free `tag = "type"` on this enum and flattened into
/// `Event` so the JSONL line carries exactly one `type` key, per §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventBody {
    #[serde(rename = "https_connect_start")]
    HttpsConnectStart {
        request_id: String,
        host: String,
        port: u16,
        detected_provider: Provider,
    },
    #[serde(rename = "https_connect_complete")]
    HttpsConnectComplete {
        request_id: String,
        host: String,
        port: u16,
        detected_provider: Provider,
        duration_ms: u64,
        status: u16,
    },

    #[serde(rename = "http_request_start")]
    HttpRequestStart {
        request_id: String,
        method: String,
        url: String,
        headers: serde_json::Value,
        body: BodyCapture,
        provider: Provider,
    },
    #[serde(rename = "http_request_complete")]
    HttpRequestComplete {
        request_id: String,
        method: String,
        url: String,
        status: u16,
        headers: serde_json::Value,
        body: BodyCapture,
        duration_ms: u64,
        provider: Provider,
    },
    #[serde(rename = "http_request_error")]
    HttpRequestError {
        request_id: String,
        method: String,
        url: String,
        message: String,
        duration_ms: u64,
        provider: Provider,
    },

    #[serde(rename = "file_read_start")]
    FileReadStart { path: String },
    #[serde(rename = "file_read_complete")]
    FileReadComplete { path: String, size: u64 },
    #[serde(rename = "file_read_error")]
    FileReadError { path: String, message: String },

    #[serde(rename = "file_write_start")]
    FileWriteStart { path: String },
    #[serde(rename = "file_write_complete")]
    FileWriteComplete { path: String, size: u64 },
    #[serde(rename = "file_write_error")]
    FileWriteError { path: String, message: String },

    #[serde(rename = "file_create_start")]
    FileCreateStart { path: String },
    #[serde(rename = "file_create_complete")]
    FileCreateComplete { path: String, size: u64 },
    #[serde(rename = "file_create_error")]
    FileCreateError { path: String, message: String },

    #[serde(rename = "file_delete_start")]
    FileDeleteStart { path: String },
    #[serde(rename = "file_delete_complete")]
    FileDeleteComplete { path: String },
    #[serde(rename = "file_delete_error")]
    FileDeleteError { path: String, message: String },

    #[serde(rename = "file_edit_start")]
    FileEditStart { path: String },
    #[serde(rename = "file_edit_complete")]
    FileEditComplete {
        path: String,
        size: u64,
        diff: DiffSummary,
    },
    #[serde(rename = "file_edit_error")]
    FileEditError { path: String, message: String },

    #[serde(rename = "bash_command")]
    BashCommand {
        command: String,
        args: Vec<String>,
        working_dir: String,
        exit_code: Option<i32>,
        stdout: BodyCapture,
        stderr: BodyCapture,
        sanitized: bool,
    },

    #[serde(rename = "tool_execution")]
    ToolExecution {
        execution_id: String,
        tool_name: String,
        parameters: serde_json::Value,
        result_summary: String,
        duration_ms: u64,
    },

    #[serde(rename = "session_start")]
    SessionStart { display_name: Option<String> },
    #[serde(rename = "session_end")]
    SessionEnd {
        exit_code: Option<i32>,
        events_processed: u64,
    },

    #[serde(rename = "aggregation_summary")]
    AggregationSummary {
        events_processed: u64,
        duplicates_filtered: u64,
        errors: u64,
    },

    #[serde(rename = "interception_initialized")]
    InterceptionInitialized { bind_host: String, bind_port: u16 },
    #[serde(rename = "interception_cleanup")]
    InterceptionCleanup { connections_drained: u64 },
}

impl EventBody {
    /// The wire tag string (`"http_request_start"`, etc), used by the
    /// aggregator's de-dup and correlation logic without round-tripping
    /// through JSON.
    pub fn type_tag(&self) -> &'static str {
        match self {
            EventBody::HttpsConnectStart { .. } => "https_connect_start",
            EventBody::HttpsConnectComplete { .. } => "https_connect_complete",
            EventBody::HttpRequestStart { .. } => "http_request_start",
            EventBody::HttpRequestComplete { .. } => "http_request_complete",
            EventBody::HttpRequestError { .. } => "http_request_error",
            EventBody::FileReadStart { .. } => "file_read_start",
            EventBody::FileReadComplete { .. } => "file_read_complete",
            EventBody::FileReadError { .. } => "file_read_error",
            EventBody::FileWriteStart { .. } => "file_write_start",
            EventBody::FileWriteComplete { .. } => "file_write_complete",
            EventBody::FileWriteError { .. } => "file_write_error",
            EventBody::FileCreateStart { .. } => "file_create_start",
            EventBody::FileCreateComplete { .. } => "file_create_complete",
            EventBody::FileCreateError { .. } => "file_create_error",
            EventBody::FileDeleteStart { .. } => "file_delete_start",
            EventBody::FileDeleteComplete { .. } => "file_delete_complete",
            EventBody::FileDeleteError { .. } => "file_delete_error",
            EventBody::FileEditStart { .. } => "file_edit_start",
            EventBody::FileEditComplete { .. } => "file_edit_complete",
            EventBody::FileEditError { .. } => "file_edit_error",
            EventBody::BashCommand { .. } => "bash_command",
            EventBody::ToolExecution { .. } => "tool_execution",
            EventBody::SessionStart { .. } => "session_start",
            EventBody::SessionEnd { .. } => "session_end",
            EventBody::AggregationSummary { .. } => "aggregation_summary",
            EventBody::InterceptionInitialized { .. } => "interception_initialized",
            EventBody::InterceptionCleanup { .. } => "interception_cleanup",
        }
    }

    /// Duration in milliseconds, for events that carry one. Used by the
    /// aggregator's performance enrichment (§4.3).
    pub fn duration_ms(&self) -> Option<u64> {
        match self {
            EventBody::HttpsConnectComplete { duration_ms, .. }
            | EventBody::HttpRequestComplete { duration_ms, .. }
            | EventBody::HttpRequestError { duration_ms, .. }
            | EventBody::ToolExecution { duration_ms, .. } => Some(*duration_ms),
            _ => None,
        }
    }
}

/// A captured request/response/stdio body, already subject to the proxy's
/// body-handling policy (§4.1): buffered up to the cap, truncated with a
/// marker on overflow, or replaced by a placeholder for binary content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BodyCapture {
    /// Body captured in full, at or under the configured cap.
    Full { text: String, size: usize },
    /// Body exceeded the cap; `text` holds the retained prefix.
    Truncated {
        text: String,
        size: usize,
        discarded_bytes: usize,
    },
    /// Binary (non-text) content type; body is not stored.
    Binary { content_type: String, size: usize },
    /// No body present (e.g. GET request, empty response).
    Empty,
}

impl BodyCapture {
    pub fn size(&self) -> usize {
        match self {
            BodyCapture::Full { size, .. } => *size,
            BodyCapture::Truncated { size, .. } => *size,
            BodyCapture::Binary { size, .. } => *size,
            BodyCapture::Empty => 0,
        }
    }
}

/// The full event record, one line of `session.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub session_id: String,
    pub timestamp: i64,
    pub source: Source,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub correlations: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performance: Option<Performance>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(flatten)]
    pub body: EventBody,
}

impl Event {
    pub fn new(session_id: impl Into<String>, source: Source, body: EventBody) -> Self {
        Self {
            id: None,
            session_id: session_id.into(),
            timestamp: now_ms(),
            source,
            correlations: Vec::new(),
            performance: None,
            parent_id: None,
            body,
        }
    }

    pub fn type_tag(&self) -> &'static str {
        self.body.type_tag()
    }

    /// Assign a deterministic id derived from type + timestamp + payload,
    /// as §4.3 requires when a producer doesn't supply one.
    pub fn ensure_id(&mut self) {
        if self.id.is_some() {
            return;
        }
        let payload = serde_json::to_string(&self.body).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(self.type_tag().as_bytes());
        hasher.update(self.timestamp.to_le_bytes());
        hasher.update(payload.as_bytes());
        let digest = hasher.finalize();
        self.id = Some(format!("{:x}", digest)[..16].to_string());
    }
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_tag_round_trips_through_json() {
        let body = EventBody::HttpRequestStart {
            request_id: "r1".into(),
            method: "GET".into(),
            url: "http://example.com/".into(),
            headers: serde_json::json!({}),
            body: BodyCapture::Empty,
            provider: Provider::Null,
        };
        let event = Event::new("sess1", Source::Proxy, body);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "http_request_start");
        assert_eq!(json["session_id"], "sess1");
    }

    #[test]
    fn ensure_id_is_deterministic_for_same_inputs() {
        let body = EventBody::FileReadStart {
            path: "/tmp/a".into(),
        };
        let mut e1 = Event::new("s", Source::Internal, body.clone());
        e1.timestamp = 1000;
        let mut e2 = Event::new("s", Source::Internal, body);
        e2.timestamp = 1000;
        e1.ensure_id();
        e2.ensure_id();
        assert_eq!(e1.id, e2.id);
    }

    #[test]
    fn optional_fields_are_omitted_when_absent() {
        let event = Event::new(
            "s",
            Source::Internal,
            EventBody::SessionStart { display_name: None },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("id").is_none());
        assert!(json.get("correlations").is_none());
        assert!(json.get("performance").is_none());
        assert!(json.get("parent_id").is_none());
    }
}
