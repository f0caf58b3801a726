//! Session lifecycle types: identity, status machine, and the metadata
//! record written once at session birth.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::WrapError;

/// `[A-Za-z0-9_-]{1,50}` — the session id invariant from the data model.
fn is_valid_session_id(id: &str) -> bool {
    if id.is_empty() || id.len() > 50 {
        return false;
    }
    id.bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// A validated session id. Construction is the only place the `[A-Za-z0-9_-]{1,50}`
/// invariant is enforced; once built, every consumer can assume it holds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn parse(raw: impl Into<String>) -> Result<Self, WrapError> {
        let raw = raw.into();
        if !is_valid_session_id(&raw) {
            return Err(WrapError::Configuration(format!(
                "invalid session id {raw:?}: must match [A-Za-z0-9_-]{{1,50}}"
            )));
        }
        Ok(Self(raw))
    }

    /// Generate a fresh id: `<timestamp>-<random>`, always valid by construction.
    pub fn generate() -> Self {
        let timestamp = Utc::now().format("%Y%m%d-%H%M%S");
        let suffix = crate::util::random_hex_suffix(4);
        Self(format!("{timestamp}-{suffix}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The session's monotonic lifecycle states.
///
/// Transitions only ever move forward: `Initializing -> Active -> Finalizing
/// -> {Completed, Error}`. `transition` is the single place that enforces
/// this — nothing else in the crate is allowed to set `status` directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Initializing,
    Active,
    Finalizing,
    Completed,
    Error,
}

impl SessionStatus {
    fn allowed_next(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Initializing, Active)
                | (Active, Finalizing)
                | (Finalizing, Completed)
                | (Finalizing, Error)
                // Any active state can be force-errored (writer event-loss, child crash
                // surfaced as fatal, etc.) without passing through Finalizing first.
                | (Initializing, Error)
                | (Active, Error)
        )
    }
}

/// A session's in-memory lifecycle handle. Owned and mutated only by the
/// Coordinator and the State Store, per the data model's ownership rule.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub display_name: Option<String>,
    pub tags: Vec<String>,
    pub wall_clock_start: DateTime<Utc>,
    pub monotonic_start: Instant,
    pub trace_root: PathBuf,
    status: SessionStatus,
}

impl Session {
    pub fn new(id: SessionId, display_name: Option<String>, tags: Vec<String>, root: &Path) -> Self {
        let trace_root = root.join("sessions").join(id.as_str());
        Self {
            id,
            display_name,
            tags,
            wall_clock_start: Utc::now(),
            monotonic_start: Instant::now(),
            trace_root,
            status: SessionStatus::Initializing,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Attempt the transition; returns `false` (and leaves status unchanged)
    /// if it would violate the monotonic ordering invariant.
    pub fn transition(&mut self, next: SessionStatus) -> bool {
        if self.status.allowed_next(next) {
            self.status = next;
            true
        } else {
            false
        }
    }

    /// Milliseconds since session start, for stamping onto events whose
    /// `timestamp` must be `>= session start`.
    pub fn elapsed_ms(&self) -> u64 {
        self.monotonic_start.elapsed().as_millis() as u64
    }

    pub fn session_jsonl_path(&self) -> PathBuf {
        self.trace_root.join("session.jsonl")
    }

    pub fn state_json_path(&self) -> PathBuf {
        self.trace_root.join("state.json")
    }

    pub fn metadata_json_path(&self) -> PathBuf {
        self.trace_root.join("metadata.json")
    }

    pub fn session_html_path(&self) -> PathBuf {
        self.trace_root.join("session.html")
    }
}

/// The session's immutable birth certificate, written once to
/// `metadata.json` before the first event and never rewritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_id: String,
    pub display_name: Option<String>,
    pub tags: Vec<String>,
    pub started_at: DateTime<Utc>,
    /// Redacted snapshot of the effective configuration, for reproducibility.
    pub config_snapshot: serde_json::Value,
    pub wrapped_binary: PathBuf,
    /// Free-form extension point so future producers can attach fields
    /// without a metadata schema migration.
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
}
