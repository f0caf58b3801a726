//! State Store: per-session counters and component health, snapshotted
//! periodically and at finalization via the same temp-file + rename
//! pattern the Writer uses for its initial file creation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::WrapError;
use crate::session::SessionStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Counters {
    pub events_processed: u64,
    pub duplicates_filtered: u64,
    pub errors: u64,
    pub http_count: u64,
    pub file_op_count: u64,
    pub tool_exec_count: u64,
    pub bytes_written: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentHealth {
    Starting,
    Healthy,
    Unhealthy,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentRecord {
    pub name: String,
    pub status: ComponentHealth,
    pub last_seen: DateTime<Utc>,
    pub pid: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub session_id: String,
    pub status: SessionStatus,
    pub counters: Counters,
    pub components: HashMap<String, ComponentRecord>,
    pub snapshot_at: DateTime<Utc>,
}

pub struct StateStore {
    path: PathBuf,
    session_id: String,
    status: SessionStatus,
    counters: Counters,
    components: HashMap<String, ComponentRecord>,
}

impl StateStore {
    /// Create a fresh store, or recover one from an existing `state.json`
    /// (a resumed session): counters and the component table are merged
    /// in, and the status is forced back to `Active` regardless of what
    /// was last persisted.
    pub fn new(path: &Path, session_id: &str) -> Self {
        if let Some(recovered) = Self::load(path) {
            return Self {
                path: path.to_path_buf(),
                session_id: session_id.to_string(),
                status: SessionStatus::Active,
                counters: recovered.counters,
                components: recovered.components,
            };
        }
        Self {
            path: path.to_path_buf(),
            session_id: session_id.to_string(),
            status: SessionStatus::Initializing,
            counters: Counters::default(),
            components: HashMap::new(),
        }
    }

    fn load(path: &Path) -> Option<StateSnapshot> {
        let contents = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&contents).ok()
    }

    pub fn set_status(&mut self, status: SessionStatus) {
        self.status = status;
    }

    pub fn record_processed(&mut self) {
        self.counters.events_processed += 1;
    }

    pub fn record_duplicate(&mut self) {
        self.counters.duplicates_filtered += 1;
    }

    pub fn record_error(&mut self) {
        self.counters.errors += 1;
    }

    pub fn record_bytes(&mut self, n: u64) {
        self.counters.bytes_written += n;
    }

    pub fn record_http(&mut self) {
        self.counters.http_count += 1;
    }

    pub fn record_file_op(&mut self) {
        self.counters.file_op_count += 1;
    }

    pub fn record_tool_exec(&mut self) {
        self.counters.tool_exec_count += 1;
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    pub fn update_component(&mut self, name: &str, status: ComponentHealth, pid: Option<u32>) {
        self.components.insert(
            name.to_string(),
            ComponentRecord {
                name: name.to_string(),
                status,
                last_seen: Utc::now(),
                pid,
            },
        );
    }

    fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            session_id: self.session_id.clone(),
            status: self.status,
            counters: self.counters,
            components: self.components.clone(),
            snapshot_at: Utc::now(),
        }
    }

    /// Write the current snapshot via temp-file + rename. Failures are
    /// logged but never fatal — the in-memory state remains authoritative.
    pub fn snapshot_now(&self) -> Result<(), WrapError> {
        let snapshot = self.snapshot();
        let json = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| WrapError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_store_starts_initializing_with_zero_counters() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = StateStore::new(&path, "sess1");
        assert_eq!(store.status, SessionStatus::Initializing);
        assert_eq!(store.counters().events_processed, 0);
    }

    #[test]
    fn snapshot_now_writes_valid_json_and_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut store = StateStore::new(&path, "sess1");
        store.record_processed();
        store.record_duplicate();
        store.set_status(SessionStatus::Active);
        store.snapshot_now().unwrap();

        let recovered = StateStore::new(&path, "sess1");
        assert_eq!(recovered.status, SessionStatus::Active);
        assert_eq!(recovered.counters().events_processed, 1);
        assert_eq!(recovered.counters().duplicates_filtered, 1);
    }

    #[test]
    fn recovery_forces_status_active_even_if_snapshot_was_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut store = StateStore::new(&path, "sess1");
        store.set_status(SessionStatus::Error);
        store.snapshot_now().unwrap();

        let recovered = StateStore::new(&path, "sess1");
        assert_eq!(recovered.status, SessionStatus::Active);
    }
}
