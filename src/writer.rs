//! Event Log Writer: the single owner of the open `session.jsonl` handle.
//!
//! Initial creation goes through temp-file + rename so a crash mid-create
//! never leaves a half-written file at the canonical path. Every append
//! after that reuses one open handle in append mode; a failed append
//! retries with exponential backoff up to a bounded attempt count before
//! surfacing a fatal `EventLoss`.

use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;

use crate::error::WrapError;
use crate::events::Event;

const MAX_RETRIES: u32 = 5;
const INITIAL_BACKOFF: Duration = Duration::from_millis(50);

/// Re-serialize a value with lexicographically sorted object keys.
///
/// `serde_json`'s default map is `BTreeMap`-backed (the `preserve_order`
/// feature is off), so a plain re-parse through `Value` is enough to get
/// canonical key ordering without a dependency on `indexmap`.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted = serde_json::Map::new();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for k in keys {
                sorted.insert(k.clone(), canonicalize(&map[k]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

pub fn canonical_line(event: &Event) -> Result<String, WrapError> {
    let value = serde_json::to_value(event).map_err(|e| WrapError::Validation(e.to_string()))?;
    let canonical = canonicalize(&value);
    let mut line = serde_json::to_string(&canonical).map_err(|e| WrapError::Validation(e.to_string()))?;
    line.push('\n');
    Ok(line)
}

pub struct Writer {
    path: PathBuf,
    file: File,
}

impl Writer {
    /// Create (or open) `session.jsonl` at `path`. If the file doesn't
    /// exist yet, it's created via temp-file + rename; an existing file
    /// (resumed session) is opened directly in append mode.
    pub fn create(path: &Path) -> Result<Self, WrapError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if !path.exists() {
            let tmp_path = path.with_extension("jsonl.tmp");
            File::create(&tmp_path)?;
            std::fs::rename(&tmp_path, path)?;
        }

        let file = OpenOptions::new().append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Append a single event line, retrying with exponential backoff on
    /// failure before surfacing a fatal `EventLoss`.
    pub async fn append(&mut self, event: &Event) -> Result<(), WrapError> {
        let line = canonical_line(event)?;
        self.append_line(&line).await
    }

    /// Append several events coalesced into one write, under the batching
    /// policy (queue depth ≥ threshold) — still one line per event, never
    /// a partial line visible to readers.
    pub async fn append_batch(&mut self, events: &[Event]) -> Result<(), WrapError> {
        let mut buf = String::new();
        for event in events {
            buf.push_str(&canonical_line(event)?);
        }
        self.append_line(&buf).await
    }

    async fn append_line(&mut self, line: &str) -> Result<(), WrapError> {
        let mut backoff = INITIAL_BACKOFF;
        let mut last_err = None;
        for attempt in 0..MAX_RETRIES {
            match self.file.write_all(line.as_bytes()) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    last_err = Some(e);
                    if attempt + 1 < MAX_RETRIES {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }
        Err(WrapError::EventLoss {
            path: self.path.clone(),
            source: last_err.expect("loop always sets last_err before exiting"),
        })
    }

    pub fn flush(&mut self) -> Result<(), WrapError> {
        self.file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventBody, Source};

    fn sample_event() -> Event {
        Event::new(
            "sess1",
            Source::Internal,
            EventBody::SessionStart { display_name: None },
        )
    }

    #[test]
    fn canonical_line_sorts_keys() {
        let event = sample_event();
        let line = canonical_line(&event).unwrap();
        let parsed: Value = serde_json::from_str(line.trim_end()).unwrap();
        let keys: Vec<&String> = parsed.as_object().unwrap().keys().collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn canonical_line_ends_in_single_newline() {
        let event = sample_event();
        let line = canonical_line(&event).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
    }

    #[tokio::test]
    async fn append_creates_file_and_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.jsonl");
        let mut writer = Writer::create(&path).unwrap();
        writer.append(&sample_event()).await.unwrap();
        writer.append(&sample_event()).await.unwrap();
        writer.flush().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        for line in contents.lines() {
            let _: Value = serde_json::from_str(line).unwrap();
        }
    }

    #[tokio::test]
    async fn reopening_existing_file_appends_rather_than_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.jsonl");
        {
            let mut w = Writer::create(&path).unwrap();
            w.append(&sample_event()).await.unwrap();
        }
        {
            let mut w = Writer::create(&path).unwrap();
            w.append(&sample_event()).await.unwrap();
        }
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
