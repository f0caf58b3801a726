//! Event Aggregator: the single ingress for all events destined for the
//! log. De-duplicates, correlates, enriches with performance metadata, and
//! assigns a deterministic id to anything that arrives without one.
//!
//! The in-memory index is bounded per event type: correlation only ever
//! looks back 10s and performance trend only the last 10 same-type
//! durations, so nothing needs unbounded retention.

use std::collections::{HashMap, VecDeque};

use crate::events::{now_ms, Event, EventBody, Performance, PerfCategory, Trend};

const DEDUP_WINDOW_MS: i64 = 1_000;
const CORRELATION_WINDOW_MS: i64 = 10_000;
const MAX_INDEX_PER_KIND: usize = 512;
const TREND_SAMPLE: usize = 10;

struct IndexedEvent {
    event: Event,
}

/// What happened to an event submitted to the aggregator.
pub enum Outcome {
    /// Accepted; enriched with id/correlations/performance, ready for the
    /// sanitizer and writer.
    Kept(Event),
    /// Discarded as a duplicate of something already indexed.
    Duplicate,
}

pub struct Aggregator {
    index: HashMap<&'static str, VecDeque<IndexedEvent>>,
    durations: HashMap<&'static str, VecDeque<u64>>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self {
            index: HashMap::new(),
            durations: HashMap::new(),
        }
    }

    /// Submit one event. Events are processed (and therefore written) in
    /// the order they complete this call, not in wall-clock order — the
    /// log is ordered by aggregator arrival, per §4.3.
    pub fn ingest(&mut self, mut event: Event) -> Outcome {
        event.ensure_id();
        if event.timestamp <= 0 {
            event.timestamp = now_ms();
        }

        if self.is_duplicate(&event) {
            return Outcome::Duplicate;
        }

        event.correlations = self.correlate(&event);
        event.performance = self.enrich_performance(&event);

        self.insert_index(&event);
        Outcome::Kept(event)
    }

    fn is_duplicate(&self, event: &Event) -> bool {
        let Some(bucket) = self.index.get(event.type_tag()) else {
            return false;
        };
        bucket
            .iter()
            .any(|indexed| similar(&indexed.event, event))
    }

    fn correlate(&self, event: &Event) -> Vec<String> {
        match &event.body {
            EventBody::HttpRequestComplete {
                method,
                url,
                ..
            }
            | EventBody::HttpRequestError {
                method,
                url,
                ..
            } => self.find_matches("http_request_start", i64::MAX, |candidate| {
                matches!(
                    &candidate.body,
                    EventBody::HttpRequestStart { method: m, url: u, .. }
                        if m == method && u == url
                )
            }),
            EventBody::HttpsConnectComplete { request_id, .. } => {
                self.find_matches("https_connect_start", i64::MAX, |candidate| {
                    matches!(
                        &candidate.body,
                        EventBody::HttpsConnectStart { request_id: r, .. } if r == request_id
                    )
                })
            }
            EventBody::FileReadComplete { path, .. }
            | EventBody::FileReadError { path, .. } => {
                self.correlate_file_op("file_read_start", path, event.timestamp)
            }
            EventBody::FileWriteComplete { path, .. }
            | EventBody::FileWriteError { path, .. } => {
                self.correlate_file_op("file_write_start", path, event.timestamp)
            }
            EventBody::FileCreateComplete { path, .. }
            | EventBody::FileCreateError { path, .. } => {
                self.correlate_file_op("file_create_start", path, event.timestamp)
            }
            EventBody::FileDeleteComplete { path, .. }
            | EventBody::FileDeleteError { path, .. } => {
                self.correlate_file_op("file_delete_start", path, event.timestamp)
            }
            EventBody::FileEditComplete { path, .. }
            | EventBody::FileEditError { path, .. } => {
                self.correlate_file_op("file_edit_start", path, event.timestamp)
            }
            _ => Vec::new(),
        }
    }

    fn correlate_file_op(&self, start_tag: &'static str, path: &str, timestamp: i64) -> Vec<String> {
        self.find_matches(start_tag, CORRELATION_WINDOW_MS, |candidate| {
            matches!(&candidate.body, EventBody::FileReadStart { path: p }
                | EventBody::FileWriteStart { path: p }
                | EventBody::FileCreateStart { path: p }
                | EventBody::FileDeleteStart { path: p }
                | EventBody::FileEditStart { path: p } if p == path)
                && (timestamp - candidate.timestamp).abs() <= CORRELATION_WINDOW_MS
        })
    }

    fn find_matches(
        &self,
        start_tag: &'static str,
        _window_ms: i64,
        pred: impl Fn(&Event) -> bool,
    ) -> Vec<String> {
        let Some(bucket) = self.index.get(start_tag) else {
            return Vec::new();
        };
        bucket
            .iter()
            .rev()
            .find(|indexed| pred(&indexed.event))
            .and_then(|indexed| indexed.event.id.clone())
            .into_iter()
            .collect()
    }

    fn enrich_performance(&mut self, event: &Event) -> Option<Performance> {
        let duration = event.body.duration_ms()?;
        let tag = event.type_tag();

        let durations = self.durations.entry(tag).or_default();
        let below_or_equal = durations.iter().filter(|d| **d <= duration).count();
        let percentile = if durations.is_empty() {
            100.0
        } else {
            (below_or_equal as f64 / durations.len() as f64) * 100.0
        };

        let trend = if durations.is_empty() {
            Trend::Stable
        } else {
            let avg: f64 = durations.iter().sum::<u64>() as f64 / durations.len() as f64;
            if (duration as f64) < avg * 0.9 {
                Trend::Improving
            } else if (duration as f64) > avg * 1.1 {
                Trend::Degrading
            } else {
                Trend::Stable
            }
        };

        durations.push_back(duration);
        if durations.len() > TREND_SAMPLE {
            durations.pop_front();
        }

        Some(Performance {
            category: categorize(tag, duration),
            percentile,
            trend,
        })
    }

    fn insert_index(&mut self, event: &Event) {
        let bucket = self.index.entry(event.type_tag()).or_default();
        bucket.push_back(IndexedEvent {
            event: event.clone(),
        });
        while bucket.len() > MAX_INDEX_PER_KIND {
            bucket.pop_front();
        }
        // Evict anything stale enough that neither the 1s dedup window nor
        // the 10s correlation window could ever reach it again.
        let cutoff = event.timestamp - CORRELATION_WINDOW_MS;
        while bucket
            .front()
            .map(|indexed| indexed.event.timestamp < cutoff)
            .unwrap_or(false)
        {
            bucket.pop_front();
        }
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

fn categorize(tag: &str, duration_ms: u64) -> PerfCategory {
    let (fast, medium) = match tag {
        "https_connect_complete" => (100, 500),
        "http_request_complete" | "http_request_error" => (200, 1_000),
        "tool_execution" => (500, 2_000),
        _ => (100, 1_000),
    };
    if duration_ms < fast {
        PerfCategory::Fast
    } else if duration_ms < medium {
        PerfCategory::Medium
    } else {
        PerfCategory::Slow
    }
}

/// De-dup predicate: same type already established by the caller's index
/// bucket lookup; this checks the 1s timestamp window and the
/// type-specific similarity rule.
fn similar(a: &Event, b: &Event) -> bool {
    if (a.timestamp - b.timestamp).abs() >= DEDUP_WINDOW_MS {
        return false;
    }
    match (&a.body, &b.body) {
        (
            EventBody::HttpRequestStart { method: m1, url: u1, .. },
            EventBody::HttpRequestStart { method: m2, url: u2, .. },
        ) => m1 == m2 && u1 == u2,
        (
            EventBody::HttpRequestComplete { method: m1, url: u1, status: s1, .. },
            EventBody::HttpRequestComplete { method: m2, url: u2, status: s2, .. },
        ) => (m1 == m2 && u1 == u2) || (u1 == u2 && s1 == s2),
        (
            EventBody::FileReadStart { path: p1 },
            EventBody::FileReadStart { path: p2 },
        )
        | (
            EventBody::FileWriteStart { path: p1 },
            EventBody::FileWriteStart { path: p2 },
        )
        | (
            EventBody::FileCreateStart { path: p1 },
            EventBody::FileCreateStart { path: p2 },
        )
        | (
            EventBody::FileDeleteStart { path: p1 },
            EventBody::FileDeleteStart { path: p2 },
        )
        | (
            EventBody::FileEditStart { path: p1 },
            EventBody::FileEditStart { path: p2 },
        ) => p1 == p2,
        (
            EventBody::ToolExecution { execution_id: e1, tool_name: c1, .. },
            EventBody::ToolExecution { execution_id: e2, tool_name: c2, .. },
        ) => e1 == e2 || c1 == c2,
        _ => serde_json::to_value(&a.body).ok() == serde_json::to_value(&b.body).ok(),
    }
}
