//! Session Coordinator: owns the one `CancellationToken` for a session and
//! sequences every other component's start/stop around it.
//!
//! Start order: directories, Writer/Aggregator/State, IPC Bus, Proxy,
//! Supervisor (which launches the wrapped binary with the proxy's env).
//! Shutdown (child exit, signal, or the 60s force-finalize fallback): drain
//! window, flush the writer, snapshot state, render the viewer once, clean
//! up the IPC directory.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::aggregator::{Aggregator, Outcome};
use crate::config::Config;
use crate::error::WrapError;
use crate::events::{Event, EventBody, Source};
use crate::sanitize;
use crate::session::{Session, SessionMetadata, SessionStatus};
use crate::state::{ComponentHealth, StateStore};
use crate::supervisor::{self, Supervisor, SupervisorEvent};
use crate::writer::Writer;
use crate::{ipc, proxy, viewer};

const DRAIN_WINDOW: Duration = Duration::from_secs(2);
const FORCE_FINALIZE_TIMEOUT: Duration = Duration::from_secs(60);
const EVENT_CHANNEL_CAPACITY: usize = 1024;
const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(5);
/// Queue depth at which a batch of already-queued events is coalesced into
/// one `append_batch` call instead of one `append` per event.
const BATCH_THRESHOLD: usize = 8;

pub struct Coordinator {
    config: Config,
    session: Session,
}

impl Coordinator {
    pub fn new(config: Config, session: Session) -> Self {
        Self { config, session }
    }

    /// Run the full session lifecycle to completion. Returns the exit code
    /// the wrapper process should itself exit with.
    pub async fn run(mut self, prompt: Option<String>, args: Vec<String>) -> Result<i32, WrapError> {
        std::fs::create_dir_all(&self.session.trace_root)?;
        self.write_metadata()?;

        let mut writer = Writer::create(&self.session.session_jsonl_path())?;
        let mut state = StateStore::new(&self.session.state_json_path(), self.session.id.as_str());
        let mut aggregator = Aggregator::new();

        self.session.transition(SessionStatus::Active);
        state.set_status(SessionStatus::Active);

        let cancel = CancellationToken::new();
        let (events_tx, mut events_rx) = mpsc::channel::<Event>(EVENT_CHANNEL_CAPACITY);

        let ipc_task = tokio::spawn(ipc::run(
            self.session.id.as_str().to_string(),
            events_tx.clone(),
            cancel.clone(),
        ));

        let proxy_handle = proxy::start(
            &self.config.proxy_host,
            self.config.proxy_port,
            proxy::ProxyConfig {
                session_id: self.session.id.as_str().to_string(),
                include_all: self.config.include_all,
                max_body_size: self.config.max_body_size,
            },
            events_tx.clone(),
        )
        .await?;

        let _ = events_tx
            .send(Event::new(
                self.session.id.as_str(),
                Source::Internal,
                EventBody::SessionStart {
                    display_name: self.session.display_name.clone(),
                },
            ))
            .await;

        let _ = events_tx
            .send(Event::new(
                self.session.id.as_str(),
                Source::Internal,
                EventBody::InterceptionInitialized {
                    bind_host: proxy_handle.host.clone(),
                    bind_port: proxy_handle.port,
                },
            ))
            .await;

        let binary_path = supervisor::locate_binary(&self.config.wrapped_binary)?;
        let mut env = proxy_handle.env();
        let mut args = args;
        if let Some(prompt) = &prompt {
            args.push(prompt.clone());
        }
        env.push(("TRACEWRAP_SESSION_ID".to_string(), self.session.id.as_str().to_string()));

        let child = Supervisor::spawn(&binary_path, &args, &env)?;
        state.update_component("supervisor", ComponentHealth::Starting, child.pid());

        let (sup_tx, mut sup_rx) = mpsc::channel::<SupervisorEvent>(32);
        let child_cancel = cancel.clone();
        let supervise_task = tokio::spawn(child.supervise(sup_tx, child_cancel));

        let mut exit_code: Option<i32> = None;
        let mut fatal: Option<WrapError> = None;
        let mut force_finalize = Box::pin(tokio::time::sleep(FORCE_FINALIZE_TIMEOUT));
        let mut snapshot_tick = tokio::time::interval_at(
            tokio::time::Instant::now() + SNAPSHOT_INTERVAL,
            SNAPSHOT_INTERVAL,
        );

        loop {
            tokio::select! {
                maybe_event = events_rx.recv() => {
                    let Some(event) = maybe_event else { continue };
                    let mut batch = vec![event];
                    while batch.len() < BATCH_THRESHOLD {
                        match events_rx.try_recv() {
                            Ok(event) => batch.push(event),
                            Err(_) => break,
                        }
                    }
                    if let Err(e) = self.process_events(batch, &mut aggregator, &mut writer, &mut state).await {
                        fatal = Some(e);
                        break;
                    }
                }
                Some(sup_event) = sup_rx.recv() => {
                    self.process_supervisor_event(sup_event, &mut state, &mut exit_code);
                    if exit_code.is_some() {
                        break;
                    }
                }
                _ = snapshot_tick.tick() => {
                    if let Err(e) = state.snapshot_now() {
                        tracing::warn!(error = %e, "periodic state snapshot failed");
                    }
                }
                _ = &mut force_finalize => {
                    tracing::warn!("force-finalizing session after 60s without a completion signal");
                    break;
                }
            }
        }

        cancel.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(5), supervise_task).await;
        proxy_handle.stop().await;
        let _ = tokio::time::timeout(Duration::from_secs(2), ipc_task).await;

        // Drain window: let anything already in flight land before the
        // final flush, since the proxy/ipc tasks above may have queued one
        // last event right as they were told to stop.
        tokio::time::sleep(DRAIN_WINDOW).await;
        let mut drained = Vec::new();
        while let Ok(event) = events_rx.try_recv() {
            drained.push(event);
        }
        if fatal.is_none() && !drained.is_empty() {
            if let Err(e) = self.process_events(drained, &mut aggregator, &mut writer, &mut state).await {
                fatal = Some(e);
            }
        }

        self.session.transition(SessionStatus::Finalizing);
        state.set_status(SessionStatus::Finalizing);

        let counters = state.counters();
        let _ = events_tx.try_send(Event::new(
            self.session.id.as_str(),
            Source::Internal,
            EventBody::SessionEnd {
                exit_code,
                events_processed: counters.events_processed,
            },
        ));
        let _ = events_tx.try_send(Event::new(
            self.session.id.as_str(),
            Source::Internal,
            EventBody::AggregationSummary {
                events_processed: counters.events_processed,
                duplicates_filtered: counters.duplicates_filtered,
                errors: counters.errors,
            },
        ));
        let _ = events_tx.try_send(Event::new(
            self.session.id.as_str(),
            Source::Internal,
            EventBody::InterceptionCleanup {
                connections_drained: counters.http_count,
            },
        ));
        let mut drained = Vec::new();
        while let Ok(event) = events_rx.try_recv() {
            drained.push(event);
        }
        if fatal.is_none() && !drained.is_empty() {
            if let Err(e) = self.process_events(drained, &mut aggregator, &mut writer, &mut state).await {
                fatal = Some(e);
            }
        }

        let _ = writer.flush();

        // The wrapped binary's own exit code is recorded in the log
        // (`session_end.exit_code`) and drives the session's own status,
        // but it never becomes the wrapper process's exit code: the
        // wrapper succeeded at its job (tracing the run) regardless of
        // what the traced binary returned.
        let final_status = if fatal.is_some() {
            SessionStatus::Error
        } else if exit_code.unwrap_or(0) == 0 {
            SessionStatus::Completed
        } else {
            SessionStatus::Error
        };
        self.session.transition(final_status);
        state.set_status(final_status);
        let _ = state.snapshot_now();

        let html_path = self.session.session_html_path();
        let viewer_produced = match viewer::render(&self.config.renderer_command, &self.session.session_jsonl_path(), &html_path).await {
            Ok(()) => true,
            Err(reason) => {
                tracing::warn!(%reason, "viewer rendering failed; session.jsonl is still complete");
                false
            }
        };

        let final_counters = state.counters();
        let duration_secs = self.session.elapsed_ms() as f64 / 1000.0;
        println!("tracewrap session {} finished", self.session.id);
        println!("  trace file   : {}", self.session.session_jsonl_path().display());
        if viewer_produced {
            println!("  viewer       : {}", html_path.display());
        }
        println!("  events       : {}", final_counters.events_processed);
        println!("  duplicates   : {}", final_counters.duplicates_filtered);
        println!("  duration     : {duration_secs:.1}s");

        let _ = std::fs::remove_dir_all(ipc::bus_dir(self.session.id.as_str()));

        if let Some(e) = fatal {
            return Err(e);
        }
        Ok(0)
    }

    fn write_metadata(&self) -> Result<(), WrapError> {
        let metadata = SessionMetadata {
            session_id: self.session.id.as_str().to_string(),
            display_name: self.session.display_name.clone(),
            tags: self.session.tags.clone(),
            started_at: self.session.wall_clock_start,
            config_snapshot: serde_json::to_value(&self.config)
                .map_err(|e| WrapError::Validation(e.to_string()))?,
            wrapped_binary: self.config.wrapped_binary.clone().into(),
            extra: Default::default(),
        };
        let json = serde_json::to_string_pretty(&metadata)
            .map_err(|e| WrapError::Validation(e.to_string()))?;
        std::fs::write(self.session.metadata_json_path(), json)?;
        Ok(())
    }

    /// Returns `Err` only for a fatal, unrecoverable writer failure
    /// (`WrapError::EventLoss`) — everything else (invalid events,
    /// sanitization errors) is recorded in the state counters and
    /// swallowed, since a single malformed event shouldn't abort the
    /// session.
    ///
    /// Events that survive aggregation and sanitization are appended one at
    /// a time when there's only one, or coalesced into a single
    /// `append_batch` call when the caller handed over more than one
    /// (per the event log's batching policy).
    async fn process_events(
        &self,
        events: Vec<Event>,
        aggregator: &mut Aggregator,
        writer: &mut Writer,
        state: &mut StateStore,
    ) -> Result<(), WrapError> {
        let mut to_write = Vec::with_capacity(events.len());
        for event in events {
            match aggregator.ingest(event) {
                Outcome::Duplicate => state.record_duplicate(),
                Outcome::Kept(mut event) => {
                    if let Err(e) = sanitize::validate(&event) {
                        tracing::warn!(error = %e, "dropping invalid event");
                        state.record_error();
                        continue;
                    }
                    if let Err(e) = sanitize::sanitize_event(&mut event, self.config.high_security) {
                        tracing::warn!(error = %e, "sanitization failed; writing unsanitized payload");
                    }
                    bump_counters(state, &event);
                    to_write.push(event);
                }
            }
        }

        if to_write.is_empty() {
            return Ok(());
        }

        let result = if to_write.len() == 1 {
            writer.append(&to_write[0]).await
        } else {
            writer.append_batch(&to_write).await
        };

        match result {
            Ok(()) => {
                for _ in &to_write {
                    state.record_processed();
                }
            }
            Err(e @ WrapError::EventLoss { .. }) => {
                tracing::error!(error = %e, "writer exhausted retries; event(s) lost");
                state.record_error();
                return Err(e);
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to append event(s)");
                state.record_error();
            }
        }
        Ok(())
    }

    fn process_supervisor_event(
        &self,
        event: SupervisorEvent,
        state: &mut StateStore,
        exit_code: &mut Option<i32>,
    ) {
        match event {
            SupervisorEvent::StateChanged(_) => {
                state.update_component("supervisor", ComponentHealth::Healthy, None);
            }
            SupervisorEvent::Unhealthy(reason) => {
                tracing::warn!(%reason, "wrapped binary unhealthy");
                state.update_component("supervisor", ComponentHealth::Unhealthy, None);
            }
            SupervisorEvent::Recovered => {
                state.update_component("supervisor", ComponentHealth::Healthy, None);
            }
            SupervisorEvent::Exited(code) => {
                state.update_component("supervisor", ComponentHealth::Stopped, None);
                if code.unwrap_or(1) != 0 {
                    let crash = WrapError::ChildCrash(code);
                    tracing::warn!(error = %crash, "wrapped binary exited non-zero");
                }
                *exit_code = Some(code.unwrap_or(1));
            }
        }
    }
}

fn bump_counters(state: &mut StateStore, event: &Event) {
    match &event.body {
        EventBody::HttpRequestStart { .. }
        | EventBody::HttpRequestComplete { .. }
        | EventBody::HttpRequestError { .. }
        | EventBody::HttpsConnectStart { .. }
        | EventBody::HttpsConnectComplete { .. } => state.record_http(),
        EventBody::FileReadStart { .. }
        | EventBody::FileReadComplete { .. }
        | EventBody::FileReadError { .. }
        | EventBody::FileWriteStart { .. }
        | EventBody::FileWriteComplete { .. }
        | EventBody::FileWriteError { .. }
        | EventBody::FileCreateStart { .. }
        | EventBody::FileCreateComplete { .. }
        | EventBody::FileCreateError { .. }
        | EventBody::FileDeleteStart { .. }
        | EventBody::FileDeleteComplete { .. }
        | EventBody::FileDeleteError { .. }
        | EventBody::FileEditStart { .. }
        | EventBody::FileEditComplete { .. }
        | EventBody::FileEditError { .. } => state.record_file_op(),
        EventBody::ToolExecution { .. } => state.record_tool_exec(),
        _ => {}
    }
}
