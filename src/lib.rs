//! A transparent tracing wrapper: launches an external coding-assistant
//! binary behind an HTTP(S) MITM proxy, captures its network/filesystem/tool
//! activity as a canonical JSON-lines event log, and renders a standalone
//! HTML viewer once the session ends.

pub mod aggregator;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod ipc;
pub mod logging;
pub mod provider;
pub mod proxy;
pub mod sanitize;
pub mod session;
pub mod state;
pub mod supervisor;
pub mod util;
pub mod viewer;
pub mod writer;

use anyhow::Context;

use crate::cli::Cli;
use crate::config::Config;
use crate::coordinator::Coordinator;
use crate::session::{Session, SessionId};

/// Resolve the session to run this invocation against: a fresh id, an
/// explicit `--session`, or `--continue` (the most recently modified
/// `sessions/*` directory under `trace_dir`).
fn resolve_session(config: &Config, cli: &Cli) -> anyhow::Result<Session> {
    let id = if let Some(explicit) = &cli.session {
        SessionId::parse(explicit.clone())?
    } else if cli.r#continue {
        most_recent_session_id(config).context("no existing session to continue")?
    } else {
        SessionId::generate()
    };

    Ok(Session::new(
        id,
        cli.session_name.clone(),
        cli.tags.clone(),
        &config.trace_dir,
    ))
}

fn most_recent_session_id(config: &Config) -> Option<SessionId> {
    let sessions_dir = config.trace_dir.join("sessions");
    let mut entries: Vec<_> = std::fs::read_dir(&sessions_dir)
        .ok()?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .collect();
    entries.sort_by_key(|e| e.metadata().and_then(|m| m.modified()).ok());
    let newest = entries.last()?;
    let name = newest.file_name().into_string().ok()?;
    SessionId::parse(name).ok()
}

/// The binary's entire program: parse CLI, load/merge config, handle the
/// `config` subcommand, otherwise run a full session through the
/// coordinator. Returns the process exit code.
pub async fn run() -> anyhow::Result<i32> {
    let cli = <Cli as clap::Parser>::parse();

    if cli::handle_config_command(&cli) {
        return Ok(0);
    }

    let mut config = Config::from_env();
    config = cli::apply_overrides(config, &cli);
    config.validate().context("invalid configuration")?;

    let session = resolve_session(&config, &cli)?;

    let _log_guard = logging::init(&config, Some(&session.trace_root));
    tracing::info!(session_id = %session.id, "starting session");

    let coordinator = Coordinator::new(config, session);
    let exit_code = coordinator.run(cli.prompt.clone(), Vec::new()).await?;
    Ok(exit_code)
}
