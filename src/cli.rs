//! Command-line surface: the wrapper's own flags plus a `config`
//! subcommand for config-file ergonomics (show/reset/edit/path).

use std::io::Write;
use std::process::Command;

use clap::{Parser, Subcommand};

use crate::config::{Config, VERSION};

#[derive(Parser)]
#[command(name = "tracewrap")]
#[command(version = VERSION)]
#[command(about = "Transparent tracing wrapper for a coding-assistant binary", long_about = None)]
pub struct Cli {
    /// Optional prompt to forward to the wrapped binary.
    pub prompt: Option<String>,

    /// Capture non-provider HTTP(S) traffic too.
    #[arg(long)]
    pub include_all: bool,

    /// Root directory for session traces.
    #[arg(long, value_name = "PATH")]
    pub trace_dir: Option<String>,

    /// Resume an existing session by id instead of starting a new one.
    #[arg(long, value_name = "ID")]
    pub session: Option<String>,

    /// Continue the most recent session.
    #[arg(long)]
    pub r#continue: bool,

    /// Human-readable label for this session.
    #[arg(long, value_name = "NAME")]
    pub session_name: Option<String>,

    /// Tag to attach to this session (repeatable).
    #[arg(long = "tag", value_name = "TAG")]
    pub tags: Vec<String>,

    /// Byte cap on any single captured request/response/stdio body.
    #[arg(long, value_name = "BYTES")]
    pub max_body_size: Option<usize>,

    #[arg(long)]
    pub debug: bool,

    #[arg(long, conflicts_with = "quiet")]
    pub verbose: bool,

    #[arg(long, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage configuration.
    Config {
        #[arg(long)]
        show: bool,
        #[arg(long)]
        reset: bool,
        #[arg(long)]
        edit: bool,
        #[arg(long)]
        path: bool,
    },
}

/// Apply CLI-level overrides onto the file/default-merged config. Flags win
/// over anything from the file layer, per §12's precedence chain.
pub fn apply_overrides(mut config: Config, cli: &Cli) -> Config {
    if cli.include_all {
        config.include_all = true;
    }
    if let Some(dir) = &cli.trace_dir {
        config.trace_dir = dir.into();
    }
    if let Some(size) = cli.max_body_size {
        config.max_body_size = size;
    }
    if cli.quiet {
        config.logging.level = "error".to_string();
    } else if cli.debug {
        config.logging.level = "trace".to_string();
    } else if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    config
}

/// Handle the `config` subcommand if present. Returns `true` if a command
/// was handled (the caller should exit without starting the coordinator).
pub fn handle_config_command(cli: &Cli) -> bool {
    let Some(Commands::Config {
        show,
        reset,
        edit,
        path,
    }) = &cli.command
    else {
        return false;
    };

    if *path {
        handle_path();
    } else if *show {
        handle_show();
    } else if *reset {
        handle_reset();
    } else if *edit {
        handle_edit();
    } else {
        println!("Usage: tracewrap config [--show|--reset|--edit|--path]");
    }
    true
}

fn handle_path() {
    match Config::config_path() {
        Some(path) => println!("{}", path.display()),
        None => {
            eprintln!("Error: could not determine config path");
            std::process::exit(1);
        }
    }
}

fn handle_show() {
    let config = Config::from_env();
    println!("# Effective configuration (defaults < file < CLI flags)");
    println!("{}", config.to_toml());
    if let Some(path) = Config::config_path() {
        if path.exists() {
            println!("# Source: {}", path.display());
        } else {
            println!("# Source: defaults (no config file)");
        }
    }
}

fn handle_reset() {
    let Some(path) = Config::config_path() else {
        eprintln!("Error: could not determine config path");
        std::process::exit(1);
    };

    if path.exists() {
        eprint!("Config file exists at {}. Overwrite? [y/N] ", path.display());
        std::io::stderr().flush().ok();
        let mut input = String::new();
        std::io::stdin().read_line(&mut input).ok();
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Aborted.");
            return;
        }
    }

    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            eprintln!("Error creating directory: {e}");
            std::process::exit(1);
        }
    }
    if let Err(e) = std::fs::write(&path, Config::default().to_toml()) {
        eprintln!("Error writing config: {e}");
        std::process::exit(1);
    }
    println!("Config reset to defaults: {}", path.display());
}

fn handle_edit() {
    let Some(path) = Config::config_path() else {
        eprintln!("Error: could not determine config path");
        std::process::exit(1);
    };
    if !path.exists() {
        Config::ensure_config_exists();
        println!("Created new config file: {}", path.display());
    }

    let editor = std::env::var("EDITOR")
        .or_else(|_| std::env::var("VISUAL"))
        .unwrap_or_else(|_| if cfg!(windows) { "notepad".into() } else { "nano".into() });

    println!("Opening {} with {}", path.display(), editor);
    match Command::new(&editor).arg(&path).status() {
        Ok(s) if s.success() => {}
        Ok(s) => {
            eprintln!("Editor exited with status: {s}");
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Failed to launch editor '{editor}': {e}");
            std::process::exit(1);
        }
    }
}
