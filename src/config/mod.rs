//! Configuration for the wrapper.
//!
//! Loaded in order of precedence: defaults, then a TOML file, then CLI
//! flags (applied by the caller in `main` after `from_env()`, since `clap`
//! owns argv parsing). `FileConfig` is a parallel all-`Option` struct
//! deserialized from TOML; a config file that exists but fails to parse is
//! a fatal, actionable error rather than a silent fallback to defaults.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::WrapError;

#[cfg(test)]
mod tests;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default cap on captured request/response/stdio bodies, in bytes.
pub const DEFAULT_MAX_BODY_SIZE: usize = 1_048_576;

/// Application configuration: the merged result of defaults, file, and CLI
/// flags.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Loopback host the proxy binds to.
    pub proxy_host: String,
    /// Proxy port. `0` lets the OS choose; resolved at `start()`.
    pub proxy_port: u16,
    /// Root directory under which `sessions/<id>/` is created.
    pub trace_dir: PathBuf,
    /// Capture non-provider traffic too.
    pub include_all: bool,
    /// Byte cap on any single captured body.
    pub max_body_size: usize,
    /// Redact emails/IPv4/phone numbers in addition to the always-on tiers.
    pub high_security: bool,
    /// Path to the wrapped binary, or a bare name to search PATH for.
    pub wrapped_binary: String,
    pub logging: LoggingConfig,
    /// Command used to invoke the external HTML renderer.
    pub renderer_command: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub to_file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            to_file: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            proxy_host: "127.0.0.1".to_string(),
            proxy_port: 0,
            trace_dir: PathBuf::from(".opencode-trace"),
            include_all: false,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            high_security: false,
            wrapped_binary: "opencode".to_string(),
            logging: LoggingConfig::default(),
            renderer_command: "tracewrap-render".to_string(),
        }
    }
}

/// Config file structure (subset of `Config` that makes sense to persist).
#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileConfig {
    pub proxy_host: Option<String>,
    pub proxy_port: Option<u16>,
    pub trace_dir: Option<String>,
    pub include_all: Option<bool>,
    pub max_body_size: Option<usize>,
    pub high_security: Option<bool>,
    pub wrapped_binary: Option<String>,
    pub renderer_command: Option<String>,
    pub logging: Option<FileLoggingConfig>,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileLoggingConfig {
    pub level: Option<String>,
    pub to_file: Option<bool>,
}

impl Config {
    /// `~/.config/tracewrap/config.toml`, falling back through the
    /// precedence list (cwd, user config dir) when home can't be resolved.
    pub fn config_path() -> Option<PathBuf> {
        dirs::home_dir()
            .map(|p| p.join(".config").join("tracewrap").join("config.toml"))
            .or_else(|| {
                dirs::config_dir().map(|p| p.join("tracewrap").join("config.toml"))
            })
            .or_else(|| std::env::current_dir().ok().map(|p| p.join("tracewrap.toml")))
    }

    pub fn ensure_config_exists() {
        let Some(path) = Self::config_path() else {
            return;
        };
        if path.exists() {
            return;
        }
        if let Some(parent) = path.parent() {
            if std::fs::create_dir_all(parent).is_err() {
                return;
            }
        }
        let _ = std::fs::write(&path, Self::default().to_toml());
    }

    /// Load the file config if present. Panics with an actionable message
    /// if the file exists but fails to parse — a broken config should fail
    /// fast, not silently fall back to defaults while the user debugs the
    /// wrong thing.
    fn load_file_config() -> FileConfig {
        let Some(path) = Self::config_path() else {
            return FileConfig::default();
        };
        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(cfg) => cfg,
                Err(e) => {
                    eprintln!("\nCONFIG ERROR - failed to parse configuration file\n");
                    eprintln!("  File: {}\n", path.display());
                    eprintln!("  Error: {e}\n");
                    eprintln!("  Tip: check for missing quotes, invalid booleans, or typos in section names.\n");
                    eprintln!("  To reset, delete the file and restart tracewrap.\n");
                    std::process::exit(1);
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => FileConfig::default(),
            Err(e) => {
                eprintln!("\nCONFIG ERROR - cannot read configuration file\n");
                eprintln!("  File: {}\n", path.display());
                eprintln!("  Error: {e}\n");
                std::process::exit(1);
            }
        }
    }

    /// Merge defaults and the file layer. CLI flags are applied afterward
    /// by the caller (`main`), since `clap` owns argv parsing and only it
    /// knows which flags were explicitly passed.
    pub fn from_env() -> Self {
        let file = Self::load_file_config();
        let defaults = Self::default();

        let logging = LoggingConfig {
            level: file
                .logging
                .as_ref()
                .and_then(|l| l.level.clone())
                .unwrap_or(defaults.logging.level),
            to_file: file
                .logging
                .as_ref()
                .and_then(|l| l.to_file)
                .unwrap_or(defaults.logging.to_file),
        };

        Self {
            proxy_host: file.proxy_host.unwrap_or(defaults.proxy_host),
            proxy_port: file.proxy_port.unwrap_or(defaults.proxy_port),
            trace_dir: file
                .trace_dir
                .map(PathBuf::from)
                .unwrap_or(defaults.trace_dir),
            include_all: file.include_all.unwrap_or(defaults.include_all),
            max_body_size: file.max_body_size.unwrap_or(defaults.max_body_size),
            high_security: file.high_security.unwrap_or(defaults.high_security),
            wrapped_binary: file.wrapped_binary.unwrap_or(defaults.wrapped_binary),
            renderer_command: file.renderer_command.unwrap_or(defaults.renderer_command),
            logging,
        }
    }

    pub fn to_toml(&self) -> String {
        format!(
            "# tracewrap configuration\n\
             proxy_host = {:?}\n\
             proxy_port = {}\n\
             trace_dir = {:?}\n\
             include_all = {}\n\
             max_body_size = {}\n\
             high_security = {}\n\
             wrapped_binary = {:?}\n\
             renderer_command = {:?}\n\
             \n\
             [logging]\n\
             level = {:?}\n\
             to_file = {}\n",
            self.proxy_host,
            self.proxy_port,
            self.trace_dir.display().to_string(),
            self.include_all,
            self.max_body_size,
            self.high_security,
            self.wrapped_binary,
            self.renderer_command,
            self.logging.level,
            self.logging.to_file,
        )
    }

    /// Validate the merged config (§12): runs after the three sources are
    /// merged and before the coordinator starts.
    pub fn validate(&self) -> Result<(), WrapError> {
        if self.max_body_size == 0 {
            return Err(WrapError::Configuration(
                "max_body_size must be greater than 0".to_string(),
            ));
        }
        if self.wrapped_binary.trim().is_empty() {
            return Err(WrapError::Configuration(
                "wrapped_binary must not be empty".to_string(),
            ));
        }
        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(WrapError::Configuration(format!(
                    "invalid logging level {other:?}"
                )))
            }
        }
        Ok(())
    }
}
