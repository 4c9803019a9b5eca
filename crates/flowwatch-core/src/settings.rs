use clap::{CommandFactory, Parser};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{FlowwatchError, Result};

// ── Settings (CLI) ─────────────────────────────────────────────────────────────

/// Live session client for a network intrusion-detection service
#[derive(Parser, Debug, Clone)]
#[command(
    name = "flowwatch",
    about = "Live session client for a network intrusion-detection service",
    version
)]
pub struct Settings {
    /// What to do
    #[arg(long, default_value = "watch", value_parser = ["watch", "status", "start", "stop", "interface", "history", "stats", "predict"])]
    pub command: String,

    /// Base URL of the classification service
    #[arg(long, default_value = "http://localhost:8000")]
    pub server_url: String,

    /// Push channel URL (derived from the server URL if not specified)
    #[arg(long)]
    pub ws_url: Option<String>,

    /// Interface name for the `interface` command
    #[arg(long)]
    pub interface: Option<String>,

    /// Flow JSON for the `predict` command
    #[arg(long)]
    pub flow: Option<String>,

    /// Flows to show: all, attacks, or one attack type
    #[arg(long, default_value = "all")]
    pub filter: String,

    /// Number of history records to load (1-2000)
    #[arg(long, default_value = "1000", value_parser = clap::value_parser!(u32).range(1..=2000))]
    pub history_limit: u32,

    /// Seconds between push-channel reconnect attempts (1-60)
    #[arg(long, default_value = "3", value_parser = clap::value_parser!(u64).range(1..=60))]
    pub reconnect_delay: u64,

    /// Seconds between status polls while capture is running (1-60)
    #[arg(long, default_value = "3", value_parser = clap::value_parser!(u64).range(1..=60))]
    pub poll_interval: u64,

    /// Milliseconds to wait after a start before confirming it
    #[arg(long, default_value = "1000")]
    pub settle_ms: u64,

    /// Milliseconds to wait around an interface switch
    #[arg(long, default_value = "500")]
    pub interface_settle_ms: u64,

    /// Seconds between stats summaries in watch mode (1-3600)
    #[arg(long, default_value = "10", value_parser = clap::value_parser!(u32).range(1..=3600))]
    pub stats_interval: u32,

    /// Logging level
    #[arg(long, default_value = "INFO", value_parser = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"])]
    pub log_level: String,

    /// Log file path
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Clear saved configuration
    #[arg(long)]
    pub clear: bool,
}

// ── LastUsedParams ─────────────────────────────────────────────────────────────

/// Persisted last-used parameters saved to `~/.flowwatch/last_used.json`.
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct LastUsedParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ws_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats_interval: Option<u32>,
}

impl LastUsedParams {
    /// Return the default path to the persisted config file.
    /// Uses `~/.flowwatch/last_used.json`.
    pub fn config_path() -> PathBuf {
        Self::config_path_in(&dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
    }

    /// Return the config path rooted at `base_dir` (used for testing).
    pub fn config_path_in(base_dir: &std::path::Path) -> PathBuf {
        base_dir.join(".flowwatch").join("last_used.json")
    }

    /// Load persisted params from the default path.
    /// Returns `Default` when the file is absent or cannot be parsed.
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Load persisted params from an explicit path.
    pub fn load_from(path: &std::path::Path) -> Self {
        let Ok(content) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        serde_json::from_str(&content).unwrap_or_default()
    }

    /// Atomically write params to the default path.
    pub fn save(&self) -> std::result::Result<(), std::io::Error> {
        self.save_to(&Self::config_path())
    }

    /// Atomically write params to an explicit path, creating parent
    /// directories if needed.
    pub fn save_to(&self, path: &std::path::Path) -> std::result::Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &json)?;
        std::fs::rename(&tmp, path)?;

        Ok(())
    }

    /// Delete the config file at an explicit path if it exists.
    pub fn clear_at(path: &std::path::Path) -> std::result::Result<(), std::io::Error> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

// ── Settings impl ──────────────────────────────────────────────────────────────

impl Settings {
    /// Parse CLI arguments, merge with last-used params where no explicit CLI
    /// value was provided, and persist the result.
    pub fn load_with_last_used() -> Self {
        Self::load_with_last_used_impl(
            std::env::args_os().collect(),
            &LastUsedParams::config_path(),
        )
    }

    /// Full implementation; accepts args and an explicit config path so that
    /// tests can redirect to a temporary directory.
    pub fn load_with_last_used_impl(
        args: Vec<std::ffi::OsString>,
        config_path: &std::path::Path,
    ) -> Self {
        let matches = Settings::command().get_matches_from(args.clone());
        let mut settings = Settings::parse_from(args);

        if settings.clear {
            if let Err(e) = LastUsedParams::clear_at(config_path) {
                tracing::warn!(error = %e, "could not clear saved configuration");
            }
            return Self::apply_debug(settings);
        }

        let last = LastUsedParams::load_from(config_path);

        // CLI always wins over persisted values.
        if !is_arg_explicitly_set(&matches, "server_url") {
            if let Some(v) = last.server_url {
                settings.server_url = v;
            }
        }
        if !is_arg_explicitly_set(&matches, "ws_url") && settings.ws_url.is_none() {
            settings.ws_url = last.ws_url;
        }
        if !is_arg_explicitly_set(&matches, "history_limit") {
            if let Some(v) = last.history_limit {
                settings.history_limit = v;
            }
        }
        if !is_arg_explicitly_set(&matches, "poll_interval") {
            if let Some(v) = last.poll_interval {
                settings.poll_interval = v;
            }
        }
        if !is_arg_explicitly_set(&matches, "stats_interval") {
            if let Some(v) = last.stats_interval {
                settings.stats_interval = v;
            }
        }

        settings = Self::apply_debug(settings);

        let params = LastUsedParams::from(&settings);
        if let Err(e) = params.save_to(config_path) {
            tracing::debug!(error = %e, "could not persist last-used parameters");
        }

        settings
    }

    /// Check values clap cannot validate on its own.
    pub fn validate(&self) -> Result<()> {
        if !(self.server_url.starts_with("http://") || self.server_url.starts_with("https://")) {
            return Err(FlowwatchError::Config(format!(
                "server URL must start with http:// or https://, got {}",
                self.server_url
            )));
        }
        if let Some(ws) = &self.ws_url {
            if !(ws.starts_with("ws://") || ws.starts_with("wss://")) {
                return Err(FlowwatchError::Config(format!(
                    "push channel URL must start with ws:// or wss://, got {}",
                    ws
                )));
            }
        }
        if self.command == "interface" && self.interface.is_none() {
            return Err(FlowwatchError::Config(
                "the interface command needs --interface <name>".to_string(),
            ));
        }
        if self.command == "predict" && self.flow.is_none() {
            return Err(FlowwatchError::Config(
                "the predict command needs --flow <json>".to_string(),
            ));
        }
        Ok(())
    }

    /// Server URL without a trailing slash.
    pub fn base_url(&self) -> String {
        self.server_url.trim_end_matches('/').to_string()
    }

    /// Push channel URL: `--ws-url` if given, else `<server>/api/live` with
    /// the scheme switched to `ws` / `wss`.
    pub fn push_url(&self) -> String {
        if let Some(ws) = &self.ws_url {
            return ws.clone();
        }
        let base = self.base_url();
        let switched = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base
        };
        format!("{}/api/live", switched)
    }

    /// `--debug` overrides the log level.
    fn apply_debug(mut settings: Settings) -> Settings {
        if settings.debug {
            settings.log_level = "DEBUG".to_string();
        }
        settings
    }
}

// ── Conversion ─────────────────────────────────────────────────────────────────

impl From<&Settings> for LastUsedParams {
    fn from(s: &Settings) -> Self {
        LastUsedParams {
            server_url: Some(s.server_url.clone()),
            ws_url: s.ws_url.clone(),
            history_limit: Some(s.history_limit),
            poll_interval: Some(s.poll_interval),
            stats_interval: Some(s.stats_interval),
        }
    }
}

/// Returns `true` when `name` was supplied explicitly on the command line
/// (not via default value or environment variable).
fn is_arg_explicitly_set(matches: &clap::ArgMatches, name: &str) -> bool {
    matches.value_source(name) == Some(clap::parser::ValueSource::CommandLine)
}

// ── Tests ──────────────────────────────────────────────────────────────────────
