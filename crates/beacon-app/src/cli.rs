//! CLI argument definitions for the Beacon simulator.
//!
//! Uses `clap` with derive macros for ergonomic argument parsing.
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::Parser;
use std::path::PathBuf;

/// Beacon: drives the telemetry buffer with simulated producers and
/// harvests it on an interval.
#[derive(Parser, Debug)]
#[command(name = "beacon", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// SQLite database for persistent attributes and events.
    #[arg(short = 'd', long = "database")]
    pub database: Option<PathBuf>,

    /// Keep all state in memory instead of SQLite.
    #[arg(long = "in-memory")]
    pub in_memory: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    /// Number of concurrent producer threads.
    #[arg(short = 'p', long = "producers", default_value_t = 4)]
    pub producers: usize,

    /// Events recorded by each producer.
    #[arg(short = 'n', long = "events-per-producer", default_value_t = 500)]
    pub events_per_producer: usize,

    /// Seconds between harvests; overrides the config file.
    #[arg(long = "harvest-interval")]
    pub harvest_interval_secs: Option<u64>,

    /// Stop after this many seconds even if producers are still running.
    #[arg(long = "duration")]
    pub duration_secs: Option<u64>,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > BEACON_CONFIG env var > platform default (~/.beacon/config.toml).
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("BEACON_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the database path.
    ///
    /// Priority: --database flag > config file value, with `~` expanded.
    pub fn resolve_database_path(&self, config_path: &str) -> PathBuf {
        match &self.database {
            Some(p) => p.clone(),
            None => expand_home(config_path),
        }
    }

    /// Resolve the log level.
    ///
    /// Priority: --log-level flag > config file value.
    pub fn resolve_log_level(&self, config_level: &str) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config_level.to_string())
    }

    /// Resolve the harvest interval, never below one second.
    ///
    /// Priority: --harvest-interval flag > config file value.
    pub fn resolve_harvest_interval(&self, config_secs: u64) -> u64 {
        self.harvest_interval_secs.unwrap_or(config_secs).max(1)
    }
}

fn home_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    let home = std::env::var("USERPROFILE");
    #[cfg(not(target_os = "windows"))]
    let home = std::env::var("HOME");
    home.ok().map(PathBuf::from)
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    match home_dir() {
        Some(home) => home.join(".beacon").join("config.toml"),
        None => PathBuf::from("config.toml"),
    }
}

/// Expand a leading `~` to the home directory.
fn expand_home(path: &str) -> PathBuf {
    if path.starts_with("~/") || path.starts_with("~\\") {
        let home = home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(&path[2..])
    } else {
        PathBuf::from(path)
    }
}
