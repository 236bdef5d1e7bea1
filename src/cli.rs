//! Command-line interface

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::config::humantime_serde::parse_duration;

/// In-memory request cache with TTL expiry and in-flight de-duplication
#[derive(Parser, Debug)]
#[command(name = "fetch-cache")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "FETCH_CACHE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "FETCH_CACHE_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "FETCH_CACHE_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch a URL repeatedly through the cache and report statistics
    Probe {
        /// URL to GET
        #[arg(required = true)]
        url: String,

        /// Concurrent requests per round
        #[arg(short = 'n', long, default_value_t = 8)]
        concurrency: usize,

        /// Number of rounds
        #[arg(short, long, default_value_t = 3)]
        rounds: usize,

        /// Pause between rounds (e.g. "500ms", "2s")
        #[arg(short, long, default_value = "1s", value_parser = parse_duration_arg)]
        interval: Duration,

        /// TTL for the cached response (defaults to `cache.default_ttl`)
        #[arg(long, value_parser = parse_duration_arg)]
        ttl: Option<Duration>,
    },

    /// Print the effective configuration as YAML
    Config,
}

fn parse_duration_arg(s: &str) -> Result<Duration, String> {
    parse_duration(s).map_err(|e| format!("invalid duration {s:?}: {e}"))
}
