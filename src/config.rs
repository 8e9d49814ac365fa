//! Server Configuration
//!
//! Command-line flags, each also readable from a `BINEXPIRE_*` environment
//! variable. The library itself only sees the [`AccessPolicy`] and
//! [`SweepConfig`] derived from them.

use crate::expire::{AccessPolicy, SweepConfig};
use clap::Parser;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(name = "binexpire")]
#[command(about = "RESP server for records whose bins expire individually")]
#[command(version)]
pub struct Config {
    /// Host to bind to
    #[arg(long, env = "BINEXPIRE_HOST", default_value = crate::DEFAULT_HOST)]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "BINEXPIRE_PORT", default_value_t = crate::DEFAULT_PORT)]
    pub port: u16,

    /// Time budget for one operation, in milliseconds
    #[arg(long, env = "BINEXPIRE_TIMEOUT_MS", default_value_t = 1000)]
    pub timeout_ms: u64,

    /// Extra attempts after a write conflict
    #[arg(long, env = "BINEXPIRE_MAX_RETRIES", default_value_t = 8)]
    pub max_retries: u32,

    /// Drop expired bins whenever a record is written
    #[arg(
        long,
        env = "BINEXPIRE_RECLAIM_ON_WRITE",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub reclaim_on_write: bool,

    /// Collections swept in the background (repeat or comma-separate)
    #[arg(long = "sweep", env = "BINEXPIRE_SWEEP", value_delimiter = ',')]
    pub sweep_collections: Vec<String>,

    /// Sweep interval before the first round, in milliseconds
    #[arg(long, env = "BINEXPIRE_SWEEP_INTERVAL_MS", default_value_t = 1000)]
    pub sweep_interval_ms: u64,

    /// Fastest sweep interval, in milliseconds
    #[arg(long, env = "BINEXPIRE_SWEEP_MIN_MS", default_value_t = 100)]
    pub sweep_min_ms: u64,

    /// Slowest sweep interval, in milliseconds
    #[arg(long, env = "BINEXPIRE_SWEEP_MAX_MS", default_value_t = 60_000)]
    pub sweep_max_ms: u64,

    /// Log level, used when RUST_LOG is not set
    #[arg(long, env = "BINEXPIRE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Address for the TCP listener.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn access_policy(&self) -> AccessPolicy {
        AccessPolicy {
            timeout: Duration::from_millis(self.timeout_ms),
            max_retries: self.max_retries,
            reclaim_on_write: self.reclaim_on_write,
        }
    }

    /// Sweep pacing; the bounds are reordered if given backwards.
    pub fn sweep_config(&self) -> SweepConfig {
        let min = Duration::from_millis(self.sweep_min_ms.min(self.sweep_max_ms));
        let max = Duration::from_millis(self.sweep_min_ms.max(self.sweep_max_ms));

        SweepConfig {
            base_interval: Duration::from_millis(self.sweep_interval_ms).clamp(min, max),
            min_interval: min,
            max_interval: max,
            ..SweepConfig::default()
        }
    }
}
