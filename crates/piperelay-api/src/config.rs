//! Configuration for the PipeRelay service.
//!
//! Loaded in priority order: environment variables (prefixed
//! `PIPERELAY_`), then `piperelay.toml`, then built-in defaults. The
//! service runs out of the box with production-ready defaults.

use std::{net::SocketAddr, str::FromStr, time::Duration};

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use piperelay_delivery::{PoolConfig, RetryPolicy};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "piperelay.toml";

/// Complete service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Server
    /// Server bind address.
    #[serde(default = "default_host")]
    pub host: String,
    /// Server bind port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Inbound HTTP request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    // Storage
    /// Path of the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    // Delivery
    /// Maximum concurrent in-flight deliveries.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Due-queue poll interval in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Per-send timeout in seconds.
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
    /// Shutdown grace for in-flight deliveries in seconds.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,

    // Retry
    /// Maximum attempts per delivery, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay schedule between attempts, in seconds, non-decreasing.
    #[serde(default = "default_retry_schedule_secs")]
    pub retry_schedule_secs: Vec<u64>,

    // Logging
    /// Tracing filter directive, e.g. `info,piperelay=debug`.
    #[serde(default = "default_log_filter")]
    pub rust_log: String,
}

impl Config {
    /// Loads configuration from defaults, `piperelay.toml`, and
    /// `PIPERELAY_`-prefixed environment variables.
    ///
    /// # Errors
    ///
    /// Returns error if extraction or validation fails.
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed("PIPERELAY_"));

        let config: Self = figment.extract().context("failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Converts to the delivery pool's configuration.
    pub fn to_pool_config(&self) -> PoolConfig {
        PoolConfig {
            workers: self.workers,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            send_timeout: Duration::from_secs(self.send_timeout_secs),
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                schedule: self.retry_schedule_secs.iter().copied().map(Duration::from_secs).collect(),
            },
        }
    }

    /// Parses the server socket address from host and port.
    ///
    /// # Errors
    ///
    /// Returns error if host/port do not form a valid socket address.
    pub fn server_addr(&self) -> Result<SocketAddr> {
        SocketAddr::from_str(&format!("{}:{}", self.host, self.port))
            .context("invalid server address")
    }

    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("port must be greater than 0");
        }
        if self.workers == 0 {
            anyhow::bail!("workers must be greater than 0");
        }
        if self.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be greater than 0");
        }
        if self.max_attempts == 0 {
            anyhow::bail!("max_attempts must be greater than 0");
        }
        if self.retry_schedule_secs.windows(2).any(|pair| pair[0] > pair[1]) {
            anyhow::bail!("retry_schedule_secs must be non-decreasing");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            database_path: default_database_path(),
            workers: default_workers(),
            poll_interval_ms: default_poll_interval_ms(),
            send_timeout_secs: default_send_timeout(),
            shutdown_grace_secs: default_shutdown_grace(),
            max_attempts: default_max_attempts(),
            retry_schedule_secs: default_retry_schedule_secs(),
            rust_log: default_log_filter(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    30
}

fn default_database_path() -> String {
    "./data/piperelay.db".to_string()
}

fn default_workers() -> usize {
    50
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_send_timeout() -> u64 {
    30
}

fn default_shutdown_grace() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    8
}

fn default_retry_schedule_secs() -> Vec<u64> {
    vec![30, 120, 600, 1800, 7200, 28_800, 86_400]
}

fn default_log_filter() -> String {
    "info".to_string()
}
