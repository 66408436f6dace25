use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

/// Runtime configuration, read once at startup. Every knob has a default so
/// a bare `cargo run` works.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (`BIND_ADDR`).
    pub bind: SocketAddr,
    /// Per-guess ceiling on the sports-data lookup (`LOOKUP_TIMEOUT_SECS`).
    pub lookup_timeout: Duration,
    /// Sessions idle longer than this are reaped (`SESSION_MAX_IDLE_SECS`).
    pub session_max_idle: Duration,
    /// How often the reaper sweeps (`REAP_INTERVAL_SECS`).
    pub reap_interval: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value}")]
    Invalid { var: &'static str, value: String },
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            bind: parse_var("BIND_ADDR", "0.0.0.0:3000")?,
            lookup_timeout: Duration::from_secs(parse_var("LOOKUP_TIMEOUT_SECS", "5")?),
            session_max_idle: Duration::from_secs(parse_var("SESSION_MAX_IDLE_SECS", "3600")?),
            reap_interval: Duration::from_secs(parse_var("REAP_INTERVAL_SECS", "60")?),
        })
    }
}

fn parse_var<T: std::str::FromStr>(var: &'static str, default: &str) -> Result<T, ConfigError> {
    let value = env::var(var).unwrap_or_else(|_| default.to_string());
    value.parse().map_err(|_| ConfigError::Invalid { var, value })
}
