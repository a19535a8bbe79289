use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::engine::ExpiryPolicy;
use crate::limits::{MAX_RETENTION_MINUTES, MAX_TTL_MINUTES};

/// Runtime settings, read from `MOORAGE_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub lock_grace_minutes: u32,
    pub booking_retention_minutes: u32,
    pub sweep_interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid value for {}: {:?}", self.var, self.value)
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let lock_grace_minutes = parse(&lookup, "MOORAGE_LOCK_GRACE_MINUTES", 15)?;
        if lock_grace_minutes > MAX_TTL_MINUTES {
            return Err(invalid(&lookup, "MOORAGE_LOCK_GRACE_MINUTES"));
        }
        let booking_retention_minutes = parse(&lookup, "MOORAGE_BOOKING_RETENTION_MINUTES", 15)?;
        if booking_retention_minutes > MAX_RETENTION_MINUTES {
            return Err(invalid(&lookup, "MOORAGE_BOOKING_RETENTION_MINUTES"));
        }
        let sweep_secs: u64 = parse(&lookup, "MOORAGE_SWEEP_INTERVAL_SECS", 5)?;
        if sweep_secs == 0 {
            return Err(invalid(&lookup, "MOORAGE_SWEEP_INTERVAL_SECS"));
        }
        let max_connections = parse(&lookup, "MOORAGE_MAX_CONNECTIONS", 256)?;
        if max_connections == 0 {
            return Err(invalid(&lookup, "MOORAGE_MAX_CONNECTIONS"));
        }
        let metrics_port = match lookup("MOORAGE_METRICS_PORT") {
            Some(v) => Some(
                v.parse()
                    .map_err(|_| ConfigError { var: "MOORAGE_METRICS_PORT", value: v })?,
            ),
            None => None,
        };

        Ok(Self {
            bind: lookup("MOORAGE_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse(&lookup, "MOORAGE_PORT", 7433)?,
            data_dir: lookup("MOORAGE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            max_connections,
            compact_threshold: parse(&lookup, "MOORAGE_COMPACT_THRESHOLD", 1000)?,
            metrics_port,
            lock_grace_minutes,
            booking_retention_minutes,
            sweep_interval: Duration::from_secs(sweep_secs),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("moorage.wal")
    }

    pub fn expiry_policy(&self) -> ExpiryPolicy {
        ExpiryPolicy {
            lock_grace_minutes: self.lock_grace_minutes,
            booking_retention_minutes: self.booking_retention_minutes,
        }
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var) {
        Some(value) => value.parse().map_err(|_| ConfigError { var, value }),
        None => Ok(default),
    }
}

fn invalid(lookup: &impl Fn(&str) -> Option<String>, var: &'static str) -> ConfigError {
    ConfigError {
        var,
        value: lookup(var).unwrap_or_default(),
    }
}
