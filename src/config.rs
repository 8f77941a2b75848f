use std::path::PathBuf;
use std::str::FromStr;

use chrono::NaiveTime;
use thiserror::Error;

use crate::auth::Passwords;
use crate::engine::CapacityPolicy;
use crate::limits::*;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var}: cannot parse '{value}'")]
    Invalid { var: &'static str, value: String },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Server settings, read once from `RESERVD_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub passwords: Passwords,
    pub max_connections: usize,
    pub compact_threshold: u64,
    /// Local time of day the completion sweep fires.
    pub sweep_at: NaiveTime,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub policy: CapacityPolicy,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source. `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let text = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        let policy = CapacityPolicy {
            slot_ceiling: parse_or(&lookup, "RESERVD_SLOT_CEILING", DEFAULT_SLOT_CEILING)?,
            day_ceiling: parse_or(&lookup, "RESERVD_DAY_CEILING", DEFAULT_DAY_CEILING)?,
            admission_ceiling: parse_or(&lookup, "RESERVD_ADMISSION_CEILING", DEFAULT_ADMISSION_CEILING)?,
        };
        for (name, value) in [
            ("RESERVD_SLOT_CEILING", policy.slot_ceiling),
            ("RESERVD_DAY_CEILING", policy.day_ceiling),
            ("RESERVD_ADMISSION_CEILING", policy.admission_ceiling),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }

        let max_connections = parse_or(&lookup, "RESERVD_MAX_CONNECTIONS", 256usize)?;
        if max_connections == 0 {
            return Err(ConfigError::Zero("RESERVD_MAX_CONNECTIONS"));
        }

        let sweep_at = match lookup("RESERVD_SWEEP_AT") {
            None => NaiveTime::MIN,
            Some(value) => parse_time_of_day(&value).ok_or(ConfigError::Invalid {
                var: "RESERVD_SWEEP_AT",
                value,
            })?,
        };

        Ok(Self {
            bind: text("RESERVD_BIND", "0.0.0.0"),
            port: parse_or(&lookup, "RESERVD_PORT", 5433)?,
            data_dir: PathBuf::from(text("RESERVD_DATA_DIR", "./data")),
            passwords: Passwords {
                admin: text("RESERVD_ADMIN_PASSWORD", "admin"),
                editor: text("RESERVD_EDITOR_PASSWORD", "editor"),
                user: text("RESERVD_PASSWORD", "reservd"),
            },
            max_connections,
            compact_threshold: parse_or(&lookup, "RESERVD_COMPACT_THRESHOLD", 1000)?,
            sweep_at,
            metrics_port: parse_opt(&lookup, "RESERVD_METRICS_PORT")?,
            tls_cert: lookup("RESERVD_TLS_CERT"),
            tls_key: lookup("RESERVD_TLS_KEY"),
            policy,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("reservations.wal")
    }
}

fn parse_opt<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => match value.trim().parse() {
            Ok(v) => Ok(Some(v)),
            Err(_) => Err(ConfigError::Invalid { var, value }),
        },
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    Ok(parse_opt(lookup, var)?.unwrap_or(default))
}

/// `HH:MM` or `HH:MM:SS`.
fn parse_time_of_day(value: &str) -> Option<NaiveTime> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .ok()
}
