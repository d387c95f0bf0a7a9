use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::FixedOffset;

use crate::auth::Credentials;

/// Certificate and key for TLS on the wire port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Server settings, read from `COVERS_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub credentials: Credentials,
    pub max_connections: usize,
    /// WAL appends since the last compaction that trigger a new one.
    pub compact_threshold: u64,
    /// Restaurant-local time, used for same-day cutoffs.
    pub utc_offset: FixedOffset,
    pub metrics_port: Option<u16>,
    pub tls: Option<TlsFiles>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name}: invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
    #[error("both COVERS_TLS_CERT and COVERS_TLS_KEY must be set, or neither")]
    PartialTls,
}

impl Config {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let offset_minutes: i32 = parsed(&get, "COVERS_UTC_OFFSET_MINUTES", 0)?;
        let utc_offset = offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| ConfigError::Invalid {
                name: "COVERS_UTC_OFFSET_MINUTES",
                value: offset_minutes.to_string(),
                reason: "offset must be within a day".into(),
            })?;

        let tls = match (get("COVERS_TLS_CERT"), get("COVERS_TLS_KEY")) {
            (None, None) => None,
            (Some(cert), Some(key)) => Some(TlsFiles {
                cert: cert.into(),
                key: key.into(),
            }),
            _ => return Err(ConfigError::PartialTls),
        };

        let metrics_port = match get("COVERS_METRICS_PORT") {
            None => None,
            Some(raw) => Some(parse_value("COVERS_METRICS_PORT", &raw)?),
        };

        Ok(Self {
            bind: get("COVERS_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parsed(&get, "COVERS_PORT", 5433)?,
            data_dir: get("COVERS_DATA_DIR").unwrap_or_else(|| "./data".into()).into(),
            credentials: Credentials {
                user: get("COVERS_USER").unwrap_or_else(|| "covers".into()),
                password: get("COVERS_PASSWORD").unwrap_or_else(|| "covers".into()),
            },
            max_connections: positive("COVERS_MAX_CONNECTIONS", parsed(&get, "COVERS_MAX_CONNECTIONS", 256)?)?,
            compact_threshold: positive(
                "COVERS_COMPACT_THRESHOLD",
                parsed(&get, "COVERS_COMPACT_THRESHOLD", 1000)?,
            )?,
            utc_offset,
            metrics_port,
            tls,
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parse_value<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn parsed<T>(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match get(name) {
        Some(raw) => parse_value(name, &raw),
        None => Ok(default),
    }
}

fn positive<T: Default + PartialEq + Display>(name: &'static str, value: T) -> Result<T, ConfigError> {
    if value == T::default() {
        return Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
            reason: "must be greater than zero".into(),
        });
    }
    Ok(value)
}
