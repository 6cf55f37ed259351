use std::env;
use std::str::FromStr;

use anyhow::{anyhow, Result};

const DEFAULT_LOG_FILTER: &str = "lessonflow=info,tower_http=info,axum=info";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Without one the service runs on the in-memory store.
    pub database_url: Option<String>,
    pub port: u16,
    pub log_filter: String,
    pub max_body_bytes: usize,
    pub db_max_connections: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            port: 8081,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            max_body_bytes: 1024 * 1024,
            db_max_connections: 10,
        }
    }
}

impl Config {
    /// Reads the process environment. Call `dotenvy::dotenv()` first to pick up `.env`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            database_url: lookup("DATABASE_URL").filter(|s| !s.is_empty()),
            port: parse_or(&lookup, "PORT", defaults.port)?,
            log_filter: lookup("RUST_LOG").unwrap_or(defaults.log_filter),
            max_body_bytes: parse_or(&lookup, "MAX_BODY_BYTES", defaults.max_body_bytes)?,
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", defaults.db_max_connections)?,
        })
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow!("invalid value for {key}: {raw:?}")),
    }
}
