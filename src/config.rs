//! Configuration management for the Aula server

use std::env;

use serde::Deserialize;
use thiserror::Error;

/// Configuration load error
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub sync: SyncConfig,
    pub claims: ClaimsConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Attempt budget for the optimistic read-resolve-write cycle
    pub max_write_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClaimsConfig {
    /// Interval between scheduled claims sweeps, in hours
    pub sweep_interval_hours: u64,
    /// Claims mirrors older than this are examined by the sweep, in hours
    pub max_age_hours: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Optional first-deploy admin token, consumed when the users table is empty
    pub bootstrap_token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            database: DatabaseConfig {
                url: "sqlite:./aula.db".to_string(),
            },
            sync: SyncConfig {
                max_write_attempts: 3,
            },
            claims: ClaimsConfig {
                sweep_interval_hours: 24,
                max_age_hours: 168,
            },
            auth: AuthConfig {
                bootstrap_token: None,
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_var("SERVER_PORT", 3000)?,
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:./aula.db".to_string()),
            },
            sync: SyncConfig {
                max_write_attempts: parse_var("SYNC_MAX_WRITE_ATTEMPTS", 3)?,
            },
            claims: ClaimsConfig {
                sweep_interval_hours: parse_var("CLAIMS_SWEEP_INTERVAL_HOURS", 24)?,
                max_age_hours: parse_var("CLAIMS_MAX_AGE_HOURS", 168)?,
            },
            auth: AuthConfig {
                bootstrap_token: env::var("AUTH_BOOTSTRAP_TOKEN").ok(),
            },
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value: raw }),
        Err(_) => Ok(default),
    }
}
