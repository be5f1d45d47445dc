//! Application configuration management.
//!
//! Configuration comes from environment variables, deserialized into a
//! type-safe struct with `envy`. A `.env` file is loaded first if present.

use std::time::Duration;

use serde::Deserialize;

use crate::services::transfer_engine::RetryPolicy;

/// Application configuration loaded from environment variables.
///
/// # Environment Variables
///
/// - `DATABASE_URL` (required): PostgreSQL connection string
/// - `SERVER_PORT` (optional): HTTP server port, defaults to 3000
/// - `DB_MAX_CONNECTIONS` (optional): pool size, defaults to 5
/// - `LOCK_TIMEOUT_MS` (optional): row-lock wait bound, defaults to 5000
/// - `TRANSFER_TIMEOUT_MS` (optional): deadline for one transfer, defaults to 10000
/// - `TRANSFER_MAX_ATTEMPTS` (optional): attempts per transfer on conflict, defaults to 3
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,

    #[serde(default = "default_port")]
    pub server_port: u16,

    #[serde(default = "default_max_connections")]
    pub db_max_connections: u32,

    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    #[serde(default = "default_transfer_timeout_ms")]
    pub transfer_timeout_ms: u64,

    #[serde(default = "default_transfer_max_attempts")]
    pub transfer_max_attempts: u32,
}

fn default_port() -> u16 {
    3000
}

fn default_max_connections() -> u32 {
    5
}

fn default_lock_timeout_ms() -> u64 {
    5_000
}

fn default_transfer_timeout_ms() -> u64 {
    10_000
}

fn default_transfer_max_attempts() -> u32 {
    3
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Required environment variables are missing (e.g., DATABASE_URL)
    /// - Environment variable values cannot be parsed into expected types
    pub fn from_env() -> Result<Self, envy::Error> {
        // Missing .env is fine
        dotenvy::dotenv().ok();

        envy::from_env::<Config>()
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.transfer_max_attempts.max(1),
            ..RetryPolicy::default()
        }
    }
}
