//! Service configuration from environment variables.
//!
//! Recognized variables:
//! - STORE_PROJECT_ID: store scope name; the SQLite database file is
//!   `<DATA_DIR>/<STORE_PROJECT_ID>.db`. Required for the sqlite backend.
//! - DATA_DIR: directory for the database file. Default: ./data
//! - STORE_BACKEND: `sqlite` (default) or `memory`.
//! - PORT: listen port. Default: 8080
//! - SERVICE_NAME: label stamped on startup logs. Default: specflow
//! - AUTH_MODE: `token` (default), `identity_token`, or `none`.
//! - PUBSUB_VERIFICATION_TOKEN: shared secret for token mode.
//! - PUBSUB_EXPECTED_AUDIENCE / PUBSUB_EXPECTED_ISSUER /
//!   PUBSUB_SERVICE_ACCOUNT_EMAIL: identity_token mode expectations.
//! - EXECUTION_ENABLED: `false` disables the execution trigger. Default: true
//! - EXECUTION_ENDPOINT: fleet URL; unset means log-only triggers.
//! - LOG_LEVEL: tracing filter string. Default: info

use std::path::PathBuf;

use anyhow::{Result, bail};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackendKind {
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Token,
    IdentityToken,
    Disabled,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub store_project_id: String,
    pub data_dir: PathBuf,
    pub store_backend: StoreBackendKind,
    pub port: u16,
    pub service_name: String,
    pub auth_mode: AuthMode,
    pub verification_token: String,
    pub expected_audience: String,
    pub expected_issuer: String,
    pub expected_service_account_email: String,
    pub execution_enabled: bool,
    pub execution_endpoint: Option<String>,
    pub log_level: String,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let store_backend = match env_or("STORE_BACKEND", "sqlite").as_str() {
            "sqlite" => StoreBackendKind::Sqlite,
            "memory" => StoreBackendKind::Memory,
            other => bail!("STORE_BACKEND must be 'sqlite' or 'memory', got {other:?}"),
        };

        let store_project_id = env_or("STORE_PROJECT_ID", "");
        if store_project_id.is_empty() && store_backend == StoreBackendKind::Sqlite {
            bail!("STORE_PROJECT_ID is not set; it names the store scope and is required");
        }

        let port: u16 = env_or("PORT", "8080")
            .parse()
            .map_err(|_| anyhow::anyhow!("PORT must be a number in 1..=65535"))?;

        let auth_mode = match env_or("AUTH_MODE", "token").as_str() {
            "token" => AuthMode::Token,
            "identity_token" => AuthMode::IdentityToken,
            "none" => AuthMode::Disabled,
            other => bail!("AUTH_MODE must be 'token', 'identity_token', or 'none', got {other:?}"),
        };

        let execution_enabled = match env_or("EXECUTION_ENABLED", "true").as_str() {
            "true" | "1" => true,
            "false" | "0" => false,
            other => bail!("EXECUTION_ENABLED must be true or false, got {other:?}"),
        };

        let execution_endpoint = std::env::var("EXECUTION_ENDPOINT")
            .ok()
            .filter(|endpoint| !endpoint.is_empty());

        Ok(Self {
            store_project_id,
            data_dir: PathBuf::from(env_or("DATA_DIR", "./data")),
            store_backend,
            port,
            service_name: env_or("SERVICE_NAME", "specflow"),
            auth_mode,
            verification_token: env_or("PUBSUB_VERIFICATION_TOKEN", ""),
            expected_audience: env_or("PUBSUB_EXPECTED_AUDIENCE", ""),
            expected_issuer: env_or("PUBSUB_EXPECTED_ISSUER", "https://accounts.google.com"),
            expected_service_account_email: env_or("PUBSUB_SERVICE_ACCOUNT_EMAIL", ""),
            execution_enabled,
            execution_endpoint,
            log_level: env_or("LOG_LEVEL", "info"),
        })
    }

    /// Path of the SQLite database for this store scope.
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.db", self.store_project_id))
    }

    /// Emit warnings for configuration that will limit the service, after
    /// logging is up.
    pub fn warn_on_gaps(&self) {
        if self.auth_mode == AuthMode::Token && self.verification_token.is_empty() {
            warn!("PUBSUB_VERIFICATION_TOKEN is not set; every status event will be rejected");
        }
        if self.auth_mode == AuthMode::IdentityToken && self.expected_audience.is_empty() {
            warn!("PUBSUB_EXPECTED_AUDIENCE is not set; every status event will be rejected");
        }
        if self.auth_mode == AuthMode::Disabled {
            warn!("AUTH_MODE=none: the status-event webhook accepts unauthenticated requests");
        }
        if self.execution_enabled && self.execution_endpoint.is_none() {
            warn!("EXECUTION_ENDPOINT is not set; execution triggers will only be logged");
        }
    }
}
