//! Layered application configuration.
//!
//! Sources, later ones overriding earlier ones:
//! 1. Defaults in code
//! 2. `config/<environment>.toml` (optional)
//! 3. `SHOPLEDGER__*` environment variables (`__` separates sections)

use std::collections::HashMap;

use config::{ConfigError, Environment, File};
use serde::Deserialize;

pub const ENV_PREFIX: &str = "SHOPLEDGER";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Environment name, selects `config/<environment>.toml`.
    pub environment: String,
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub retry: RetryConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Required for the `postgres` backend.
    #[serde(default)]
    pub database_url: Option<String>,
    pub max_connections: u32,
    /// Pool acquire timeout; a timed-out commit is reported as not applied.
    pub acquire_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub level: String,
    pub json: bool,
}

impl AppConfig {
    /// Load from files and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let environment = std::env::var(format!("{ENV_PREFIX}__ENVIRONMENT"))
            .unwrap_or_else(|_| "development".into());
        Self::build(&environment, None)
    }

    /// Load with an explicit environment-variable map instead of the process
    /// environment.
    pub fn load_with_env(
        environment: &str,
        vars: HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        Self::build(environment, Some(vars))
    }

    fn build(
        environment: &str,
        vars: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        config::Config::builder()
            .set_default("environment", environment)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("storage.backend", "memory")?
            .set_default("storage.max_connections", 10)?
            .set_default("storage.acquire_timeout_ms", 3000)?
            .set_default("retry.max_attempts", 5)?
            .set_default("retry.base_delay_ms", 5)?
            .set_default("retry.max_delay_ms", 100)?
            .set_default("log.level", "info")?
            .set_default("log.json", true)?
            .add_source(File::with_name(&format!("config/{environment}")).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .source(vars),
            )
            .build()?
            .try_deserialize()
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
