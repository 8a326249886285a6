//! Server configuration
//!
//! Read from an optional `hearth.toml` (path overridable through
//! `HEARTH_CONFIG`), then `HEARTH_*` environment variables on top. Every field
//! has a default so an empty environment yields a runnable server.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

pub const CONFIG_FILE: &str = "hearth.toml";
pub const CONFIG_PATH_VAR: &str = "HEARTH_CONFIG";
pub const ENV_PREFIX: &str = "HEARTH";

const DEFAULT_JWT_SECRET: &str = "change-me-in-production";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub data_dir: PathBuf,
    /// `None` falls back to an insecure built-in secret
    pub jwt_secret: Option<String>,
    pub log_format: LogFormat,
    pub default_chunk_size: u64,
    pub max_chunk_size: u64,
    pub index_capacity: usize,
    pub session_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub file_url_prefix: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:16790".to_string(),
            data_dir: PathBuf::from("./data"),
            jwt_secret: None,
            log_format: LogFormat::Pretty,
            default_chunk_size: hearth_core::chunks::DEFAULT_CHUNK_SIZE,
            max_chunk_size: hearth_core::chunks::MAX_CHUNK_SIZE,
            index_capacity: hearth_core::index::DEFAULT_CAPACITY,
            session_ttl_secs: 24 * 60 * 60,
            sweep_interval_secs: 10 * 60,
            file_url_prefix: hearth_core::service::DEFAULT_FILE_URL_PREFIX.to_string(),
        }
    }
}

impl ServerConfig {
    /// Load from the process environment.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(CONFIG_FILE));
        Self::load_from(&path, config::Environment::with_prefix(ENV_PREFIX))
    }

    /// Load from `path` (if it exists) overlaid with `env`.
    pub fn load_from(path: &Path, env: config::Environment) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(env.try_parsing(true))
            .build()
            .context("Failed to read configuration sources")?;

        let config: ServerConfig = settings
            .try_deserialize()
            .context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.max_chunk_size == 0 || self.default_chunk_size == 0 {
            anyhow::bail!("chunk sizes must be greater than zero");
        }
        if self.default_chunk_size > self.max_chunk_size {
            anyhow::bail!(
                "default_chunk_size ({}) exceeds max_chunk_size ({})",
                self.default_chunk_size,
                self.max_chunk_size
            );
        }
        if self.index_capacity == 0 {
            anyhow::bail!("index_capacity must be at least 1");
        }
        if self.sweep_interval_secs == 0 {
            anyhow::bail!("sweep_interval_secs must be greater than zero");
        }
        Ok(())
    }

    pub fn jwt_secret(&self) -> String {
        self.jwt_secret.clone().unwrap_or_else(|| {
            warn!("HEARTH_JWT_SECRET not set, using default (insecure for production)");
            DEFAULT_JWT_SECRET.to_string()
        })
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
