// src/config/mod.rs
mod models;

pub use models::*;

use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;

/// Routing table shipped with the binary.
pub const DEFAULT_CONFIG_YAML: &str = include_str!("../../config/default.yaml");

/// Built-in route table and upstream registry.
pub fn default_config() -> Result<Config> {
    let config: Config =
        serde_yaml::from_str(DEFAULT_CONFIG_YAML).context("Failed to parse built-in config")?;
    config.validate()?;
    Ok(config)
}

/// Load configuration from a file (YAML or JSON)
pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file {}", path.display()))?;

    let mut config = parse_config(path, &contents)?;

    // A file that only tunes server/metrics keeps the built-in table.
    if config.upstreams.is_empty() && config.routes.is_empty() {
        let defaults = default_config()?;
        config.upstreams = defaults.upstreams;
        config.routes = defaults.routes;
    }

    EnvOverrides::from_env()?.apply(&mut config);
    config.validate()?;
    Ok(config)
}

fn parse_config(path: &Path, contents: &str) -> Result<Config> {
    let ext = path.extension().and_then(|s| s.to_str());
    let config = if ext == Some("yaml") || ext == Some("yml") {
        serde_yaml::from_str(contents).context("Failed to parse YAML config")?
    } else {
        serde_json::from_str(contents).context("Failed to parse JSON config")?
    };
    Ok(config)
}

/// Deployment-time overrides read from `GATEWAY_*` environment variables.
#[derive(Debug, Default, Deserialize)]
pub struct EnvOverrides {
    pub listen_addr: Option<SocketAddr>,
    pub metrics_port: Option<u16>,
    pub metrics_enabled: Option<bool>,
}

impl EnvOverrides {
    pub fn from_env() -> Result<Self> {
        let overrides = ::config::Config::builder()
            .add_source(::config::Environment::with_prefix("GATEWAY").try_parsing(true))
            .build()
            .context("Failed to read GATEWAY_* environment")?
            .try_deserialize()
            .context("Invalid GATEWAY_* environment value")?;
        Ok(overrides)
    }

    pub fn apply(self, config: &mut Config) {
        if let Some(addr) = self.listen_addr {
            config.server.listen_addr = addr;
        }
        if let Some(port) = self.metrics_port {
            config.metrics.port = port;
        }
        if let Some(enabled) = self.metrics_enabled {
            config.metrics.enabled = enabled;
        }
    }
}

/// Load from `path` when given, otherwise fall back to the built-in table.
pub async fn load_or_default(path: Option<&str>) -> Result<Config> {
    match path {
        Some(path) => load_config(path).await,
        None => {
            let mut config = default_config()?;
            EnvOverrides::from_env()?.apply(&mut config);
            config.validate()?;
            Ok(config)
        }
    }
}
