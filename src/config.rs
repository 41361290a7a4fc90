//! Service-level configuration for Gatehouse.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{GatehouseError, Result};
use crate::ratelimit::LimiterConfig;

/// Main configuration for the Gatehouse service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatehouseConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Admission limit configuration
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Named limit presets tuned per endpoint class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    /// Generic fallback limits
    #[default]
    Default,
    /// Login/registration endpoints
    Auth,
    /// Sensitive account operations
    Sensitive,
    /// High-volume public endpoints
    GeneralApi,
}

impl Preset {
    /// Resolve the preset into a concrete limiter configuration.
    pub fn limiter_config(self) -> LimiterConfig {
        match self {
            Preset::Default => LimiterConfig::default(),
            Preset::Auth => LimiterConfig::auth(),
            Preset::Sensitive => LimiterConfig::sensitive(),
            Preset::GeneralApi => LimiterConfig::general_api(),
        }
    }
}

/// Admission limit configuration: a preset plus optional field overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Base preset to start from
    #[serde(default)]
    pub preset: Preset,

    /// Override: admissions allowed per window
    pub max_attempts: Option<u32>,

    /// Override: counting window in seconds
    pub window_secs: Option<u64>,

    /// Override: block duration in seconds
    pub block_secs: Option<u64>,

    /// Override: eviction sweep interval in seconds
    pub cleanup_secs: Option<u64>,
}

impl LimitsConfig {
    /// Build the limiter configuration, applying overrides on top of the
    /// selected preset.
    pub fn limiter_config(&self) -> LimiterConfig {
        let mut config = self.preset.limiter_config();
        if let Some(max_attempts) = self.max_attempts {
            config.max_attempts = max_attempts;
        }
        if let Some(secs) = self.window_secs {
            config.window_size = Duration::from_secs(secs);
        }
        if let Some(secs) = self.block_secs {
            config.block_duration = Duration::from_secs(secs);
        }
        if let Some(secs) = self.cleanup_secs {
            config.cleanup_interval = Duration::from_secs(secs);
        }
        config
    }
}

impl GatehouseConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&contents)
            .map_err(|e| GatehouseError::Config(format!("Failed to parse config: {}", e)))
    }
}
