//! vhci configuration management

use anyhow::{Context, Result, anyhow};
use protocol::USBIP_HEADER_SIZE;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Largest request pool a deployment may configure
pub const MAX_POOL_CAPACITY: usize = 65536;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VhciConfig {
    #[serde(default)]
    pub pool: PoolSettings,
    #[serde(default)]
    pub controller: ControllerSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Request object pool sizing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Maximum number of outstanding device requests across all controllers
    /// sharing the pool
    pub capacity: usize,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerSettings {
    /// Size of the buffer handed to the encoder for each read, in bytes
    pub read_buffer_size: usize,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            read_buffer_size: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSettings {
    pub level: String,
    #[serde(default = "default_true")]
    pub ansi: bool,
    #[serde(default)]
    pub show_target: bool,
}

fn default_true() -> bool {
    true
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            ansi: true,
            show_target: false,
        }
    }
}

impl VhciConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            // Try standard locations in order
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/usbip-vhci/vhci.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: VhciConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        tracing::debug!(
            "Config: pool capacity {}, read buffer {} bytes",
            config.pool.capacity,
            config.controller.read_buffer_size
        );
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                // Print to stderr since logging might not be initialized yet
                eprintln!("Config: {}", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("usbip-vhci").join("vhci.toml")
        } else {
            PathBuf::from(".config/usbip-vhci/vhci.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            ));
        }

        if self.pool.capacity == 0 || self.pool.capacity > MAX_POOL_CAPACITY {
            return Err(anyhow!(
                "Invalid pool capacity {}, must be between 1 and {}",
                self.pool.capacity,
                MAX_POOL_CAPACITY
            ));
        }

        if self.controller.read_buffer_size < USBIP_HEADER_SIZE {
            return Err(anyhow!(
                "Read buffer of {} bytes cannot hold a {}-byte USB/IP header",
                self.controller.read_buffer_size,
                USBIP_HEADER_SIZE
            ));
        }

        Ok(())
    }
}

/// Load configuration from a path that may start with `~`
pub fn load_config(path: &str) -> Result<VhciConfig> {
    let path_buf = PathBuf::from(shellexpand::tilde(path).as_ref());
    VhciConfig::load(Some(path_buf))
}
