//! Configuration system for the nat-upnp CLI.

use nat_upnp::ClientConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Longest discovery timeout accepted from the config file
const MAX_TIMEOUT_MS: u64 = 60_000;

/// CLI configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Description URL of a known gateway (skips discovery)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Local address the known gateway reaches us on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_address: Option<String>,
    /// Discovery timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Fall back to the last discovered gateway
    #[serde(default)]
    pub cache: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_timeout_ms() -> u64 {
    1800
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: None,
            local_address: None,
            timeout_ms: default_timeout_ms(),
            cache: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("nat-upnp/config.toml")
    }

    /// Load config from default path, or create default if it doesn't exist
    ///
    /// # Errors
    ///
    /// Returns an error if reading or creating the config fails.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();

        if path.exists() {
            Self::load(&path)
        } else {
            let config = Self::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    /// Parse the gateway URL, if one is configured
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be parsed.
    pub fn parse_url(&self) -> anyhow::Result<Option<Url>> {
        Ok(self.gateway.url.as_deref().map(Url::parse).transpose()?)
    }

    /// Parse the local address, if one is configured
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be parsed.
    pub fn parse_local_address(&self) -> anyhow::Result<Option<IpAddr>> {
        Ok(self
            .gateway
            .local_address
            .as_deref()
            .map(str::parse::<IpAddr>)
            .transpose()?)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        let url = self.parse_url()?;
        self.parse_local_address()?;

        if let Some(url) = &url {
            if !matches!(url.scheme(), "http" | "https") {
                anyhow::bail!("Gateway url must be http or https: {url}");
            }
            if self.gateway.local_address.is_none() {
                anyhow::bail!("Gateway url set but no local_address specified");
            }
        }

        if self.gateway.timeout_ms == 0 || self.gateway.timeout_ms > MAX_TIMEOUT_MS {
            anyhow::bail!("Discovery timeout must be between 1 and {MAX_TIMEOUT_MS} ms");
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }

    /// Build the client configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the gateway fields cannot be parsed.
    pub fn client_config(&self) -> anyhow::Result<ClientConfig> {
        Ok(ClientConfig {
            timeout: Duration::from_millis(self.gateway.timeout_ms),
            url: self.parse_url()?,
            local_address: self.parse_local_address()?,
            cache: self.gateway.cache,
            ..ClientConfig::default()
        })
    }
}
