//! Client configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

use sealdrop_common::{Error, Result};
use sealdrop_crypto::KdfParams;

/// Default server used when nothing else is configured.
pub const DEFAULT_BASE_URL: &str = "https://sealdrop.example";

/// Connection settings for a Sealdrop server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    /// Server root, e.g. `https://sealdrop.example`.
    pub base_url: String,
    /// User agent sent with every request.
    pub user_agent: String,
    /// Connect and read timeout in seconds. Applies per read, not to a whole
    /// transfer, so long uploads are not cut off.
    pub request_timeout_secs: u64,
    /// Lifetime requested for new transfers.
    pub default_lifetime_hours: u32,
    /// Login password hardening parameters.
    pub kdf: Option<KdfParams>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: format!("Sealdrop/{}", env!("CARGO_PKG_VERSION")),
            request_timeout_secs: 30,
            default_lifetime_hours: 24,
            kdf: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration from a JSON file.
    ///
    /// Missing fields take their default values.
    ///
    /// # Errors
    /// - File cannot be read
    /// - File is not valid JSON
    /// - Resulting configuration fails [`ClientConfig::validate`]
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            Error::Config(format!("Invalid config file {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write configuration to a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Check the configuration for obvious mistakes.
    ///
    /// # Errors
    /// - `Config` if the base URL is not an absolute http(s) URL
    /// - `Config` if the default lifetime or the timeout is zero
    /// - `Config` if the KDF parameters are rejected by Argon2
    pub fn validate(&self) -> Result<()> {
        self.base_url()?;
        if self.default_lifetime_hours == 0 {
            return Err(Error::Config(
                "defaultLifetimeHours must be at least 1".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::Config(
                "requestTimeoutSecs must be at least 1".to_string(),
            ));
        }
        if let Some(kdf) = &self.kdf {
            kdf.validate()?;
        }
        Ok(())
    }

    /// Parsed base URL.
    pub fn base_url(&self) -> Result<Url> {
        let url = Url::parse(self.base_url.trim())
            .map_err(|e| Error::Config(format!("Invalid base URL '{}': {}", self.base_url, e)))?;
        match url.scheme() {
            "http" | "https" if url.has_host() => Ok(url),
            _ => Err(Error::Config(format!(
                "Base URL must be an http(s) URL with a host: {}",
                self.base_url
            ))),
        }
    }

    /// KDF parameters for login hardening, falling back to the default preset.
    pub fn kdf_params(&self) -> KdfParams {
        self.kdf.clone().unwrap_or_default()
    }
}
