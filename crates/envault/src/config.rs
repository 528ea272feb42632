//! Vault configuration.
//!
//! A [`VaultConfig`] is passed once to [`Vault::open`](crate::Vault::open) and
//! stays fixed for the lifetime of that vault. It can be built in code or
//! loaded from TOML:
//!
//! ```toml
//! key_alias = "my-app"
//! namespace = "vault"
//! require_lock_screen = true
//! cache_data_key = true
//! ```
//!
//! Missing fields take their defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};
use crate::store::DEFAULT_NAMESPACE;

/// Default alias of the root keypair in the secure key store.
pub const DEFAULT_KEY_ALIAS: &str = "envault";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VaultConfig {
    /// Alias of the root keypair in the secure key store.
    pub key_alias: String,

    /// Storage namespace holding the wrapped key and credentials.
    pub namespace: String,

    /// Refuse to open unless the device has a lock screen. Recommended for
    /// anything sensitive.
    pub require_lock_screen: bool,

    /// Keep the unwrapped data key in memory for the lifetime of the vault.
    /// When off, every credential operation unwraps it again.
    pub cache_data_key: bool,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            key_alias: DEFAULT_KEY_ALIAS.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            require_lock_screen: true,
            cache_data_key: true,
        }
    }
}

impl VaultConfig {
    /// Parse a TOML document and validate it.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| VaultError::Config {
            reason: format!("failed to parse vault config: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| VaultError::Config {
            reason: format!("failed to read {}: {e}", path.display()),
        })?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), "loaded vault config");
        Ok(config)
    }

    pub fn with_key_alias(mut self, alias: impl Into<String>) -> Self {
        self.key_alias = alias.into();
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_require_lock_screen(mut self, required: bool) -> Self {
        self.require_lock_screen = required;
        self
    }

    pub fn with_cache_data_key(mut self, cache: bool) -> Self {
        self.cache_data_key = cache;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.key_alias.trim().is_empty() {
            return Err(VaultError::Config {
                reason: "key_alias must not be empty".into(),
            });
        }
        if self.namespace.trim().is_empty() {
            return Err(VaultError::Config {
                reason: "namespace must not be empty".into(),
            });
        }
        Ok(())
    }
}
