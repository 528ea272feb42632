//! Secure key custody for the vault's root keypair.
//!
//! The root keypair must never leave its protected storage. This module
//! provides the [`SecureKeyStore`] trait that abstracts over the facilities a
//! platform offers for that:
//!
//! - **macOS**: Keychain Services via `security-framework` ([`MacOSKeyStore`])
//! - **Fallback**: a per-alias key file sealed with a device-derived key
//!   ([`FileKeyStore`])
//! - **In process**: [`MemoryKeyStore`], for tests and ephemeral vaults
//!
//! Callers hold a [`RootKeyHandle`] and can only ask the store to wrap or
//! unwrap key material with it; the private half is never returned.

mod file;
#[cfg(target_os = "macos")]
mod macos;
mod memory;
pub mod software;

use std::path::Path;
use std::sync::Arc;

use zeroize::Zeroizing;

use crate::error::Result;

pub use file::FileKeyStore;
#[cfg(target_os = "macos")]
pub use macos::MacOSKeyStore;
pub use memory::MemoryKeyStore;

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Opaque reference to a root keypair held by a [`SecureKeyStore`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RootKeyHandle {
    alias: String,
}

impl RootKeyHandle {
    /// Handles are minted by key store implementations.
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Abstraction over platform-specific custody of the root keypair.
///
/// All operations may block (hardware-backed crypto, disk I/O). Implementations
/// must be `Send + Sync` so a vault can be driven from a worker thread.
pub trait SecureKeyStore: Send + Sync {
    /// Return the keypair under `alias`, generating it if absent.
    ///
    /// Returns [`VaultError::DeviceNotProtected`](crate::VaultError::DeviceNotProtected)
    /// if `require_lock_screen` is set and the device has no unlock credential.
    fn get_or_create_keypair(
        &self,
        alias: &str,
        require_lock_screen: bool,
    ) -> Result<RootKeyHandle>;

    /// Encrypt `plaintext_key` under the handle's public key.
    fn wrap(&self, handle: &RootKeyHandle, plaintext_key: &[u8]) -> Result<Vec<u8>>;

    /// Decrypt a wrapped key inside the store.
    ///
    /// Returns [`VaultError::KeyUnavailable`](crate::VaultError::KeyUnavailable)
    /// if the keypair was deleted or invalidated, or the blob belongs to
    /// another keypair.
    fn unwrap(&self, handle: &RootKeyHandle, wrapped: &[u8]) -> Result<Zeroizing<Vec<u8>>>;

    /// Remove the keypair under `alias`. Not an error if it does not exist.
    fn delete(&self, alias: &str) -> Result<()>;

    /// Whether the device has a lock screen (PIN, passcode, pattern, ...).
    fn is_device_protected(&self) -> bool;

    /// Whether the keypair lives in dedicated hardware. Informational only.
    fn is_hardware_backed(&self) -> bool;
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Returns the best available key store for the current platform.
///
/// - **macOS**: [`MacOSKeyStore`] (Keychain Services)
/// - **Other platforms**: [`FileKeyStore`] rooted at `data_dir`
///
/// `data_dir` is unused on macOS but stays in the signature so callers do not
/// need to care which backend is in use.
#[cfg_attr(target_os = "macos", allow(unused_variables))]
pub fn platform_keystore(data_dir: &Path) -> Arc<dyn SecureKeyStore> {
    #[cfg(target_os = "macos")]
    {
        tracing::info!("using macOS Keychain Services for root key custody");
        Arc::new(MacOSKeyStore::new())
    }
    #[cfg(not(target_os = "macos"))]
    {
        tracing::info!(path = %data_dir.display(), "using file-based key store for root key custody");
        Arc::new(FileKeyStore::new(data_dir))
    }
}

/// Aliases end up in file names and keychain account names.
pub(crate) fn validate_alias(alias: &str) -> Result<()> {
    let valid = !alias.is_empty()
        && alias
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !alias.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(crate::error::VaultError::KeyStore {
            reason: format!("invalid key alias {alias:?}"),
        })
    }
}
