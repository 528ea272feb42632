//! Envelope-encrypted local secrets vault.
//!
//! Credentials are encrypted with AES-256-GCM under a random 256-bit data key.
//! The data key is stored only in wrapped form, sealed to a root keypair that
//! never leaves the platform's secure key store (the macOS keychain, or a
//! sealed key file elsewhere).
//!
//! # Modules
//!
//! - [`vault`]: the [`Vault`] facade (open, store, get, remove, list, reset).
//! - [`shared`]: [`SharedVault`], an async handle for tokio applications.
//! - [`keystore`]: root key custody behind the [`SecureKeyStore`] trait.
//! - [`wrapper`] / [`dek`]: wrapping and lifecycle of the data key.
//! - [`crypto`]: AES-256-GCM credential cipher and key derivation.
//! - [`store`]: namespaced storage of ciphertexts and the wrapped key.
//! - [`config`]: [`VaultConfig`].
//! - [`error`]: unified error types.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use envault::{Vault, VaultConfig};
//!
//! # fn example() -> envault::Result<()> {
//! let config = VaultConfig::default().with_key_alias("my-app");
//!
//! let vault = match Vault::open_in_dir("data", config.clone()) {
//!     Ok(vault) => vault,
//!     Err(e) if e.requires_reset() => {
//!         // The root key is gone; stored credentials cannot be recovered.
//!         Vault::reset_in_dir("data", &config)?;
//!         Vault::open_in_dir("data", config)?
//!     }
//!     Err(e) => return Err(e.into()),
//! };
//!
//! vault.store_string_credential("api_token", "s3cr3t")?;
//! assert_eq!(
//!     vault.get_string_credential("api_token")?.as_deref(),
//!     Some("s3cr3t")
//! );
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod crypto;
pub mod dek;
pub mod error;
pub mod key;
pub mod keystore;
pub mod shared;
pub mod store;
pub mod vault;
pub mod wrapper;

// Re-export the most commonly used types at the crate root for convenience.
pub use config::VaultConfig;
pub use error::{InitError, Result, VaultError};
pub use key::{DataKey, WrappedDataKey};
#[cfg(target_os = "macos")]
pub use keystore::MacOSKeyStore;
pub use keystore::{
    FileKeyStore, MemoryKeyStore, RootKeyHandle, SecureKeyStore, platform_keystore,
};
pub use shared::{DestroyError, SharedVault};
pub use store::{CredentialStore, MemoryBackend, SqliteBackend, StorageBackend};
pub use vault::Vault;
