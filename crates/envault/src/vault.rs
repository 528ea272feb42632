//! The vault facade.
//!
//! A [`Vault`] ties together a [`CredentialStore`], a [`SecureKeyStore`] and
//! the data key. Credentials are encrypted with the data key before they reach
//! storage; the data key itself is only ever persisted wrapped by the root
//! keypair.
//!
//! # Lifecycle
//!
//! [`Vault::open`] either returns a ready vault or an [`InitError`]; there is
//! no half-open state. If the cause [requires a reset](InitError::requires_reset),
//! call [`Vault::reset`] and open again. All credentials are lost in that case.
//!
//! # Security Notes
//!
//! - Values are never logged; only credential names and counts.
//! - The cached data key is zeroed when the vault is dropped.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use crate::config::VaultConfig;
use crate::crypto;
use crate::dek::DataKeyManager;
use crate::error::{InitError, Result, VaultError};
use crate::key::DataKey;
use crate::keystore::{SecureKeyStore, platform_keystore};
use crate::store::CredentialStore;
use crate::wrapper::KeyWrapper;

/// File name of the SQLite database used by [`Vault::open_in_dir`].
pub const DATABASE_FILE: &str = "vault.db";

/// An open, ready-to-use credential vault.
pub struct Vault {
    store: CredentialStore,
    keystore: Arc<dyn SecureKeyStore>,
    keys: DataKeyManager,
    config: VaultConfig,
    cached_dek: Option<DataKey>,
}

impl Vault {
    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Open a vault over `store`, creating the root keypair and data key on
    /// first use.
    ///
    /// The store must be scoped to `config.namespace`.
    pub fn open(
        store: CredentialStore,
        keystore: Arc<dyn SecureKeyStore>,
        config: VaultConfig,
    ) -> std::result::Result<Self, InitError> {
        Self::try_open(store, keystore, config).map_err(|cause| {
            tracing::warn!(
                error = %cause,
                requires_reset = cause.requires_reset(),
                "failed to open vault"
            );
            InitError::new(cause)
        })
    }

    fn try_open(
        store: CredentialStore,
        keystore: Arc<dyn SecureKeyStore>,
        config: VaultConfig,
    ) -> Result<Self> {
        config.validate()?;
        if store.namespace() != config.namespace {
            return Err(VaultError::Config {
                reason: format!(
                    "store namespace {:?} does not match configured namespace {:?}",
                    store.namespace(),
                    config.namespace
                ),
            });
        }
        if config.require_lock_screen && !keystore.is_device_protected() {
            return Err(VaultError::DeviceNotProtected);
        }

        let handle =
            keystore.get_or_create_keypair(&config.key_alias, config.require_lock_screen)?;
        let keys = DataKeyManager::new(KeyWrapper::new(keystore.clone(), handle));

        // Resolve the data key now so an invalidated root key fails the open
        // rather than the first credential read.
        let dek = keys.get_or_create_dek(&store)?;
        let cached_dek = config.cache_data_key.then_some(dek);

        tracing::info!(
            alias = %config.key_alias,
            namespace = %config.namespace,
            hardware_backed = keystore.is_hardware_backed(),
            "vault opened"
        );

        Ok(Self {
            store,
            keystore,
            keys,
            config,
            cached_dek,
        })
    }

    /// Open a vault persisted under `data_dir`: credentials in a SQLite
    /// database and the root keypair in the platform key store.
    pub fn open_in_dir(
        data_dir: impl AsRef<Path>,
        config: VaultConfig,
    ) -> std::result::Result<Self, InitError> {
        let data_dir = data_dir.as_ref();
        let store = CredentialStore::sqlite(data_dir.join(DATABASE_FILE), &config.namespace)
            .map_err(InitError::new)?;
        Self::open(store, platform_keystore(data_dir), config)
    }

    /// Destroy the root keypair and every entry in the store's namespace.
    ///
    /// Usable when [`open`](Self::open) failed. A failure to delete the root
    /// keypair is logged and ignored, since the next open replaces it anyway;
    /// a failure to clear storage is returned.
    pub fn reset(
        store: &CredentialStore,
        keystore: &dyn SecureKeyStore,
        config: &VaultConfig,
    ) -> Result<()> {
        if let Err(e) = keystore.delete(&config.key_alias) {
            tracing::warn!(
                alias = %config.key_alias,
                error = %e,
                "failed to delete root keypair during reset"
            );
        }
        store.clear()?;
        tracing::info!(
            alias = %config.key_alias,
            namespace = store.namespace(),
            "vault reset, all credentials destroyed"
        );
        Ok(())
    }

    /// [`reset`](Self::reset) for a vault persisted under `data_dir`.
    pub fn reset_in_dir(data_dir: impl AsRef<Path>, config: &VaultConfig) -> Result<()> {
        let data_dir = data_dir.as_ref();
        let store = CredentialStore::sqlite(data_dir.join(DATABASE_FILE), &config.namespace)?;
        Self::reset(&store, platform_keystore(data_dir).as_ref(), config)
    }

    /// Reset this vault, consuming it.
    pub fn destroy(self) -> Result<()> {
        Self::reset(&self.store, self.keystore.as_ref(), &self.config)
    }

    // -----------------------------------------------------------------------
    // Credentials
    // -----------------------------------------------------------------------

    /// Encrypt and store `value` under `name`, replacing any previous value.
    pub fn store_credential(&self, name: &str, value: &[u8]) -> Result<()> {
        if name.is_empty() {
            return Err(VaultError::InvalidName);
        }
        let ciphertext = self.with_dek(|dek| crypto::encrypt(value, dek))?;
        self.store.set_credential(name, &ciphertext)?;
        tracing::debug!(name, "stored credential");
        Ok(())
    }

    /// Decrypt the credential stored under `name`, or `None` if there is none.
    pub fn get_credential(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let Some(ciphertext) = self.store.credential(name)? else {
            tracing::debug!(name, "credential not found");
            return Ok(None);
        };
        let plaintext = self.with_dek(|dek| crypto::decrypt(&ciphertext, dek))?;
        tracing::debug!(name, "retrieved credential");
        Ok(Some(plaintext))
    }

    /// Remove the credential under `name`. Absent names are not an error.
    pub fn remove_credential(&self, name: &str) -> Result<()> {
        self.store.remove_credential(name)?;
        tracing::debug!(name, "removed credential");
        Ok(())
    }

    pub fn list_credential_names(&self) -> Result<BTreeSet<String>> {
        let names = self.store.credential_names()?;
        tracing::debug!(count = names.len(), "listed credentials");
        Ok(names)
    }

    pub fn store_string_credential(&self, name: &str, value: &str) -> Result<()> {
        self.store_credential(name, value.as_bytes())
    }

    /// Like [`get_credential`](Self::get_credential), for values stored as
    /// UTF-8 text.
    pub fn get_string_credential(&self, name: &str) -> Result<Option<String>> {
        self.get_credential(name)?
            .map(|bytes| {
                String::from_utf8(bytes).map_err(|_| VaultError::DecryptionFailed {
                    reason: format!("credential {name:?} is not valid UTF-8"),
                })
            })
            .transpose()
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn is_device_protected(&self) -> bool {
        self.keystore.is_device_protected()
    }

    pub fn is_hardware_backed(&self) -> bool {
        self.keystore.is_hardware_backed()
    }

    pub fn require_lock_screen(&self) -> bool {
        self.config.require_lock_screen
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn with_dek<T>(&self, f: impl FnOnce(&DataKey) -> Result<T>) -> Result<T> {
        match &self.cached_dek {
            Some(dek) => f(dek),
            None => {
                let dek = self.keys.get_or_create_dek(&self.store)?;
                f(&dek)
            }
        }
    }
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("alias", &self.config.key_alias)
            .field("namespace", &self.store.namespace())
            .field("cached_dek", &self.cached_dek.is_some())
            .finish_non_exhaustive()
    }
}
