//! Async, cloneable handle to a [`Vault`].
//!
//! Every vault call may block (key store, SQLite), so [`SharedVault`] wraps
//! the vault in `Arc<Mutex<_>>` and dispatches each call onto the blocking
//! thread pool via `tokio::task::spawn_blocking`. Operations on one vault are
//! serialised by the mutex.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use zeroize::Zeroizing;

use crate::config::VaultConfig;
use crate::error::{InitError, Result, VaultError};
use crate::keystore::SecureKeyStore;
use crate::store::CredentialStore;
use crate::vault::Vault;

/// Thread-safe handle to an open vault. Cloning is cheap.
#[derive(Clone)]
pub struct SharedVault {
    inner: Arc<Mutex<Vault>>,
}

impl SharedVault {
    pub fn new(vault: Vault) -> Self {
        Self {
            inner: Arc::new(Mutex::new(vault)),
        }
    }

    /// [`Vault::open`] on the blocking pool.
    pub async fn open(
        store: CredentialStore,
        keystore: Arc<dyn SecureKeyStore>,
        config: VaultConfig,
    ) -> std::result::Result<Self, InitError> {
        let vault = tokio::task::spawn_blocking(move || Vault::open(store, keystore, config))
            .await
            .map_err(|e| InitError::new(e.into()))??;
        Ok(Self::new(vault))
    }

    /// Run a closure against the vault on the blocking pool.
    pub async fn execute<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Vault) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let vault = inner
                .lock()
                .map_err(|e| VaultError::TaskJoin(format!("vault mutex poisoned: {e}")))?;
            f(&vault)
        })
        .await?
    }

    pub async fn store_credential(
        &self,
        name: impl Into<String>,
        value: impl Into<Vec<u8>>,
    ) -> Result<()> {
        let name = name.into();
        let value = Zeroizing::new(value.into());
        self.execute(move |vault| vault.store_credential(&name, &value))
            .await
    }

    pub async fn get_credential(&self, name: impl Into<String>) -> Result<Option<Vec<u8>>> {
        let name = name.into();
        self.execute(move |vault| vault.get_credential(&name)).await
    }

    pub async fn store_string_credential(
        &self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<()> {
        let name = name.into();
        let value = Zeroizing::new(value.into());
        self.execute(move |vault| vault.store_string_credential(&name, &value))
            .await
    }

    pub async fn get_string_credential(&self, name: impl Into<String>) -> Result<Option<String>> {
        let name = name.into();
        self.execute(move |vault| vault.get_string_credential(&name))
            .await
    }

    pub async fn remove_credential(&self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        self.execute(move |vault| vault.remove_credential(&name))
            .await
    }

    pub async fn list_credential_names(&self) -> Result<BTreeSet<String>> {
        self.execute(|vault| vault.list_credential_names()).await
    }

    /// Reset the vault and consume the handle.
    ///
    /// While other clones are alive nothing is reset: the error has cause
    /// [`VaultError::Busy`] and gives the handle back through
    /// [`DestroyError::into_handle`], so the caller can retry once the other
    /// clones are dropped.
    pub async fn destroy(self) -> std::result::Result<(), DestroyError> {
        let mutex = Arc::try_unwrap(self.inner).map_err(|inner| DestroyError {
            handle: Some(Self { inner }),
            cause: VaultError::Busy,
        })?;
        let vault = mutex.into_inner().map_err(|e| {
            DestroyError::from(VaultError::TaskJoin(format!("vault mutex poisoned: {e}")))
        })?;
        tokio::task::spawn_blocking(move || vault.destroy())
            .await
            .map_err(VaultError::from)??;
        Ok(())
    }
}

/// Failure of [`SharedVault::destroy`].
#[derive(Debug, thiserror::Error)]
#[error("failed to destroy vault: {cause}")]
pub struct DestroyError {
    handle: Option<SharedVault>,
    #[source]
    cause: VaultError,
}

impl DestroyError {
    pub fn cause(&self) -> &VaultError {
        &self.cause
    }

    /// The handle, if the vault was left untouched because it is still
    /// shared.
    pub fn into_handle(self) -> Option<SharedVault> {
        self.handle
    }
}

impl From<VaultError> for DestroyError {
    fn from(cause: VaultError) -> Self {
        Self {
            handle: None,
            cause,
        }
    }
}

impl From<DestroyError> for VaultError {
    fn from(err: DestroyError) -> Self {
        err.cause
    }
}

impl std::fmt::Debug for SharedVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedVault")
            .field("handles", &Arc::strong_count(&self.inner))
            .finish_non_exhaustive()
    }
}
