//! Translation between a data key and its storable, wrapped form.

use std::sync::Arc;

use crate::error::{Result, VaultError};
use crate::key::{DATA_KEY_LEN, DataKey, WrappedDataKey};
use crate::keystore::{RootKeyHandle, SecureKeyStore};

/// Wraps and unwraps [`DataKey`]s with the root keypair behind a handle.
///
/// Stateless apart from the handle; nothing is cached.
pub struct KeyWrapper {
    keystore: Arc<dyn SecureKeyStore>,
    handle: RootKeyHandle,
}

impl KeyWrapper {
    pub fn new(keystore: Arc<dyn SecureKeyStore>, handle: RootKeyHandle) -> Self {
        Self { keystore, handle }
    }

    pub fn handle(&self) -> &RootKeyHandle {
        &self.handle
    }

    /// Seal `dek` under the root public key.
    pub fn wrap(&self, dek: &DataKey) -> Result<WrappedDataKey> {
        let wrapped = self.keystore.wrap(&self.handle, dek.as_bytes())?;
        Ok(WrappedDataKey::new(wrapped))
    }

    /// Recover the data key. [`VaultError::KeyUnavailable`] from the key store
    /// passes through unchanged.
    pub fn unwrap(&self, wrapped: &WrappedDataKey) -> Result<DataKey> {
        let raw = self.keystore.unwrap(&self.handle, wrapped.as_bytes())?;
        DataKey::from_slice(&raw).ok_or_else(|| VaultError::KeyUnavailable {
            reason: format!(
                "unwrapped key is {} bytes, expected {DATA_KEY_LEN}",
                raw.len()
            ),
        })
    }
}
