//! Obtains the vault's data-encryption key, creating it on first use.

use crate::error::Result;
use crate::key::DataKey;
use crate::keystore::RootKeyHandle;
use crate::store::CredentialStore;
use crate::wrapper::KeyWrapper;

/// Resolves the data key from the store's wrapped-key slot.
///
/// The manager never holds the unwrapped key itself: each call unwraps again,
/// so a root key invalidated since the last call surfaces as
/// [`VaultError::KeyUnavailable`](crate::VaultError::KeyUnavailable).
pub struct DataKeyManager {
    wrapper: KeyWrapper,
}

impl DataKeyManager {
    pub fn new(wrapper: KeyWrapper) -> Self {
        Self { wrapper }
    }

    pub fn root_key(&self) -> &RootKeyHandle {
        self.wrapper.handle()
    }

    /// Return the data key, generating and persisting a wrapped one if the
    /// store has none.
    pub fn get_or_create_dek(&self, store: &CredentialStore) -> Result<DataKey> {
        match store.wrapped_key()? {
            Some(wrapped) => {
                let dek = self.wrapper.unwrap(&wrapped)?;
                tracing::debug!(
                    alias = self.root_key().alias(),
                    namespace = store.namespace(),
                    "unwrapped data key"
                );
                Ok(dek)
            }
            None => {
                let dek = DataKey::generate()?;
                let wrapped = self.wrapper.wrap(&dek)?;
                store.set_wrapped_key(&wrapped)?;
                tracing::info!(
                    alias = self.root_key().alias(),
                    namespace = store.namespace(),
                    "created new data key"
                );
                Ok(dek)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::error::VaultError;
    use crate::keystore::{MemoryKeyStore, SecureKeyStore};

    fn manager(keystore: &Arc<MemoryKeyStore>) -> DataKeyManager {
        let handle = keystore.get_or_create_keypair("dek-test", false).unwrap();
        DataKeyManager::new(KeyWrapper::new(keystore.clone(), handle))
    }

    #[test]
    fn first_call_creates_and_persists_wrapped_key() {
        let keystore = Arc::new(MemoryKeyStore::new());
        let store = CredentialStore::in_memory();
        assert!(store.wrapped_key().unwrap().is_none());

        let dek = manager(&keystore).get_or_create_dek(&store).unwrap();

        let wrapped = store.wrapped_key().unwrap().expect("wrapped key persisted");
        assert_ne!(wrapped.as_bytes(), dek.as_bytes());
    }

    #[test]
    fn later_calls_return_the_same_key() {
        let keystore = Arc::new(MemoryKeyStore::new());
        let store = CredentialStore::in_memory();

        let first = manager(&keystore).get_or_create_dek(&store).unwrap();
        let wrapped = store.wrapped_key().unwrap();

        let second = manager(&keystore).get_or_create_dek(&store).unwrap();
        assert_eq!(first.as_bytes(), second.as_bytes());
        assert_eq!(store.wrapped_key().unwrap(), wrapped);
    }

    #[test]
    fn separate_stores_get_independent_keys() {
        let keystore = Arc::new(MemoryKeyStore::new());
        let manager = manager(&keystore);

        let a = manager.get_or_create_dek(&CredentialStore::in_memory()).unwrap();
        let b = manager.get_or_create_dek(&CredentialStore::in_memory()).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn invalidated_root_key_surfaces_on_next_call() {
        let keystore = Arc::new(MemoryKeyStore::new());
        let store = CredentialStore::in_memory();
        let manager = manager(&keystore);
        manager.get_or_create_dek(&store).unwrap();

        keystore.invalidate("dek-test").unwrap();

        assert!(matches!(
            manager.get_or_create_dek(&store),
            Err(VaultError::KeyUnavailable { .. })
        ));
    }
}
