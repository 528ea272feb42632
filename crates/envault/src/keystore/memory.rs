//! Process-local key store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use zeroize::Zeroizing;

use super::software::RootKeyPair;
use super::{RootKeyHandle, SecureKeyStore, validate_alias};
use crate::error::{Result, VaultError};

struct Entry {
    pair: RootKeyPair,
    invalidated: bool,
}

/// A [`SecureKeyStore`] that keeps root keypairs in process memory.
///
/// Keys vanish with the process, so vaults opened against it only survive
/// as long as the store instance does. The device switches let tests
/// reproduce what a real platform does when the user removes the lock screen
/// or changes the unlock method.
pub struct MemoryKeyStore {
    entries: Mutex<HashMap<String, Entry>>,
    device_protected: AtomicBool,
    hardware_backed: AtomicBool,
}

impl MemoryKeyStore {
    /// A store on a protected, software-only device.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            device_protected: AtomicBool::new(true),
            hardware_backed: AtomicBool::new(false),
        }
    }

    pub fn set_device_protected(&self, protected: bool) {
        self.device_protected.store(protected, Ordering::SeqCst);
    }

    pub fn set_hardware_backed(&self, hardware_backed: bool) {
        self.hardware_backed.store(hardware_backed, Ordering::SeqCst);
    }

    /// Mark the keypair under `alias` as permanently unusable, the way a
    /// platform key store does after the unlock method changes. The alias
    /// stays occupied until [`delete`](SecureKeyStore::delete).
    pub fn invalidate(&self, alias: &str) -> Result<()> {
        let mut entries = self.lock()?;
        if let Some(entry) = entries.get_mut(alias) {
            entry.invalidated = true;
            tracing::warn!(alias, "root keypair invalidated");
        }
        Ok(())
    }

    /// Whether a keypair exists under `alias`.
    pub fn contains(&self, alias: &str) -> bool {
        self.lock()
            .map(|entries| entries.contains_key(alias))
            .unwrap_or(false)
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Entry>>> {
        self.entries.lock().map_err(|e| VaultError::KeyStore {
            reason: format!("key store mutex poisoned: {e}"),
        })
    }

    fn usable<'a>(
        entries: &'a HashMap<String, Entry>,
        handle: &RootKeyHandle,
    ) -> Result<&'a RootKeyPair> {
        match entries.get(handle.alias()) {
            Some(entry) if entry.invalidated => Err(VaultError::KeyUnavailable {
                reason: format!("root keypair {:?} was invalidated", handle.alias()),
            }),
            Some(entry) => Ok(&entry.pair),
            None => Err(VaultError::KeyUnavailable {
                reason: format!("no root keypair under {:?}", handle.alias()),
            }),
        }
    }
}

impl Default for MemoryKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SecureKeyStore for MemoryKeyStore {
    fn get_or_create_keypair(
        &self,
        alias: &str,
        require_lock_screen: bool,
    ) -> Result<RootKeyHandle> {
        validate_alias(alias)?;
        if require_lock_screen && !self.is_device_protected() {
            return Err(VaultError::DeviceNotProtected);
        }

        let mut entries = self.lock()?;
        if !entries.contains_key(alias) {
            let pair = RootKeyPair::generate()?;
            entries.insert(
                alias.to_string(),
                Entry {
                    pair,
                    invalidated: false,
                },
            );
            tracing::info!(alias, "generated root keypair in memory key store");
        }
        Ok(RootKeyHandle::new(alias))
    }

    fn wrap(&self, handle: &RootKeyHandle, plaintext_key: &[u8]) -> Result<Vec<u8>> {
        let entries = self.lock()?;
        Self::usable(&entries, handle)?.wrap(plaintext_key)
    }

    fn unwrap(&self, handle: &RootKeyHandle, wrapped: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let entries = self.lock()?;
        Self::usable(&entries, handle)?.unwrap(wrapped)
    }

    fn delete(&self, alias: &str) -> Result<()> {
        if self.lock()?.remove(alias).is_some() {
            tracing::info!(alias, "deleted root keypair from memory key store");
        }
        Ok(())
    }

    fn is_device_protected(&self) -> bool {
        self.device_protected.load(Ordering::SeqCst)
    }

    fn is_hardware_backed(&self) -> bool {
        self.hardware_backed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &[u8] = b"0123456789abcdef0123456789abcdef";

    #[test]
    fn keypair_is_created_once() {
        let store = MemoryKeyStore::new();
        assert!(!store.contains("vault"));

        let first = store.get_or_create_keypair("vault", true).unwrap();
        let wrapped = store.wrap(&first, KEY).unwrap();

        let second = store.get_or_create_keypair("vault", true).unwrap();
        assert_eq!(first, second);
        assert_eq!(store.unwrap(&second, &wrapped).unwrap().as_slice(), KEY);
    }

    #[test]
    fn unprotected_device_rejected_when_lock_screen_required() {
        let store = MemoryKeyStore::new();
        store.set_device_protected(false);

        let result = store.get_or_create_keypair("vault", true);
        assert!(matches!(result, Err(VaultError::DeviceNotProtected)));
        assert!(!store.contains("vault"));

        assert!(store.get_or_create_keypair("vault", false).is_ok());
    }

    #[test]
    fn invalidated_keypair_is_unavailable() {
        let store = MemoryKeyStore::new();
        let handle = store.get_or_create_keypair("vault", false).unwrap();
        let wrapped = store.wrap(&handle, KEY).unwrap();

        store.invalidate("vault").unwrap();

        assert!(matches!(
            store.unwrap(&handle, &wrapped),
            Err(VaultError::KeyUnavailable { .. })
        ));
        assert!(matches!(
            store.wrap(&handle, KEY),
            Err(VaultError::KeyUnavailable { .. })
        ));
    }

    #[test]
    fn deleted_keypair_is_unavailable_and_delete_is_idempotent() {
        let store = MemoryKeyStore::new();
        let handle = store.get_or_create_keypair("vault", false).unwrap();
        let wrapped = store.wrap(&handle, KEY).unwrap();

        store.delete("vault").unwrap();
        store.delete("vault").unwrap();
        assert!(!store.contains("vault"));

        assert!(matches!(
            store.unwrap(&handle, &wrapped),
            Err(VaultError::KeyUnavailable { .. })
        ));
    }

    #[test]
    fn regenerated_keypair_cannot_unwrap_old_blob() {
        let store = MemoryKeyStore::new();
        let handle = store.get_or_create_keypair("vault", false).unwrap();
        let wrapped = store.wrap(&handle, KEY).unwrap();

        store.delete("vault").unwrap();
        let handle = store.get_or_create_keypair("vault", false).unwrap();

        assert!(matches!(
            store.unwrap(&handle, &wrapped),
            Err(VaultError::KeyUnavailable { .. })
        ));
    }

    #[test]
    fn device_switches() {
        let store = MemoryKeyStore::default();
        assert!(store.is_device_protected());
        assert!(!store.is_hardware_backed());

        store.set_hardware_backed(true);
        assert!(store.is_hardware_backed());
    }
}
