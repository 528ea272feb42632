//! macOS Keychain Services key store.

use security_framework::passwords::{
    delete_generic_password, get_generic_password, set_generic_password,
};
use zeroize::Zeroizing;

use super::software::{RootKeyPair, X25519_KEY_LEN};
use super::{RootKeyHandle, SecureKeyStore, validate_alias};
use crate::error::{Result, VaultError};

/// The Security framework error code for "item not found"
/// (`errSecItemNotFound = -25300`).
const MACOS_ERR_SEC_ITEM_NOT_FOUND: i32 = -25300;

/// Keeps each root keypair's secret as a generic-password item in the user's
/// login keychain, one account per alias.
///
/// The keychain is protected by the user's login password. Wrapping happens
/// in-process after the secret is fetched, so this is not hardware-backed.
pub struct MacOSKeyStore {
    service_name: String,
    device_protected: bool,
}

impl MacOSKeyStore {
    const DEFAULT_SERVICE: &'static str = "com.envault.rootkey";

    pub fn new() -> Self {
        Self::with_service(Self::DEFAULT_SERVICE)
    }

    /// Use a custom keychain service name, e.g. to isolate test runs.
    pub fn with_service(service: &str) -> Self {
        Self {
            service_name: service.to_string(),
            device_protected: true,
        }
    }

    /// Override the device-protection answer supplied by the host app.
    pub fn with_device_protected(mut self, protected: bool) -> Self {
        self.device_protected = protected;
        self
    }

    fn load(&self, alias: &str) -> Result<Option<RootKeyPair>> {
        match get_generic_password(&self.service_name, alias) {
            Ok(data) => {
                let data = Zeroizing::new(data);
                let bytes: [u8; X25519_KEY_LEN] =
                    data.as_slice()
                        .try_into()
                        .map_err(|_| VaultError::KeyUnavailable {
                            reason: format!("keychain item for {alias:?} is malformed"),
                        })?;
                Ok(Some(RootKeyPair::from_secret_bytes(bytes)))
            }
            Err(e) if e.code() == MACOS_ERR_SEC_ITEM_NOT_FOUND => Ok(None),
            Err(e) => Err(VaultError::KeyStore {
                reason: format!("macOS keychain read failed: {e}"),
            }),
        }
    }

    fn require(&self, handle: &RootKeyHandle) -> Result<RootKeyPair> {
        self.load(handle.alias())?
            .ok_or_else(|| VaultError::KeyUnavailable {
                reason: format!("no root keypair under {:?}", handle.alias()),
            })
    }
}

impl Default for MacOSKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SecureKeyStore for MacOSKeyStore {
    fn get_or_create_keypair(
        &self,
        alias: &str,
        require_lock_screen: bool,
    ) -> Result<RootKeyHandle> {
        validate_alias(alias)?;
        if require_lock_screen && !self.device_protected {
            return Err(VaultError::DeviceNotProtected);
        }

        if self.load(alias)?.is_none() {
            let pair = RootKeyPair::generate()?;
            set_generic_password(&self.service_name, alias, &pair.secret_bytes()[..]).map_err(
                |e| VaultError::KeyStore {
                    reason: format!("macOS keychain write failed: {e}"),
                },
            )?;
            tracing::info!(service = %self.service_name, alias, "stored root keypair in macOS keychain");
        }
        Ok(RootKeyHandle::new(alias))
    }

    fn wrap(&self, handle: &RootKeyHandle, plaintext_key: &[u8]) -> Result<Vec<u8>> {
        self.require(handle)?.wrap(plaintext_key)
    }

    fn unwrap(&self, handle: &RootKeyHandle, wrapped: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        self.require(handle)?.unwrap(wrapped)
    }

    fn delete(&self, alias: &str) -> Result<()> {
        match delete_generic_password(&self.service_name, alias) {
            Ok(()) => {
                tracing::info!(service = %self.service_name, alias, "deleted root keypair from macOS keychain");
                Ok(())
            }
            Err(e) if e.code() == MACOS_ERR_SEC_ITEM_NOT_FOUND => Ok(()),
            Err(e) => Err(VaultError::KeyStore {
                reason: format!("macOS keychain delete failed: {e}"),
            }),
        }
    }

    fn is_device_protected(&self) -> bool {
        self.device_protected
    }

    fn is_hardware_backed(&self) -> bool {
        false
    }
}
