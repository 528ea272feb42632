//! File-based fallback key store.
//!
//! Each root keypair lives in `<dir>/<alias>.rootkey`, sealed with
//! AES-256-GCM under a key derived from machine-specific data (hostname,
//! username) and an application salt. This is not as strong as a hardware
//! keystore: anyone with the same account on the same machine can rebuild the
//! device key. It does keep the private key out of plaintext on disk.
//!
//! Key file layout (binary):
//! ```text
//! [32 bytes: PBKDF2 salt]
//! [12 bytes: AES-256-GCM nonce]
//! [remaining: sealed X25519 secret + 16-byte tag]
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use zeroize::Zeroizing;

use super::software::{RootKeyPair, X25519_KEY_LEN};
use super::{RootKeyHandle, SecureKeyStore, validate_alias};
use crate::crypto;
use crate::error::{Result, VaultError};

/// Mixed into the device-derived key material. Changing this invalidates
/// every existing key file.
const APP_SALT: &[u8] = b"envault-file-keystore-v1";

const KEY_FILE_EXTENSION: &str = "rootkey";

const MIN_KEY_FILE_LEN: usize =
    crypto::SALT_LEN + crypto::NONCE_LEN_BYTES + X25519_KEY_LEN + crypto::TAG_LEN;

/// Software-protected key store backed by files in a directory.
///
/// Loaded keypairs are cached for the lifetime of the instance so the PBKDF2
/// derivation runs once per alias. Every use re-checks that the key file
/// still exists, so a deletion by another process surfaces as
/// [`VaultError::KeyUnavailable`].
pub struct FileKeyStore {
    dir: PathBuf,
    device_protected: bool,
    loaded: Mutex<HashMap<String, RootKeyPair>>,
}

impl FileKeyStore {
    /// Create a key store that keeps key files in `dir`.
    ///
    /// The directory is created on first key generation.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            device_protected: true,
            loaded: Mutex::new(HashMap::new()),
        }
    }

    /// Override the device-protection answer. The file store cannot query the
    /// OS lock screen itself, so the host application supplies it.
    pub fn with_device_protected(mut self, protected: bool) -> Self {
        self.device_protected = protected;
        self
    }

    /// Path of the key file for `alias`.
    pub fn key_path(&self, alias: &str) -> PathBuf {
        self.dir.join(format!("{alias}.{KEY_FILE_EXTENSION}"))
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, RootKeyPair>>> {
        self.loaded.lock().map_err(|e| VaultError::KeyStore {
            reason: format!("key store mutex poisoned: {e}"),
        })
    }

    /// Derive the file-sealing key from machine-specific data.
    fn device_derived_key(salt: &[u8]) -> Zeroizing<[u8; crypto::KEY_LEN]> {
        let hostname = Self::get_hostname();
        let username = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown-user".into());

        let mut material =
            Zeroizing::new(Vec::with_capacity(hostname.len() + username.len() + APP_SALT.len()));
        material.extend_from_slice(hostname.as_bytes());
        material.extend_from_slice(username.as_bytes());
        material.extend_from_slice(APP_SALT);

        let mut key = Zeroizing::new([0u8; crypto::KEY_LEN]);
        crypto::derive_key_with_salt(&material, salt, &mut key);
        key
    }

    /// Falls back to "unknown-host" if the hostname cannot be determined.
    fn get_hostname() -> String {
        #[cfg(unix)]
        {
            std::fs::read_to_string("/etc/hostname")
                .map(|s| s.trim().to_string())
                .or_else(|_| std::env::var("HOSTNAME"))
                .or_else(|_| std::env::var("HOST"))
                .unwrap_or_else(|_| "unknown-host".into())
        }

        #[cfg(not(unix))]
        {
            std::env::var("COMPUTERNAME")
                .or_else(|_| std::env::var("HOSTNAME"))
                .unwrap_or_else(|_| "unknown-host".into())
        }
    }

    fn read_keypair(path: &Path) -> Result<RootKeyPair> {
        let data = std::fs::read(path).map_err(|e| VaultError::KeyUnavailable {
            reason: format!("cannot read key file {}: {e}", path.display()),
        })?;
        if data.len() < MIN_KEY_FILE_LEN {
            return Err(VaultError::KeyUnavailable {
                reason: "key file is too small / corrupted".into(),
            });
        }

        let (salt, sealed) = data.split_at(crypto::SALT_LEN);
        let device_key = Self::device_derived_key(salt);
        let secret = crypto::open(sealed, &device_key[..]).map_err(|e| {
            VaultError::KeyUnavailable {
                reason: format!("key file cannot be opened on this device: {e}"),
            }
        })?;

        let bytes: Zeroizing<[u8; X25519_KEY_LEN]> =
            Zeroizing::new(secret.as_slice().try_into().map_err(|_| {
                VaultError::KeyUnavailable {
                    reason: format!(
                        "key file holds {} bytes, expected {X25519_KEY_LEN}",
                        secret.len()
                    ),
                }
            })?);
        Ok(RootKeyPair::from_secret_bytes(*bytes))
    }

    fn write_keypair(&self, path: &Path, pair: &RootKeyPair) -> Result<()> {
        let salt = crypto::random_bytes(crypto::SALT_LEN)?;
        let device_key = Self::device_derived_key(&salt);
        let sealed = crypto::seal(&pair.secret_bytes()[..], &device_key[..])?;

        let mut data = Vec::with_capacity(salt.len() + sealed.len());
        data.extend_from_slice(&salt);
        data.extend_from_slice(&sealed);

        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(path, &data)?;

        // Owner read/write only.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::info!(path = %path.display(), "stored root keypair in file key store");
        Ok(())
    }

    /// Run `f` with the loaded keypair for `handle`, loading it if needed.
    fn with_keypair<T>(
        &self,
        handle: &RootKeyHandle,
        f: impl FnOnce(&RootKeyPair) -> Result<T>,
    ) -> Result<T> {
        let path = self.key_path(handle.alias());
        let mut loaded = self.lock()?;

        if !path.exists() {
            loaded.remove(handle.alias());
            return Err(VaultError::KeyUnavailable {
                reason: format!("no root keypair under {:?}", handle.alias()),
            });
        }

        if !loaded.contains_key(handle.alias()) {
            let pair = Self::read_keypair(&path)?;
            loaded.insert(handle.alias().to_string(), pair);
        }
        match loaded.get(handle.alias()) {
            Some(pair) => f(pair),
            None => Err(VaultError::Internal("loaded keypair vanished".into())),
        }
    }
}

impl SecureKeyStore for FileKeyStore {
    fn get_or_create_keypair(
        &self,
        alias: &str,
        require_lock_screen: bool,
    ) -> Result<RootKeyHandle> {
        validate_alias(alias)?;
        if require_lock_screen && !self.device_protected {
            return Err(VaultError::DeviceNotProtected);
        }

        let path = self.key_path(alias);
        let mut loaded = self.lock()?;

        if path.exists() {
            if !loaded.contains_key(alias) {
                // Read it back now so an unusable key file fails at open.
                let pair = Self::read_keypair(&path)?;
                loaded.insert(alias.to_string(), pair);
            }
            tracing::debug!(alias, "found root keypair in file key store");
        } else {
            let pair = RootKeyPair::generate()?;
            self.write_keypair(&path, &pair)?;
            loaded.insert(alias.to_string(), pair);
        }

        Ok(RootKeyHandle::new(alias))
    }

    fn wrap(&self, handle: &RootKeyHandle, plaintext_key: &[u8]) -> Result<Vec<u8>> {
        self.with_keypair(handle, |pair| pair.wrap(plaintext_key))
    }

    fn unwrap(&self, handle: &RootKeyHandle, wrapped: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        self.with_keypair(handle, |pair| pair.unwrap(wrapped))
    }

    fn delete(&self, alias: &str) -> Result<()> {
        validate_alias(alias)?;
        self.lock()?.remove(alias);

        let path = self.key_path(alias);
        if path.exists() {
            std::fs::remove_file(&path)?;
            tracing::info!(path = %path.display(), "deleted root keypair from file key store");
        }
        Ok(())
    }

    fn is_device_protected(&self) -> bool {
        self.device_protected
    }

    fn is_hardware_backed(&self) -> bool {
        false
    }
}
