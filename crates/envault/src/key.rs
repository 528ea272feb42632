//! Key material types shared by the wrapper, the data key manager and the
//! credential cipher.

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto;
use crate::error::Result;

/// Length of the data-encryption key in bytes (AES-256).
pub const DATA_KEY_LEN: usize = crypto::KEY_LEN;

/// The vault's symmetric data-encryption key (DEK).
///
/// Lives only in memory and is zeroed when dropped. `Debug` never prints the
/// key bytes.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DataKey([u8; DATA_KEY_LEN]);

impl DataKey {
    /// Generate a fresh key from the system CSPRNG.
    pub fn generate() -> Result<Self> {
        let mut bytes = [0u8; DATA_KEY_LEN];
        crypto::fill_random(&mut bytes)?;
        let key = Self(bytes);
        bytes.zeroize();
        Ok(key)
    }

    /// Build a key from raw bytes. Returns `None` on a length mismatch.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; DATA_KEY_LEN] = bytes.try_into().ok()?;
        Some(Self(array))
    }

    /// Raw key bytes, for handing to the cipher or the wrapper.
    pub fn as_bytes(&self) -> &[u8; DATA_KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DataKey([REDACTED])")
    }
}

/// A [`DataKey`] sealed under the root public key.
///
/// Safe to persist on untrusted storage: only the private half of the root
/// keypair, which never leaves the key store, can reverse it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedDataKey(Vec<u8>);

impl WrappedDataKey {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_differ() {
        let a = DataKey::generate().unwrap();
        let b = DataKey::generate().unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn from_slice_checks_length() {
        assert!(DataKey::from_slice(&[7u8; DATA_KEY_LEN]).is_some());
        assert!(DataKey::from_slice(&[7u8; 16]).is_none());
        assert!(DataKey::from_slice(&[]).is_none());
    }

    #[test]
    fn debug_is_redacted() {
        let key = DataKey::from_slice(&[0xAB; DATA_KEY_LEN]).unwrap();
        let printed = format!("{key:?}");
        assert_eq!(printed, "DataKey([REDACTED])");
        assert!(!printed.contains("171"));
    }
}
