//! AES-256-GCM credential cipher using the `ring` crate.
//!
//! This module provides the symmetric primitives of the vault:
//!
//! - **Credential cipher**: [`encrypt`] / [`decrypt`] seal credential payloads
//!   with the data-encryption key. Output layout is
//!   `nonce (12) || ciphertext || tag (16)`.
//! - **Raw sealing**: [`seal`] / [`open`] do the same for any 256-bit key and
//!   are reused by the software key stores.
//! - **Key derivation**: PBKDF2-HMAC-SHA256 for the device-derived key of the
//!   file key store.
//! - **Random generation**: CSPRNG bytes via `ring`.
//!
//! # Security Notes
//!
//! - Every seal draws a fresh random 96-bit nonce. Equal plaintexts never
//!   produce equal ciphertexts, and collisions are negligible below ~2^32
//!   encryptions per key.
//! - Authentication failure is reported as [`VaultError::IntegrityError`],
//!   never as corrupted plaintext.

use ring::aead::{self, Aad, BoundKey, NONCE_LEN, Nonce, NonceSequence, SealingKey, UnboundKey};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use zeroize::Zeroizing;

use crate::error::{Result, VaultError};
use crate::key::DataKey;

/// Length of the AES-256-GCM key in bytes.
pub const KEY_LEN: usize = 32;

/// Length of the AES-256-GCM nonce in bytes (96 bits).
pub const NONCE_LEN_BYTES: usize = NONCE_LEN;

/// Length of the GCM authentication tag in bytes.
pub const TAG_LEN: usize = 16;

/// Length of the PBKDF2 salt in bytes.
pub const SALT_LEN: usize = 32;

/// PBKDF2 iteration count: 600,000 per OWASP 2023 recommendation for
/// HMAC-SHA256.
const PBKDF2_ITERATIONS: u32 = 600_000;

static PBKDF2_ALG: pbkdf2::Algorithm = pbkdf2::PBKDF2_HMAC_SHA256;

static AEAD_ALG: &aead::Algorithm = &aead::AES_256_GCM;

// ---------------------------------------------------------------------------
// Nonce handling
// ---------------------------------------------------------------------------

/// A nonce sequence that yields exactly one nonce and then errors, so each
/// bound key is used for a single operation.
struct SingleNonce(Option<[u8; NONCE_LEN_BYTES]>);

impl SingleNonce {
    fn new(bytes: [u8; NONCE_LEN_BYTES]) -> Self {
        Self(Some(bytes))
    }
}

impl NonceSequence for SingleNonce {
    fn advance(&mut self) -> std::result::Result<Nonce, ring::error::Unspecified> {
        self.0
            .take()
            .map(Nonce::assume_unique_for_key)
            .ok_or(ring::error::Unspecified)
    }
}

// ---------------------------------------------------------------------------
// Credential cipher
// ---------------------------------------------------------------------------

/// Encrypt a credential payload with the data-encryption key.
///
/// # Errors
///
/// Returns [`VaultError::EncryptionFailed`] if the CSPRNG or `ring` fails.
pub fn encrypt(plaintext: &[u8], dek: &DataKey) -> Result<Vec<u8>> {
    seal(plaintext, dek.as_bytes())
}

/// Decrypt a credential payload produced by [`encrypt`].
///
/// # Errors
///
/// - [`VaultError::DecryptionFailed`] if the input is too short to hold a
///   nonce and tag.
/// - [`VaultError::IntegrityError`] if authentication fails (wrong key or
///   tampered bytes).
pub fn decrypt(ciphertext: &[u8], dek: &DataKey) -> Result<Vec<u8>> {
    let mut plaintext = open(ciphertext, dek.as_bytes())?;
    Ok(std::mem::take(&mut *plaintext))
}

// ---------------------------------------------------------------------------
// Raw sealing
// ---------------------------------------------------------------------------

/// Seal `plaintext` under a 256-bit `key`, returning
/// `nonce || ciphertext || tag`.
pub fn seal(plaintext: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    if key.len() != KEY_LEN {
        return Err(VaultError::EncryptionFailed {
            reason: format!("key must be {} bytes, got {}", KEY_LEN, key.len()),
        });
    }

    let mut nonce_bytes = [0u8; NONCE_LEN_BYTES];
    SystemRandom::new()
        .fill(&mut nonce_bytes)
        .map_err(|_| VaultError::EncryptionFailed {
            reason: "failed to generate random nonce".into(),
        })?;

    let unbound_key = UnboundKey::new(AEAD_ALG, key).map_err(|_| VaultError::EncryptionFailed {
        reason: "failed to create AES-256-GCM key".into(),
    })?;
    let mut sealing_key = SealingKey::new(unbound_key, SingleNonce::new(nonce_bytes));

    // Sized up front so the buffer never reallocates while it holds
    // plaintext; it is zeroed if sealing fails.
    let mut out = Zeroizing::new(Vec::with_capacity(
        NONCE_LEN_BYTES + plaintext.len() + TAG_LEN,
    ));
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(plaintext);
    let tag = sealing_key
        .seal_in_place_separate_tag(Aad::empty(), &mut out[NONCE_LEN_BYTES..])
        .map_err(|_| VaultError::EncryptionFailed {
            reason: "seal_in_place failed".into(),
        })?;
    out.extend_from_slice(tag.as_ref());

    tracing::trace!(
        plaintext_len = plaintext.len(),
        sealed_len = out.len(),
        "sealed data"
    );

    Ok(std::mem::take(&mut *out))
}

/// Open a blob produced by [`seal`].
///
/// The plaintext is decrypted in place and returned without further copies,
/// so it is zeroed wherever it is dropped.
pub fn open(sealed: &[u8], key: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if key.len() != KEY_LEN {
        return Err(VaultError::DecryptionFailed {
            reason: format!("key must be {} bytes, got {}", KEY_LEN, key.len()),
        });
    }
    if sealed.len() < NONCE_LEN_BYTES + TAG_LEN {
        return Err(VaultError::DecryptionFailed {
            reason: format!(
                "ciphertext is {} bytes, shorter than nonce and tag ({})",
                sealed.len(),
                NONCE_LEN_BYTES + TAG_LEN
            ),
        });
    }

    let (nonce_bytes, body) = sealed.split_at(NONCE_LEN_BYTES);
    let mut nonce = [0u8; NONCE_LEN_BYTES];
    nonce.copy_from_slice(nonce_bytes);

    let unbound_key = UnboundKey::new(AEAD_ALG, key).map_err(|_| VaultError::DecryptionFailed {
        reason: "failed to create AES-256-GCM key".into(),
    })?;
    let mut opening_key = aead::OpeningKey::new(unbound_key, SingleNonce::new(nonce));

    let mut in_out = Zeroizing::new(body.to_vec());
    let plaintext_len = opening_key
        .open_in_place(Aad::empty(), &mut in_out[..])
        .map_err(|_| VaultError::IntegrityError {
            reason: "authentication failed: wrong key or corrupted data".into(),
        })?
        .len();
    in_out.truncate(plaintext_len);

    tracing::trace!(
        sealed_len = sealed.len(),
        plaintext_len,
        "opened data"
    );

    Ok(in_out)
}

// ---------------------------------------------------------------------------
// Key derivation
// ---------------------------------------------------------------------------

/// Derive a 256-bit key from `password` and `salt` with PBKDF2-HMAC-SHA256.
pub fn derive_key_with_salt(password: &[u8], salt: &[u8], out: &mut [u8; KEY_LEN]) {
    let iterations =
        std::num::NonZeroU32::new(PBKDF2_ITERATIONS).expect("PBKDF2_ITERATIONS is non-zero");
    pbkdf2::derive(PBKDF2_ALG, iterations, salt, password, out);
}

// ---------------------------------------------------------------------------
// Random bytes
// ---------------------------------------------------------------------------

/// Fill `buf` from the system CSPRNG.
pub fn fill_random(buf: &mut [u8]) -> Result<()> {
    SystemRandom::new().fill(buf).map_err(rng_failure)
}

fn rng_failure(_: ring::error::Unspecified) -> VaultError {
    VaultError::EncryptionFailed {
        reason: "failed to generate random bytes".into(),
    }
}

/// Generate `len` cryptographically secure random bytes.
pub fn random_bytes(len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    fill_random(&mut buf)?;
    Ok(buf)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> DataKey {
        DataKey::generate().unwrap()
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = test_key();
        let plaintext = b"hello, envault!";

        let ciphertext = encrypt(plaintext, &key).unwrap();
        assert_eq!(ciphertext.len(), NONCE_LEN_BYTES + plaintext.len() + TAG_LEN);

        let decrypted = decrypt(&ciphertext, &key).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn equal_plaintexts_encrypt_differently() {
        let key = test_key();
        let a = encrypt(b"same value", &key).unwrap();
        let b = encrypt(b"same value", &key).unwrap();
        assert_ne!(a, b);
        assert_ne!(a[..NONCE_LEN_BYTES], b[..NONCE_LEN_BYTES]);
    }

    #[test]
    fn decrypt_with_wrong_key_is_integrity_error() {
        let ciphertext = encrypt(b"secret data", &test_key()).unwrap();
        let result = decrypt(&ciphertext, &test_key());
        assert!(matches!(result, Err(VaultError::IntegrityError { .. })));
    }

    #[test]
    fn tampered_ciphertext_is_integrity_error() {
        let key = test_key();
        let mut ciphertext = encrypt(b"secret data", &key).unwrap();
        ciphertext[NONCE_LEN_BYTES] ^= 0x01;

        let result = decrypt(&ciphertext, &key);
        assert!(matches!(result, Err(VaultError::IntegrityError { .. })));
    }

    #[test]
    fn tampered_nonce_is_integrity_error() {
        let key = test_key();
        let mut ciphertext = encrypt(b"secret data", &key).unwrap();
        ciphertext[0] ^= 0x80;

        let result = decrypt(&ciphertext, &key);
        assert!(matches!(result, Err(VaultError::IntegrityError { .. })));
    }

    #[test]
    fn truncated_ciphertext_is_decryption_failure() {
        let key = test_key();
        let result = decrypt(&[0u8; NONCE_LEN_BYTES + TAG_LEN - 1], &key);
        assert!(matches!(result, Err(VaultError::DecryptionFailed { .. })));
    }

    #[test]
    fn invalid_key_length_rejected() {
        let short_key = vec![0u8; 16];
        assert!(matches!(
            seal(b"test", &short_key),
            Err(VaultError::EncryptionFailed { .. })
        ));
        assert!(matches!(
            open(&[0u8; 64], &short_key),
            Err(VaultError::DecryptionFailed { .. })
        ));
    }

    #[test]
    fn empty_plaintext_roundtrip() {
        let key = test_key();
        let ciphertext = encrypt(b"", &key).unwrap();
        assert_eq!(decrypt(&ciphertext, &key).unwrap(), b"");
    }

    #[test]
    fn pbkdf2_deterministic_with_same_salt() {
        let salt = [9u8; SALT_LEN];
        let mut key1 = [0u8; KEY_LEN];
        let mut key2 = [0u8; KEY_LEN];
        derive_key_with_salt(b"material", &salt, &mut key1);
        derive_key_with_salt(b"material", &salt, &mut key2);
        assert_eq!(key1, key2);

        let mut key3 = [0u8; KEY_LEN];
        derive_key_with_salt(b"other material", &salt, &mut key3);
        assert_ne!(key1, key3);
    }

    #[test]
    fn csprng_failure_is_encryption_failure() {
        assert!(matches!(
            rng_failure(ring::error::Unspecified),
            VaultError::EncryptionFailed { .. }
        ));
    }

    #[test]
    fn random_bytes_has_requested_length() {
        assert_eq!(random_bytes(KEY_LEN).unwrap().len(), KEY_LEN);
        assert!(random_bytes(0).unwrap().is_empty());
    }
}
