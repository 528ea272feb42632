//! In-process root keypair used by the software key stores.
//!
//! Wrapping is X25519 ECIES: a fresh ephemeral keypair is agreed with the
//! root public key, HKDF-SHA256 turns the shared secret into a one-time
//! AES-256-GCM key, and the data key is sealed under it. Only the holder of
//! the root private key can redo the agreement.
//!
//! Wrapped blob layout:
//! ```text
//! [1 byte:  format version (0x01)]
//! [32 bytes: ephemeral X25519 public key]
//! [12 bytes: AES-256-GCM nonce]
//! [remaining: sealed key + 16-byte tag]
//! ```

use ring::hkdf;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::crypto;
use crate::error::{Result, VaultError};

/// Current wrapped-blob format version.
const WRAP_FORMAT_V1: u8 = 0x01;

/// HKDF info string binding derived keys to this purpose.
const WRAP_INFO: &[u8] = b"envault-key-wrap-v1";

/// Length of an X25519 key (public or secret).
pub const X25519_KEY_LEN: usize = 32;

const WRAP_HEADER_LEN: usize = 1 + X25519_KEY_LEN;

/// An X25519 root keypair held in process memory.
///
/// The secret is zeroed on drop (`x25519-dalek`'s `zeroize` feature).
pub struct RootKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl RootKeyPair {
    /// Generate a new keypair from the system CSPRNG.
    pub fn generate() -> Result<Self> {
        let mut bytes = Zeroizing::new([0u8; X25519_KEY_LEN]);
        crypto::fill_random(&mut bytes[..])?;
        Ok(Self::from_secret_bytes(*bytes))
    }

    /// Rebuild a keypair from stored secret bytes.
    pub fn from_secret_bytes(bytes: [u8; X25519_KEY_LEN]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Secret scalar bytes, for persisting inside a protected container.
    pub fn secret_bytes(&self) -> Zeroizing<[u8; X25519_KEY_LEN]> {
        Zeroizing::new(self.secret.to_bytes())
    }

    pub fn public_bytes(&self) -> &[u8; X25519_KEY_LEN] {
        self.public.as_bytes()
    }

    /// Seal `plaintext_key` so that only this keypair can recover it.
    pub fn wrap(&self, plaintext_key: &[u8]) -> Result<Vec<u8>> {
        let ephemeral = Self::generate()?;
        let kek = derive_wrapping_key(
            &ephemeral.secret,
            &self.public,
            ephemeral.public_bytes(),
            self.public_bytes(),
        )
        .map_err(|reason| VaultError::EncryptionFailed { reason })?;

        let sealed = crypto::seal(plaintext_key, &kek[..])?;

        let mut blob = Vec::with_capacity(WRAP_HEADER_LEN + sealed.len());
        blob.push(WRAP_FORMAT_V1);
        blob.extend_from_slice(ephemeral.public_bytes());
        blob.extend_from_slice(&sealed);
        Ok(blob)
    }

    /// Recover a key sealed by [`wrap`](Self::wrap).
    ///
    /// Any failure means the blob was not produced for this keypair (or was
    /// damaged), so it is reported as [`VaultError::KeyUnavailable`].
    pub fn unwrap(&self, wrapped: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        if wrapped.len() < WRAP_HEADER_LEN + crypto::NONCE_LEN_BYTES + crypto::TAG_LEN {
            return Err(VaultError::KeyUnavailable {
                reason: format!("wrapped key is truncated ({} bytes)", wrapped.len()),
            });
        }
        if wrapped[0] != WRAP_FORMAT_V1 {
            return Err(VaultError::KeyUnavailable {
                reason: format!("unsupported wrapped key format {:#04x}", wrapped[0]),
            });
        }

        let mut ephemeral_bytes = [0u8; X25519_KEY_LEN];
        ephemeral_bytes.copy_from_slice(&wrapped[1..WRAP_HEADER_LEN]);
        let ephemeral_public = PublicKey::from(ephemeral_bytes);

        let kek = derive_wrapping_key(
            &self.secret,
            &ephemeral_public,
            &ephemeral_bytes,
            self.public_bytes(),
        )
        .map_err(|reason| VaultError::KeyUnavailable { reason })?;

        match crypto::open(&wrapped[WRAP_HEADER_LEN..], &kek[..]) {
            Ok(plaintext) => Ok(plaintext),
            Err(VaultError::IntegrityError { .. }) => Err(VaultError::KeyUnavailable {
                reason: "wrapped key does not match the root keypair".into(),
            }),
            Err(e) => Err(VaultError::KeyUnavailable {
                reason: e.to_string(),
            }),
        }
    }
}

/// ECDH + HKDF-SHA256. Salt is `ephemeral_public || root_public` so the
/// derived key is bound to both parties.
fn derive_wrapping_key(
    secret: &StaticSecret,
    peer: &PublicKey,
    ephemeral_public: &[u8; X25519_KEY_LEN],
    root_public: &[u8; X25519_KEY_LEN],
) -> std::result::Result<Zeroizing<[u8; crypto::KEY_LEN]>, String> {
    let shared = secret.diffie_hellman(peer);
    if !shared.was_contributory() {
        return Err("non-contributory X25519 agreement".into());
    }

    let mut salt_bytes = [0u8; 2 * X25519_KEY_LEN];
    salt_bytes[..X25519_KEY_LEN].copy_from_slice(ephemeral_public);
    salt_bytes[X25519_KEY_LEN..].copy_from_slice(root_public);

    let prk = hkdf::Salt::new(hkdf::HKDF_SHA256, &salt_bytes).extract(shared.as_bytes());
    let info = [WRAP_INFO];
    let okm = prk
        .expand(&info, hkdf::HKDF_SHA256)
        .map_err(|_| "HKDF expand failed".to_string())?;

    let mut kek = Zeroizing::new([0u8; crypto::KEY_LEN]);
    okm.fill(&mut kek[..])
        .map_err(|_| "HKDF fill failed".to_string())?;
    Ok(kek)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_unwrap_roundtrip() {
        let pair = RootKeyPair::generate().unwrap();
        let dek = crypto::random_bytes(crypto::KEY_LEN).unwrap();

        let wrapped = pair.wrap(&dek).unwrap();
        assert_eq!(wrapped[0], WRAP_FORMAT_V1);
        assert_ne!(&wrapped[WRAP_HEADER_LEN..], dek.as_slice());

        let unwrapped = pair.unwrap(&wrapped).unwrap();
        assert_eq!(unwrapped.as_slice(), dek.as_slice());
    }

    #[test]
    fn wrapping_is_randomized() {
        let pair = RootKeyPair::generate().unwrap();
        let dek = [5u8; crypto::KEY_LEN];
        assert_ne!(pair.wrap(&dek).unwrap(), pair.wrap(&dek).unwrap());
    }

    #[test]
    fn foreign_keypair_cannot_unwrap() {
        let owner = RootKeyPair::generate().unwrap();
        let stranger = RootKeyPair::generate().unwrap();
        let wrapped = owner.wrap(&[1u8; crypto::KEY_LEN]).unwrap();

        let result = stranger.unwrap(&wrapped);
        assert!(matches!(result, Err(VaultError::KeyUnavailable { .. })));
    }

    #[test]
    fn restored_keypair_unwraps() {
        let pair = RootKeyPair::generate().unwrap();
        let wrapped = pair.wrap(&[3u8; crypto::KEY_LEN]).unwrap();

        let restored = RootKeyPair::from_secret_bytes(*pair.secret_bytes());
        assert_eq!(restored.public_bytes(), pair.public_bytes());
        assert_eq!(
            restored.unwrap(&wrapped).unwrap().as_slice(),
            &[3u8; crypto::KEY_LEN]
        );
    }

    #[test]
    fn malformed_blobs_are_key_unavailable() {
        let pair = RootKeyPair::generate().unwrap();
        let mut wrapped = pair.wrap(&[3u8; crypto::KEY_LEN]).unwrap();

        assert!(matches!(
            pair.unwrap(&wrapped[..10]),
            Err(VaultError::KeyUnavailable { .. })
        ));

        wrapped[0] = 0x7F;
        assert!(matches!(
            pair.unwrap(&wrapped),
            Err(VaultError::KeyUnavailable { .. })
        ));
    }
}
