//! Vault error types.
//!
//! Every public API in this crate surfaces failures through [`VaultError`].
//! The variants follow the recovery path a caller has to take: a missing lock
//! screen is fixed by the user, an unavailable root key only by a reset, and
//! a corrupted credential affects that credential alone.

/// Unified error type for the envault crate.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    // -- Device / key custody ----------------------------------------------
    /// A lock screen is required but the device has no unlock credential.
    ///
    /// Retrying does not help; the user has to protect the device first.
    #[error("device is not protected by a lock screen")]
    DeviceNotProtected,

    /// The root keypair is missing, invalidated, or does not match the
    /// stored wrapped key. Only a reset recovers from this.
    #[error("root key unavailable: {reason}")]
    KeyUnavailable { reason: String },

    /// The secure key store failed for a reason other than unavailability.
    #[error("key store failure: {reason}")]
    KeyStore { reason: String },

    // -- Cipher ------------------------------------------------------------
    /// Ciphertext failed AEAD authentication (tampered or foreign data).
    #[error("integrity check failed: {reason}")]
    IntegrityError { reason: String },

    /// Ciphertext could not be decrypted for a reason other than failed
    /// authentication (truncated, malformed encoding, ...).
    #[error("decryption failed: {reason}")]
    DecryptionFailed { reason: String },

    /// Encryption failed (bad key length, CSPRNG failure, ring error).
    #[error("encryption failed: {reason}")]
    EncryptionFailed { reason: String },

    // -- Storage -----------------------------------------------------------
    /// The storage backend reported an I/O failure.
    #[error("storage error: {reason}")]
    Storage { reason: String },

    /// Credential names must be non-empty.
    #[error("credential name must not be empty")]
    InvalidName,

    // -- Configuration -----------------------------------------------------
    /// The vault configuration is malformed or invalid.
    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    // -- Concurrency -------------------------------------------------------
    /// The operation needs exclusive access but other handles to the vault
    /// are still alive.
    #[error("vault is still shared by other handles")]
    Busy,

    // -- Underlying errors -------------------------------------------------
    /// I/O error from the filesystem (key files, config files).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A blocking task was cancelled, panicked, or found a poisoned lock.
    #[error("background task failed: {0}")]
    TaskJoin(String),

    /// Catch-all for unexpected internal errors. Prefer a typed variant.
    #[error("internal vault error: {0}")]
    Internal(String),
}

impl VaultError {
    /// Whether this failure can only be cleared by resetting the vault,
    /// which destroys every stored credential.
    pub fn requires_reset(&self) -> bool {
        matches!(self, Self::KeyUnavailable { .. })
    }
}

impl From<rusqlite::Error> for VaultError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage {
            reason: err.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for VaultError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskJoin(err.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, VaultError>;

/// Failure to open a vault.
///
/// Opening is all-or-nothing: no [`Vault`](crate::Vault) exists after this
/// error. Inspect [`cause`](InitError::cause) to decide between asking the
/// user to set a lock screen and offering a destructive reset.
#[derive(Debug, thiserror::Error)]
#[error("vault initialization failed: {cause}")]
pub struct InitError {
    #[source]
    cause: VaultError,
}

impl InitError {
    pub(crate) fn new(cause: VaultError) -> Self {
        Self { cause }
    }

    /// The underlying failure.
    pub fn cause(&self) -> &VaultError {
        &self.cause
    }

    /// Consume the wrapper and return the underlying failure.
    pub fn into_cause(self) -> VaultError {
        self.cause
    }

    /// See [`VaultError::requires_reset`].
    pub fn requires_reset(&self) -> bool {
        self.cause.requires_reset()
    }
}

impl From<InitError> for VaultError {
    fn from(err: InitError) -> Self {
        err.cause
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_key_unavailable_requires_reset() {
        let unavailable = VaultError::KeyUnavailable {
            reason: "invalidated".into(),
        };
        assert!(unavailable.requires_reset());
        assert!(!VaultError::DeviceNotProtected.requires_reset());
        assert!(
            !VaultError::IntegrityError {
                reason: "tag".into()
            }
            .requires_reset()
        );
    }

    #[test]
    fn init_error_exposes_cause() {
        let err = InitError::new(VaultError::DeviceNotProtected);
        assert!(matches!(err.cause(), VaultError::DeviceNotProtected));
        assert!(!err.requires_reset());
        assert_eq!(
            err.to_string(),
            "vault initialization failed: device is not protected by a lock screen"
        );
        assert!(matches!(err.into_cause(), VaultError::DeviceNotProtected));
    }

    #[test]
    fn sqlite_errors_map_to_storage() {
        let err: VaultError = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(err, VaultError::Storage { .. }));
    }
}
