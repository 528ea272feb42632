//! Credential storage layout over a pluggable key-value backend.
//!
//! The vault never stores anything in the clear, so a backend only has to
//! persist text: wrapped keys and ciphertexts are base64-encoded before they
//! reach it.
//!
//! # Layout
//!
//! Within one namespace:
//!
//! - `key`: the wrapped data-encryption key (at most one).
//! - `credential_<name>`: one encrypted credential per name.
//!
//! Clearing a namespace removes both.
//!
//! # Backends
//!
//! - [`MemoryBackend`]: process memory, for tests and ephemeral vaults.
//! - [`SqliteBackend`]: a `vault_entries` table in SQLite (WAL mode).

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::{Result, VaultError};
use crate::key::WrappedDataKey;

/// Reserved slot for the wrapped data-encryption key.
pub const KEY_SLOT: &str = "key";

/// Prefix of every credential entry.
pub const CREDENTIAL_PREFIX: &str = "credential_";

/// Default namespace when none is configured.
pub const DEFAULT_NAMESPACE: &str = "vault";

// ---------------------------------------------------------------------------
// Backend trait
// ---------------------------------------------------------------------------

/// A persistent text key-value store partitioned into namespaces.
///
/// Implementations report I/O failures as [`VaultError::Storage`] and must not
/// retry on their own. Calls may block.
pub trait StorageBackend: Send + Sync {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>>;

    /// Insert or overwrite.
    fn put(&self, namespace: &str, key: &str, value: &str) -> Result<()>;

    /// Remove `key`; a no-op if absent.
    fn remove(&self, namespace: &str, key: &str) -> Result<()>;

    /// All keys in `namespace`, in no particular order.
    fn keys(&self, namespace: &str) -> Result<Vec<String>>;

    /// Remove every key in `namespace`.
    fn clear(&self, namespace: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// CredentialStore
// ---------------------------------------------------------------------------

/// The vault's view of a backend: credential ciphertexts plus the single
/// wrapped-key slot, all inside one namespace.
///
/// Cloning is cheap and clones share the backend.
#[derive(Clone)]
pub struct CredentialStore {
    backend: Arc<dyn StorageBackend>,
    namespace: String,
}

impl CredentialStore {
    pub fn new(backend: Arc<dyn StorageBackend>, namespace: impl Into<String>) -> Self {
        Self {
            backend,
            namespace: namespace.into(),
        }
    }

    /// A store over a fresh [`MemoryBackend`] in the default namespace.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()), DEFAULT_NAMESPACE)
    }

    /// A store over a SQLite database at `path`.
    pub fn sqlite(path: impl AsRef<Path>, namespace: impl Into<String>) -> Result<Self> {
        Ok(Self::new(Arc::new(SqliteBackend::open(path)?), namespace))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    // -- Wrapped key slot ---------------------------------------------------

    /// The persisted wrapped key, or `None` if no data key exists yet.
    ///
    /// An undecodable slot cannot yield a data key, so it is reported as
    /// [`VaultError::KeyUnavailable`].
    pub fn wrapped_key(&self) -> Result<Option<WrappedDataKey>> {
        let Some(encoded) = self.backend.get(&self.namespace, KEY_SLOT)? else {
            return Ok(None);
        };
        let bytes = BASE64
            .decode(encoded.as_bytes())
            .map_err(|e| VaultError::KeyUnavailable {
                reason: format!("stored wrapped key is not valid base64: {e}"),
            })?;
        Ok(Some(WrappedDataKey::new(bytes)))
    }

    pub fn set_wrapped_key(&self, wrapped: &WrappedDataKey) -> Result<()> {
        self.backend
            .put(&self.namespace, KEY_SLOT, &BASE64.encode(wrapped.as_bytes()))
    }

    // -- Credentials --------------------------------------------------------

    /// Ciphertext stored under `name`, or `None` if absent.
    pub fn credential(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let Some(encoded) = self.backend.get(&self.namespace, &credential_key(name))? else {
            return Ok(None);
        };
        let bytes = BASE64
            .decode(encoded.as_bytes())
            .map_err(|e| VaultError::DecryptionFailed {
                reason: format!("stored credential is not valid base64: {e}"),
            })?;
        Ok(Some(bytes))
    }

    /// Store a ciphertext under `name`, overwriting any previous value.
    pub fn set_credential(&self, name: &str, ciphertext: &[u8]) -> Result<()> {
        if name.is_empty() {
            return Err(VaultError::InvalidName);
        }
        self.backend
            .put(&self.namespace, &credential_key(name), &BASE64.encode(ciphertext))
    }

    pub fn remove_credential(&self, name: &str) -> Result<()> {
        self.backend.remove(&self.namespace, &credential_key(name))
    }

    /// Names of all stored credentials. The wrapped-key slot is never
    /// included.
    pub fn credential_names(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .backend
            .keys(&self.namespace)?
            .into_iter()
            .filter_map(|key| key.strip_prefix(CREDENTIAL_PREFIX).map(str::to_string))
            .filter(|name| !name.is_empty())
            .collect())
    }

    /// Remove every credential and the wrapped key.
    pub fn clear(&self) -> Result<()> {
        self.backend.clear(&self.namespace)
    }
}

fn credential_key(name: &str) -> String {
    format!("{CREDENTIAL_PREFIX}{name}")
}

fn lock_poisoned<T>(e: std::sync::PoisonError<T>) -> VaultError {
    VaultError::Storage {
        reason: format!("storage mutex poisoned: {e}"),
    }
}

// ---------------------------------------------------------------------------
// MemoryBackend
// ---------------------------------------------------------------------------

/// In-memory backend. Data lives as long as the instance.
#[derive(Default)]
pub struct MemoryBackend {
    namespaces: Mutex<HashMap<String, BTreeMap<String, String>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, BTreeMap<String, String>>>> {
        self.namespaces.lock().map_err(lock_poisoned)
    }
}

impl StorageBackend for MemoryBackend {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        Ok(self
            .lock()?
            .get(namespace)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    fn put(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        self.lock()?
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, namespace: &str, key: &str) -> Result<()> {
        if let Some(entries) = self.lock()?.get_mut(namespace) {
            entries.remove(key);
        }
        Ok(())
    }

    fn keys(&self, namespace: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()?
            .get(namespace)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn clear(&self, namespace: &str) -> Result<()> {
        self.lock()?.remove(namespace);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SqliteBackend
// ---------------------------------------------------------------------------

/// SQLite-backed persistence for vault entries.
///
/// One `vault_entries` table holds every namespace, so several vaults can
/// share a database file.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open (or create) the database at `path` and create the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!(path = %path.display(), "opening vault database");

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| VaultError::Storage {
                reason: format!("cannot create {}: {e}", parent.display()),
            })?;
        }

        let conn = Connection::open(path)?;
        Self::configure_connection(&conn)?;
        Self::run_migrations(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure_connection(&conn)?;
        Self::run_migrations(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA temp_store = MEMORY;",
        )?;
        Ok(())
    }

    fn run_migrations(conn: &Connection) -> Result<()> {
        tracing::debug!("running vault schema migrations");
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS vault_entries (
                namespace TEXT NOT NULL,
                key       TEXT NOT NULL,
                value     TEXT NOT NULL,
                PRIMARY KEY (namespace, key)
            );",
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(lock_poisoned)
    }
}

impl StorageBackend for SqliteBackend {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        let value = self
            .lock()?
            .query_row(
                "SELECT value FROM vault_entries WHERE namespace = ?1 AND key = ?2",
                params![namespace, key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn put(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        self.lock()?.execute(
            "INSERT INTO vault_entries (namespace, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT(namespace, key) DO UPDATE SET value = excluded.value",
            params![namespace, key, value],
        )?;
        Ok(())
    }

    fn remove(&self, namespace: &str, key: &str) -> Result<()> {
        self.lock()?.execute(
            "DELETE FROM vault_entries WHERE namespace = ?1 AND key = ?2",
            params![namespace, key],
        )?;
        Ok(())
    }

    fn keys(&self, namespace: &str) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT key FROM vault_entries WHERE namespace = ?1")?;
        let rows = stmt.query_map(params![namespace], |row| row.get::<_, String>(0))?;

        let mut keys = Vec::new();
        for row in rows {
            keys.push(row?);
        }
        Ok(keys)
    }

    fn clear(&self, namespace: &str) -> Result<()> {
        let removed = self.lock()?.execute(
            "DELETE FROM vault_entries WHERE namespace = ?1",
            params![namespace],
        )?;
        tracing::debug!(namespace, removed, "cleared vault namespace");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
