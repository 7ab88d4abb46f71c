//! Typed access to the credentials the upstream clients need.
//!
//! The shipped desktop shell keeps these in the OS keychain; the core only
//! sees the [`SecretStore`] trait. The file-backed implementation here is the
//! default for headless runs, and the in-memory one backs tests.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// The closed set of secret slots the service knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecretKey {
    /// SCM (GitHub) bearer token.
    ScmToken,
    /// Work-item tracker username; may legitimately be empty.
    TrackerUsername,
    /// Work-item tracker personal access token.
    TrackerPat,
    /// Internal Q&A API key.
    QaInternalKey,
    /// Telemetry instrumentation key (consumed by the shell, not the core).
    TelemetryKey,
}

impl SecretKey {
    /// All supported keys.
    pub const ALL: [SecretKey; 5] = [
        SecretKey::ScmToken,
        SecretKey::TrackerUsername,
        SecretKey::TrackerPat,
        SecretKey::QaInternalKey,
        SecretKey::TelemetryKey,
    ];

    /// The wire name of this key.
    pub fn as_str(self) -> &'static str {
        match self {
            SecretKey::ScmToken => "scm-token",
            SecretKey::TrackerUsername => "tracker-username",
            SecretKey::TrackerPat => "tracker-pat",
            SecretKey::QaInternalKey => "qa-internal-key",
            SecretKey::TelemetryKey => "telemetry-key",
        }
    }

    /// Parse a wire name; `None` for anything outside the closed set.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl std::fmt::Display for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error from the secret store.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("failed to access secret storage")]
    Io(#[from] std::io::Error),
    #[error("secret storage is corrupt")]
    Corrupt(#[from] serde_json::Error),
}

/// Read/write access to the secret slots. Values are fetched fresh on every
/// call; nothing is cached on this side of the trait.
pub trait SecretStore: Send + Sync {
    /// Fetch a secret, `None` when unset.
    fn get(&self, key: SecretKey) -> Result<Option<String>, SecretError>;
    /// Store a secret.
    fn set(&self, key: SecretKey, value: &str) -> Result<(), SecretError>;
    /// Remove a secret. Removing an unset secret is not an error.
    fn delete(&self, key: SecretKey) -> Result<(), SecretError>;

    /// Whether a secret is set and non-empty.
    fn has(&self, key: SecretKey) -> Result<bool, SecretError> {
        Ok(self.get(key)?.is_some_and(|v| !v.is_empty()))
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SecretFile {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    secrets: BTreeMap<String, String>,
}

/// File-backed [`SecretStore`] (JSON document, atomic replace on write).
#[derive(Debug)]
pub struct FileSecretStore {
    path: PathBuf,
}

impl FileSecretStore {
    /// Create a store backed by the given file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read(&self) -> Result<SecretFile, SecretError> {
        if !self.path.exists() {
            return Ok(SecretFile::default());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn write(&self, file: &SecretFile) -> Result<(), SecretError> {
        let dir = self
            .path
            .parent()
            .ok_or_else(|| std::io::Error::other("secrets path has no parent directory"))?;
        std::fs::create_dir_all(dir)?;

        let json = serde_json::to_string_pretty(file)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
        }
        std::fs::rename(tmp, &self.path)?;
        Ok(())
    }
}

impl SecretStore for FileSecretStore {
    fn get(&self, key: SecretKey) -> Result<Option<String>, SecretError> {
        Ok(self.read()?.secrets.get(key.as_str()).cloned())
    }

    fn set(&self, key: SecretKey, value: &str) -> Result<(), SecretError> {
        let mut file = self.read()?;
        file.version = 1;
        file.secrets.insert(key.as_str().to_string(), value.to_string());
        self.write(&file)
    }

    fn delete(&self, key: SecretKey) -> Result<(), SecretError> {
        let mut file = self.read()?;
        if file.secrets.remove(key.as_str()).is_some() {
            self.write(&file)?;
        }
        Ok(())
    }
}

/// In-memory [`SecretStore`] for tests.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    values: Mutex<HashMap<SecretKey, String>>,
}

impl MemorySecretStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-seeded with the given values.
    pub fn with(values: impl IntoIterator<Item = (SecretKey, String)>) -> Self {
        Self {
            values: Mutex::new(values.into_iter().collect()),
        }
    }
}

impl SecretStore for MemorySecretStore {
    fn get(&self, key: SecretKey) -> Result<Option<String>, SecretError> {
        Ok(self.values.lock().expect("secret store lock").get(&key).cloned())
    }

    fn set(&self, key: SecretKey, value: &str) -> Result<(), SecretError> {
        self.values
            .lock()
            .expect("secret store lock")
            .insert(key, value.to_string());
        Ok(())
    }

    fn delete(&self, key: SecretKey) -> Result<(), SecretError> {
        self.values.lock().expect("secret store lock").remove(&key);
        Ok(())
    }
}
