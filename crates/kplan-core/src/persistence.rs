#![forbid(unsafe_code)]

//! Session persistence for planning stations.
//!
//! The whole station list lives under one key as a JSON array with camelCase
//! field names. Storage is pluggable through [`StorageBackend`]:
//!
//! - [`MemoryStorage`]: in-process, for tests and ephemeral sessions.
//! - [`FileStorage`]: one JSON file per key with atomic write-rename
//!   (feature `file-storage`).
//! - `kplan-web` adds a `window.localStorage` backend.
//!
//! # Failure Modes
//!
//! Persistence is best-effort. [`StationPersistence::save`] and
//! [`StationPersistence::clear`] log failures and carry on;
//! [`StationPersistence::load`] treats absent or malformed data as an empty
//! session. The `try_*` variants expose the underlying [`StorageError`] for
//! callers that want it.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::{Arc, RwLock};

use thiserror::Error;

use crate::station::PlanningStation;

/// Storage key used by the browser host since the first release.
pub const DEFAULT_STORAGE_KEY: &str = "planningStations";

// ─────────────────────────────────────────────────────────────────────────────
// Error Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("data corruption: {0}")]
    Corruption(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

// ─────────────────────────────────────────────────────────────────────────────
// Storage Backend Trait
// ─────────────────────────────────────────────────────────────────────────────

/// A string key/value store.
pub trait StorageBackend {
    /// Human-readable backend name for logging.
    fn name(&self) -> &str;

    /// Read the value under `key`. `Ok(None)` means the key is absent.
    fn read(&self, key: &str) -> StorageResult<Option<String>>;

    /// Overwrite the value under `key`.
    fn write(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Remove `key`. Removing an absent key is not an error.
    fn remove(&self, key: &str) -> StorageResult<()>;

    fn is_available(&self) -> bool {
        true
    }
}

impl<T: StorageBackend + ?Sized> StorageBackend for Rc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn read(&self, key: &str) -> StorageResult<Option<String>> {
        (**self).read(key)
    }

    fn write(&self, key: &str, value: &str) -> StorageResult<()> {
        (**self).write(key, value)
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        (**self).remove(key)
    }

    fn is_available(&self) -> bool {
        (**self).is_available()
    }
}

impl<T: StorageBackend + ?Sized> StorageBackend for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn read(&self, key: &str) -> StorageResult<Option<String>> {
        (**self).read(key)
    }

    fn write(&self, key: &str, value: &str) -> StorageResult<()> {
        (**self).write(key, value)
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        (**self).remove(key)
    }

    fn is_available(&self) -> bool {
        (**self).is_available()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory Storage
// ─────────────────────────────────────────────────────────────────────────────

/// In-memory backend. Contents are lost when the value is dropped.
#[derive(Default)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populated storage, for testing load paths.
    #[must_use]
    pub fn with_entry(key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut entries = HashMap::new();
        entries.insert(key.into(), value.into());
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Raw value under `key`, bypassing the trait.
    #[must_use]
    pub fn raw(&self, key: &str) -> Option<String> {
        self.entries.read().ok()?.get(key).cloned()
    }
}

impl StorageBackend for MemoryStorage {
    fn name(&self) -> &str {
        "MemoryStorage"
    }

    fn read(&self, key: &str) -> StorageResult<Option<String>> {
        let guard = self
            .entries
            .read()
            .map_err(|_| StorageError::Corruption("lock poisoned".into()))?;
        Ok(guard.get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut guard = self
            .entries
            .write()
            .map_err(|_| StorageError::Corruption("lock poisoned".into()))?;
        guard.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let mut guard = self
            .entries
            .write()
            .map_err(|_| StorageError::Corruption("lock poisoned".into()))?;
        guard.remove(key);
        Ok(())
    }
}

impl fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.entries.read().map(|e| e.len()).unwrap_or(0);
        f.debug_struct("MemoryStorage")
            .field("entries", &count)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// File Storage
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(feature = "file-storage")]
mod file_storage {
    use super::*;
    use std::fs::{self, File};
    use std::io::{BufWriter, Write};
    use std::path::{Path, PathBuf};

    /// File-backed storage: `{dir}/{key}.json`.
    ///
    /// # Atomic Writes
    ///
    /// 1. Write to `{key}.json.tmp`
    /// 2. Flush and sync
    /// 3. Rename over `{key}.json`
    pub struct FileStorage {
        dir: PathBuf,
    }

    impl FileStorage {
        /// Storage rooted at `dir`. The directory is created on first write.
        #[must_use]
        pub fn new(dir: impl AsRef<Path>) -> Self {
            Self {
                dir: dir.as_ref().to_path_buf(),
            }
        }

        /// `$XDG_STATE_HOME/kplan/{app_name}`, falling back to
        /// `~/.local/state` and then the current directory.
        #[must_use]
        pub fn default_for_app(app_name: &str) -> Self {
            Self::new(state_dir().join("kplan").join(app_name))
        }

        #[must_use]
        pub fn dir(&self) -> &Path {
            &self.dir
        }

        /// File that holds `key`. Characters outside `[A-Za-z0-9_-]` map to `_`.
        #[must_use]
        pub fn path_for(&self, key: &str) -> PathBuf {
            let file: String = key
                .chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                        c
                    } else {
                        '_'
                    }
                })
                .collect();
            self.dir.join(format!("{file}.json"))
        }
    }

    fn state_dir() -> PathBuf {
        if let Ok(state_home) = std::env::var("XDG_STATE_HOME") {
            return PathBuf::from(state_home);
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".local").join("state");
        }
        PathBuf::from(".")
    }

    impl StorageBackend for FileStorage {
        fn name(&self) -> &str {
            "FileStorage"
        }

        fn read(&self, key: &str) -> StorageResult<Option<String>> {
            let path = self.path_for(key);
            if !path.exists() {
                return Ok(None);
            }
            Ok(Some(fs::read_to_string(&path)?))
        }

        fn write(&self, key: &str, value: &str) -> StorageResult<()> {
            fs::create_dir_all(&self.dir)?;
            let path = self.path_for(key);
            let mut tmp = path.clone();
            tmp.set_extension("json.tmp");
            {
                let file = File::create(&tmp)?;
                let mut writer = BufWriter::new(file);
                writer.write_all(value.as_bytes())?;
                writer.flush()?;
                writer.get_ref().sync_all()?;
            }
            fs::rename(&tmp, &path)?;
            tracing::debug!(path = %path.display(), bytes = value.len(), "wrote state file");
            Ok(())
        }

        fn remove(&self, key: &str) -> StorageResult<()> {
            let path = self.path_for(key);
            if path.exists() {
                fs::remove_file(&path)?;
            }
            Ok(())
        }

        fn is_available(&self) -> bool {
            if !self.dir.exists() {
                return fs::create_dir_all(&self.dir).is_ok();
            }
            let probe = self.dir.join(".kplan_test_write");
            if fs::write(&probe, b"test").is_ok() {
                let _ = fs::remove_file(&probe);
                return true;
            }
            false
        }
    }

    impl fmt::Debug for FileStorage {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("FileStorage").field("dir", &self.dir).finish()
        }
    }
}

#[cfg(feature = "file-storage")]
pub use file_storage::FileStorage;

// ─────────────────────────────────────────────────────────────────────────────
// Station Persistence
// ─────────────────────────────────────────────────────────────────────────────

/// Reads and writes the station list under a single key.
pub struct StationPersistence {
    backend: Box<dyn StorageBackend>,
    key: String,
}

impl StationPersistence {
    #[must_use]
    pub fn new(backend: Box<dyn StorageBackend>) -> Self {
        Self::with_key(backend, DEFAULT_STORAGE_KEY)
    }

    #[must_use]
    pub fn with_key(backend: Box<dyn StorageBackend>, key: impl Into<String>) -> Self {
        Self {
            backend,
            key: key.into(),
        }
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryStorage::new()))
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        self.backend.is_available()
    }

    /// Serialize the list as a compact JSON array.
    pub fn encode(stations: &[PlanningStation]) -> StorageResult<String> {
        serde_json::to_string(stations).map_err(|e| StorageError::Serialization(e.to_string()))
    }

    pub fn decode(json: &str) -> StorageResult<Vec<PlanningStation>> {
        serde_json::from_str(json).map_err(|e| StorageError::Corruption(e.to_string()))
    }

    pub fn try_save(&self, stations: &[PlanningStation]) -> StorageResult<()> {
        let json = Self::encode(stations)?;
        self.backend.write(&self.key, &json)
    }

    /// Best-effort save. Failures are logged, never returned.
    pub fn save(&self, stations: &[PlanningStation]) {
        match self.try_save(stations) {
            Ok(()) => tracing::debug!(
                backend = self.backend.name(),
                key = %self.key,
                count = stations.len(),
                "stations saved"
            ),
            Err(e) => tracing::warn!(
                backend = self.backend.name(),
                key = %self.key,
                error = %e,
                "failed to save stations"
            ),
        }
    }

    /// `Ok(None)` when nothing has been stored yet.
    pub fn try_load(&self) -> StorageResult<Option<Vec<PlanningStation>>> {
        match self.backend.read(&self.key)? {
            Some(json) => Self::decode(&json).map(Some),
            None => Ok(None),
        }
    }

    /// Stored stations in saved order, or empty when absent or unreadable.
    #[must_use]
    pub fn load(&self) -> Vec<PlanningStation> {
        match self.try_load() {
            Ok(Some(stations)) => {
                tracing::info!(count = stations.len(), key = %self.key, "stations restored");
                stations
            }
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!(
                    backend = self.backend.name(),
                    key = %self.key,
                    error = %e,
                    "discarding unreadable station data"
                );
                Vec::new()
            }
        }
    }

    pub fn try_clear(&self) -> StorageResult<()> {
        self.backend.remove(&self.key)
    }

    pub fn clear(&self) {
        if let Err(e) = self.try_clear() {
            tracing::warn!(key = %self.key, error = %e, "failed to clear stored stations");
        }
    }
}

impl fmt::Debug for StationPersistence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StationPersistence")
            .field("backend", &self.backend.name())
            .field("key", &self.key)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::StationField;
    use crate::station::StationId;

    fn station(id: &str, n: usize, kavach: &str) -> PlanningStation {
        let mut s = PlanningStation::new(StationId::from(id), n);
        s.set(StationField::KavachId, kavach);
        s.set(StationField::Latitude, "17.385044");
        s.set(StationField::Longitude, "78.486671");
        s
    }

    #[test]
    fn absent_key_loads_empty() {
        let p = StationPersistence::in_memory();
        assert!(p.load().is_empty());
        assert!(matches!(p.try_load(), Ok(None)));
    }

    #[test]
    fn malformed_data_loads_empty() {
        let backend = Rc::new(MemoryStorage::with_entry(DEFAULT_STORAGE_KEY, "{not json"));
        let p = StationPersistence::new(Box::new(Rc::clone(&backend)));
        assert!(p.load().is_empty());
        assert!(matches!(p.try_load(), Err(StorageError::Corruption(_))));
    }

    #[test]
    fn round_trip_is_byte_identical() {
        let backend = Rc::new(MemoryStorage::new());
        let p = StationPersistence::new(Box::new(Rc::clone(&backend)));
        p.save(&[station("a", 1, "100"), station("b", 2, "200")]);
        let first = backend.raw(DEFAULT_STORAGE_KEY).expect("saved");

        p.save(&p.load());
        let second = backend.raw(DEFAULT_STORAGE_KEY).expect("saved");
        assert_eq!(first, second);
    }

    #[test]
    fn clear_removes_key() {
        let backend = Rc::new(MemoryStorage::new());
        let p = StationPersistence::new(Box::new(Rc::clone(&backend)));
        p.save(&[station("a", 1, "100")]);
        p.clear();
        assert_eq!(backend.raw(DEFAULT_STORAGE_KEY), None);
    }

    #[test]
    fn custom_key_is_honored() {
        let backend = Rc::new(MemoryStorage::new());
        let p = StationPersistence::with_key(Box::new(Rc::clone(&backend)), "other");
        p.save(&[]);
        assert_eq!(backend.raw("other").as_deref(), Some("[]"));
        assert_eq!(backend.raw(DEFAULT_STORAGE_KEY), None);
    }

    struct Broken;

    impl StorageBackend for Broken {
        fn name(&self) -> &str {
            "Broken"
        }
        fn read(&self, _: &str) -> StorageResult<Option<String>> {
            Err(StorageError::Unavailable("quota".into()))
        }
        fn write(&self, _: &str, _: &str) -> StorageResult<()> {
            Err(StorageError::Unavailable("quota".into()))
        }
        fn remove(&self, _: &str) -> StorageResult<()> {
            Err(StorageError::Unavailable("quota".into()))
        }
        fn is_available(&self) -> bool {
            false
        }
    }

    #[test]
    fn failures_are_swallowed() {
        let p = StationPersistence::new(Box::new(Broken));
        p.save(&[station("a", 1, "100")]);
        p.clear();
        assert!(p.load().is_empty());
        assert!(!p.is_available());
        assert!(p.try_save(&[]).is_err());
    }
}
