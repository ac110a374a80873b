use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use tracing::{debug, warn};

use crate::{error::AppError, models::session::SessionRecord};

pub const LOGGED_IN_KEY: &str = "isLoggedIn";
pub const USER_DATA_KEY: &str = "userData";

/// Durable string key-value storage. `put` and `remove` apply all of their
/// entries in a single write.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, AppError>;
    fn put(&self, entries: &[(&str, String)]) -> Result<(), AppError>;
    fn remove(&self, keys: &[&str]) -> Result<(), AppError>;
}

/// Keeps every key in one JSON object on disk, replaced via rename.
#[derive(Clone)]
pub struct FileStore {
    path: Arc<PathBuf>,
}

impl FileStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path: Arc::new(path),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<BTreeMap<String, String>, AppError> {
        let raw = match fs::read(self.path()) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => return Err(err.into()),
        };
        if raw.is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_slice(&raw)?)
    }

    // A corrupt file must not block writes; it gets replaced.
    fn read_map_for_update(&self) -> Result<BTreeMap<String, String>, AppError> {
        match self.read_map() {
            Err(AppError::Serde(err)) => {
                warn!(path = %self.path().display(), "discarding malformed store file: {err}");
                Ok(BTreeMap::new())
            }
            other => other,
        }
    }

    fn write_map(&self, map: &BTreeMap<String, String>) -> Result<(), AppError> {
        if let Some(dir) = self.path().parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let tmp = self.path().with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(map)?)?;
        fs::rename(&tmp, self.path())?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        Ok(self.read_map()?.remove(key))
    }

    fn put(&self, entries: &[(&str, String)]) -> Result<(), AppError> {
        let mut map = self.read_map_for_update()?;
        for (key, value) in entries {
            map.insert((*key).to_string(), value.clone());
        }
        self.write_map(&map)
    }

    fn remove(&self, keys: &[&str]) -> Result<(), AppError> {
        let mut map = self.read_map_for_update()?;
        let before = map.len();
        for key in keys {
            map.remove(*key);
        }
        if map.len() == before {
            return Ok(());
        }
        self.write_map(&map)
    }
}

/// In-process store; counts writes so callers can assert on them.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    pub fn insert_raw(&self, key: &str, value: &str) {
        self.lock().insert(key.to_string(), value.to_string());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        Ok(self.lock().get(key).cloned())
    }

    fn put(&self, entries: &[(&str, String)]) -> Result<(), AppError> {
        let mut map = self.lock();
        for (key, value) in entries {
            map.insert((*key).to_string(), value.clone());
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn remove(&self, keys: &[&str]) -> Result<(), AppError> {
        let mut map = self.lock();
        for key in keys {
            map.remove(*key);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// The persisted "who is logged in" record: a login flag plus the JSON record.
#[derive(Clone)]
pub struct IdentityStore {
    kv: Arc<dyn KeyValueStore>,
}

impl IdentityStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    pub fn file(path: PathBuf) -> Self {
        Self::new(Arc::new(FileStore::new(path)))
    }

    /// Returns the stored record only when both keys are present and valid.
    pub fn load(&self) -> Option<SessionRecord> {
        let flag = match self.kv.get(LOGGED_IN_KEY) {
            Ok(flag) => flag,
            Err(err) => {
                warn!("identity store unreadable: {err}");
                return None;
            }
        };
        if flag.as_deref() != Some("true") {
            return None;
        }

        let raw = match self.kv.get(USER_DATA_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!("login flag set without a session record");
                return None;
            }
            Err(err) => {
                warn!("identity store unreadable: {err}");
                return None;
            }
        };

        match serde_json::from_str::<SessionRecord>(&raw) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!("ignoring malformed session record: {err}");
                None
            }
        }
    }

    pub fn save(&self, record: &SessionRecord) -> Result<(), AppError> {
        let json = serde_json::to_string(record)?;
        self.kv
            .put(&[(LOGGED_IN_KEY, "true".to_string()), (USER_DATA_KEY, json)])
    }

    pub fn clear(&self) -> Result<(), AppError> {
        self.kv.remove(&[LOGGED_IN_KEY, USER_DATA_KEY])
    }
}
