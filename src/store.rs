use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Store key holding the session continuity token.
pub const SESSION_KEY: &str = "session_id";
/// Store key holding the anti-forgery token.
pub const CSRF_KEY: &str = "csrf_token";

/// Read-only view of the persistent client-side store.
///
/// Reads are best-effort: a missing or unreadable store yields `None`.
pub trait ClientStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

/// Flat JSON object on disk, re-read on every access so tokens written by
/// another process are picked up.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Option<HashMap<String, serde_json::Value>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::debug!(path = %self.path.display(), error = %err, "client store unavailable");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(map) => Some(map),
            Err(err) => {
                tracing::debug!(path = %self.path.display(), error = %err, "client store is not a JSON object");
                None
            }
        }
    }
}

impl ClientStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        let value = self.read()?.remove(key)?;
        value
            .as_str()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }
}

impl ClientStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// Default location of the store, alongside the client log.
pub fn default_store_path() -> PathBuf {
    crate::config::app_dir().join("store.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "courier-assist-{}-{}.json",
            name,
            uuid::Uuid::new_v4()
        ))
    }

    #[test]
    fn file_store_reads_string_values() {
        let path = temp_path("read");
        std::fs::write(&path, r#"{"session_id": " abc123 ", "csrf_token": "tok", "n": 5}"#).unwrap();
        let store = FileStore::new(&path);

        assert_eq!(store.get(SESSION_KEY).as_deref(), Some("abc123"));
        assert_eq!(store.get(CSRF_KEY).as_deref(), Some("tok"));
        assert_eq!(store.get("n"), None);
        assert_eq!(store.get("missing"), None);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn file_store_missing_or_corrupt_yields_none() {
        let path = temp_path("missing");
        assert_eq!(FileStore::new(&path).get(SESSION_KEY), None);

        std::fs::write(&path, "not json").unwrap();
        assert_eq!(FileStore::new(&path).get(SESSION_KEY), None);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn memory_store_returns_inserted_values() {
        let store = MemoryStore::new().with(CSRF_KEY, "csrf");
        assert_eq!(store.get(CSRF_KEY).as_deref(), Some("csrf"));
        assert_eq!(store.get(SESSION_KEY), None);
    }
}
