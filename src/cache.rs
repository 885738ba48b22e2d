use std::collections::HashMap;
use std::path::PathBuf;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

pub const UPLOAD_LIST_KEY: &str = "upload-list";
pub const HISTORY_LIST_KEY: &str = "history-list";
pub const FAVORITES_LIST_KEY: &str = "favorites-list";

/// Small persistent key/value store for the client's recent bundle list,
/// history, and favorites. Each slot holds one JSON-encoded list.
///
/// A missing or corrupt slot yields an empty list which is written back, so
/// a damaged cache self-heals instead of failing every startup.
pub trait ClientCache {
    async fn get_list<T>(&mut self, key: &str) -> Vec<T>
    where
        T: DeserializeOwned;

    async fn set_list<T>(&mut self, key: &str, items: &[T])
    where
        T: Serialize;
}

/// File-backed cache: one JSON file holding a slot-name to payload map.
pub struct FsCache {
    path: PathBuf,
}

impl FsCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn load(&self) -> HashMap<String, String> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(_) => return HashMap::new(),
        };
        serde_json::from_slice(&raw).unwrap_or_default()
    }

    async fn flush(&self, slots: &HashMap<String, String>) {
        if let Some(dir) = self.path.parent() {
            let _ = tokio::fs::create_dir_all(dir).await;
        }
        match serde_json::to_vec(slots) {
            Ok(json) => {
                if let Err(err) = tokio::fs::write(&self.path, json).await {
                    warn!(path = %self.path.display(), error = %err, "cache write failed");
                }
            }
            Err(err) => warn!(error = %err, "cache encode failed"),
        }
    }
}

impl ClientCache for FsCache {
    async fn get_list<T>(&mut self, key: &str) -> Vec<T>
    where
        T: DeserializeOwned,
    {
        let mut slots = self.load().await;
        let parsed = slots
            .get(key)
            .and_then(|raw| serde_json::from_str::<Vec<T>>(raw).ok());

        match parsed {
            Some(list) => list,
            None => {
                slots.insert(key.to_string(), "[]".to_string());
                self.flush(&slots).await;
                Vec::new()
            }
        }
    }

    async fn set_list<T>(&mut self, key: &str, items: &[T])
    where
        T: Serialize,
    {
        let payload = match serde_json::to_string(items) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(key, error = %err, "cache encode failed");
                return;
            }
        };
        let mut slots = self.load().await;
        slots.insert(key.to_string(), payload);
        self.flush(&slots).await;
    }
}

/// In-memory cache used by tests and throwaway sessions.
#[derive(Debug, Default)]
pub struct MemCache {
    slots: HashMap<String, String>,
}

impl MemCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClientCache for MemCache {
    async fn get_list<T>(&mut self, key: &str) -> Vec<T>
    where
        T: DeserializeOwned,
    {
        let parsed = self
            .slots
            .get(key)
            .and_then(|raw| serde_json::from_str::<Vec<T>>(raw).ok());

        match parsed {
            Some(list) => list,
            None => {
                self.slots.insert(key.to_string(), "[]".to_string());
                Vec::new()
            }
        }
    }

    async fn set_list<T>(&mut self, key: &str, items: &[T])
    where
        T: Serialize,
    {
        match serde_json::to_string(items) {
            Ok(payload) => {
                self.slots.insert(key.to_string(), payload);
            }
            Err(err) => warn!(key, error = %err, "cache encode failed"),
        }
    }
}
