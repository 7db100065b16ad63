//! Keyed JSON session state.
//!
//! The app persists a handful of values (profile, journal, chat history,
//! daily counters, motivation cache, run id) under fixed keys. The trait is
//! object-safe over `serde_json::Value`; [`load`] and [`save`] add typing.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

pub const USER_KEY: &str = "mirror-twin-user";
pub const JOURNAL_KEY: &str = "mirror-twin-journal";
pub const HISTORY_KEY: &str = "mirror-twin-history";
pub const DAILY_KEY: &str = "mirror-twin-daily";
pub const MOTIVATION_KEY: &str = "mirror-twin-motivation";
pub const RUN_ID_KEY: &str = "mirror-twin-opik-run-id";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get_json(&self, key: &str) -> Result<Option<Value>, StoreError>;

    async fn set_json(&self, key: &str, value: Value) -> Result<(), StoreError>;
}

/// Typed read. A value that no longer matches `T` reads as absent.
pub async fn load<T: DeserializeOwned>(
    store: &dyn SessionStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    let Some(value) = store.get_json(key).await? else {
        return Ok(None);
    };
    match serde_json::from_value(value) {
        Ok(v) => Ok(Some(v)),
        Err(e) => {
            tracing::warn!(key, error = %e, "Stored value has unexpected shape, ignoring");
            Ok(None)
        }
    }
}

pub async fn save<T: Serialize + ?Sized>(
    store: &dyn SessionStore,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    store.set_json(key, serde_json::to_value(value)?).await
}

fn validate_key(key: &str) -> Result<(), StoreError> {
    let ok = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

// ============================================================================
// FileSessionStore
// ============================================================================

/// One `<key>.json` file per key under a directory.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn get_json(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let path = self.path_for(key)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice(&bytes) {
            Ok(v) => Ok(Some(v)),
            Err(e) => {
                tracing::warn!(key, error = %e, "Corrupt session file, treating as empty");
                Ok(None)
            }
        }
    }

    async fn set_json(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let tmp = self.dir.join(format!(".{}.json.tmp", key));
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(&value)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

// ============================================================================
// MemorySessionStore
// ============================================================================

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    values: Mutex<HashMap<String, Value>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get_json(&self, key: &str) -> Result<Option<Value>, StoreError> {
        validate_key(key)?;
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(key).cloned())
    }

    async fn set_json(&self, key: &str, value: Value) -> Result<(), StoreError> {
        validate_key(key)?;
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DailyProgress, MirrorTwinUser};
    use chrono::NaiveDate;

    #[tokio::test]
    async fn test_file_store_round_trip_and_missing_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::open(dir.path().join("state")).await.unwrap();

        let missing: Option<MirrorTwinUser> = load(&store, USER_KEY).await.unwrap();
        assert!(missing.is_none());

        let user = MirrorTwinUser::new("Ada", "write every day", "mornings");
        save(&store, USER_KEY, &user).await.unwrap();

        let loaded: Option<MirrorTwinUser> = load(&store, USER_KEY).await.unwrap();
        assert_eq!(loaded, Some(user));
        assert!(dir.path().join("state").join("mirror-twin-user.json").exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::open(dir.path()).await.unwrap();
        std::fs::write(dir.path().join("mirror-twin-daily.json"), b"{not json").unwrap();

        let daily: Option<DailyProgress> = load(&store, DAILY_KEY).await.unwrap();
        assert!(daily.is_none());
    }

    #[tokio::test]
    async fn test_shape_mismatch_reads_as_absent() {
        let store = MemorySessionStore::new();
        store
            .set_json(DAILY_KEY, serde_json::json!({"unexpected": true}))
            .await
            .unwrap();
        let daily: Option<DailyProgress> = load(&store, DAILY_KEY).await.unwrap();
        assert!(daily.is_none());

        let good = DailyProgress::fresh(NaiveDate::from_ymd_opt(2026, 2, 1).unwrap());
        save(&store, DAILY_KEY, &good).await.unwrap();
        assert_eq!(load::<DailyProgress>(&store, DAILY_KEY).await.unwrap(), Some(good));
    }

    #[tokio::test]
    async fn test_rejects_path_like_keys() {
        let store = MemorySessionStore::new();
        assert!(matches!(
            store.get_json("../etc/passwd").await,
            Err(StoreError::InvalidKey(_))
        ));
    }
}
