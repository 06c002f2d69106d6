//! Persistent settings facade (§6.4): a small typed get/set/flush surface
//! over a process-wide key-value store. Full persistent storage (schema,
//! migrations, multi-backend) is an external-collaborator non-goal; this
//! is only the narrow facade the core needs to survive a restart.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::warn;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings store io error: {0}")]
    Io(String),
    #[error("settings value at {0} could not be decoded: {1}")]
    Decode(String, String),
}

pub type SettingsResult<T> = Result<T, SettingsError>;

/// `init → read/write → flush` lifecycle facade, exposed as float/bool/
/// json-shaped values rather than ambient global state.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get_f64(&self, key: &str) -> SettingsResult<Option<f64>>;
    async fn set_f64(&self, key: &str, value: f64) -> SettingsResult<()>;
    async fn get_bool(&self, key: &str) -> SettingsResult<Option<bool>>;
    async fn set_bool(&self, key: &str, value: bool) -> SettingsResult<()>;
    async fn get_json(&self, key: &str) -> SettingsResult<Option<Value>>;
    async fn set_json(&self, key: &str, value: Value) -> SettingsResult<()>;
    async fn delete(&self, key: &str) -> SettingsResult<()>;
    async fn flush(&self) -> SettingsResult<()>;
}

/// In-memory store, used by tests and the `sim` default profile.
#[derive(Debug, Default)]
pub struct InMemorySettingsStore {
    values: RwLock<HashMap<String, Value>>,
}

impl InMemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettingsStore for InMemorySettingsStore {
    async fn get_f64(&self, key: &str) -> SettingsResult<Option<f64>> {
        Ok(self.values.read().await.get(key).and_then(Value::as_f64))
    }

    async fn set_f64(&self, key: &str, value: f64) -> SettingsResult<()> {
        self.values.write().await.insert(key.to_string(), Value::from(value));
        Ok(())
    }

    async fn get_bool(&self, key: &str) -> SettingsResult<Option<bool>> {
        Ok(self.values.read().await.get(key).and_then(Value::as_bool))
    }

    async fn set_bool(&self, key: &str, value: bool) -> SettingsResult<()> {
        self.values.write().await.insert(key.to_string(), Value::from(value));
        Ok(())
    }

    async fn get_json(&self, key: &str) -> SettingsResult<Option<Value>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set_json(&self, key: &str, value: Value) -> SettingsResult<()> {
        self.values.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> SettingsResult<()> {
        self.values.write().await.remove(key);
        Ok(())
    }

    async fn flush(&self) -> SettingsResult<()> {
        Ok(())
    }
}

/// Flat-file JSON settings store, flushed explicitly at tick end:
/// persistent writes are batched and kept off the decision path.
#[derive(Debug)]
pub struct JsonFileSettingsStore {
    path: PathBuf,
    values: RwLock<HashMap<String, Value>>,
}

impl JsonFileSettingsStore {
    /// Loads an existing file if present; a missing or corrupt file
    /// zero-initialises with a warning rather than failing startup.
    pub async fn load(path: PathBuf) -> Self {
        let values = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<HashMap<String, Value>>(&bytes) {
                Ok(map) => map,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "settings file corrupt, zero-initialising");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        Self { path, values: RwLock::new(values) }
    }
}

#[async_trait]
impl SettingsStore for JsonFileSettingsStore {
    async fn get_f64(&self, key: &str) -> SettingsResult<Option<f64>> {
        Ok(self.values.read().await.get(key).and_then(Value::as_f64))
    }

    async fn set_f64(&self, key: &str, value: f64) -> SettingsResult<()> {
        self.values.write().await.insert(key.to_string(), Value::from(value));
        Ok(())
    }

    async fn get_bool(&self, key: &str) -> SettingsResult<Option<bool>> {
        Ok(self.values.read().await.get(key).and_then(Value::as_bool))
    }

    async fn set_bool(&self, key: &str, value: bool) -> SettingsResult<()> {
        self.values.write().await.insert(key.to_string(), Value::from(value));
        Ok(())
    }

    async fn get_json(&self, key: &str) -> SettingsResult<Option<Value>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set_json(&self, key: &str, value: Value) -> SettingsResult<()> {
        self.values.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> SettingsResult<()> {
        self.values.write().await.remove(key);
        Ok(())
    }

    async fn flush(&self) -> SettingsResult<()> {
        let snapshot = self.values.read().await.clone();
        let bytes = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| SettingsError::Decode("<snapshot>".into(), e.to_string()))?;
        tokio::fs::write(&self.path, bytes).await.map_err(|e| SettingsError::Io(e.to_string()))
    }
}
