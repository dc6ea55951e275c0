//! Key-value persistence seam for the state document

use crate::error::Result;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Persistent key-value storage
///
/// The engine keeps one JSON document per logical key and rewrites it after
/// every mutation. Implementations only need whole-value reads and writes.
#[async_trait::async_trait]
pub trait StateStore: Send + Sync {
    /// Value stored under `key`, if any
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Store `value` under `key`, replacing what was there
    async fn set(&self, key: &str, value: &Value) -> Result<()>;

    /// Value stored under `key`, or `default` when absent
    async fn get_or(&self, key: &str, default: Value) -> Result<Value> {
        Ok(self.get(key).await?.unwrap_or(default))
    }
}

/// In-memory [`StateStore`], useful for tests and ephemeral sessions
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &Value) -> Result<()> {
        self.values
            .write()
            .await
            .insert(key.to_string(), value.clone());
        Ok(())
    }
}
