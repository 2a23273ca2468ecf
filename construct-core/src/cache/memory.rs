//! Process-local cache

use super::CachePort;
use crate::error::ConstructError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Cache holding serialized JSON in a map; contents die with the process
#[derive(Default)]
pub struct InMemoryCache {
    data: Mutex<HashMap<String, String>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn data(&self) -> crate::Result<MutexGuard<'_, HashMap<String, String>>> {
        self.data
            .lock()
            .map_err(|e| ConstructError::Cache(format!("cache mutex poisoned: {e}")))
    }

    pub fn len(&self) -> usize {
        self.data().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.data().map(|d| d.contains_key(key)).unwrap_or(false)
    }

    /// Store raw text under a key, bypassing serialization
    #[cfg(test)]
    pub(crate) fn insert_raw(&self, key: &str, raw: &str) {
        if let Ok(mut data) = self.data() {
            data.insert(key.to_string(), raw.to_string());
        }
    }
}

#[async_trait]
impl CachePort for InMemoryCache {
    async fn get(&self, key: &str) -> crate::Result<Option<Value>> {
        let raw = self.data()?.get(key).cloned();
        Ok(raw.and_then(|text| match serde_json::from_str(&text) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(key, error = %e, "discarding corrupt cache entry");
                None
            }
        }))
    }

    async fn set(&self, key: &str, value: Value) -> crate::Result<()> {
        let text = serde_json::to_string(&value)?;
        self.data()?.insert(key.to_string(), text);
        Ok(())
    }

    async fn clear(&self) -> crate::Result<()> {
        self.data()?.clear();
        Ok(())
    }
}
