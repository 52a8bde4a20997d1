use super::{page_from, KvPage, KvStore};
use crate::errors::ApiResult;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::ops::Bound;
use tokio::sync::RwLock;

/// In-process store, used when no database is configured and in tests.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: RwLock<BTreeMap<String, Value>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> ApiResult<Option<Value>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Value) -> ApiResult<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> ApiResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str, cursor: Option<&str>, limit: usize) -> ApiResult<KvPage> {
        let entries = self.entries.read().await;
        let lower = match cursor {
            Some(c) if c >= prefix => Bound::Excluded(c.to_string()),
            _ => Bound::Included(prefix.to_string()),
        };
        let rows = entries
            .range((lower, Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .take(limit + 1)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(page_from(rows, limit))
    }
}
