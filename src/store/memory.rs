//! In-memory versioned-document backend for tests and local development.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use super::{Backend, StoreError, VersionedDoc};

#[derive(Default)]
pub struct MemoryBackend {
    docs: Mutex<HashMap<String, (u64, Value)>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<VersionedDoc>, StoreError> {
        let docs = self.docs.lock().await;
        Ok(docs.get(key).map(|(version, body)| VersionedDoc {
            key: key.to_string(),
            version: *version,
            body: body.clone(),
        }))
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<VersionedDoc>, StoreError> {
        let docs = self.docs.lock().await;
        let mut matched: Vec<VersionedDoc> = docs
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, (version, body))| VersionedDoc {
                key: key.clone(),
                version: *version,
                body: body.clone(),
            })
            .collect();
        matched.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(matched)
    }

    async fn create_all(&self, entries: Vec<(String, Value)>) -> Result<(), StoreError> {
        let mut docs = self.docs.lock().await;
        if let Some((anchor, _)) = entries.first()
            && docs.contains_key(anchor)
        {
            return Err(StoreError::AlreadyExists);
        }
        for (key, body) in entries {
            docs.insert(key, (1, body));
        }
        Ok(())
    }

    async fn commit(
        &self,
        reads: Vec<(String, u64)>,
        writes: Vec<(String, Value)>,
    ) -> Result<(), StoreError> {
        let mut docs = self.docs.lock().await;
        for (key, read_version) in &reads {
            let current = docs.get(key).map(|(version, _)| *version).unwrap_or(0);
            if current != *read_version {
                return Err(StoreError::Conflict);
            }
        }
        for (key, body) in writes {
            let entry = docs.entry(key).or_insert((0, Value::Null));
            entry.0 += 1;
            entry.1 = body;
        }
        Ok(())
    }
}
