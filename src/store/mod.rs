//! Store gateway: a thin typed facade over a versioned key-value backend.
//!
//! All plan mutation after creation flows through [`Store::run_transaction`],
//! an optimistic interactive transaction: the body reads documents (tracking
//! the version of every key it touched, including missing ones) and stages
//! writes; commit validates that no read version moved and applies the
//! staged writes atomically. On conflict the body re-runs from scratch
//! against a fresh snapshot, a bounded number of times.
//!
//! Transaction bodies must be pure with respect to external side effects:
//! reads and staged writes only. Triggers fire after commit, never inside.

mod memory;
mod sqlite;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::core::plan::{PlanRecord, SpecRecord};

/// Transaction retry budget before surfacing a conflict to the caller.
const MAX_TXN_ATTEMPTS: u32 = 5;
const TXN_BACKOFF_BASE: Duration = Duration::from_millis(20);

#[derive(Debug, Error)]
pub enum StoreError {
    /// Conditional create hit an existing document.
    #[error("document already exists")]
    AlreadyExists,
    /// Optimistic commit lost the race and the retry budget is spent.
    #[error("transaction conflict: retries exhausted")]
    Conflict,
    /// Transient backend failure; callers may retry.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// Fatal misconfiguration (credentials, filesystem permissions).
    #[error("store permission denied: {0}")]
    PermissionDenied(String),
    /// A stored document no longer matches the record schema.
    #[error("corrupt document at {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Transient failures map to 5xx so the sender's retry policy applies.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Conflict | StoreError::Unavailable(_))
    }
}

/// A document snapshot with its commit version. Version 0 means "absent";
/// reads of missing keys still participate in commit validation.
#[derive(Debug, Clone)]
pub struct VersionedDoc {
    pub key: String,
    pub version: u64,
    pub body: Value,
}

/// Minimal backend contract the gateway is built on. Implementations must
/// apply `commit` and `create_all` atomically.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<VersionedDoc>, StoreError>;

    /// All documents whose key starts with `prefix`, ordered by key.
    async fn list_prefix(&self, prefix: &str) -> Result<Vec<VersionedDoc>, StoreError>;

    /// Write every document, failing with [`StoreError::AlreadyExists`]
    /// if the first (anchor) key is already present.
    async fn create_all(&self, docs: Vec<(String, Value)>) -> Result<(), StoreError>;

    /// Validate read versions, then apply writes atomically. A moved
    /// version fails the whole commit with [`StoreError::Conflict`].
    async fn commit(
        &self,
        reads: Vec<(String, u64)>,
        writes: Vec<(String, Value)>,
    ) -> Result<(), StoreError>;
}

pub(crate) fn plan_key(plan_id: &str) -> String {
    format!("plans/{plan_id}")
}

// Zero-padded so lexicographic key order matches spec order.
pub(crate) fn spec_key(plan_id: &str, spec_index: u32) -> String {
    format!("plans/{plan_id}/specs/{spec_index:04}")
}

pub(crate) fn specs_prefix(plan_id: &str) -> String {
    format!("plans/{plan_id}/specs/")
}

fn decode<T: serde::de::DeserializeOwned>(key: &str, body: Value) -> Result<T, StoreError> {
    serde_json::from_value(body).map_err(|source| StoreError::Corrupt {
        key: key.to_string(),
        source,
    })
}

/// An in-flight interactive transaction: cached reads forming a consistent
/// snapshot, tracked read versions, and staged writes.
pub struct Txn<'a> {
    backend: &'a dyn Backend,
    reads: Vec<(String, u64)>,
    writes: Vec<(String, Value)>,
    snapshot: HashMap<String, Option<Value>>,
}

impl<'a> Txn<'a> {
    fn new(backend: &'a dyn Backend) -> Self {
        Self {
            backend,
            reads: Vec::new(),
            writes: Vec::new(),
            snapshot: HashMap::new(),
        }
    }

    async fn read_raw(&mut self, key: &str) -> Result<Option<Value>, StoreError> {
        if let Some(cached) = self.snapshot.get(key) {
            return Ok(cached.clone());
        }
        let doc = self.backend.get(key).await?;
        let (version, body) = match doc {
            Some(doc) => (doc.version, Some(doc.body)),
            None => (0, None),
        };
        self.reads.push((key.to_string(), version));
        self.snapshot.insert(key.to_string(), body.clone());
        Ok(body)
    }

    fn stage(&mut self, key: String, body: Value) {
        if let Some(existing) = self.writes.iter_mut().find(|(k, _)| *k == key) {
            existing.1 = body;
        } else {
            self.writes.push((key, body));
        }
    }

    pub async fn read_plan(&mut self, plan_id: &str) -> Result<Option<PlanRecord>, StoreError> {
        let key = plan_key(plan_id);
        match self.read_raw(&key).await? {
            Some(body) => Ok(Some(decode(&key, body)?)),
            None => Ok(None),
        }
    }

    pub async fn read_spec(
        &mut self,
        plan_id: &str,
        spec_index: u32,
    ) -> Result<Option<SpecRecord>, StoreError> {
        let key = spec_key(plan_id, spec_index);
        match self.read_raw(&key).await? {
            Some(body) => Ok(Some(decode(&key, body)?)),
            None => Ok(None),
        }
    }

    pub fn write_plan(&mut self, plan: &PlanRecord) -> Result<(), StoreError> {
        let body = serde_json::to_value(plan)?;
        self.stage(plan_key(&plan.plan_id), body);
        Ok(())
    }

    pub fn write_spec(&mut self, plan_id: &str, spec: &SpecRecord) -> Result<(), StoreError> {
        let body = serde_json::to_value(spec)?;
        self.stage(spec_key(plan_id, spec.spec_index), body);
        Ok(())
    }
}

/// Process-wide store handle. Cheap to clone; every clone shares the
/// backend, which is the only piece of state the service holds.
#[derive(Clone)]
pub struct Store {
    backend: Arc<dyn Backend>,
}

impl Store {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Fresh in-memory store, used by tests and `STORE_BACKEND=memory`.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    pub async fn load_plan(&self, plan_id: &str) -> Result<Option<PlanRecord>, StoreError> {
        let key = plan_key(plan_id);
        match self.backend.get(&key).await? {
            Some(doc) => Ok(Some(decode(&key, doc.body)?)),
            None => Ok(None),
        }
    }

    /// All spec records of a plan, ordered by spec_index. Empty when the
    /// plan is unknown.
    pub async fn load_specs(&self, plan_id: &str) -> Result<Vec<SpecRecord>, StoreError> {
        let docs = self.backend.list_prefix(&specs_prefix(plan_id)).await?;
        let mut specs = Vec::with_capacity(docs.len());
        for doc in docs {
            specs.push(decode::<SpecRecord>(&doc.key, doc.body)?);
        }
        specs.sort_by_key(|spec| spec.spec_index);
        Ok(specs)
    }

    /// Create the plan document and all spec documents in one atomic write,
    /// conditional on the plan document not existing.
    pub async fn create_plan_atomic(
        &self,
        plan: &PlanRecord,
        specs: &[SpecRecord],
    ) -> Result<(), StoreError> {
        let mut docs = Vec::with_capacity(specs.len() + 1);
        docs.push((plan_key(&plan.plan_id), serde_json::to_value(plan)?));
        for spec in specs {
            docs.push((
                spec_key(&plan.plan_id, spec.spec_index),
                serde_json::to_value(spec)?,
            ));
        }
        self.backend.create_all(docs).await
    }

    /// Run `body` inside an optimistic transaction. The body may run more
    /// than once; it must stay free of external side effects.
    pub async fn run_transaction<T, E, F>(&self, mut body: F) -> Result<T, E>
    where
        E: From<StoreError>,
        F: AsyncFnMut(&mut Txn<'_>) -> Result<T, E>,
    {
        let mut backoff = TXN_BACKOFF_BASE;
        for attempt in 1..=MAX_TXN_ATTEMPTS {
            let mut txn = Txn::new(self.backend.as_ref());
            let value = body(&mut txn).await?;
            let Txn { reads, writes, .. } = txn;
            match self.backend.commit(reads, writes).await {
                Ok(()) => return Ok(value),
                Err(StoreError::Conflict) if attempt < MAX_TXN_ATTEMPTS => {
                    let jitter = Duration::from_millis(u64::from(rand::random::<u8>() % 16));
                    warn!(attempt, "transaction conflict, retrying");
                    tokio::time::sleep(backoff + jitter).await;
                    backoff *= 2;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(StoreError::Conflict.into())
    }
}
