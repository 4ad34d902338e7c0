//! Aggregate result cache
//!
//! Entries are keyed by a SHA-256 hash of the operation name and its exact
//! parameters. The cache remembers the store generation it was filled at;
//! once the generation moves (every record write bumps it), every entry
//! is dropped before the next lookup.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};

use aoi_common::db::store_generation;
use aoi_common::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tracing::debug;

#[derive(Debug, Default)]
struct CacheState {
    generation: Option<i64>,
    entries: HashMap<String, Value>,
}

#[derive(Debug, Default)]
pub struct AggregateCache {
    state: Mutex<CacheState>,
}

impl AggregateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache key for an operation and its parameters
    pub fn key<P: Serialize>(operation: &str, params: &P) -> Result<String> {
        let params = serde_json::to_string(params)
            .map_err(|e| Error::Cache(format!("cache key for {}: {}", operation, e)))?;
        let mut hasher = Sha256::new();
        hasher.update(operation.as_bytes());
        hasher.update([0u8]);
        hasher.update(params.as_bytes());
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Return the cached result or compute, store and return it
    pub async fn get_or_compute<T, P, F, Fut>(
        &self,
        db: &SqlitePool,
        operation: &str,
        params: &P,
        compute: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        P: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let key = Self::key(operation, params)?;
        let generation = store_generation(db).await?;

        {
            let mut state = self.lock();
            if state.generation != Some(generation) {
                if !state.entries.is_empty() {
                    debug!(
                        from = ?state.generation,
                        to = generation,
                        dropped = state.entries.len(),
                        "Store generation moved; clearing aggregate cache"
                    );
                }
                state.entries.clear();
                state.generation = Some(generation);
            }
            if let Some(hit) = state.entries.get(&key) {
                debug!(operation, "Aggregate cache hit");
                return serde_json::from_value(hit.clone())
                    .map_err(|e| Error::Cache(format!("cached {}: {}", operation, e)));
            }
        }

        debug!(operation, "Aggregate cache miss");
        let value = compute().await?;
        let json = serde_json::to_value(&value)
            .map_err(|e| Error::Cache(format!("caching {}: {}", operation, e)))?;

        let mut state = self.lock();
        if state.generation == Some(generation) {
            state.entries.insert(key, json);
        }
        Ok(value)
    }

    /// Drop every entry
    pub fn invalidate(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.generation = None;
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
