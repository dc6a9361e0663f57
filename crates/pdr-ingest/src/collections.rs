//! Collection lookup and per-run resolution
//!
//! Granules are attributed to collections by `dataType`. The configured
//! collection resolves without a lookup; every other type is fetched from the
//! collection store once per ingest run.

use anyhow::Context;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use pdr_common::types::CollectionConfig;

use crate::error::{IngestError, IngestResult};
use crate::storage::{collection_key, ObjectStore};

/// Read access to collection configs keyed by data type
#[async_trait]
pub trait CollectionStore: Send + Sync {
    /// `Ok(None)` when no config exists for `data_type`
    async fn get(&self, data_type: &str) -> anyhow::Result<Option<CollectionConfig>>;
}

/// Collection configs stored as JSON documents in an [`ObjectStore`]
///
/// Layout: `{stack}/collections/{dataType}.json`
pub struct ObjectCollectionStore {
    store: Arc<dyn ObjectStore>,
    stack: String,
}

impl ObjectCollectionStore {
    pub fn new(store: Arc<dyn ObjectStore>, stack: impl Into<String>) -> Self {
        Self {
            store,
            stack: stack.into(),
        }
    }

    /// Write a collection config under its data type
    pub async fn put(&self, data_type: &str, config: &CollectionConfig) -> anyhow::Result<()> {
        let body = serde_json::to_vec(config).context("Failed to serialize collection config")?;
        self.store.put(&collection_key(&self.stack, data_type), body).await
    }
}

#[async_trait]
impl CollectionStore for ObjectCollectionStore {
    async fn get(&self, data_type: &str) -> anyhow::Result<Option<CollectionConfig>> {
        let key = collection_key(&self.stack, data_type);

        let Some(body) = self.store.get(&key).await? else {
            return Ok(None);
        };

        let mut config: CollectionConfig = serde_json::from_slice(&body)
            .with_context(|| format!("Invalid collection config at {}", key))?;

        if config.name.is_empty() {
            config.name = data_type.to_string();
        }

        Ok(Some(config))
    }
}

/// Memoised data type to collection mapping for one manifest
pub struct CollectionResolver<'a> {
    store: &'a dyn CollectionStore,
    primary: Arc<CollectionConfig>,
    manifest: &'a str,
    resolved: HashMap<String, Arc<CollectionConfig>>,
}

impl<'a> CollectionResolver<'a> {
    pub fn new(store: &'a dyn CollectionStore, primary: &CollectionConfig, manifest: &'a str) -> Self {
        Self {
            store,
            primary: Arc::new(primary.clone()),
            manifest,
            resolved: HashMap::new(),
        }
    }

    /// Resolve the collection owning `data_type`
    ///
    /// Any lookup failure, including an absent config, is reported as a
    /// collection mismatch for the manifest.
    pub async fn resolve(&mut self, data_type: &str) -> IngestResult<Arc<CollectionConfig>> {
        if data_type == self.primary.name {
            return Ok(Arc::clone(&self.primary));
        }

        if let Some(config) = self.resolved.get(data_type) {
            return Ok(Arc::clone(config));
        }

        debug!(data_type, manifest = self.manifest, "Fetching collection config");

        let config = match self.store.get(data_type).await {
            Ok(Some(config)) => Arc::new(config),
            Ok(None) => return Err(self.mismatch(data_type)),
            Err(e) => {
                warn!(data_type, error = %format!("{:#}", e), "Collection lookup failed");
                return Err(self.mismatch(data_type));
            },
        };

        self.resolved.insert(data_type.to_string(), Arc::clone(&config));
        Ok(config)
    }

    /// Number of store lookups that succeeded so far
    pub fn fetched(&self) -> usize {
        self.resolved.len()
    }

    fn mismatch(&self, data_type: &str) -> IngestError {
        IngestError::CollectionMismatch {
            data_type: data_type.to_string(),
            expected: self.primary.name.clone(),
            manifest: self.manifest.to_string(),
        }
    }
}
