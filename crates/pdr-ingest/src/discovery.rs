//! PDR discovery
//!
//! Lists the provider directory, keeps names matching the PDR pattern and
//! drops every PDR already recorded in the durable store. In queue mode the
//! new PDRs are forwarded to the ingest queue.

use futures::stream::{self, StreamExt};
use regex::Regex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use pdr_common::types::Manifest;

use crate::config::IngestConfig;
use crate::dispatch::{ManifestForwarder, QueuedManifest};
use crate::error::{IngestError, IngestResult};
use crate::storage::{processed_pdr_key, ObjectStore};
use crate::transport::Transport;

/// Outcome of one discovery pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", content = "pdrs", rename_all = "lowercase")]
pub enum DiscoveryResult {
    /// New PDRs, in listing order
    Found(Vec<Manifest>),
    /// New PDRs that were forwarded to the ingest queue
    Queued(Vec<QueuedManifest>),
}

impl DiscoveryResult {
    pub fn len(&self) -> usize {
        match self {
            DiscoveryResult::Found(pdrs) => pdrs.len(),
            DiscoveryResult::Queued(pdrs) => pdrs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drops manifests already recorded under `{stack}/{folder}/`
pub struct NoveltyFilter {
    store: Arc<dyn ObjectStore>,
    stack: String,
    folder: String,
    concurrency: usize,
}

impl NoveltyFilter {
    pub fn new(store: Arc<dyn ObjectStore>, config: &IngestConfig) -> Self {
        Self {
            store,
            stack: config.stack.clone(),
            folder: config.pdr_folder.clone(),
            concurrency: config.discovery_concurrency.max(1),
        }
    }

    /// Keep candidates with no processed record
    ///
    /// Every check completes before the result is decided; one failed check
    /// fails the whole call.
    pub async fn retain_new(&self, candidates: Vec<Manifest>) -> IngestResult<Vec<Manifest>> {
        let checks: Vec<IngestResult<Option<Manifest>>> = stream::iter(candidates)
            .map(|manifest| {
                let store = Arc::clone(&self.store);
                let key = processed_pdr_key(&self.stack, &self.folder, &manifest.name);
                async move {
                    match store.exists(&key).await {
                        Ok(true) => {
                            debug!(pdr = %manifest.name, "Already processed");
                            Ok(None)
                        },
                        Ok(false) => Ok(Some(manifest)),
                        Err(e) => Err(IngestError::storage(key, e)),
                    }
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut fresh = Vec::new();
        for check in checks {
            if let Some(manifest) = check? {
                fresh.push(manifest);
            }
        }
        Ok(fresh)
    }
}

/// Finds new PDRs on a provider
pub struct DiscoveryEngine {
    transport: Arc<dyn Transport>,
    filter: NoveltyFilter,
    provider_path: String,
    pattern: Regex,
    queue_limit: Option<usize>,
    forwarder: Option<Arc<dyn ManifestForwarder>>,
}

impl DiscoveryEngine {
    pub fn new(
        config: &IngestConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn ObjectStore>,
    ) -> IngestResult<Self> {
        let pattern = Regex::new(&config.pdr_pattern).map_err(|e| {
            IngestError::Config(format!("invalid PDR pattern {}: {}", config.pdr_pattern, e))
        })?;

        Ok(Self {
            transport,
            filter: NoveltyFilter::new(store, config),
            provider_path: config.provider_path.clone(),
            pattern,
            queue_limit: config.queue_limit,
            forwarder: None,
        })
    }

    /// Switch to queue mode
    pub fn with_forwarder(mut self, forwarder: Arc<dyn ManifestForwarder>) -> Self {
        self.forwarder = Some(forwarder);
        self
    }

    /// PDR candidates on the provider, before the novelty check
    pub async fn list_candidates(&self) -> IngestResult<Vec<Manifest>> {
        let entries = self
            .transport
            .list(&self.provider_path)
            .await
            .map_err(|e| IngestError::transport("list", self.provider_path.clone(), e))?;

        Ok(entries
            .into_iter()
            .filter(|entry| self.pattern.is_match(&entry.name))
            .map(|entry| Manifest {
                name: entry.name,
                path: entry.path,
                size: entry.size,
            })
            .collect())
    }

    #[instrument(skip(self), fields(path = %self.provider_path))]
    pub async fn discover(&self) -> IngestResult<DiscoveryResult> {
        let candidates = self.list_candidates().await?;
        let candidate_count = candidates.len();

        let mut fresh = self.filter.retain_new(candidates).await?;

        info!(
            candidates = candidate_count,
            new = fresh.len(),
            "Discovered {} new PDRs",
            fresh.len()
        );

        let Some(forwarder) = &self.forwarder else {
            return Ok(DiscoveryResult::Found(fresh));
        };

        // zero means no limit
        if let Some(limit) = self.queue_limit.filter(|&limit| limit > 0) {
            fresh.truncate(limit);
        }

        let forwarded: Vec<IngestResult<QueuedManifest>> = stream::iter(fresh)
            .map(|manifest| {
                let forwarder = Arc::clone(forwarder);
                async move {
                    forwarder
                        .forward(&manifest)
                        .await
                        .map_err(|e| IngestError::Forward {
                            manifest: manifest.name.clone(),
                            source: e,
                        })
                }
            })
            .buffered(self.filter.concurrency)
            .collect()
            .await;

        let queued = forwarded.into_iter().collect::<IngestResult<Vec<_>>>()?;
        info!("Queued {} PDRs", queued.len());

        Ok(DiscoveryResult::Queued(queued))
    }
}
