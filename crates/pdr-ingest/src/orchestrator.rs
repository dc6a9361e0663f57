//! PDR ingestion
//!
//! One call handles one PDR end to end:
//!
//! 1. download the PDR through the transport
//! 2. parse it into granules
//! 3. resolve the collection of every data type
//! 4. assign granule IDs from each granule's first file
//! 5. record the PDR as processed
//! 6. dispatch every granule and aggregate the outcomes (queue mode)
//!
//! Any failure up to step 5 leaves the PDR unrecorded, so the next discovery
//! pass picks it up again. The downloaded copy is removed either way.

use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use pdr_common::types::{DispatchAggregate, DispatchOutcome, DispatchStatus, Manifest, ParseResult};

use crate::collections::{CollectionResolver, CollectionStore};
use crate::config::IngestConfig;
use crate::dispatch::{DispatchContext, GranuleDispatcher};
use crate::error::{IngestError, IngestResult};
use crate::granule_id::extract_granule_id;
use crate::parser::parse_pdr;
use crate::storage::{processed_pdr_key, ObjectStore};
use crate::transport::Transport;

/// A parsed PDR with IDs assigned and a dispatch context per data type
struct PreparedManifest {
    result: ParseResult,
    contexts: HashMap<String, DispatchContext>,
}

pub struct IngestOrchestrator {
    config: IngestConfig,
    transport: Arc<dyn Transport>,
    store: Arc<dyn ObjectStore>,
    collections: Arc<dyn CollectionStore>,
    dispatcher: Option<Arc<dyn GranuleDispatcher>>,
}

impl IngestOrchestrator {
    pub fn new(
        config: IngestConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn ObjectStore>,
        collections: Arc<dyn CollectionStore>,
    ) -> Self {
        Self {
            config,
            transport,
            store,
            collections,
            dispatcher: None,
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn GranuleDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Download, parse, identify and record a PDR without dispatching
    #[instrument(skip(self, manifest), fields(pdr = %manifest.name))]
    pub async fn parse_only(&self, manifest: &Manifest) -> IngestResult<ParseResult> {
        let prepared = self.prepare(manifest).await?;
        Ok(prepared.result)
    }

    /// Ingest a PDR and dispatch all of its granules
    #[instrument(skip(self, manifest), fields(pdr = %manifest.name))]
    pub async fn ingest(&self, manifest: &Manifest) -> IngestResult<DispatchAggregate> {
        let dispatcher = self
            .dispatcher
            .clone()
            .ok_or_else(|| IngestError::Config("no granule dispatcher configured".to_string()))?;

        let start = Instant::now();
        let prepared = self.prepare(manifest).await?;

        info!("Queueing {} granules to be processed", prepared.result.granules.len());

        let concurrency = self.config.dispatch_concurrency.max(1);
        let contexts = &prepared.contexts;

        let outcomes: Vec<DispatchOutcome> = stream::iter(prepared.result.granules.iter())
            .map(|granule| {
                let dispatcher = Arc::clone(&dispatcher);
                let context = contexts.get(&granule.data_type);
                async move {
                    let submitted = match context {
                        Some(context) => dispatcher
                            .submit(granule, context)
                            .await
                            .map_err(|e| format!("{:#}", e)),
                        None => Err(format!("no collection resolved for {}", granule.data_type)),
                    };

                    submitted.unwrap_or_else(|reason| {
                        let err = IngestError::Dispatch {
                            granule_id: granule.granule_id.clone(),
                            reason,
                        };
                        error!(error = %err, "Granule dispatch failed");
                        DispatchOutcome::new(granule.granule_id.clone(), DispatchStatus::Failed)
                    })
                }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let aggregate: DispatchAggregate = outcomes.into_iter().collect();

        info!(
            running = aggregate.running.len(),
            completed = aggregate.completed.len(),
            failed = aggregate.failed.len(),
            is_finished = aggregate.is_finished,
            "Dispatched {} granules in {:.2}s",
            aggregate.total(),
            start.elapsed().as_secs_f64()
        );

        Ok(aggregate)
    }

    async fn prepare(&self, manifest: &Manifest) -> IngestResult<PreparedManifest> {
        let local = self
            .transport
            .download(&manifest.path, &manifest.name)
            .await
            .map_err(|e| IngestError::transport("download", &manifest.path, e))?;

        let prepared = self.prepare_downloaded(manifest, &local.local_path).await;

        // the local copy goes away whether or not the PDR was recorded
        if let Err(e) = tokio::fs::remove_file(&local.local_path).await {
            warn!(path = %local.local_path.display(), "Failed to remove downloaded PDR: {}", e);
        }

        prepared
    }

    async fn prepare_downloaded(
        &self,
        manifest: &Manifest,
        local_path: &Path,
    ) -> IngestResult<PreparedManifest> {
        let bytes = tokio::fs::read(local_path).await?;
        let text = std::str::from_utf8(&bytes).map_err(|e| {
            IngestError::manifest_format(&manifest.name, format!("PDR is not valid UTF-8: {}", e))
        })?;

        let mut result = parse_pdr(text, &manifest.name)?;
        info!("There are {} granules in {}", result.granules_count, manifest.name);
        info!("There are {} files in {}", result.files_count, manifest.name);

        let contexts = self.identify(manifest, &mut result).await?;

        let key = processed_pdr_key(&self.config.stack, &self.config.pdr_folder, &manifest.name);
        self.store
            .put(&key, bytes)
            .await
            .map_err(|e| IngestError::storage(key.clone(), e))?;
        info!("Recorded {} as processed", key);

        Ok(PreparedManifest { result, contexts })
    }

    /// Resolve collections per data type and assign granule IDs
    async fn identify(
        &self,
        manifest: &Manifest,
        result: &mut ParseResult,
    ) -> IngestResult<HashMap<String, DispatchContext>> {
        let mut resolver =
            CollectionResolver::new(self.collections.as_ref(), &self.config.collection, &manifest.name);
        let mut contexts: HashMap<String, DispatchContext> = HashMap::new();

        for data_type in result.data_types() {
            let collection = resolver.resolve(data_type).await?;
            contexts.insert(
                data_type.to_string(),
                DispatchContext {
                    stack: self.config.stack.clone(),
                    provider: self.config.provider.clone(),
                    pdr: manifest.clone(),
                    collection,
                },
            );
        }
        debug!(
            data_types = contexts.len(),
            fetched = resolver.fetched(),
            "Resolved collections for {}",
            manifest.name
        );

        for granule in result.granules.iter_mut() {
            let pattern = contexts
                .get(&granule.data_type)
                .map(|context| context.collection.granule_id_extraction.as_str())
                .unwrap_or_default();

            let granule_id = granule
                .representative_file()
                .map(|file| extract_granule_id(&file.name, pattern));
            if let Some(granule_id) = granule_id {
                granule.granule_id = granule_id;
            }
        }

        Ok(contexts)
    }
}
