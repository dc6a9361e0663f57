//! In-memory collaborators for pipeline integration tests
//!
//! Each double implements one of the pipeline's seams and records what the
//! pipeline did with it, so tests can assert on side effects without any
//! network service.

#![allow(dead_code)]

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use pdr_common::types::{CollectionConfig, DispatchOutcome, DispatchStatus, Granule, Manifest};
use pdr_ingest::collections::CollectionStore;
use pdr_ingest::config::{IngestConfig, ProviderConfig};
use pdr_ingest::dispatch::{DispatchContext, GranuleDispatcher, ManifestForwarder, QueuedManifest};
use pdr_ingest::storage::ObjectStore;
use pdr_ingest::transport::{LocalManifest, Protocol, RemoteEntry, Transport};

pub const STACK: &str = "test-stack";
pub const PROVIDER_PATH: &str = "/pdrs";

pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("pdrs")
        .join(name)
}

pub fn fixture_text(name: &str) -> String {
    std::fs::read_to_string(fixture_path(name)).expect("Failed to read fixture")
}

/// Config for a MOD09GQ provider with the given download directory
pub fn test_config(download_dir: &TempDir) -> IngestConfig {
    let mut config = IngestConfig::new(
        STACK,
        ProviderConfig::new(Protocol::Ftp, "provider.example.com"),
        CollectionConfig::new("MOD09GQ", r"^(.*)\.hdf"),
    );
    config.provider_path = PROVIDER_PATH.to_string();
    config.download_dir = download_dir.path().to_path_buf();
    config
}

// ============================================================================
// Object store
// ============================================================================

#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    fail_exists: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, key: &str, data: &[u8]) {
        self.objects.lock().unwrap().insert(key.to_string(), data.to_vec());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Make existence checks for `key` fail
    pub fn fail_exists_for(&self, key: &str) {
        *self.fail_exists.lock().unwrap() = Some(key.to_string());
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        if self.fail_exists.lock().unwrap().as_deref() == Some(key) {
            bail!("connection reset");
        }
        Ok(self.contains(key))
    }

    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()> {
        self.objects.lock().unwrap().insert(key.to_string(), data);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.object(key))
    }
}

// ============================================================================
// Collection store
// ============================================================================

#[derive(Default)]
pub struct MemoryCollections {
    configs: Mutex<HashMap<String, CollectionConfig>>,
}

impl MemoryCollections {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with(self: Arc<Self>, data_type: &str, granule_id_extraction: &str) -> Arc<Self> {
        self.configs.lock().unwrap().insert(
            data_type.to_string(),
            CollectionConfig::new(data_type, granule_id_extraction),
        );
        self
    }
}

#[async_trait]
impl CollectionStore for MemoryCollections {
    async fn get(&self, data_type: &str) -> Result<Option<CollectionConfig>> {
        Ok(self.configs.lock().unwrap().get(data_type).cloned())
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Serves fixture PDRs as if they sat in one provider directory
pub struct FixtureTransport {
    files: Mutex<Vec<(String, PathBuf)>>,
    download_dir: PathBuf,
    fail_list: bool,
}

impl FixtureTransport {
    pub fn new(download_dir: &TempDir) -> Self {
        Self {
            files: Mutex::new(Vec::new()),
            download_dir: download_dir.path().to_path_buf(),
            fail_list: false,
        }
    }

    /// Serve fixture `fixture` under the remote name `name`
    pub fn serve(self, name: &str, fixture: &str) -> Self {
        self.files
            .lock()
            .unwrap()
            .push((name.to_string(), fixture_path(fixture)));
        self
    }

    /// Serve raw bytes under the remote name `name`
    pub fn serve_bytes(self, name: &str, data: &[u8]) -> Self {
        let served = self.download_dir.join("served");
        std::fs::create_dir_all(&served).expect("Failed to create served directory");
        let source = served.join(name);
        std::fs::write(&source, data).expect("Failed to write served file");

        self.files.lock().unwrap().push((name.to_string(), source));
        self
    }

        pub fn failing(mut self) -> Self {
        self.fail_list = true;
        self
    }
}

#[async_trait]
impl Transport for FixtureTransport {
    async fn list(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        if self.fail_list {
            bail!("530 Login incorrect");
        }

        let files = self.files.lock().unwrap().clone();
        let mut entries = Vec::new();
        for (name, source) in files {
            let size = std::fs::metadata(&source).map(|m| m.len()).ok();
            entries.push(RemoteEntry {
                name,
                path: path.to_string(),
                size,
            });
        }
        Ok(entries)
    }

    async fn download(&self, _path: &str, name: &str) -> Result<LocalManifest> {
        let source = self
            .files
            .lock()
            .unwrap()
            .iter()
            .find(|(served, _)| served == name)
            .map(|(_, source)| source.clone())
            .ok_or_else(|| anyhow!("550 {}: No such file", name))?;

        let local_path = self.download_dir.join(name);
        tokio::fs::copy(&source, &local_path).await?;

        Ok(LocalManifest {
            name: name.to_string(),
            local_path,
        })
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Returns scripted statuses by granule ID; unscripted granules run
#[derive(Default)]
pub struct ScriptedDispatcher {
    script: HashMap<String, Result<DispatchStatus, String>>,
    submitted: Mutex<Vec<(String, String)>>,
}

impl ScriptedDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, granule_id: &str, status: DispatchStatus) -> Self {
        self.script.insert(granule_id.to_string(), Ok(status));
        self
    }

    pub fn error(mut self, granule_id: &str, reason: &str) -> Self {
        self.script.insert(granule_id.to_string(), Err(reason.to_string()));
        self
    }

    /// `(granule_id, collection name)` per submitted granule
    pub fn submitted(&self) -> Vec<(String, String)> {
        let mut submitted = self.submitted.lock().unwrap().clone();
        submitted.sort();
        submitted
    }
}

#[async_trait]
impl GranuleDispatcher for ScriptedDispatcher {
    async fn submit(&self, granule: &Granule, context: &DispatchContext) -> Result<DispatchOutcome> {
        self.submitted
            .lock()
            .unwrap()
            .push((granule.granule_id.clone(), context.collection.name.clone()));

        match self.script.get(&granule.granule_id) {
            Some(Ok(status)) => Ok(DispatchOutcome::new(granule.granule_id.clone(), *status)),
            Some(Err(reason)) => Err(anyhow!(reason.clone())),
            None => Ok(DispatchOutcome::new(granule.granule_id.clone(), DispatchStatus::Running)),
        }
    }
}

// ============================================================================
// Forwarder
// ============================================================================

#[derive(Default)]
pub struct RecordingForwarder {
    forwarded: Mutex<Vec<String>>,
}

impl RecordingForwarder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn forwarded(&self) -> Vec<String> {
        self.forwarded.lock().unwrap().clone()
    }
}

#[async_trait]
impl ManifestForwarder for RecordingForwarder {
    async fn forward(&self, manifest: &Manifest) -> Result<QueuedManifest> {
        self.forwarded.lock().unwrap().push(manifest.name.clone());
        Ok(QueuedManifest {
            name: manifest.name.clone(),
            path: manifest.path.clone(),
            message_id: None,
        })
    }
}
