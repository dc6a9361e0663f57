//! Downstream handoff
//!
//! Granules go to a [`GranuleDispatcher`]; discovered PDRs go to a
//! [`ManifestForwarder`]. Both have SQS implementations that enqueue a JSON
//! message for the workflow that picks them up.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_sqs::config::{BehaviorVersion, Region};
use aws_sdk_sqs::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use pdr_common::types::{CollectionConfig, DispatchOutcome, DispatchStatus, Granule, Manifest};

use crate::config::{ProviderConfig, QueueConfig};

/// Event context shared by every granule of one data type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchContext {
    pub stack: String,
    pub provider: ProviderConfig,
    pub pdr: Manifest,
    pub collection: Arc<CollectionConfig>,
}

/// Hands a single granule to the processing workflow
#[async_trait]
pub trait GranuleDispatcher: Send + Sync {
    async fn submit(&self, granule: &Granule, context: &DispatchContext) -> Result<DispatchOutcome>;
}

/// A PDR handed to the ingest queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedManifest {
    pub name: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

/// Forwards a newly discovered PDR to the ingestion entry point
#[async_trait]
pub trait ManifestForwarder: Send + Sync {
    async fn forward(&self, manifest: &Manifest) -> Result<QueuedManifest>;
}

/// Build an SQS client from queue configuration
pub fn sqs_client(config: &QueueConfig) -> Client {
    let region = config.region.clone().unwrap_or_else(|| "us-east-1".to_string());

    let mut builder = aws_sdk_sqs::Config::builder()
        .region(Region::new(region))
        .behavior_version(BehaviorVersion::latest());

    if let (Some(key_id), Some(secret)) = (&config.access_key, &config.secret_key) {
        builder = builder.credentials_provider(Credentials::new(key_id, secret, None, None, "pdr-queue"));
    }

    if let Some(endpoint) = config.endpoint.as_deref().filter(|e| !e.is_empty()) {
        builder = builder.endpoint_url(endpoint);
    }

    Client::from_conf(builder.build())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GranuleMessage<'a> {
    granule: &'a Granule,
    #[serde(flatten)]
    context: &'a DispatchContext,
}

/// Enqueues one message per granule
///
/// Delivery only means the workflow will run, so every accepted granule is
/// reported as running.
pub struct SqsDispatcher {
    client: Client,
    queue_url: String,
}

impl SqsDispatcher {
    pub fn new(client: Client, queue_url: impl Into<String>) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
        }
    }

    pub fn from_config(config: &QueueConfig) -> Result<Self> {
        let queue_url = config
            .granule_queue_url
            .clone()
            .ok_or_else(|| anyhow!("PDR_GRANULE_QUEUE_URL is required to dispatch granules"))?;
        Ok(Self::new(sqs_client(config), queue_url))
    }
}

#[async_trait]
impl GranuleDispatcher for SqsDispatcher {
    #[instrument(skip(self, granule, context), fields(granule_id = %granule.granule_id))]
    async fn submit(&self, granule: &Granule, context: &DispatchContext) -> Result<DispatchOutcome> {
        let body = serde_json::to_string(&GranuleMessage { granule, context })
            .context("Failed to serialize granule message")?;

        let response = self
            .client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body)
            .send()
            .await
            .map_err(|e| anyhow!("SQS send failed: {e:?}"))?;

        debug!(message_id = ?response.message_id(), "Queued granule");

        Ok(DispatchOutcome::new(granule.granule_id.clone(), DispatchStatus::Running))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PdrMessage<'a> {
    stack: &'a str,
    pdr: &'a Manifest,
}

/// Enqueues discovered PDRs for the parse workflow
pub struct SqsManifestForwarder {
    client: Client,
    queue_url: String,
    stack: String,
}

impl SqsManifestForwarder {
    pub fn new(client: Client, queue_url: impl Into<String>, stack: impl Into<String>) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
            stack: stack.into(),
        }
    }

    pub fn from_config(config: &QueueConfig, stack: &str) -> Result<Self> {
        let queue_url = config
            .pdr_queue_url
            .clone()
            .ok_or_else(|| anyhow!("PDR_QUEUE_URL is required to queue PDRs"))?;
        Ok(Self::new(sqs_client(config), queue_url, stack))
    }
}

#[async_trait]
impl ManifestForwarder for SqsManifestForwarder {
    #[instrument(skip(self, manifest), fields(pdr = %manifest.name))]
    async fn forward(&self, manifest: &Manifest) -> Result<QueuedManifest> {
        let body = serde_json::to_string(&PdrMessage {
            stack: &self.stack,
            pdr: manifest,
        })
        .context("Failed to serialize PDR message")?;

        let response = self
            .client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body)
            .send()
            .await
            .map_err(|e| anyhow!("SQS send failed: {e:?}"))?;

        info!("Queued PDR {}", manifest.name);

        Ok(QueuedManifest {
            name: manifest.name.clone(),
            path: manifest.path.clone(),
            message_id: response.message_id().map(str::to_string),
        })
    }
}
