//! PDR Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Discovers Product Delivery Records (PDRs) on remote providers, parses them
//! into granules and hands each granule to a downstream workflow.
//!
//! # Pipeline
//!
//! - **Discovery**: list a provider directory, keep new PDRs ([`discovery`])
//! - **Parsing**: PVL manifest text to granules and files ([`parser`])
//! - **Collections**: resolve each data type's collection config ([`collections`])
//! - **Granule IDs**: derive IDs from file names ([`granule_id`])
//! - **Dispatch**: fan granules out and aggregate statuses ([`orchestrator`])
//! - **Admission**: throttle workflow starts from a queue ([`admission`])
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use pdr_ingest::config::IngestConfig;
//! use pdr_ingest::discovery::DiscoveryEngine;
//! use pdr_ingest::storage::{S3Storage, StorageConfig};
//! use pdr_ingest::transport::TransportClient;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::from_env()?;
//!     let transport = TransportClient::from_provider(&config.provider, &config.download_dir)?;
//!     let store = S3Storage::new(StorageConfig::from_env()?);
//!
//!     let engine = DiscoveryEngine::new(&config, Arc::new(transport), Arc::new(store))?;
//!     println!("{} new PDRs", engine.discover().await?.len());
//!     Ok(())
//! }
//! ```

pub mod admission;
pub mod collections;
pub mod config;
pub mod discovery;
pub mod dispatch;
pub mod error;
pub mod granule_id;
pub mod orchestrator;
pub mod parser;
pub mod storage;
pub mod task;
pub mod transport;

pub use error::{IngestError, IngestResult};
pub use orchestrator::IngestOrchestrator;
pub use task::{PdrTask, TaskDeps, TaskOutput};
