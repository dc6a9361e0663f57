//! Configuration management
//!
//! Every component receives the values it needs from an [`IngestConfig`]
//! built once at startup; nothing below the binary reads the environment.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use pdr_common::types::CollectionConfig;

use crate::error::{IngestError, IngestResult};
use crate::transport::Protocol;

// ============================================================================
// Defaults
// ============================================================================

/// Default folder under the stack prefix where processed PDRs are recorded.
pub const DEFAULT_PDR_FOLDER: &str = "pdrs";

/// Default directory listed on the provider.
pub const DEFAULT_PROVIDER_PATH: &str = "/";

/// Default manifest name pattern.
pub const DEFAULT_PDR_PATTERN: &str = r"^(.*\.PDR)$";

/// Default granule ID pattern for the primary collection.
pub const DEFAULT_GRANULE_ID_EXTRACTION: &str = r"^(.*)\.hdf";

/// Default number of concurrent existence checks during discovery.
pub const DEFAULT_DISCOVERY_CONCURRENCY: usize = 16;

/// Default number of concurrent granule dispatches per manifest.
pub const DEFAULT_DISPATCH_CONCURRENCY: usize = 10;

/// Default directory for downloaded manifests.
pub const DEFAULT_DOWNLOAD_DIR: &str = "/tmp/pdr-ingest";

/// Default upper bound of concurrently running executions in the admission loop.
pub const DEFAULT_MAX_CONCURRENT_EXECUTIONS: usize = 10;

/// Remote provider the manifests are discovered on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
}

impl ProviderConfig {
    pub fn new(protocol: Protocol, host: impl Into<String>) -> Self {
        Self {
            protocol,
            host: host.into(),
            port: protocol.default_port(),
            username: None,
            password: None,
        }
    }
}

/// Queue endpoints used by the queue-mode tasks and the admission loop
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Queue receiving one message per dispatched granule
    pub granule_queue_url: Option<String>,
    /// Queue receiving one message per discovered PDR
    pub pdr_queue_url: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    #[serde(default, skip_serializing)]
    pub secret_key: Option<String>,
}

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Deployment prefix for every durable key
    pub stack: String,
    pub pdr_folder: String,
    pub provider: ProviderConfig,
    pub provider_path: String,
    /// Collection the PDRs are expected to belong to
    pub collection: CollectionConfig,
    pub pdr_pattern: String,
    pub queue_limit: Option<usize>,
    pub discovery_concurrency: usize,
    pub dispatch_concurrency: usize,
    pub download_dir: PathBuf,
    pub max_concurrent_executions: usize,
    pub queues: QueueConfig,
}

impl IngestConfig {
    /// Configuration with defaults for everything but the deployment identity
    pub fn new(stack: impl Into<String>, provider: ProviderConfig, collection: CollectionConfig) -> Self {
        Self {
            stack: stack.into(),
            pdr_folder: DEFAULT_PDR_FOLDER.to_string(),
            provider,
            provider_path: DEFAULT_PROVIDER_PATH.to_string(),
            collection,
            pdr_pattern: DEFAULT_PDR_PATTERN.to_string(),
            queue_limit: None,
            discovery_concurrency: DEFAULT_DISCOVERY_CONCURRENCY,
            dispatch_concurrency: DEFAULT_DISPATCH_CONCURRENCY,
            download_dir: PathBuf::from(DEFAULT_DOWNLOAD_DIR),
            max_concurrent_executions: DEFAULT_MAX_CONCURRENT_EXECUTIONS,
            queues: QueueConfig::default(),
        }
    }

    /// Load configuration from environment and defaults
    ///
    /// Required: `PDR_STACK`, `PDR_PROVIDER_HOST`, `PDR_COLLECTION_NAME`.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let protocol: Protocol = std::env::var("PDR_PROVIDER_PROTOCOL")
            .unwrap_or_else(|_| "ftp".to_string())
            .parse()?;

        let provider = ProviderConfig {
            protocol,
            host: std::env::var("PDR_PROVIDER_HOST").unwrap_or_default(),
            port: env_parse("PDR_PROVIDER_PORT")?.unwrap_or(protocol.default_port()),
            username: std::env::var("PDR_PROVIDER_USERNAME").ok(),
            password: std::env::var("PDR_PROVIDER_PASSWORD").ok(),
        };

        let mut collection = CollectionConfig::new(
            std::env::var("PDR_COLLECTION_NAME").unwrap_or_default(),
            std::env::var("PDR_GRANULE_ID_EXTRACTION")
                .unwrap_or_else(|_| DEFAULT_GRANULE_ID_EXTRACTION.to_string()),
        );
        collection.version = std::env::var("PDR_COLLECTION_VERSION").ok();

        let config = IngestConfig {
            stack: std::env::var("PDR_STACK").unwrap_or_default(),
            pdr_folder: std::env::var("PDR_FOLDER").unwrap_or_else(|_| DEFAULT_PDR_FOLDER.to_string()),
            provider,
            provider_path: std::env::var("PDR_PROVIDER_PATH")
                .unwrap_or_else(|_| DEFAULT_PROVIDER_PATH.to_string()),
            collection,
            pdr_pattern: std::env::var("PDR_PATTERN").unwrap_or_else(|_| DEFAULT_PDR_PATTERN.to_string()),
            queue_limit: env_parse("PDR_QUEUE_LIMIT")?,
            discovery_concurrency: env_parse("PDR_DISCOVERY_CONCURRENCY")?
                .unwrap_or(DEFAULT_DISCOVERY_CONCURRENCY),
            dispatch_concurrency: env_parse("PDR_DISPATCH_CONCURRENCY")?
                .unwrap_or(DEFAULT_DISPATCH_CONCURRENCY),
            download_dir: std::env::var("PDR_DOWNLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_DOWNLOAD_DIR)),
            max_concurrent_executions: env_parse("PDR_MAX_CONCURRENT_EXECUTIONS")?
                .unwrap_or(DEFAULT_MAX_CONCURRENT_EXECUTIONS),
            queues: QueueConfig {
                granule_queue_url: std::env::var("PDR_GRANULE_QUEUE_URL").ok(),
                pdr_queue_url: std::env::var("PDR_QUEUE_URL").ok(),
                region: std::env::var("SQS_REGION")
                    .or_else(|_| std::env::var("S3_REGION"))
                    .ok(),
                endpoint: std::env::var("SQS_ENDPOINT").ok(),
                access_key: std::env::var("SQS_ACCESS_KEY")
                    .or_else(|_| std::env::var("AWS_ACCESS_KEY_ID"))
                    .ok(),
                secret_key: std::env::var("SQS_SECRET_KEY")
                    .or_else(|_| std::env::var("AWS_SECRET_ACCESS_KEY"))
                    .ok(),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> IngestResult<()> {
        if self.stack.trim().is_empty() {
            return Err(IngestError::Config("stack cannot be empty".to_string()));
        }

        if self.provider.host.trim().is_empty() {
            return Err(IngestError::Config("provider host cannot be empty".to_string()));
        }

        if self.provider.port == 0 {
            return Err(IngestError::Config("provider port must be greater than 0".to_string()));
        }

        if self.collection.name.trim().is_empty() {
            return Err(IngestError::Config("collection name cannot be empty".to_string()));
        }

        if self.pdr_folder.trim().is_empty() {
            return Err(IngestError::Config("PDR folder cannot be empty".to_string()));
        }

        regex::Regex::new(&self.pdr_pattern).map_err(|e| {
            IngestError::Config(format!("invalid PDR pattern {}: {}", self.pdr_pattern, e))
        })?;

        if self.discovery_concurrency == 0 || self.dispatch_concurrency == 0 {
            return Err(IngestError::Config("concurrency limits must be greater than 0".to_string()));
        }

        if self.max_concurrent_executions == 0 {
            return Err(IngestError::Config(
                "max concurrent executions must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Parse an optional variable; a value that does not parse is an error
fn env_parse<T: std::str::FromStr>(key: &str) -> IngestResult<Option<T>> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| IngestError::Config(format!("{} has an invalid value `{}`", key, value))),
        Err(_) => Ok(None),
    }
}
