//! Task selection
//!
//! A task is one of four operations (discover or parse, each optionally
//! queueing its output) bound to a provider protocol.

use serde::Serialize;
use std::sync::Arc;

use pdr_common::types::{DispatchAggregate, Manifest, ParseResult};

use crate::collections::CollectionStore;
use crate::config::{IngestConfig, ProviderConfig};
use crate::discovery::{DiscoveryEngine, DiscoveryResult};
use crate::dispatch::{GranuleDispatcher, ManifestForwarder};
use crate::error::{IngestError, IngestResult};
use crate::orchestrator::IngestOrchestrator;
use crate::storage::ObjectStore;
use crate::transport::{Protocol, Transport, TransportClient};

/// Top-level operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Discover,
    Parse,
}

impl std::str::FromStr for Operation {
    type Err = IngestError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "discover" => Ok(Operation::Discover),
            "parse" => Ok(Operation::Parse),
            other => Err(IngestError::Config(format!("Operation {} is not supported", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdrTask {
    Discover(Protocol),
    DiscoverAndQueue(Protocol),
    Parse(Protocol),
    ParseAndQueue(Protocol),
}

/// Collaborators a task runs against
pub struct TaskDeps {
    pub transport: Arc<dyn Transport>,
    pub store: Arc<dyn ObjectStore>,
    pub collections: Arc<dyn CollectionStore>,
    pub dispatcher: Option<Arc<dyn GranuleDispatcher>>,
    pub forwarder: Option<Arc<dyn ManifestForwarder>>,
}

/// Result of running a task
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "task", content = "output", rename_all = "camelCase")]
pub enum TaskOutput {
    Discovered(DiscoveryResult),
    Parsed(ParseResult),
    Dispatched(DispatchAggregate),
}

impl PdrTask {
    /// Pick the task for an operation, protocol and queue mode
    pub fn select(operation: &str, protocol: &str, queue: bool) -> IngestResult<Self> {
        let operation: Operation = operation.parse()?;
        let protocol: Protocol = protocol.parse()?;

        Ok(match (operation, queue) {
            (Operation::Discover, false) => PdrTask::Discover(protocol),
            (Operation::Discover, true) => PdrTask::DiscoverAndQueue(protocol),
            (Operation::Parse, false) => PdrTask::Parse(protocol),
            (Operation::Parse, true) => PdrTask::ParseAndQueue(protocol),
        })
    }

    pub fn protocol(&self) -> Protocol {
        match *self {
            PdrTask::Discover(p)
            | PdrTask::DiscoverAndQueue(p)
            | PdrTask::Parse(p)
            | PdrTask::ParseAndQueue(p) => p,
        }
    }

    pub fn queues(&self) -> bool {
        matches!(self, PdrTask::DiscoverAndQueue(_) | PdrTask::ParseAndQueue(_))
    }

    /// The configured provider reached over the task's protocol
    ///
    /// A port left at the configured protocol's default follows the task's
    /// protocol instead.
    pub fn provider(&self, config: &IngestConfig) -> ProviderConfig {
        let mut provider = config.provider.clone();
        if provider.port == provider.protocol.default_port() {
            provider.port = self.protocol().default_port();
        }
        provider.protocol = self.protocol();
        provider
    }

    /// Transport for the task's protocol against the configured provider
    pub fn transport(&self, config: &IngestConfig) -> anyhow::Result<TransportClient> {
        TransportClient::from_provider(&self.provider(config), &config.download_dir)
    }

    /// Run the task; parse tasks require the PDR to ingest
    pub async fn run(
        &self,
        config: &IngestConfig,
        deps: TaskDeps,
        pdr: Option<&Manifest>,
    ) -> IngestResult<TaskOutput> {
        match self {
            PdrTask::Discover(_) | PdrTask::DiscoverAndQueue(_) => {
                let mut engine = DiscoveryEngine::new(config, deps.transport, deps.store)?;
                if self.queues() {
                    let forwarder = deps.forwarder.ok_or_else(|| {
                        IngestError::Config("queue mode requires a PDR forwarder".to_string())
                    })?;
                    engine = engine.with_forwarder(forwarder);
                }
                Ok(TaskOutput::Discovered(engine.discover().await?))
            },
            PdrTask::Parse(_) | PdrTask::ParseAndQueue(_) => {
                let pdr = pdr.ok_or_else(|| IngestError::Config("parse requires a PDR".to_string()))?;
                let mut orchestrator = IngestOrchestrator::new(
                    config.clone(),
                    deps.transport,
                    deps.store,
                    deps.collections,
                );

                if !self.queues() {
                    return Ok(TaskOutput::Parsed(orchestrator.parse_only(pdr).await?));
                }

                let dispatcher = deps.dispatcher.ok_or_else(|| {
                    IngestError::Config("queue mode requires a granule dispatcher".to_string())
                })?;
                orchestrator = orchestrator.with_dispatcher(dispatcher);
                Ok(TaskOutput::Dispatched(orchestrator.ingest(pdr).await?))
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use pdr_common::types::CollectionConfig;

    #[test]
    fn test_select_all_combinations() {
        assert_eq!(PdrTask::select("discover", "ftp", false).unwrap(), PdrTask::Discover(Protocol::Ftp));
        assert_eq!(
            PdrTask::select("discover", "http", true).unwrap(),
            PdrTask::DiscoverAndQueue(Protocol::Http)
        );
        assert_eq!(PdrTask::select("parse", "sftp", false).unwrap(), PdrTask::Parse(Protocol::Sftp));
        assert_eq!(
            PdrTask::select("parse", "ftp", true).unwrap(),
            PdrTask::ParseAndQueue(Protocol::Ftp)
        );
    }

    #[test]
    fn test_select_rejects_unknown_protocol() {
        let err = PdrTask::select("discover", "gopher", false).unwrap_err();
        assert_eq!(err.to_string(), "Configuration error: Protocol gopher is not supported");
    }

    #[test]
    fn test_select_rejects_unknown_operation() {
        assert!(matches!(
            PdrTask::select("archive", "ftp", false),
            Err(IngestError::Config(_))
        ));
    }

    #[test]
    fn test_queue_flag() {
        assert!(PdrTask::ParseAndQueue(Protocol::Ftp).queues());
        assert!(!PdrTask::Parse(Protocol::Ftp).queues());
        assert_eq!(PdrTask::Parse(Protocol::Sftp).protocol(), Protocol::Sftp);
    }

    #[test]
    fn test_provider_follows_task_protocol() {
        let mut config = IngestConfig::new(
            "lpdaac",
            ProviderConfig::new(Protocol::Ftp, "e4ftl01.example.com"),
            CollectionConfig::new("MOD09GQ", r"^(.*)\.hdf"),
        );

        let provider = PdrTask::Discover(Protocol::Https).provider(&config);
        assert_eq!(provider.protocol, Protocol::Https);
        assert_eq!(provider.port, 443);

        // an explicit port is kept
        config.provider.port = 2121;
        let provider = PdrTask::Discover(Protocol::Http).provider(&config);
        assert_eq!(provider.port, 2121);

        let client = PdrTask::Parse(Protocol::Https).transport(&config).unwrap();
        assert_eq!(client.protocol(), Protocol::Https);
    }
}
