//! Error types for PDR discovery and ingestion
//!
//! Every variant is scoped to one manifest or one granule; nothing here is
//! fatal to the process.

use thiserror::Error;

/// Result type alias for ingest operations
pub type IngestResult<T> = std::result::Result<T, IngestError>;

/// Pipeline error taxonomy
#[derive(Error, Debug)]
pub enum IngestError {
    /// Listing or downloading from the provider failed
    #[error("Transport error during {operation} of {path}: {source:#}")]
    Transport {
        operation: &'static str,
        path: String,
        #[source]
        source: anyhow::Error,
    },

    /// The PDR content could not be interpreted
    #[error("Invalid PDR {manifest}: {reason}")]
    ManifestFormat { manifest: String, reason: String },

    /// A granule declares a data type with no resolvable collection
    #[error("{data_type} dataType in {manifest} doesn't match {expected}")]
    CollectionMismatch {
        data_type: String,
        expected: String,
        manifest: String,
    },

    /// The durable store rejected a read or write
    #[error("Storage error for key {key}: {source:#}")]
    Storage {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    /// A discovered PDR could not be handed to the ingest queue
    #[error("Failed to queue PDR {manifest}: {source:#}")]
    Forward {
        manifest: String,
        #[source]
        source: anyhow::Error,
    },

    /// The downstream dispatcher rejected a granule
    #[error("Dispatch of granule {granule_id} failed: {reason}")]
    Dispatch { granule_id: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IngestError {
    pub fn transport(operation: &'static str, path: impl Into<String>, source: anyhow::Error) -> Self {
        IngestError::Transport {
            operation,
            path: path.into(),
            source,
        }
    }

    pub fn storage(key: impl Into<String>, source: anyhow::Error) -> Self {
        IngestError::Storage {
            key: key.into(),
            source,
        }
    }

    pub fn manifest_format(manifest: impl Into<String>, reason: impl Into<String>) -> Self {
        IngestError::ManifestFormat {
            manifest: manifest.into(),
            reason: reason.into(),
        }
    }
}

impl From<pdr_common::PdrError> for IngestError {
    fn from(err: pdr_common::PdrError) -> Self {
        match err {
            pdr_common::PdrError::Io(e) => IngestError::Io(e),
            pdr_common::PdrError::Config(msg) => IngestError::Config(msg),
            other => IngestError::Config(other.to_string()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_mismatch_message() {
        let err = IngestError::CollectionMismatch {
            data_type: "MOD87GQ".to_string(),
            expected: "MOD09GQ".to_string(),
            manifest: "PDN.ID1611071307.PDR".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "MOD87GQ dataType in PDN.ID1611071307.PDR doesn't match MOD09GQ"
        );
    }

    #[test]
    fn test_transport_error_includes_cause() {
        let err = IngestError::transport("list", "/pdrs", anyhow::anyhow!("connection refused"));
        assert!(err.to_string().contains("connection refused"));
        assert!(err.to_string().contains("list of /pdrs"));
    }
}
