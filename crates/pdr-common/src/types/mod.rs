//! Domain types shared by the PDR pipeline
//!
//! A PDR (Product Delivery Record) is a manifest describing one or more
//! granules, each granule being a group of remote files that share a data type.

use serde::{Deserialize, Serialize};

use crate::checksum::ChecksumType;
use crate::error::PdrError;

// ============================================================================
// Manifests
// ============================================================================

/// A PDR discovered on a provider
///
/// Identity is the file name; the durable store records processed PDRs under
/// `{stack}/{folder}/{name}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    /// Directory on the provider that contains the PDR
    pub path: String,
    /// Size reported by the provider listing, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl Manifest {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            size: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }
}

// ============================================================================
// Parse results
// ============================================================================

/// A single remote file referenced by a granule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GranuleFile {
    pub name: String,
    pub path: String,
    pub file_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum_type: Option<ChecksumType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum_value: Option<String>,
}

/// One FILE_GROUP of a PDR
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Granule {
    pub data_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_version: Option<String>,
    /// Empty until assigned by granule ID extraction
    #[serde(default)]
    pub granule_id: String,
    pub granule_size: u64,
    pub files: Vec<GranuleFile>,
}

impl Granule {
    /// Build a granule; `None` when the file sizes overflow `u64`
    pub fn new(
        data_type: impl Into<String>,
        data_version: Option<String>,
        files: Vec<GranuleFile>,
    ) -> Option<Self> {
        let granule_size = files
            .iter()
            .try_fold(0u64, |total, f| total.checked_add(f.file_size))?;
        Some(Self {
            data_type: data_type.into(),
            data_version,
            granule_id: String::new(),
            granule_size,
            files,
        })
    }

    /// File whose name identifies the granule (the first FILE_SPEC of the group)
    pub fn representative_file(&self) -> Option<&GranuleFile> {
        self.files.first()
    }
}

/// Structured content of one PDR
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseResult {
    pub files_count: usize,
    pub granules_count: usize,
    pub total_size: u64,
    pub granules: Vec<Granule>,
}

impl ParseResult {
    /// Build a result whose counters are derived from the granules
    ///
    /// `None` when the total size overflows `u64`.
    pub fn from_granules(granules: Vec<Granule>) -> Option<Self> {
        let total_size = granules
            .iter()
            .try_fold(0u64, |total, g| total.checked_add(g.granule_size))?;
        Some(Self {
            files_count: granules.iter().map(|g| g.files.len()).sum(),
            granules_count: granules.len(),
            total_size,
            granules,
        })
    }

    /// Distinct data types in order of first appearance
    pub fn data_types(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for granule in &self.granules {
            if !seen.contains(&granule.data_type.as_str()) {
                seen.push(&granule.data_type);
            }
        }
        seen
    }
}

// ============================================================================
// Collections
// ============================================================================

/// Collection metadata as stored in the collection config store
///
/// Only `granuleIdExtraction` is interpreted by the pipeline; every other key
/// is carried through to the dispatcher untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub granule_id_extraction: String,
    #[serde(flatten)]
    pub meta: serde_json::Map<String, serde_json::Value>,
}

impl CollectionConfig {
    pub fn new(name: impl Into<String>, granule_id_extraction: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            granule_id_extraction: granule_id_extraction.into(),
            meta: serde_json::Map::new(),
        }
    }
}

// ============================================================================
// Dispatch
// ============================================================================

/// Status reported by the downstream dispatcher for one granule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchStatus {
    Running,
    Completed,
    Failed,
}

impl DispatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchStatus::Running => "running",
            DispatchStatus::Completed => "completed",
            DispatchStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for DispatchStatus {
    type Err = PdrError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "running" => Ok(DispatchStatus::Running),
            "completed" => Ok(DispatchStatus::Completed),
            "failed" => Ok(DispatchStatus::Failed),
            other => Err(PdrError::InvalidStatus(other.to_string())),
        }
    }
}

impl std::fmt::Display for DispatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of handing one granule to the dispatcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchOutcome {
    pub granule_id: String,
    pub status: DispatchStatus,
}

impl DispatchOutcome {
    pub fn new(granule_id: impl Into<String>, status: DispatchStatus) -> Self {
        Self {
            granule_id: granule_id.into(),
            status,
        }
    }
}

/// Granule IDs bucketed by dispatch status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchAggregate {
    pub running: Vec<String>,
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    pub is_finished: bool,
}

impl DispatchAggregate {
    pub fn total(&self) -> usize {
        self.running.len() + self.completed.len() + self.failed.len()
    }
}

impl FromIterator<DispatchOutcome> for DispatchAggregate {
    fn from_iter<I: IntoIterator<Item = DispatchOutcome>>(iter: I) -> Self {
        let mut aggregate = DispatchAggregate::default();
        for outcome in iter {
            match outcome.status {
                DispatchStatus::Running => aggregate.running.push(outcome.granule_id),
                DispatchStatus::Completed => aggregate.completed.push(outcome.granule_id),
                DispatchStatus::Failed => aggregate.failed.push(outcome.granule_id),
            }
        }
        aggregate.is_finished = aggregate.running.is_empty();
        aggregate
    }
}
