//! PDR Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the PDR ingest workspace.
//!
//! # Overview
//!
//! This crate provides common functionality used across all workspace members:
//!
//! - **Error Handling**: Custom error types and result types
//! - **Checksums**: Checksum types declared by manifests
//! - **Types**: Manifests, granules, collection configs and dispatch outcomes
//! - **Logging**: Centralized tracing subscriber setup
//!
//! # Example
//!
//! ```no_run
//! use pdr_common::checksum::ChecksumType;
//! use pdr_common::types::DispatchStatus;
//! use pdr_common::Result;
//!
//! fn parse_declared(kind: &str, status: &str) -> Result<(ChecksumType, DispatchStatus)> {
//!     Ok((kind.parse()?, status.parse()?))
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{PdrError, Result};
