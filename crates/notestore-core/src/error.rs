//! Error types for schema migration
//!
//! Every error is fatal to the migration run. Nothing here is retried: a
//! deterministic transformation failure would simply fail again.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::schema::AttributeKind;

/// Result type alias for migration operations
pub type MigrationResult<T> = std::result::Result<T, MigrationError>;

/// Main error type for the migration pipeline
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The schema registry is empty or a descriptor is malformed.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The store file exists but its metadata (or body) cannot be read.
    #[error("Store at {} is unreadable: {reason}", path.display())]
    StoreUnreadable { path: PathBuf, reason: String },

    /// A version pair requires a hand-authored plan and none is registered.
    #[error("No explicit mapping plan registered for {from_version} -> {to_version}")]
    MissingMappingPlan {
        from_version: String,
        to_version: String,
    },

    /// The structural diff between two adjacent versions is not purely additive.
    #[error("Cannot infer mapping {from_version} -> {to_version}: {detail}")]
    MappingInference {
        from_version: String,
        to_version: String,
        detail: String,
    },

    /// A per-record transform failed its contract.
    #[error("Transformation failed for {entity} record {record}: {detail}")]
    Transformation {
        entity: String,
        record: u64,
        detail: String,
    },

    /// Migrations are disabled and the store is at an older known version.
    #[error(
        "Store at {} is at {found} but {expected} is required (migrations disabled)",
        path.display()
    )]
    IncompatibleStore {
        path: PathBuf,
        found: String,
        expected: String,
    },

    /// Any filesystem failure while creating, writing, renaming, or cleaning up.
    #[error("Filesystem error during {op} on {}: {source}", path.display())]
    Filesystem {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl MigrationError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a store-unreadable error
    pub fn unreadable(path: &Path, reason: impl Into<String>) -> Self {
        Self::StoreUnreadable {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Wrap an I/O error with the operation and path it happened on.
    pub fn fs(op: &'static str, path: &Path, source: io::Error) -> Self {
        Self::Filesystem {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    /// Stable error code string (for CLI and JSON output).
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::StoreUnreadable { .. } => "STORE_UNREADABLE",
            Self::MissingMappingPlan { .. } => "MISSING_MAPPING_PLAN",
            Self::MappingInference { .. } => "MAPPING_INFERENCE_FAILED",
            Self::Transformation { .. } => "TRANSFORMATION_ERROR",
            Self::IncompatibleStore { .. } => "INCOMPATIBLE_STORE",
            Self::Filesystem { .. } => "MIGRATION_ERROR",
        }
    }
}

/// Failure of a single record transform.
///
/// Returned by entity migration policies and computed attribute functions;
/// the executor wraps it into [`MigrationError::Transformation`] together with
/// the offending record.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("missing required value for `{0}`")]
    MissingValue(String),

    #[error("`{field}` holds a {found} value, expected {expected}")]
    WrongKind {
        field: String,
        expected: AttributeKind,
        found: String,
    },

    #[error("cannot decode image: {0}")]
    Image(String),

    #[error("{0}")]
    Invalid(String),
}

impl TransformError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }
}
