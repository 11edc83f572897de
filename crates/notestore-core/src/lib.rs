//! Core types for the notes store schema migration pipeline
//!
//! This crate provides:
//! - Schema descriptors and structural fingerprints (`ModelDescriptor`, `Fingerprint`)
//! - Record attribute values (`Value`)
//! - The shipped notes schema chain (`NotesModelVersion`)
//! - Configuration and data directory resolution
//! - The migration error taxonomy

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod notes_model;
pub mod paths;
pub mod schema;
pub mod value;

// Re-export key types for convenience
pub use config::StoreConfig;
pub use error::{MigrationError, MigrationResult, TransformError};
pub use notes_model::NotesModelVersion;
pub use schema::{
    AttributeDescriptor, AttributeKind, EntityDescriptor, Fingerprint, ModelDescriptor,
    RelationshipDescriptor,
};
pub use value::Value;
