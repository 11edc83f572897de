//! Versioned schema migration for the notes store.
//!
//! Components, leaf to root:
//! - [`store`]: the on-disk format and the `Store` handle
//! - [`registry`]: known schema versions and their fingerprints
//! - [`compat`]: header-only compatibility checks
//! - [`mapping`]: mapping plans, the catalog of explicit plans, and the resolver
//! - [`executor`]: applies one plan and swaps the result into place
//! - [`orchestrator`]: chains steps up to the latest version
//!
//! Nothing here holds process-wide state; every call takes the store handle
//! it works on.

#![forbid(unsafe_code)]

pub mod compat;
pub mod executor;
mod infer;
pub mod mapping;
pub mod notes_plans;
pub mod orchestrator;
pub mod policy;
pub mod registry;
pub mod run;
pub mod store;

pub use compat::{current_version_of, fingerprint_of, is_compatible};
pub use executor::MigrationExecutor;
pub use mapping::{
    AttributeMapping, AttributeSource, EntityMapping, MappingCatalog, MappingPlan,
    MappingResolver, PlanKind, RelationshipMapping, RelationshipSource,
};
pub use notes_plans::{ImageAttachmentPolicy, notes_catalog};
pub use orchestrator::{Migrator, PreparedStore, prepare_store};
pub use policy::{DefaultPolicy, EntityMigrationPolicy, SourceRecord};
pub use registry::{SchemaRegistry, SchemaVersion};
pub use run::{MigrationReport, MigrationRun, RunOutcome};
pub use store::{Record, RecordId, RecordRef, Store, StoreHeader, StoreSnapshot};
