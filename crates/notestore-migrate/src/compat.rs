//! Compatibility checks against the store's metadata header.
//!
//! Only the header line is read; record content is never loaded here.

use notestore_core::{Fingerprint, MigrationResult};

use crate::registry::{SchemaRegistry, SchemaVersion};
use crate::store::{Store, read_header};

/// Fingerprint recorded in the store, or `None` for a store that does not exist yet.
pub fn fingerprint_of(store: &Store) -> MigrationResult<Option<Fingerprint>> {
    Ok(read_header(store.path())?.map(|header| header.model_fingerprint))
}

/// Whether the store is recorded at exactly `version`.
pub fn is_compatible(store: &Store, version: &SchemaVersion) -> MigrationResult<bool> {
    Ok(fingerprint_of(store)?.as_ref() == Some(version.fingerprint()))
}

/// The registered version the store is recorded at.
///
/// `None` when the store does not exist or its fingerprint matches no
/// registered version.
pub fn current_version_of<'r>(
    store: &Store,
    registry: &'r SchemaRegistry,
) -> MigrationResult<Option<&'r SchemaVersion>> {
    Ok(fingerprint_of(store)?.and_then(|fp| registry.find_by_fingerprint(&fp)))
}
