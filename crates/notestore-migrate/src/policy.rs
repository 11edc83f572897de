//! Per-record transformation policies.

use std::fmt;

use notestore_core::{TransformError, Value};

use crate::mapping::{AttributeSource, EntityMapping};
use crate::store::{AttributeMap, Record, RecordRef, StoreSnapshot};

/// Read-only view of one source record together with the snapshot it lives
/// in, so policies can follow relationships to related records.
#[derive(Debug, Clone, Copy)]
pub struct SourceRecord<'a> {
    snapshot: &'a StoreSnapshot,
    entity: &'a str,
    record: &'a Record,
}

impl<'a> SourceRecord<'a> {
    pub const fn new(snapshot: &'a StoreSnapshot, entity: &'a str, record: &'a Record) -> Self {
        Self {
            snapshot,
            entity,
            record,
        }
    }

    #[must_use]
    pub fn reference(&self) -> RecordRef {
        RecordRef::new(self.entity, self.record.id)
    }

    #[must_use]
    pub const fn record(&self) -> &'a Record {
        self.record
    }

    /// Attribute value; explicit nulls read as `None`.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&'a Value> {
        self.record.attribute(name)
    }

    /// Records reachable through `relationship`.
    #[must_use]
    pub fn related(&self, relationship: &str) -> Vec<SourceRecord<'a>> {
        let snapshot = self.snapshot;
        self.record
            .related(relationship)
            .iter()
            .filter_map(|r| {
                snapshot
                    .record(r)
                    .map(|record| SourceRecord::new(snapshot, &r.entity, record))
            })
            .collect()
    }

    /// Follow a dotted key path such as `note.body`. Every segment but the
    /// last names a to-one relationship.
    #[must_use]
    pub fn value_at(&self, path: &str) -> Option<&'a Value> {
        let (hops, attribute) = match path.rsplit_once('.') {
            Some((hops, attribute)) => (Some(hops), attribute),
            None => (None, path),
        };
        let mut current = *self;
        for hop in hops.into_iter().flat_map(|h| h.split('.')) {
            current = current.related(hop).into_iter().next()?;
        }
        current.attribute(attribute)
    }
}

/// Builds the attributes of one destination record from one source record.
///
/// Relationships are not set here; the executor relinks them once every
/// destination record exists.
pub trait EntityMigrationPolicy: fmt::Debug + Send + Sync {
    fn create_destination(
        &self,
        source: &SourceRecord<'_>,
        mapping: &EntityMapping,
    ) -> Result<AttributeMap, TransformError>;
}

/// Applies the mapping's attribute rules and nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultPolicy;

impl EntityMigrationPolicy for DefaultPolicy {
    fn create_destination(
        &self,
        source: &SourceRecord<'_>,
        mapping: &EntityMapping,
    ) -> Result<AttributeMap, TransformError> {
        apply_attribute_mappings(source, mapping)
    }
}

/// Evaluate every attribute mapping of `mapping` against `source`.
/// Sources that resolve to nothing leave the destination attribute unset.
pub fn apply_attribute_mappings(
    source: &SourceRecord<'_>,
    mapping: &EntityMapping,
) -> Result<AttributeMap, TransformError> {
    let mut attributes = AttributeMap::new();
    for rule in &mapping.attributes {
        let value = match &rule.source {
            AttributeSource::Copy { from } => source.attribute(from).cloned(),
            AttributeSource::KeyPath(path) => source.value_at(path).cloned(),
            AttributeSource::Constant(value) => Some(value.clone()),
            AttributeSource::Computed(compute) => Some(compute(source)?),
        };
        if let Some(value) = value.filter(|v| !v.is_null()) {
            attributes.insert(rule.destination.clone(), value);
        }
    }
    Ok(attributes)
}
