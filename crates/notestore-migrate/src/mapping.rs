//! Mapping plans and the resolver that produces them.
//!
//! A [`MappingPlan`] turns records of one schema version into records of the
//! next. Plans are either inferred from the structural diff of the two
//! descriptors or hand-authored and registered in a [`MappingCatalog`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use notestore_core::{Fingerprint, MigrationError, MigrationResult, TransformError, Value};
use serde::Serialize;
use tracing::debug;

use crate::infer;
use crate::policy::{DefaultPolicy, EntityMigrationPolicy, SourceRecord};
use crate::registry::{SchemaRegistry, SchemaVersion};

pub type ComputeFn = dyn Fn(&SourceRecord<'_>) -> Result<Value, TransformError> + Send + Sync;
pub type FilterFn = dyn Fn(&SourceRecord<'_>) -> bool + Send + Sync;

// ── Attribute rules ────────────────────────────────────────────────────────

/// Where a destination attribute's value comes from.
#[derive(Clone)]
pub enum AttributeSource {
    /// Source attribute by name (direct or renamed copy).
    Copy { from: String },
    /// Dotted path through to-one relationships, e.g. `note.body`.
    KeyPath(String),
    Constant(Value),
    Computed(Arc<ComputeFn>),
}

impl fmt::Debug for AttributeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Copy { from } => f.debug_struct("Copy").field("from", from).finish(),
            Self::KeyPath(path) => f.debug_tuple("KeyPath").field(path).finish(),
            Self::Constant(value) => f.debug_tuple("Constant").field(value).finish(),
            Self::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AttributeMapping {
    pub destination: String,
    pub source: AttributeSource,
}

impl AttributeMapping {
    /// Copy the attribute of the same name.
    pub fn copy(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            source: AttributeSource::Copy { from: name.clone() },
            destination: name,
        }
    }

    pub fn renamed(destination: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            source: AttributeSource::Copy { from: from.into() },
        }
    }

    pub fn key_path(destination: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            source: AttributeSource::KeyPath(path.into()),
        }
    }

    pub fn constant(destination: impl Into<String>, value: Value) -> Self {
        Self {
            destination: destination.into(),
            source: AttributeSource::Constant(value),
        }
    }

    pub fn computed(
        destination: impl Into<String>,
        compute: impl Fn(&SourceRecord<'_>) -> Result<Value, TransformError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            destination: destination.into(),
            source: AttributeSource::Computed(Arc::new(compute)),
        }
    }
}

// ── Relationship rules ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationshipSource {
    /// Targets of a relationship on the source record.
    Relationship(String),
    /// The source record itself; used when one source record fans out into
    /// several destination entities that must point at each other.
    SourceRecord,
}

/// Rule for one destination relationship, resolved in the relink pass.
#[derive(Debug, Clone)]
pub struct RelationshipMapping {
    pub destination: String,
    pub source: RelationshipSource,
    /// Restrict resolution to records created by this entity mapping.
    pub via: Option<String>,
}

impl RelationshipMapping {
    /// Carry a relationship of the same name.
    pub fn carry(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::from_relationship(name.clone(), name)
    }

    pub fn from_relationship(destination: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            source: RelationshipSource::Relationship(source.into()),
            via: None,
        }
    }

    pub fn to_source_record(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            source: RelationshipSource::SourceRecord,
            via: None,
        }
    }

    #[must_use]
    pub fn via(mut self, entity_mapping: impl Into<String>) -> Self {
        self.via = Some(entity_mapping.into());
        self
    }
}

// ── Entity mappings ────────────────────────────────────────────────────────

/// How records of one source entity become records of one destination entity.
#[derive(Clone)]
pub struct EntityMapping {
    pub name: String,
    pub source_entity: String,
    pub destination_entity: String,
    pub attributes: Vec<AttributeMapping>,
    pub relationships: Vec<RelationshipMapping>,
    pub policy: Arc<dyn EntityMigrationPolicy>,
    filter: Option<Arc<FilterFn>>,
}

impl EntityMapping {
    pub fn new(
        name: impl Into<String>,
        source_entity: impl Into<String>,
        destination_entity: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            source_entity: source_entity.into(),
            destination_entity: destination_entity.into(),
            attributes: Vec::new(),
            relationships: Vec::new(),
            policy: Arc::new(DefaultPolicy),
            filter: None,
        }
    }

    #[must_use]
    pub fn attribute(mut self, mapping: AttributeMapping) -> Self {
        self.attributes.push(mapping);
        self
    }

    #[must_use]
    pub fn relationship(mut self, mapping: RelationshipMapping) -> Self {
        self.relationships.push(mapping);
        self
    }

    /// Only source records matching `predicate` are migrated by this mapping.
    #[must_use]
    pub fn filter(
        mut self,
        predicate: impl Fn(&SourceRecord<'_>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.filter = Some(Arc::new(predicate));
        self
    }

    #[must_use]
    pub fn policy(mut self, policy: impl EntityMigrationPolicy + 'static) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    #[must_use]
    pub fn accepts(&self, source: &SourceRecord<'_>) -> bool {
        self.filter.as_ref().is_none_or(|predicate| predicate(source))
    }
}

impl fmt::Debug for EntityMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityMapping")
            .field("name", &self.name)
            .field("source_entity", &self.source_entity)
            .field("destination_entity", &self.destination_entity)
            .field("attributes", &self.attributes)
            .field("relationships", &self.relationships)
            .field("policy", &self.policy)
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

// ── Plans ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanKind {
    Inferred,
    Explicit,
}

impl fmt::Display for PlanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Inferred => "inferred",
            Self::Explicit => "explicit",
        })
    }
}

/// Plan for one adjacent step.
#[derive(Debug, Clone)]
pub struct MappingPlan {
    pub source: SchemaVersion,
    pub destination: SchemaVersion,
    pub kind: PlanKind,
    pub entity_mappings: Vec<EntityMapping>,
}

impl MappingPlan {
    #[must_use]
    pub fn mapping(&self, name: &str) -> Option<&EntityMapping> {
        self.entity_mappings.iter().find(|m| m.name == name)
    }

    /// Check every mapping refers to entities and properties that exist.
    fn validate(&self) -> MigrationResult<()> {
        let src = self.source.model();
        let dst = self.destination.model();
        let fail = |detail: String| {
            Err(MigrationError::configuration(format!(
                "plan {} -> {}: {detail}",
                self.source, self.destination
            )))
        };

        let mut names = BTreeSet::new();
        for mapping in &self.entity_mappings {
            if !names.insert(mapping.name.as_str()) {
                return fail(format!("duplicate entity mapping `{}`", mapping.name));
            }
        }

        for mapping in &self.entity_mappings {
            if src.entity(&mapping.source_entity).is_none() {
                return fail(format!(
                    "`{}` reads unknown source entity `{}`",
                    mapping.name, mapping.source_entity
                ));
            }
            match dst.entity(&mapping.destination_entity) {
                None => {
                    return fail(format!(
                        "`{}` writes unknown destination entity `{}`",
                        mapping.name, mapping.destination_entity
                    ));
                }
                Some(entity) if entity.is_abstract => {
                    return fail(format!(
                        "`{}` writes abstract entity `{}`",
                        mapping.name, mapping.destination_entity
                    ));
                }
                Some(_) => {}
            }
            for rule in &mapping.attributes {
                if dst
                    .attribute(&mapping.destination_entity, &rule.destination)
                    .is_none()
                {
                    return fail(format!(
                        "`{}` sets undeclared attribute `{}.{}`",
                        mapping.name, mapping.destination_entity, rule.destination
                    ));
                }
            }
            for rule in &mapping.relationships {
                if dst
                    .relationship(&mapping.destination_entity, &rule.destination)
                    .is_none()
                {
                    return fail(format!(
                        "`{}` sets undeclared relationship `{}.{}`",
                        mapping.name, mapping.destination_entity, rule.destination
                    ));
                }
                if let Some(via) = &rule.via {
                    if self.mapping(via).is_none() {
                        return fail(format!(
                            "`{}` relinks via unknown mapping `{via}`",
                            mapping.name
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

// ── Catalog ────────────────────────────────────────────────────────────────

type PairKey = (Fingerprint, Fingerprint);

/// Static per-pair configuration: which adjacent steps need a hand-authored
/// plan, and the plans registered for them. Unlisted pairs are inferred.
#[derive(Debug, Clone, Default)]
pub struct MappingCatalog {
    explicit: BTreeSet<PairKey>,
    plans: BTreeMap<PairKey, Vec<EntityMapping>>,
}

impl MappingCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a step as needing an explicit plan without registering one.
    pub fn require_explicit(&mut self, from: &Fingerprint, to: &Fingerprint) {
        self.explicit.insert((from.clone(), to.clone()));
    }

    pub fn register_explicit(
        &mut self,
        from: &Fingerprint,
        to: &Fingerprint,
        mappings: Vec<EntityMapping>,
    ) {
        let key = (from.clone(), to.clone());
        self.explicit.insert(key.clone());
        self.plans.insert(key, mappings);
    }

    #[must_use]
    pub fn requires_explicit(&self, from: &Fingerprint, to: &Fingerprint) -> bool {
        self.explicit.contains(&(from.clone(), to.clone()))
    }

    fn explicit_plan(&self, from: &Fingerprint, to: &Fingerprint) -> Option<&[EntityMapping]> {
        self.plans
            .get(&(from.clone(), to.clone()))
            .map(Vec::as_slice)
    }
}

// ── Resolver ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct MappingResolver<'a> {
    registry: &'a SchemaRegistry,
    catalog: &'a MappingCatalog,
}

impl<'a> MappingResolver<'a> {
    pub const fn new(registry: &'a SchemaRegistry, catalog: &'a MappingCatalog) -> Self {
        Self { registry, catalog }
    }

    /// Plan for the single forward step `source -> destination`.
    ///
    /// Only adjacent registered versions are accepted; chaining is the
    /// orchestrator's job. A step marked explicit never falls back to
    /// inference.
    pub fn plan_for(
        &self,
        source: &SchemaVersion,
        destination: &SchemaVersion,
    ) -> MigrationResult<MappingPlan> {
        let unregistered =
            |v: &SchemaVersion| MigrationError::configuration(format!("schema {v} is not registered"));
        let from = self
            .registry
            .position(source)
            .ok_or_else(|| unregistered(source))?;
        let to = self
            .registry
            .position(destination)
            .ok_or_else(|| unregistered(destination))?;
        if to != from + 1 {
            return Err(MigrationError::configuration(format!(
                "no direct step from {source} to {destination}; only adjacent forward steps are planned"
            )));
        }

        let plan = if self
            .catalog
            .requires_explicit(source.fingerprint(), destination.fingerprint())
        {
            let mappings = self
                .catalog
                .explicit_plan(source.fingerprint(), destination.fingerprint())
                .ok_or_else(|| MigrationError::MissingMappingPlan {
                    from_version: source.to_string(),
                    to_version: destination.to_string(),
                })?;
            MappingPlan {
                source: source.clone(),
                destination: destination.clone(),
                kind: PlanKind::Explicit,
                entity_mappings: mappings.to_vec(),
            }
        } else {
            infer::infer_plan(source, destination)?
        };
        plan.validate()?;

        debug!(
            from = %source,
            to = %destination,
            kind = %plan.kind,
            mappings = ?plan.entity_mappings.iter().map(|m| m.name.as_str()).collect::<Vec<_>>(),
            "resolved mapping plan"
        );
        Ok(plan)
    }
}
