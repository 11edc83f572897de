//! Schema descriptors and structural fingerprints.
//!
//! A [`ModelDescriptor`] is the static definition of one schema version:
//! entities, their attributes, and their relationships. Descriptors are never
//! edited once published; a new version is a new descriptor.
//!
//! The [`Fingerprint`] of a model is a SHA-256 over a canonical,
//! order-independent encoding of its structure. Renaming identifiers and
//! default values are mapping hints and do not participate, so two models that
//! differ only in hints are the same version on disk.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{MigrationError, MigrationResult};
use crate::value::Value;

// ── Attribute kinds ────────────────────────────────────────────────────────

/// Storage type of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    String,
    Integer,
    Double,
    Boolean,
    Date,
    Binary,
}

impl AttributeKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Double => "double",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Binary => "binary",
        }
    }
}

impl fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Descriptors ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDescriptor {
    pub name: String,
    pub kind: AttributeKind,
    #[serde(default)]
    pub optional: bool,
    /// Value used by inferred mappings when the attribute is new.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Name of the attribute in the previous version, when renamed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renaming_id: Option<String>,
}

impl AttributeDescriptor {
    pub fn required(name: impl Into<String>, kind: AttributeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            optional: false,
            default: None,
            renaming_id: None,
        }
    }

    pub fn optional(name: impl Into<String>, kind: AttributeKind) -> Self {
        Self {
            optional: true,
            ..Self::required(name, kind)
        }
    }

    #[must_use]
    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    #[must_use]
    pub fn renamed_from(mut self, previous: impl Into<String>) -> Self {
        self.renaming_id = Some(previous.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipDescriptor {
    pub name: String,
    pub destination: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inverse: Option<String>,
    #[serde(default)]
    pub to_many: bool,
    #[serde(default)]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renaming_id: Option<String>,
}

impl RelationshipDescriptor {
    /// A required to-one relationship.
    pub fn to_one(name: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            destination: destination.into(),
            inverse: None,
            to_many: false,
            optional: false,
            renaming_id: None,
        }
    }

    /// An optional to-many relationship.
    pub fn to_many(name: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            to_many: true,
            optional: true,
            ..Self::to_one(name, destination)
        }
    }

    #[must_use]
    pub fn inverse(mut self, inverse: impl Into<String>) -> Self {
        self.inverse = Some(inverse.into());
        self
    }

    #[must_use]
    pub const fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    #[must_use]
    pub fn renamed_from(mut self, previous: impl Into<String>) -> Self {
        self.renaming_id = Some(previous.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default)]
    pub is_abstract: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renaming_id: Option<String>,
    #[serde(default)]
    pub attributes: Vec<AttributeDescriptor>,
    #[serde(default)]
    pub relationships: Vec<RelationshipDescriptor>,
}

impl EntityDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            is_abstract: false,
            renaming_id: None,
            attributes: Vec::new(),
            relationships: Vec::new(),
        }
    }

    #[must_use]
    pub fn attribute(mut self, attribute: AttributeDescriptor) -> Self {
        self.attributes.push(attribute);
        self
    }

    #[must_use]
    pub fn relationship(mut self, relationship: RelationshipDescriptor) -> Self {
        self.relationships.push(relationship);
        self
    }

    #[must_use]
    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    #[must_use]
    pub const fn abstract_entity(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    #[must_use]
    pub fn renamed_from(mut self, previous: impl Into<String>) -> Self {
        self.renaming_id = Some(previous.into());
        self
    }

    /// Canonical text used for the per-entity hash. Own properties only; the
    /// parent is referenced by name and hashed on its own.
    fn canonical(&self) -> String {
        let mut out = format!(
            "entity:{}|abstract:{}|parent:{}\n",
            self.name,
            self.is_abstract,
            self.parent.as_deref().unwrap_or("")
        );
        let attributes: BTreeSet<String> = self
            .attributes
            .iter()
            .map(|a| format!("attr:{}:{}:{}\n", a.name, a.kind, a.optional))
            .collect();
        let relationships: BTreeSet<String> = self
            .relationships
            .iter()
            .map(|r| {
                format!(
                    "rel:{}:{}:{}:{}:{}\n",
                    r.name,
                    r.destination,
                    r.to_many,
                    r.optional,
                    r.inverse.as_deref().unwrap_or("")
                )
            })
            .collect();
        for line in attributes.into_iter().chain(relationships) {
            out.push_str(&line);
        }
        out
    }
}

/// One published schema version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    pub version: u32,
    pub entities: Vec<EntityDescriptor>,
}

impl ModelDescriptor {
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
            entities: Vec::new(),
        }
    }

    #[must_use]
    pub fn entity_def(mut self, entity: EntityDescriptor) -> Self {
        self.entities.push(entity);
        self
    }

    /// Load a descriptor from a JSON descriptor file.
    pub fn from_json_file(path: &Path) -> MigrationResult<Self> {
        let text =
            fs::read_to_string(path).map_err(|e| MigrationError::fs("read descriptor", path, e))?;
        serde_json::from_str(&text).map_err(|e| {
            MigrationError::configuration(format!(
                "malformed schema descriptor {}: {e}",
                path.display()
            ))
        })
    }

    #[must_use]
    pub fn entity(&self, name: &str) -> Option<&EntityDescriptor> {
        self.entities.iter().find(|e| e.name == name)
    }

    /// The inheritance chain of `name`, root first.
    fn lineage(&self, name: &str) -> Vec<&EntityDescriptor> {
        let mut chain = Vec::new();
        let mut cursor = self.entity(name);
        while let Some(entity) = cursor {
            // Cycles are rejected by `validate`; guard anyway so lookups never spin.
            if chain.iter().any(|e: &&EntityDescriptor| e.name == entity.name) {
                break;
            }
            chain.push(entity);
            cursor = entity.parent.as_deref().and_then(|p| self.entity(p));
        }
        chain.reverse();
        chain
    }

    /// All attributes of `entity`, inherited ones first.
    #[must_use]
    pub fn attributes_of(&self, entity: &str) -> Vec<&AttributeDescriptor> {
        self.lineage(entity)
            .into_iter()
            .flat_map(|e| e.attributes.iter())
            .collect()
    }

    /// All relationships of `entity`, inherited ones first.
    #[must_use]
    pub fn relationships_of(&self, entity: &str) -> Vec<&RelationshipDescriptor> {
        self.lineage(entity)
            .into_iter()
            .flat_map(|e| e.relationships.iter())
            .collect()
    }

    #[must_use]
    pub fn attribute(&self, entity: &str, name: &str) -> Option<&AttributeDescriptor> {
        self.attributes_of(entity).into_iter().find(|a| a.name == name)
    }

    #[must_use]
    pub fn relationship(&self, entity: &str, name: &str) -> Option<&RelationshipDescriptor> {
        self.relationships_of(entity)
            .into_iter()
            .find(|r| r.name == name)
    }

    /// Whether `entity` is `ancestor` or inherits from it.
    #[must_use]
    pub fn is_kind_of(&self, entity: &str, ancestor: &str) -> bool {
        self.lineage(entity).iter().any(|e| e.name == ancestor)
    }

    /// Per-entity structural hashes, keyed by entity name.
    #[must_use]
    pub fn entity_hashes(&self) -> BTreeMap<String, String> {
        self.entities
            .iter()
            .map(|e| (e.name.clone(), hex::encode(Sha256::digest(e.canonical()))))
            .collect()
    }

    /// Structural fingerprint of the whole model.
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = Sha256::new();
        for (name, hash) in self.entity_hashes() {
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(hash.as_bytes());
            hasher.update(b"\n");
        }
        Fingerprint(hex::encode(hasher.finalize()))
    }

    /// Check the descriptor is internally consistent.
    pub fn validate(&self) -> MigrationResult<()> {
        let fail = |detail: String| {
            Err(MigrationError::configuration(format!(
                "schema {} (v{}): {detail}",
                self.name, self.version
            )))
        };

        if self.entities.is_empty() {
            return fail("declares no entities".to_string());
        }

        let mut seen = BTreeSet::new();
        for entity in &self.entities {
            if !seen.insert(entity.name.as_str()) {
                return fail(format!("duplicate entity `{}`", entity.name));
            }
        }

        for entity in &self.entities {
            if let Some(parent) = &entity.parent {
                if self.entity(parent).is_none() {
                    return fail(format!(
                        "entity `{}` has unknown parent `{parent}`",
                        entity.name
                    ));
                }
                let mut visited = BTreeSet::from([entity.name.as_str()]);
                let mut cursor = Some(parent.as_str());
                while let Some(name) = cursor {
                    if !visited.insert(name) {
                        return fail(format!("inheritance cycle through `{}`", entity.name));
                    }
                    cursor = self.entity(name).and_then(|e| e.parent.as_deref());
                }
            }

            let mut names = BTreeSet::new();
            for attr in self.attributes_of(&entity.name) {
                if !names.insert(attr.name.as_str()) {
                    return fail(format!(
                        "entity `{}` declares property `{}` twice",
                        entity.name, attr.name
                    ));
                }
                if let Some(default) = &attr.default {
                    if default.kind().is_some_and(|k| k != attr.kind) {
                        return fail(format!(
                            "default of `{}.{}` is not a {} value",
                            entity.name, attr.name, attr.kind
                        ));
                    }
                }
            }

            for rel in self.relationships_of(&entity.name) {
                if !names.insert(rel.name.as_str()) {
                    return fail(format!(
                        "entity `{}` declares property `{}` twice",
                        entity.name, rel.name
                    ));
                }
                if self.entity(&rel.destination).is_none() {
                    return fail(format!(
                        "relationship `{}.{}` targets unknown entity `{}`",
                        entity.name, rel.name, rel.destination
                    ));
                }
                if let Some(inverse) = &rel.inverse {
                    let Some(back) = self.relationship(&rel.destination, inverse) else {
                        return fail(format!(
                            "relationship `{}.{}` names missing inverse `{}.{inverse}`",
                            entity.name, rel.name, rel.destination
                        ));
                    };
                    if back.inverse.as_deref() != Some(rel.name.as_str()) {
                        return fail(format!(
                            "inverse `{}.{inverse}` does not point back to `{}.{}`",
                            rel.destination, entity.name, rel.name
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

// ── Fingerprint ────────────────────────────────────────────────────────────

/// Hex-encoded SHA-256 summarizing a schema's structure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap an already computed hex digest (e.g. read from a store header).
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex digits, for log lines.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
