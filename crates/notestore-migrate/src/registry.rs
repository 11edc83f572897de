//! Registry of known schema versions.
//!
//! Loaded once at start-up from static descriptors (or a directory of JSON
//! descriptor files) and immutable afterwards.

use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use notestore_core::{
    Fingerprint, MigrationError, MigrationResult, ModelDescriptor, NotesModelVersion,
};
use tracing::debug;

/// One registered schema version: its descriptor plus the precomputed
/// fingerprint. Equality is by fingerprint.
#[derive(Debug, Clone)]
pub struct SchemaVersion {
    model: Arc<ModelDescriptor>,
    fingerprint: Fingerprint,
}

impl SchemaVersion {
    fn new(model: ModelDescriptor) -> Self {
        let fingerprint = model.fingerprint();
        Self {
            model: Arc::new(model),
            fingerprint,
        }
    }

    #[must_use]
    pub fn version(&self) -> u32 {
        self.model.version
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.model.name
    }

    #[must_use]
    pub const fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    #[must_use]
    pub fn model(&self) -> &ModelDescriptor {
        &self.model
    }
}

impl PartialEq for SchemaVersion {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint == other.fingerprint
    }
}

impl Eq for SchemaVersion {}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{} ({})", self.model.version, self.fingerprint.short())
    }
}

#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    versions: Vec<SchemaVersion>,
}

impl SchemaRegistry {
    /// Build a registry from descriptors ordered oldest first.
    ///
    /// Fails with `Configuration` when the list is empty, a descriptor does
    /// not validate, versions are not strictly increasing, or two versions
    /// share a fingerprint.
    pub fn new(models: Vec<ModelDescriptor>) -> MigrationResult<Self> {
        if models.is_empty() {
            return Err(MigrationError::configuration(
                "no schema versions are registered",
            ));
        }
        let mut versions: Vec<SchemaVersion> = Vec::with_capacity(models.len());
        for model in models {
            model.validate()?;
            let version = SchemaVersion::new(model);
            if let Some(previous) = versions.last() {
                if version.version() <= previous.version() {
                    return Err(MigrationError::configuration(format!(
                        "schema versions must increase: {} follows {}",
                        version.version(),
                        previous.version()
                    )));
                }
            }
            if let Some(twin) = versions.iter().find(|v| v.fingerprint == version.fingerprint) {
                return Err(MigrationError::configuration(format!(
                    "schemas {} and {} share fingerprint {}",
                    twin.name(),
                    version.name(),
                    version.fingerprint.short()
                )));
            }
            debug!(
                version = version.version(),
                name = version.name(),
                fingerprint = %version.fingerprint,
                "registered schema version"
            );
            versions.push(version);
        }
        Ok(Self { versions })
    }

    /// The shipped notes model chain.
    pub fn notes() -> MigrationResult<Self> {
        Self::new(NotesModelVersion::descriptors())
    }

    /// Load every `*.json` descriptor in `dir`, ordered by declared version.
    pub fn from_descriptor_dir(dir: &Path) -> MigrationResult<Self> {
        let entries =
            fs::read_dir(dir).map_err(|e| MigrationError::fs("read descriptor dir", dir, e))?;
        let mut models = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| MigrationError::fs("read descriptor dir", dir, e))?
                .path();
            if path.extension().is_some_and(|ext| ext == "json") {
                models.push(ModelDescriptor::from_json_file(&path)?);
            }
        }
        models.sort_by_key(|m| m.version);
        Self::new(models)
    }

    /// All versions, oldest first.
    #[must_use]
    pub fn versions(&self) -> &[SchemaVersion] {
        &self.versions
    }

    pub fn latest(&self) -> MigrationResult<&SchemaVersion> {
        self.versions
            .last()
            .ok_or_else(|| MigrationError::configuration("no schema versions are registered"))
    }

    #[must_use]
    pub fn find_by_fingerprint(&self, fingerprint: &Fingerprint) -> Option<&SchemaVersion> {
        self.versions.iter().find(|v| &v.fingerprint == fingerprint)
    }

    /// The version directly after `version`, if any.
    #[must_use]
    pub fn successor(&self, version: &SchemaVersion) -> Option<&SchemaVersion> {
        let index = self.position(version)?;
        self.versions.get(index + 1)
    }

    pub(crate) fn position(&self, version: &SchemaVersion) -> Option<usize> {
        self.versions.iter().position(|v| v == version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notestore_core::{AttributeDescriptor, AttributeKind, EntityDescriptor};

    fn model(version: u32, attrs: &[&str]) -> ModelDescriptor {
        let entity = attrs.iter().fold(EntityDescriptor::new("Item"), |e, name| {
            e.attribute(AttributeDescriptor::required(*name, AttributeKind::String))
        });
        ModelDescriptor::new(format!("M{version}"), version).entity_def(entity)
    }

    #[test]
    fn empty_registry_is_configuration_error() {
        let err = SchemaRegistry::new(Vec::new()).unwrap_err();
        assert_eq!(err.error_code(), "CONFIGURATION_ERROR");
    }

    #[test]
    fn notes_registry_is_ordered() {
        let registry = SchemaRegistry::notes().unwrap();
        let numbers: Vec<u32> = registry.versions().iter().map(SchemaVersion::version).collect();
        assert_eq!(numbers, [1, 2, 3, 4]);
        assert_eq!(
            registry.latest().unwrap().fingerprint(),
            NotesModelVersion::V4.fingerprint()
        );
        let v2 = registry
            .find_by_fingerprint(NotesModelVersion::V2.fingerprint())
            .unwrap();
        assert_eq!(registry.successor(v2).unwrap().version(), 3);
        assert!(registry.successor(registry.latest().unwrap()).is_none());
    }

    #[test]
    fn rejects_out_of_order_versions() {
        let err = SchemaRegistry::new(vec![model(2, &["a"]), model(1, &["a", "b"])]).unwrap_err();
        assert!(err.to_string().contains("must increase"));
    }

    #[test]
    fn rejects_duplicate_fingerprints() {
        let err = SchemaRegistry::new(vec![model(1, &["a"]), model(2, &["a"])]).unwrap_err();
        assert!(err.to_string().contains("share fingerprint"));
    }

    #[test]
    fn loads_descriptor_directory() {
        let dir = tempfile::tempdir().unwrap();
        for (file, m) in [("b.json", model(2, &["a", "b"])), ("a.json", model(1, &["a"]))] {
            fs::write(dir.path().join(file), serde_json::to_vec(&m).unwrap()).unwrap();
        }
        fs::write(dir.path().join("README.txt"), "ignored").unwrap();
        let registry = SchemaRegistry::from_descriptor_dir(dir.path()).unwrap();
        assert_eq!(registry.versions().len(), 2);
        assert_eq!(registry.latest().unwrap().name(), "M2");
    }

    #[test]
    fn empty_descriptor_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            SchemaRegistry::from_descriptor_dir(dir.path()),
            Err(MigrationError::Configuration(_))
        ));
    }
}
