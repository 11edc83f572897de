//! Drives a store step by step to the latest schema version.

use std::fs;

use notestore_core::{MigrationError, MigrationResult, StoreConfig};
use tracing::{debug, info, warn};

use crate::compat;
use crate::executor::MigrationExecutor;
use crate::mapping::{MappingCatalog, MappingResolver};
use crate::notes_plans::notes_catalog;
use crate::registry::{SchemaRegistry, SchemaVersion};
use crate::run::MigrationReport;
use crate::store::Store;

/// Registry plus catalog. Holds no store state, so one `Migrator` can serve
/// any number of stores.
#[derive(Debug, Clone)]
pub struct Migrator {
    registry: SchemaRegistry,
    catalog: MappingCatalog,
    executor: MigrationExecutor,
}

impl Migrator {
    #[must_use]
    pub const fn new(registry: SchemaRegistry, catalog: MappingCatalog) -> Self {
        Self {
            registry,
            catalog,
            executor: MigrationExecutor::new(),
        }
    }

    /// The shipped notes chain with its explicit plans.
    pub fn notes() -> MigrationResult<Self> {
        Ok(Self::new(SchemaRegistry::notes()?, notes_catalog()))
    }

    #[cfg(test)]
    pub(crate) fn with_executor(mut self, executor: MigrationExecutor) -> Self {
        self.executor = executor;
        self
    }

    #[must_use]
    pub const fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    #[must_use]
    pub const fn resolver(&self) -> MappingResolver<'_> {
        MappingResolver::new(&self.registry, &self.catalog)
    }

    /// Registered version the store is recorded at.
    pub fn current_version(&self, store: &Store) -> MigrationResult<Option<&SchemaVersion>> {
        compat::current_version_of(store, &self.registry)
    }

    /// Whether `migrate_to_latest` would run at least one step.
    pub fn needs_migration(&self, store: &Store) -> MigrationResult<bool> {
        let latest = self.registry.latest()?;
        Ok(self
            .starting_version(store)?
            .is_some_and(|current| current != latest))
    }

    /// Version to start from. A missing store or one that matches no
    /// registered version is treated as already at the latest version.
    fn starting_version(&self, store: &Store) -> MigrationResult<Option<&SchemaVersion>> {
        let Some(fingerprint) = compat::fingerprint_of(store)? else {
            debug!(store = %store.path().display(), "no store yet; nothing to migrate");
            return Ok(None);
        };
        let found = self.registry.find_by_fingerprint(&fingerprint);
        if found.is_none() {
            warn!(
                store = %store.path().display(),
                fingerprint = %fingerprint.short(),
                "store matches no registered schema version; treating it as latest"
            );
        }
        Ok(found)
    }

    /// Step `store` forward one adjacent version at a time until it is at
    /// the registry's latest version.
    ///
    /// The first failing step halts the chain. Steps that already completed
    /// stay applied.
    pub fn migrate_to_latest(&self, store: &Store) -> MigrationResult<MigrationReport> {
        let latest = self.registry.latest()?;
        let Some(start) = self.starting_version(store)? else {
            return Ok(MigrationReport {
                start: None,
                end: latest.version(),
                runs: Vec::new(),
            });
        };

        let resolver = self.resolver();
        let mut runs = Vec::new();
        let mut current = start;
        while current != latest {
            let next = self.registry.successor(current).ok_or_else(|| {
                MigrationError::configuration(format!("no version registered after {current}"))
            })?;
            let plan = resolver.plan_for(current, next)?;
            runs.push(self.executor.apply(&plan, store)?);
            current = next;
        }

        if runs.is_empty() {
            debug!(store = %store.path().display(), version = %latest, "store already at latest version");
        } else {
            info!(
                store = %store.path().display(),
                from = start.version(),
                to = latest.version(),
                steps = runs.len(),
                "store migrated to latest version"
            );
        }
        Ok(MigrationReport {
            start: Some(start.version()),
            end: latest.version(),
            runs,
        })
    }
}

/// A store ready for the application's CRUD layer.
#[derive(Debug)]
pub struct PreparedStore {
    pub store: Store,
    pub report: MigrationReport,
}

/// Start-up entry point: make sure the data directory exists, then bring the
/// configured store to the latest version.
///
/// With migrations disabled an older store is refused with
/// `IncompatibleStore` rather than handed out under the wrong schema.
pub fn prepare_store(config: &StoreConfig, migrator: &Migrator) -> MigrationResult<PreparedStore> {
    fs::create_dir_all(&config.data_dir)
        .map_err(|e| MigrationError::fs("create data directory", &config.data_dir, e))?;
    let store = Store::at(config.store_path());

    let report = if config.migrations_enabled {
        migrator.migrate_to_latest(&store)?
    } else {
        let latest = migrator.registry().latest()?;
        let current = migrator.current_version(&store)?;
        if let Some(current) = current.filter(|v| *v != latest) {
            return Err(MigrationError::IncompatibleStore {
                path: store.path().to_path_buf(),
                found: current.to_string(),
                expected: latest.to_string(),
            });
        }
        MigrationReport {
            start: current.map(SchemaVersion::version),
            end: latest.version(),
            runs: Vec::new(),
        }
    };
    Ok(PreparedStore { store, report })
}
