//! Applies one mapping plan to a store.
//!
//! The destination is built in memory, written to the sibling temp file
//! `<store>~1`, synced, and renamed over the store. Until the rename the
//! existing store file is never opened for writing; on any failure the temp file
//! is removed and the store stays at its prior version.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use notestore_core::{MigrationError, MigrationResult, TransformError};
use tracing::{debug, info, warn};

use crate::mapping::{MappingPlan, RelationshipSource};
use crate::policy::SourceRecord;
use crate::run::{MigrationRun, RunOutcome};
use crate::store::{RecordRef, Store, StoreSnapshot};

#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailPoint {
    AfterTempCreated,
    BeforeRename,
}

#[derive(Debug, Default, Clone)]
pub struct MigrationExecutor {
    #[cfg(test)]
    fail_point: Option<FailPoint>,
}

impl MigrationExecutor {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            #[cfg(test)]
            fail_point: None,
        }
    }

    #[cfg(test)]
    pub(crate) const fn with_fail_point(fail_point: FailPoint) -> Self {
        Self {
            fail_point: Some(fail_point),
        }
    }

    #[cfg(test)]
    fn trip(&self, point: FailPoint, path: &Path) -> MigrationResult<()> {
        if self.fail_point == Some(point) {
            return Err(MigrationError::fs(
                "fail point",
                path,
                io::Error::other(format!("injected failure at {point:?}")),
            ));
        }
        Ok(())
    }

    /// Migrate `store` from `plan.source` to `plan.destination`.
    pub fn apply(&self, plan: &MappingPlan, store: &Store) -> MigrationResult<MigrationRun> {
        let started = Instant::now();
        info!(
            store = %store.path().display(),
            from = %plan.source,
            to = %plan.destination,
            plan = %plan.kind,
            "migration step starting"
        );
        for (entity, hash) in plan.source.model().entity_hashes() {
            debug!(%entity, %hash, "source entity version hash");
        }
        for (entity, hash) in plan.destination.model().entity_hashes() {
            debug!(%entity, %hash, "destination entity version hash");
        }

        match self.run_step(plan, store) {
            Ok((records_read, records_written)) => {
                let mut run = MigrationRun::new(plan, started.elapsed(), RunOutcome::Succeeded);
                run.records_read = records_read;
                run.records_written = records_written;
                run.log();
                Ok(run)
            }
            Err(err) => {
                MigrationRun::new(plan, started.elapsed(), RunOutcome::Failed(err.to_string()))
                    .log();
                Err(err)
            }
        }
    }

    #[cfg_attr(not(test), allow(clippy::unused_self))]
    fn run_step(&self, plan: &MappingPlan, store: &Store) -> MigrationResult<(usize, usize)> {
        let source = StoreSnapshot::open(store.path(), plan.source.model())?;

        let temp_path = store.temp_path();
        remove_stale_temp(&temp_path)?;
        let mut temp = TempStoreFile::create(&temp_path)?;
        #[cfg(test)]
        self.trip(FailPoint::AfterTempCreated, &temp_path)?;

        let destination = migrate_records(plan, &source)?;
        for (entity, count) in destination.entity_counts() {
            debug!(%entity, count, "migrated records");
        }
        destination.write_to(temp.file_mut()?, &temp_path)?;
        #[cfg(test)]
        self.trip(FailPoint::BeforeRename, &temp_path)?;

        temp.persist(store.path())?;
        Ok((source.record_count(), destination.record_count()))
    }
}

/// Build the destination snapshot: create every record, then relink.
fn migrate_records(plan: &MappingPlan, source: &StoreSnapshot) -> MigrationResult<StoreSnapshot> {
    let src_model = plan.source.model();
    let dst_model = plan.destination.model();
    let mut destination = StoreSnapshot::new(dst_model);

    let mut by_mapping: HashMap<(&str, RecordRef), RecordRef> = HashMap::new();
    let mut by_source: HashMap<RecordRef, RecordRef> = HashMap::new();
    let mut origin: HashMap<RecordRef, RecordRef> = HashMap::new();
    let mut created = Vec::new();

    // Pass 1: create.
    for mapping in &plan.entity_mappings {
        for (entity, records) in source.entities() {
            if !src_model.is_kind_of(entity, &mapping.source_entity) {
                continue;
            }
            for record in records {
                let view = SourceRecord::new(source, entity, record);
                if !mapping.accepts(&view) {
                    continue;
                }
                let attributes = mapping
                    .policy
                    .create_destination(&view, mapping)
                    .map_err(|e| transformation(&view.reference(), &e))?;
                let src_ref = view.reference();
                let dst_ref = destination
                    .insert(&mapping.destination_entity, attributes)
                    .map_err(|e| transformation(&src_ref, &e))?;
                by_mapping.insert((mapping.name.as_str(), src_ref.clone()), dst_ref.clone());
                by_source
                    .entry(src_ref.clone())
                    .or_insert_with(|| dst_ref.clone());
                origin.insert(dst_ref.clone(), src_ref.clone());
                created.push((mapping, view.record(), src_ref, dst_ref));
            }
        }
    }

    // Pass 2: relink.
    for (mapping, record, src_ref, dst_ref) in &created {
        for rule in &mapping.relationships {
            let targets = match &rule.source {
                RelationshipSource::Relationship(name) => record.related(name).to_vec(),
                RelationshipSource::SourceRecord => vec![src_ref.clone()],
            };
            for target in targets {
                let resolved = match &rule.via {
                    Some(via) => by_mapping.get(&(via.as_str(), target)),
                    None => by_source.get(&target),
                };
                if let Some(resolved) = resolved {
                    destination.link(dst_ref, &rule.destination, resolved.clone());
                }
            }
        }
    }

    destination.fill_inverses(dst_model);
    destination.check_conformance(dst_model).map_err(|n| {
        let culprit = origin.get(&n.record).unwrap_or(&n.record);
        transformation(culprit, &n.error)
    })?;
    Ok(destination)
}

fn transformation(record: &RecordRef, error: &TransformError) -> MigrationError {
    MigrationError::Transformation {
        entity: record.entity.clone(),
        record: record.id.0,
        detail: error.to_string(),
    }
}

fn remove_stale_temp(path: &Path) -> MigrationResult<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            warn!(path = %path.display(), "removed stale migration temp file");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(MigrationError::fs("remove stale temp file", path, e)),
    }
}

/// Exclusively created temp file, deleted on drop unless persisted.
struct TempStoreFile {
    path: PathBuf,
    file: Option<File>,
    persisted: bool,
}

impl TempStoreFile {
    fn create(path: &Path) -> MigrationResult<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| MigrationError::fs("create temp store", path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
            persisted: false,
        })
    }

    fn file_mut(&mut self) -> MigrationResult<&mut File> {
        self.file.as_mut().ok_or_else(|| {
            MigrationError::fs(
                "write temp store",
                &self.path,
                io::Error::other("temp store already closed"),
            )
        })
    }

    /// Close and rename over `target`, then make the rename durable.
    fn persist(mut self, target: &Path) -> MigrationResult<()> {
        drop(self.file.take());
        fs::rename(&self.path, target).map_err(|e| MigrationError::fs("rename", target, e))?;
        self.persisted = true;
        if let Err(e) = sync_parent_dir(target) {
            warn!(path = %target.display(), error = %e, "failed to sync store directory");
        }
        Ok(())
    }
}

impl Drop for TempStoreFile {
    fn drop(&mut self) {
        if self.persisted {
            return;
        }
        drop(self.file.take());
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "discarded migration temp file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove migration temp file"),
        }
    }
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> io::Result<()> {
    match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => File::open(parent)?.sync_all(),
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{MappingCatalog, MappingResolver};
    use crate::notes_plans::notes_catalog;
    use crate::registry::SchemaRegistry;
    use crate::store::{AttributeMap, read_header};
    use image::{DynamicImage, ImageFormat, RgbImage};
    use notestore_core::notes_model::{ATTACHMENT, IMAGE_ATTACHMENT, NOTE};
    use notestore_core::{NotesModelVersion, Value};
    use std::io::Cursor;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(RgbImage::new(width, height))
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    fn note(title: &str) -> AttributeMap {
        AttributeMap::from([
            ("title".to_string(), Value::from(title)),
            ("body".to_string(), Value::from(format!("{title} body"))),
            ("date_created".to_string(), Value::Date(10)),
        ])
    }

    fn v3_store(dir: &Path, image: Vec<u8>) -> Store {
        let model = NotesModelVersion::V3.descriptor();
        let mut snapshot = StoreSnapshot::new(model);
        let n = snapshot.insert(NOTE, note("trip")).unwrap();
        snapshot.insert(NOTE, note("plain")).unwrap();
        let a = snapshot
            .insert(
                ATTACHMENT,
                AttributeMap::from([
                    ("date_created".to_string(), Value::Date(11)),
                    ("image".to_string(), Value::Binary(image)),
                ]),
            )
            .unwrap();
        snapshot.link(&a, "note", n);
        snapshot.fill_inverses(model);
        let store = Store::at(dir.join("Notes.notestore"));
        snapshot.save(store.path()).unwrap();
        store
    }

    fn v3_to_v4_plan(registry: &SchemaRegistry, catalog: &MappingCatalog) -> MappingPlan {
        let v = registry.versions();
        MappingResolver::new(registry, catalog)
            .plan_for(&v[2], &v[3])
            .unwrap()
    }

    fn listing(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn step_swaps_in_destination_version() {
        let dir = tempfile::tempdir().unwrap();
        let store = v3_store(dir.path(), png(4, 2));
        let registry = SchemaRegistry::notes().unwrap();
        let catalog = notes_catalog();
        let plan = v3_to_v4_plan(&registry, &catalog);

        let run = MigrationExecutor::new().apply(&plan, &store).unwrap();
        assert!(run.succeeded());
        assert_eq!((run.source_version, run.destination_version), (3, 4));
        assert_eq!(run.records_read, 3);
        assert_eq!(run.records_written, 3);

        let header = read_header(store.path()).unwrap().unwrap();
        assert_eq!(&header.model_fingerprint, NotesModelVersion::V4.fingerprint());
        let migrated = StoreSnapshot::open(store.path(), NotesModelVersion::V4.descriptor()).unwrap();
        let image = &migrated.records(IMAGE_ATTACHMENT)[0];
        assert_eq!(image.attribute("width"), Some(&Value::Double(4.0)));
        assert_eq!(image.attribute("caption"), Some(&Value::from("trip body")));
        let owner = migrated.record(&image.related("note")[0]).unwrap();
        assert_eq!(owner.attribute("title"), Some(&Value::from("trip")));
        assert_eq!(owner.related("attachments").len(), 1);
        assert_eq!(listing(dir.path()), ["Notes.notestore"]);
    }

    #[test]
    fn failure_after_temp_creation_leaves_store_untouched() {
        for point in [FailPoint::AfterTempCreated, FailPoint::BeforeRename] {
            let dir = tempfile::tempdir().unwrap();
            let store = v3_store(dir.path(), png(1, 1));
            let before = fs::read(store.path()).unwrap();
            let registry = SchemaRegistry::notes().unwrap();
            let catalog = notes_catalog();
            let plan = v3_to_v4_plan(&registry, &catalog);

            let err = MigrationExecutor::with_fail_point(point)
                .apply(&plan, &store)
                .unwrap_err();
            assert_eq!(err.error_code(), "MIGRATION_ERROR");
            assert_eq!(fs::read(store.path()).unwrap(), before);
            assert!(!store.temp_path().exists(), "temp left behind at {point:?}");
        }
    }

    #[test]
    fn transform_failure_aborts_whole_step() {
        let dir = tempfile::tempdir().unwrap();
        let store = v3_store(dir.path(), b"corrupt".to_vec());
        let before = fs::read(store.path()).unwrap();
        let registry = SchemaRegistry::notes().unwrap();
        let catalog = notes_catalog();
        let plan = v3_to_v4_plan(&registry, &catalog);

        let err = MigrationExecutor::new().apply(&plan, &store).unwrap_err();
        match err {
            MigrationError::Transformation { entity, .. } => assert_eq!(entity, ATTACHMENT),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(fs::read(store.path()).unwrap(), before);
        assert_eq!(listing(dir.path()), ["Notes.notestore"]);
    }

    #[test]
    fn stale_temp_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let store = v3_store(dir.path(), png(2, 2));
        fs::write(store.temp_path(), b"left over from a crash").unwrap();
        let registry = SchemaRegistry::notes().unwrap();
        let catalog = notes_catalog();
        let plan = v3_to_v4_plan(&registry, &catalog);

        MigrationExecutor::new().apply(&plan, &store).unwrap();
        assert!(!store.temp_path().exists());
        assert!(
            StoreSnapshot::open(store.path(), NotesModelVersion::V4.descriptor()).is_ok()
        );
    }

    #[test]
    fn source_must_match_plan_source() {
        let dir = tempfile::tempdir().unwrap();
        let store = v3_store(dir.path(), png(2, 2));
        let registry = SchemaRegistry::notes().unwrap();
        let catalog = MappingCatalog::new();
        let v = registry.versions();
        let plan = MappingResolver::new(&registry, &catalog)
            .plan_for(&v[0], &v[1])
            .unwrap();
        let err = MigrationExecutor::new().apply(&plan, &store).unwrap_err();
        assert_eq!(err.error_code(), "STORE_UNREADABLE");
        assert!(!store.temp_path().exists());
    }
}
