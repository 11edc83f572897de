//! On-disk store format.
//!
//! A store is a single file:
//!
//! ```text
//! {"format":"notestore","format_version":1,"model_name":...,"model_fingerprint":...}\n
//! {"next_id":..., "entities":{"Note":[{"id":1,"attributes":{...},"relationships":{...}}]}}
//! ```
//!
//! The first line is the metadata header. Compatibility checks read only that
//! line; the body is parsed when a migration opens the store under its
//! declared schema.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use notestore_core::paths;
use notestore_core::{
    Fingerprint, MigrationError, MigrationResult, ModelDescriptor, TransformError, Value,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const STORE_FORMAT: &str = "notestore";
pub const STORE_FORMAT_VERSION: u32 = 1;

/// Upper bound on the metadata line; anything longer is not a header.
const MAX_HEADER_BYTES: u64 = 1 << 20;

// ── Store handle ───────────────────────────────────────────────────────────

/// Handle to a store file. Carries no open resources; every component that
/// touches the store receives it explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Store {
    path: PathBuf,
}

impl Store {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Sibling file a migration step writes before the swap.
    #[must_use]
    pub fn temp_path(&self) -> PathBuf {
        paths::migration_temp_path(&self.path)
    }
}

// ── Header ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreHeader {
    pub format: String,
    pub format_version: u32,
    pub model_name: String,
    pub model_fingerprint: Fingerprint,
    #[serde(default)]
    pub entity_hashes: BTreeMap<String, String>,
    #[serde(default)]
    pub record_count: u64,
}

impl StoreHeader {
    fn for_model(model: &ModelDescriptor) -> Self {
        Self {
            format: STORE_FORMAT.to_string(),
            format_version: STORE_FORMAT_VERSION,
            model_name: model.name.clone(),
            model_fingerprint: model.fingerprint(),
            entity_hashes: model.entity_hashes(),
            record_count: 0,
        }
    }
}

/// Read only the metadata header of the store at `path`.
///
/// Returns `Ok(None)` when no file exists (a fresh store). A file that exists
/// but has no readable header is `StoreUnreadable`, never "version zero".
pub fn read_header(path: &Path) -> MigrationResult<Option<StoreHeader>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(MigrationError::fs("open store", path, e)),
    };
    let mut line = String::new();
    BufReader::new(file)
        .take(MAX_HEADER_BYTES)
        .read_line(&mut line)
        .map_err(|e| MigrationError::unreadable(path, format!("cannot read metadata: {e}")))?;
    if !line.ends_with('\n') && !line.is_empty() {
        return Err(MigrationError::unreadable(
            path,
            "metadata header is truncated or oversized",
        ));
    }
    parse_header(path, &line).map(Some)
}

fn parse_header(path: &Path, line: &str) -> MigrationResult<StoreHeader> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Err(MigrationError::unreadable(path, "missing metadata header"));
    }
    let header: StoreHeader = serde_json::from_str(line)
        .map_err(|e| MigrationError::unreadable(path, format!("malformed metadata header: {e}")))?;
    if header.format != STORE_FORMAT {
        return Err(MigrationError::unreadable(
            path,
            format!("unknown store format `{}`", header.format),
        ));
    }
    if header.format_version != STORE_FORMAT_VERSION {
        return Err(MigrationError::unreadable(
            path,
            format!("unsupported store format version {}", header.format_version),
        ));
    }
    Ok(header)
}

// ── Records ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub u64);

/// Typed reference to a record: entity name plus id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordRef {
    pub entity: String,
    pub id: RecordId,
}

impl RecordRef {
    pub fn new(entity: impl Into<String>, id: RecordId) -> Self {
        Self {
            entity: entity.into(),
            id,
        }
    }
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity, self.id.0)
    }
}

pub type AttributeMap = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    #[serde(default)]
    pub attributes: AttributeMap,
    #[serde(default)]
    pub relationships: BTreeMap<String, Vec<RecordRef>>,
}

impl Record {
    /// Attribute value, with explicit nulls treated as absent.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name).filter(|v| !v.is_null())
    }

    #[must_use]
    pub fn related(&self, relationship: &str) -> &[RecordRef] {
        self.relationships
            .get(relationship)
            .map_or(&[], Vec::as_slice)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreBody {
    next_id: u64,
    entities: BTreeMap<String, Vec<Record>>,
}

/// A record that does not satisfy its schema.
#[derive(Debug)]
pub struct Nonconformance {
    pub record: RecordRef,
    pub error: TransformError,
}

// ── Snapshot ───────────────────────────────────────────────────────────────

/// Fully loaded store content under one schema version.
///
/// Records of each entity are kept sorted by id; ids are allocated from a
/// single counter so an id is unique across the whole store.
#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    header: StoreHeader,
    body: StoreBody,
}

impl StoreSnapshot {
    /// An empty store for `model`.
    #[must_use]
    pub fn new(model: &ModelDescriptor) -> Self {
        Self {
            header: StoreHeader::for_model(model),
            body: StoreBody {
                next_id: 1,
                entities: BTreeMap::new(),
            },
        }
    }

    #[must_use]
    pub const fn fingerprint(&self) -> &Fingerprint {
        &self.header.model_fingerprint
    }

    /// Append a record and return its reference. Fails once the id counter
    /// has no successor left.
    pub fn insert(
        &mut self,
        entity: &str,
        attributes: AttributeMap,
    ) -> Result<RecordRef, TransformError> {
        let id = RecordId(self.body.next_id);
        self.body.next_id = id
            .0
            .checked_add(1)
            .ok_or_else(|| TransformError::Invalid("record id space exhausted".to_string()))?;
        self.body
            .entities
            .entry(entity.to_string())
            .or_default()
            .push(Record {
                id,
                attributes,
                relationships: BTreeMap::new(),
            });
        Ok(RecordRef::new(entity, id))
    }

    /// Add `to` to `from.relationship` unless already present.
    /// Returns false when `from` does not exist.
    pub fn link(&mut self, from: &RecordRef, relationship: &str, to: RecordRef) -> bool {
        let Some(record) = self.record_mut(from) else {
            return false;
        };
        let targets = record
            .relationships
            .entry(relationship.to_string())
            .or_default();
        if !targets.contains(&to) {
            targets.push(to);
        }
        true
    }

    /// Entity names with their records, in name order.
    pub fn entities(&self) -> impl Iterator<Item = (&str, &[Record])> {
        self.body
            .entities
            .iter()
            .map(|(name, records)| (name.as_str(), records.as_slice()))
    }

    #[must_use]
    pub fn records(&self, entity: &str) -> &[Record] {
        self.body.entities.get(entity).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn record(&self, reference: &RecordRef) -> Option<&Record> {
        let records = self.body.entities.get(&reference.entity)?;
        records
            .binary_search_by_key(&reference.id, |r| r.id)
            .ok()
            .map(|i| &records[i])
    }

    fn record_mut(&mut self, reference: &RecordRef) -> Option<&mut Record> {
        let records = self.body.entities.get_mut(&reference.entity)?;
        let index = records
            .binary_search_by_key(&reference.id, |r| r.id)
            .ok()?;
        Some(&mut records[index])
    }

    /// Record count per entity.
    #[must_use]
    pub fn entity_counts(&self) -> BTreeMap<String, usize> {
        self.body
            .entities
            .iter()
            .map(|(name, records)| (name.clone(), records.len()))
            .collect()
    }

    #[must_use]
    pub fn record_count(&self) -> usize {
        self.body.entities.values().map(Vec::len).sum()
    }

    /// Make every relationship with a declared inverse symmetric.
    pub fn fill_inverses(&mut self, model: &ModelDescriptor) {
        let mut additions = Vec::new();
        for (entity, records) in &self.body.entities {
            for rel in model.relationships_of(entity) {
                let Some(inverse) = &rel.inverse else {
                    continue;
                };
                for record in records {
                    let owner = RecordRef::new(entity.as_str(), record.id);
                    for target in record.related(&rel.name) {
                        additions.push((target.clone(), inverse.clone(), owner.clone()));
                    }
                }
            }
        }
        for (target, inverse, owner) in additions {
            self.link(&target, &inverse, owner);
        }
    }

    /// Check every record against `model`: declared entities and properties,
    /// required values present, kinds, cardinality, and reference targets.
    pub fn check_conformance(&self, model: &ModelDescriptor) -> Result<(), Nonconformance> {
        for (entity, records) in &self.body.entities {
            for record in records {
                self.check_record(model, entity, record)
                    .map_err(|error| Nonconformance {
                        record: RecordRef::new(entity.as_str(), record.id),
                        error,
                    })?;
            }
        }
        Ok(())
    }

    fn check_record(
        &self,
        model: &ModelDescriptor,
        entity: &str,
        record: &Record,
    ) -> Result<(), TransformError> {
        let Some(descriptor) = model.entity(entity) else {
            return Err(TransformError::invalid(format!(
                "entity `{entity}` is not declared by {}",
                model.name
            )));
        };
        if descriptor.is_abstract {
            return Err(TransformError::invalid(format!(
                "abstract entity `{entity}` cannot hold records"
            )));
        }

        let attributes = model.attributes_of(entity);
        if let Some(name) = record
            .attributes
            .keys()
            .find(|name| !attributes.iter().any(|a| &a.name == *name))
        {
            return Err(TransformError::invalid(format!(
                "undeclared attribute `{name}`"
            )));
        }
        for attr in &attributes {
            match record.attribute(&attr.name) {
                None if !attr.optional => {
                    return Err(TransformError::MissingValue(attr.name.clone()));
                }
                Some(value) if value.kind() != Some(attr.kind) => {
                    return Err(TransformError::WrongKind {
                        field: attr.name.clone(),
                        expected: attr.kind,
                        found: value.type_name().to_string(),
                    });
                }
                _ => {}
            }
        }

        let relationships = model.relationships_of(entity);
        if let Some(name) = record
            .relationships
            .keys()
            .find(|name| !relationships.iter().any(|r| &r.name == *name))
        {
            return Err(TransformError::invalid(format!(
                "undeclared relationship `{name}`"
            )));
        }
        for rel in &relationships {
            let targets = record.related(&rel.name);
            if !rel.to_many && targets.len() > 1 {
                return Err(TransformError::invalid(format!(
                    "to-one relationship `{}` holds {} records",
                    rel.name,
                    targets.len()
                )));
            }
            if !rel.optional && targets.is_empty() {
                return Err(TransformError::MissingValue(rel.name.clone()));
            }
            for target in targets {
                if self.record(target).is_none() {
                    return Err(TransformError::invalid(format!(
                        "`{}` references missing record {target}",
                        rel.name
                    )));
                }
                if !model.is_kind_of(&target.entity, &rel.destination) {
                    return Err(TransformError::invalid(format!(
                        "`{}` must reference {} but references {target}",
                        rel.name, rel.destination
                    )));
                }
            }
        }
        Ok(())
    }

    /// Open and fully parse the store at `path` under `model`.
    pub fn open(path: &Path, model: &ModelDescriptor) -> MigrationResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| match e.kind() {
            io::ErrorKind::InvalidData => MigrationError::unreadable(path, "store is not UTF-8"),
            _ => MigrationError::fs("read store", path, e),
        })?;
        let (header_line, body_text) = text
            .split_once('\n')
            .ok_or_else(|| MigrationError::unreadable(path, "missing store body"))?;
        let header = parse_header(path, header_line)?;

        let expected = model.fingerprint();
        if header.model_fingerprint != expected {
            return Err(MigrationError::unreadable(
                path,
                format!(
                    "store fingerprint {} does not match schema {} ({})",
                    header.model_fingerprint.short(),
                    model.name,
                    expected.short()
                ),
            ));
        }

        let mut body: StoreBody = serde_json::from_str(body_text)
            .map_err(|e| MigrationError::unreadable(path, format!("malformed store body: {e}")))?;
        let mut max_id = 0;
        for (entity, records) in &mut body.entities {
            records.sort_by_key(|r| r.id);
            if let Some(pair) = records.windows(2).find(|w| w[0].id == w[1].id) {
                return Err(MigrationError::unreadable(
                    path,
                    format!("duplicate record id {entity}#{}", pair[0].id.0),
                ));
            }
            if let Some(last) = records.last() {
                max_id = max_id.max(last.id.0);
            }
        }
        let after_max = max_id
            .checked_add(1)
            .ok_or_else(|| MigrationError::unreadable(path, "record id space exhausted"))?;
        body.next_id = body.next_id.max(after_max);

        let snapshot = Self { header, body };
        snapshot.check_conformance(model).map_err(|n| {
            MigrationError::unreadable(
                path,
                format!("record {} violates schema: {}", n.record, n.error),
            )
        })?;
        Ok(snapshot)
    }

    /// Serialized form: header line, newline, body.
    fn encode(&self, path: &Path) -> MigrationResult<Vec<u8>> {
        let mut header = self.header.clone();
        header.record_count = self.record_count() as u64;
        let mut bytes = serde_json::to_vec(&header)
            .map_err(|e| MigrationError::fs("encode store", path, e.into()))?;
        bytes.push(b'\n');
        serde_json::to_writer(&mut bytes, &self.body)
            .map_err(|e| MigrationError::fs("encode store", path, e.into()))?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Write the full store into an already open file and flush it to disk.
    pub fn write_to(&self, file: &mut File, path: &Path) -> MigrationResult<()> {
        let bytes = self.encode(path)?;
        file.write_all(&bytes)
            .map_err(|e| MigrationError::fs("write store", path, e))?;
        file.sync_all()
            .map_err(|e| MigrationError::fs("sync store", path, e))
    }

    /// Atomically write the store to `path` (temp file, then rename).
    pub fn save(&self, path: &Path) -> MigrationResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| MigrationError::fs("create directory", parent, e))?;
        }
        let temp_path = path.with_extension(format!("tmp.{}", std::process::id()));
        let result = File::create(&temp_path)
            .map_err(|e| MigrationError::fs("create temp file", &temp_path, e))
            .and_then(|mut file| self.write_to(&mut file, &temp_path))
            .and_then(|()| {
                fs::rename(&temp_path, path).map_err(|e| MigrationError::fs("rename", path, e))
            });
        if result.is_err() {
            if let Err(e) = fs::remove_file(&temp_path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(
                        path = %temp_path.display(),
                        error = %e,
                        "failed to remove store temp file"
                    );
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notestore_core::NotesModelVersion;
    use notestore_core::notes_model::{ATTACHMENT, NOTE};

    fn note(title: &str) -> AttributeMap {
        AttributeMap::from([
            ("title".to_string(), Value::from(title)),
            ("body".to_string(), Value::from("body")),
            ("date_created".to_string(), Value::Date(1_000)),
        ])
    }

    fn v3_snapshot() -> StoreSnapshot {
        let model = NotesModelVersion::V3.descriptor();
        let mut snapshot = StoreSnapshot::new(model);
        let n = snapshot.insert(NOTE, note("first")).unwrap();
        let a = snapshot
            .insert(
                ATTACHMENT,
                AttributeMap::from([
                    ("date_created".to_string(), Value::Date(2_000)),
                    ("image".to_string(), Value::Binary(vec![1, 2, 3])),
                ]),
            )
            .unwrap();
        assert!(snapshot.link(&a, "note", n));
        snapshot.fill_inverses(model);
        snapshot
    }

    #[test]
    fn missing_file_has_no_header() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_header(&dir.path().join("absent.notestore")).unwrap().is_none());
    }

    #[test]
    fn empty_file_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.notestore");
        fs::write(&path, b"").unwrap();
        assert!(matches!(
            read_header(&path),
            Err(MigrationError::StoreUnreadable { .. })
        ));
    }

    #[test]
    fn garbage_header_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.notestore");
        fs::write(&path, b"SQLite format 3\0\n").unwrap();
        let err = read_header(&path).unwrap_err();
        assert_eq!(err.error_code(), "STORE_UNREADABLE");
    }

    #[test]
    fn foreign_format_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("other.notestore");
        fs::write(
            &path,
            b"{\"format\":\"other\",\"format_version\":1,\"model_name\":\"m\",\"model_fingerprint\":\"00\"}\n{}",
        )
        .unwrap();
        let err = read_header(&path).unwrap_err();
        assert!(err.to_string().contains("unknown store format"));
    }

    #[test]
    fn save_then_open_preserves_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.notestore");
        let snapshot = v3_snapshot();
        snapshot.save(&path).unwrap();

        let header = read_header(&path).unwrap().unwrap();
        assert_eq!(header.record_count, 2);
        assert_eq!(&header.model_fingerprint, NotesModelVersion::V3.fingerprint());

        let reopened = StoreSnapshot::open(&path, NotesModelVersion::V3.descriptor()).unwrap();
        assert_eq!(reopened.entity_counts(), snapshot.entity_counts());
        let note = &reopened.records(NOTE)[0];
        assert_eq!(note.related("attachments").len(), 1);
        assert_eq!(
            reopened.records(ATTACHMENT)[0].attribute("image"),
            Some(&Value::Binary(vec![1, 2, 3]))
        );
        let leftovers: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn open_rejects_other_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.notestore");
        v3_snapshot().save(&path).unwrap();
        let err = StoreSnapshot::open(&path, NotesModelVersion::V4.descriptor()).unwrap_err();
        assert!(err.to_string().contains("does not match schema"));
    }

    #[test]
    fn open_rejects_exhausted_record_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.notestore");
        let mut snapshot = StoreSnapshot::new(NotesModelVersion::V1.descriptor());
        snapshot.insert(NOTE, note("last")).unwrap();
        snapshot.save(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"id\":1,"));
        let text = text.replace("\"id\":1,", &format!("\"id\":{},", u64::MAX));
        fs::write(&path, text).unwrap();

        let err = StoreSnapshot::open(&path, NotesModelVersion::V1.descriptor()).unwrap_err();
        assert_eq!(err.error_code(), "STORE_UNREADABLE");
        assert!(err.to_string().contains("record id space exhausted"));
    }

    #[test]
    fn insert_fails_once_ids_run_out() {
        let mut snapshot = StoreSnapshot::new(NotesModelVersion::V1.descriptor());
        snapshot.body.next_id = u64::MAX;
        let err = snapshot.insert(NOTE, note("overflow")).unwrap_err();
        assert!(matches!(err, TransformError::Invalid(ref m) if m.contains("exhausted")));
        assert_eq!(snapshot.record_count(), 0);
        assert_eq!(snapshot.body.next_id, u64::MAX);
    }

    #[test]
    fn failed_save_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.notestore");
        // A non-empty directory at the target makes the final rename fail.
        fs::create_dir(&path).unwrap();
        fs::write(path.join("keep"), b"x").unwrap();

        let err = v3_snapshot().save(&path).unwrap_err();
        assert!(matches!(err, MigrationError::Filesystem { .. }));
        let mut names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        names.sort();
        assert_eq!(names, ["notes.notestore"]);
    }

    #[test]
    fn inverses_are_filled() {
        let snapshot = v3_snapshot();
        let note_ref = RecordRef::new(NOTE, snapshot.records(NOTE)[0].id);
        let attachment = &snapshot.records(ATTACHMENT)[0];
        assert_eq!(attachment.related("note"), [note_ref.clone()]);
        assert_eq!(
            snapshot.record(&note_ref).unwrap().related("attachments")[0].entity,
            ATTACHMENT
        );
    }

    #[test]
    fn conformance_flags_missing_required_relationship() {
        let model = NotesModelVersion::V3.descriptor();
        let mut snapshot = StoreSnapshot::new(model);
        snapshot
            .insert(
                ATTACHMENT,
                AttributeMap::from([
                    ("date_created".to_string(), Value::Date(2_000)),
                    ("image".to_string(), Value::Binary(vec![1])),
                ]),
            )
            .unwrap();
        let err = snapshot.check_conformance(model).unwrap_err();
        assert!(matches!(err.error, TransformError::MissingValue(ref f) if f == "note"));
    }

    #[test]
    fn conformance_flags_wrong_kind_and_unknown_attribute() {
        let model = NotesModelVersion::V1.descriptor();
        let mut snapshot = StoreSnapshot::new(model);
        let mut attrs = note("x");
        attrs.insert("title".to_string(), Value::Integer(3));
        snapshot.insert(NOTE, attrs).unwrap();
        assert!(matches!(
            snapshot.check_conformance(model).unwrap_err().error,
            TransformError::WrongKind { .. }
        ));

        let mut snapshot = StoreSnapshot::new(model);
        let mut attrs = note("x");
        attrs.insert("image".to_string(), Value::Binary(vec![]));
        snapshot.insert(NOTE, attrs).unwrap();
        assert!(snapshot.check_conformance(model).is_err());
    }

    #[test]
    fn explicit_null_counts_as_absent() {
        let model = NotesModelVersion::V2.descriptor();
        let mut snapshot = StoreSnapshot::new(model);
        let mut attrs = note("x");
        attrs.insert("image".to_string(), Value::Null);
        let r = snapshot.insert(NOTE, attrs).unwrap();
        snapshot.check_conformance(model).unwrap();
        assert!(snapshot.record(&r).unwrap().attribute("image").is_none());
    }
}
