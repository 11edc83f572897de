//! Fixtures shared by the notestore integration tests.
//!
//! Panics on setup failure; these helpers only run inside tests.

#![forbid(unsafe_code)]
#![allow(clippy::missing_panics_doc)]

use std::collections::BTreeMap;
use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::time::SystemTime;

use image::{DynamicImage, ImageFormat, RgbImage};
use notestore_core::notes_model::{ATTACHMENT, IMAGE_ATTACHMENT, NOTE};
use notestore_core::{NotesModelVersion, Value};
use notestore_migrate::notes_plans::caption_from;
use notestore_migrate::{Store, StoreSnapshot};

/// Encode a blank RGB image of the given size as PNG.
#[must_use]
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(RgbImage::new(width, height))
        .write_to(&mut out, ImageFormat::Png)
        .expect("encode png fixture");
    out.into_inner()
}

/// One note as the application would have created it.
#[derive(Debug, Clone)]
pub struct NoteFixture {
    pub title: String,
    pub body: String,
    pub image: Option<Vec<u8>>,
}

impl NoteFixture {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            image: None,
        }
    }

    #[must_use]
    pub fn with_image(mut self, bytes: Vec<u8>) -> Self {
        self.image = Some(bytes);
        self
    }
}

fn note_attributes(note: &NoteFixture, index: i64) -> BTreeMap<String, Value> {
    BTreeMap::from([
        ("title".to_string(), Value::from(note.title.as_str())),
        ("body".to_string(), Value::from(note.body.as_str())),
        ("date_created".to_string(), Value::Date(1_700_000_000_000_000 + index)),
        ("display_index".to_string(), Value::Integer(index)),
    ])
}

/// Write a store at `version` holding `notes`, shaped the way that version
/// stores images.
pub fn write_store_at(version: NotesModelVersion, path: &Path, notes: &[NoteFixture]) -> Store {
    let model = version.descriptor();
    let mut snapshot = StoreSnapshot::new(model);
    for (index, note) in (0_i64..).zip(notes) {
        let mut attributes = note_attributes(note, index);
        if version == NotesModelVersion::V2 {
            if let Some(image) = &note.image {
                attributes.insert("image".to_string(), Value::Binary(image.clone()));
            }
        }
        let note_ref = snapshot.insert(NOTE, attributes).expect("insert fixture record");

        let Some(image) = &note.image else {
            continue;
        };
        let attachment = match version {
            NotesModelVersion::V1 | NotesModelVersion::V2 => continue,
            NotesModelVersion::V3 => snapshot
                .insert(
                    ATTACHMENT,
                    BTreeMap::from([
                        ("date_created".to_string(), Value::Date(index)),
                        ("image".to_string(), Value::Binary(image.clone())),
                    ]),
                )
                .expect("insert fixture record"),
            NotesModelVersion::V4 => {
                let decoded = image::load_from_memory(image).expect("decode image fixture");
                snapshot
                    .insert(
                        IMAGE_ATTACHMENT,
                        BTreeMap::from([
                            ("date_created".to_string(), Value::Date(index)),
                            ("image".to_string(), Value::Binary(image.clone())),
                            ("width".to_string(), Value::Double(f64::from(decoded.width()))),
                            ("height".to_string(), Value::Double(f64::from(decoded.height()))),
                            ("caption".to_string(), Value::String(caption_from(&note.body))),
                        ]),
                    )
                    .expect("insert fixture record")
            }
        };
        snapshot.link(&attachment, "note", note_ref);
    }
    snapshot.fill_inverses(model);
    snapshot.save(path).expect("write store fixture");
    Store::at(path)
}

/// A temp directory plus a store path inside it (file not created).
#[must_use]
pub fn temp_store() -> (tempfile::TempDir, Store) {
    let dir = tempfile::tempdir().expect("create tempdir");
    let store = Store::at(dir.path().join("UnCloudNotesDataModel.notestore"));
    (dir, store)
}

/// Sorted file names in `dir`.
#[must_use]
pub fn dir_listing(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .expect("read dir")
        .map(|entry| {
            entry
                .expect("dir entry")
                .file_name()
                .to_string_lossy()
                .into_owned()
        })
        .collect();
    names.sort();
    names
}

/// Bytes and modification time of a file, for "nothing was written" checks.
#[must_use]
pub fn file_state(path: &Path) -> (Vec<u8>, SystemTime) {
    let bytes = fs::read(path).expect("read file");
    let modified = fs::metadata(path)
        .and_then(|m| m.modified())
        .expect("file mtime");
    (bytes, modified)
}

/// Route `tracing` output through the test harness; safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}
