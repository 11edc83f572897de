//! Hand-authored plans for the notes model chain.
//!
//! V1 -> V2 is inferred. V2 -> V3 splits the note image into an `Attachment`
//! record. V3 -> V4 turns every attachment into an `ImageAttachment` with
//! dimensions decoded from the image and a caption taken from the note body.

use image::GenericImageView;
use notestore_core::notes_model::{ATTACHMENT, IMAGE_ATTACHMENT, NOTE};
use notestore_core::{NotesModelVersion, TransformError, Value};

use crate::mapping::{AttributeMapping, EntityMapping, MappingCatalog, RelationshipMapping};
use crate::policy::{EntityMigrationPolicy, SourceRecord, apply_attribute_mappings};
use crate::store::AttributeMap;

/// Maximum caption length, in Unicode scalar values.
pub const CAPTION_LENGTH: usize = 80;

const NOTE_TO_NOTE: &str = "NoteToNote";
const NOTE_TO_ATTACHMENT: &str = "NoteToAttachment";
const ATTACHMENT_TO_IMAGE_ATTACHMENT: &str = "AttachmentToImageAttachment";

/// Catalog for the shipped chain: V2 -> V3 and V3 -> V4 are explicit.
#[must_use]
pub fn notes_catalog() -> MappingCatalog {
    let mut catalog = MappingCatalog::new();
    catalog.register_explicit(
        NotesModelVersion::V2.fingerprint(),
        NotesModelVersion::V3.fingerprint(),
        v2_to_v3(),
    );
    catalog.register_explicit(
        NotesModelVersion::V3.fingerprint(),
        NotesModelVersion::V4.fingerprint(),
        v3_to_v4(),
    );
    catalog
}

fn note_fields(mapping: EntityMapping) -> EntityMapping {
    ["title", "body", "date_created", "display_index"]
        .into_iter()
        .fold(mapping, |m, name| m.attribute(AttributeMapping::copy(name)))
}

fn v2_to_v3() -> Vec<EntityMapping> {
    vec![
        note_fields(EntityMapping::new(NOTE_TO_NOTE, NOTE, NOTE)).relationship(
            RelationshipMapping::to_source_record("attachments").via(NOTE_TO_ATTACHMENT),
        ),
        EntityMapping::new(NOTE_TO_ATTACHMENT, NOTE, ATTACHMENT)
            .filter(|note| note.attribute("image").is_some())
            .attribute(AttributeMapping::copy("image"))
            .attribute(AttributeMapping::copy("date_created"))
            .relationship(RelationshipMapping::to_source_record("note").via(NOTE_TO_NOTE)),
    ]
}

fn v3_to_v4() -> Vec<EntityMapping> {
    vec![
        note_fields(EntityMapping::new(NOTE_TO_NOTE, NOTE, NOTE)).relationship(
            RelationshipMapping::carry("attachments").via(ATTACHMENT_TO_IMAGE_ATTACHMENT),
        ),
        EntityMapping::new(ATTACHMENT_TO_IMAGE_ATTACHMENT, ATTACHMENT, IMAGE_ATTACHMENT)
            .attribute(AttributeMapping::copy("image"))
            .attribute(AttributeMapping::copy("date_created"))
            .relationship(RelationshipMapping::carry("note").via(NOTE_TO_NOTE))
            .policy(ImageAttachmentPolicy),
    ]
}

/// The first [`CAPTION_LENGTH`] characters of `text`, or all of it.
#[must_use]
pub fn caption_from(text: &str) -> String {
    text.chars().take(CAPTION_LENGTH).collect()
}

/// Pixel dimensions of an encoded image.
pub fn image_dimensions(bytes: &[u8]) -> Result<(u32, u32), TransformError> {
    let image =
        image::load_from_memory(bytes).map_err(|e| TransformError::Image(e.to_string()))?;
    Ok(image.dimensions())
}

/// Derives `width`, `height` and `caption` for an `ImageAttachment` from the
/// legacy attachment's image and its note's body.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageAttachmentPolicy;

impl EntityMigrationPolicy for ImageAttachmentPolicy {
    fn create_destination(
        &self,
        source: &SourceRecord<'_>,
        mapping: &EntityMapping,
    ) -> Result<AttributeMap, TransformError> {
        let mut attributes = apply_attribute_mappings(source, mapping)?;

        let bytes = source
            .attribute("image")
            .and_then(Value::as_bytes)
            .ok_or_else(|| TransformError::MissingValue("image".to_string()))?;
        let (width, height) = image_dimensions(bytes)?;
        attributes.insert("width".to_string(), Value::Double(f64::from(width)));
        attributes.insert("height".to_string(), Value::Double(f64::from(height)));

        let body = source
            .value_at("note.body")
            .and_then(Value::as_str)
            .ok_or_else(|| TransformError::MissingValue("note.body".to_string()))?;
        attributes.insert("caption".to_string(), Value::String(caption_from(body)));

        Ok(attributes)
    }
}
