//! The shipped notes schema chain.
//!
//! Four published versions of the notes model:
//!
//! | version | change |
//! |---------|--------|
//! | V1 | `Note { title, body, date_created, display_index? }` |
//! | V2 | adds an optional `Note.image` blob |
//! | V3 | moves the image into a separate `Attachment` entity |
//! | V4 | `Attachment` becomes abstract; images live in `ImageAttachment` with derived `width`, `height`, `caption` |
//!
//! Versions are identified on disk by fingerprint only. The enum is a static
//! table lookup, never an identity comparison of loaded models.

use std::sync::OnceLock;

use crate::schema::{
    AttributeDescriptor, AttributeKind, EntityDescriptor, Fingerprint, ModelDescriptor,
    RelationshipDescriptor,
};

/// Base model name; also the default store file stem.
pub const MODEL_NAME: &str = "UnCloudNotesDataModel";

/// Entity names used across the chain.
pub const NOTE: &str = "Note";
pub const ATTACHMENT: &str = "Attachment";
pub const IMAGE_ATTACHMENT: &str = "ImageAttachment";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NotesModelVersion {
    V1,
    V2,
    V3,
    V4,
}

static DESCRIPTORS: OnceLock<[ModelDescriptor; 4]> = OnceLock::new();
static FINGERPRINTS: OnceLock<[Fingerprint; 4]> = OnceLock::new();

impl NotesModelVersion {
    pub const ALL: [Self; 4] = [Self::V1, Self::V2, Self::V3, Self::V4];

    const fn index(self) -> usize {
        match self {
            Self::V1 => 0,
            Self::V2 => 1,
            Self::V3 => 2,
            Self::V4 => 3,
        }
    }

    #[must_use]
    pub fn descriptor(self) -> &'static ModelDescriptor {
        &DESCRIPTORS.get_or_init(|| [version1(), version2(), version3(), version4()])[self.index()]
    }

    #[must_use]
    pub fn fingerprint(self) -> &'static Fingerprint {
        &FINGERPRINTS.get_or_init(|| Self::ALL.map(|v| v.descriptor().fingerprint()))[self.index()]
    }

    /// Look a version up by its structural fingerprint.
    #[must_use]
    pub fn from_fingerprint(fingerprint: &Fingerprint) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|v| v.fingerprint() == fingerprint)
    }

    /// Descriptors for every version, oldest first.
    #[must_use]
    pub fn descriptors() -> Vec<ModelDescriptor> {
        Self::ALL.iter().map(|v| v.descriptor().clone()).collect()
    }
}

fn model_name(version: u32) -> String {
    if version == 1 {
        MODEL_NAME.to_string()
    } else {
        format!("{MODEL_NAME} v{version}")
    }
}

fn note_base() -> EntityDescriptor {
    EntityDescriptor::new(NOTE)
        .attribute(AttributeDescriptor::required("title", AttributeKind::String))
        .attribute(AttributeDescriptor::required("body", AttributeKind::String))
        .attribute(AttributeDescriptor::required(
            "date_created",
            AttributeKind::Date,
        ))
        .attribute(AttributeDescriptor::optional(
            "display_index",
            AttributeKind::Integer,
        ))
}

fn version1() -> ModelDescriptor {
    ModelDescriptor::new(model_name(1), 1).entity_def(note_base())
}

fn version2() -> ModelDescriptor {
    ModelDescriptor::new(model_name(2), 2).entity_def(
        note_base().attribute(AttributeDescriptor::optional("image", AttributeKind::Binary)),
    )
}

fn note_with_attachments() -> EntityDescriptor {
    note_base().relationship(RelationshipDescriptor::to_many("attachments", ATTACHMENT).inverse("note"))
}

fn version3() -> ModelDescriptor {
    ModelDescriptor::new(model_name(3), 3)
        .entity_def(note_with_attachments())
        .entity_def(
            EntityDescriptor::new(ATTACHMENT)
                .attribute(AttributeDescriptor::required(
                    "date_created",
                    AttributeKind::Date,
                ))
                .attribute(AttributeDescriptor::required("image", AttributeKind::Binary))
                .relationship(RelationshipDescriptor::to_one("note", NOTE).inverse("attachments")),
        )
}

fn version4() -> ModelDescriptor {
    ModelDescriptor::new(model_name(4), 4)
        .entity_def(note_with_attachments())
        .entity_def(
            EntityDescriptor::new(ATTACHMENT)
                .abstract_entity()
                .attribute(AttributeDescriptor::required(
                    "date_created",
                    AttributeKind::Date,
                ))
                .relationship(RelationshipDescriptor::to_one("note", NOTE).inverse("attachments")),
        )
        .entity_def(
            EntityDescriptor::new(IMAGE_ATTACHMENT)
                .parent(ATTACHMENT)
                .attribute(AttributeDescriptor::required("image", AttributeKind::Binary))
                .attribute(AttributeDescriptor::required("width", AttributeKind::Double))
                .attribute(AttributeDescriptor::required("height", AttributeKind::Double))
                .attribute(AttributeDescriptor::required("caption", AttributeKind::String)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn every_version_validates() {
        for version in NotesModelVersion::ALL {
            version.descriptor().validate().unwrap();
        }
    }

    #[test]
    fn fingerprints_are_unique_and_resolvable() {
        let unique: BTreeSet<_> = NotesModelVersion::ALL
            .iter()
            .map(|v| v.fingerprint().clone())
            .collect();
        assert_eq!(unique.len(), 4);
        for version in NotesModelVersion::ALL {
            assert_eq!(
                NotesModelVersion::from_fingerprint(version.fingerprint()),
                Some(version)
            );
        }
        assert_eq!(
            NotesModelVersion::from_fingerprint(&Fingerprint::from_hex("00")),
            None
        );
    }

    #[test]
    fn chain_is_ordered() {
        let numbers: Vec<u32> = NotesModelVersion::ALL
            .iter()
            .map(|v| v.descriptor().version)
            .collect();
        assert_eq!(numbers, [1, 2, 3, 4]);
    }

    #[test]
    fn names_follow_model_convention() {
        assert_eq!(NotesModelVersion::V1.descriptor().name, "UnCloudNotesDataModel");
        assert_eq!(
            NotesModelVersion::V3.descriptor().name,
            "UnCloudNotesDataModel v3"
        );
    }

    #[test]
    fn image_attachment_inherits_note_link() {
        let model = NotesModelVersion::V4.descriptor();
        let rel = model.relationship(IMAGE_ATTACHMENT, "note").unwrap();
        assert_eq!(rel.destination, NOTE);
        assert!(model.entity(ATTACHMENT).unwrap().is_abstract);
    }
}
