//! Property tests for schema fingerprints.

use notestore_core::{
    AttributeDescriptor, AttributeKind, EntityDescriptor, ModelDescriptor, NotesModelVersion,
    RelationshipDescriptor,
};
use proptest::prelude::*;

fn proptest_config() -> ProptestConfig {
    ProptestConfig {
        cases: 128,
        failure_persistence: None,
        ..ProptestConfig::default()
    }
}

fn kind() -> impl Strategy<Value = AttributeKind> {
    prop_oneof![
        Just(AttributeKind::String),
        Just(AttributeKind::Integer),
        Just(AttributeKind::Double),
        Just(AttributeKind::Boolean),
        Just(AttributeKind::Date),
        Just(AttributeKind::Binary),
    ]
}

fn attributes() -> impl Strategy<Value = Vec<AttributeDescriptor>> {
    prop::collection::btree_map("[a-z]{1,8}", (kind(), any::<bool>()), 1..6).prop_map(|attrs| {
        attrs
            .into_iter()
            .map(|(name, (kind, optional))| {
                if optional {
                    AttributeDescriptor::optional(name, kind)
                } else {
                    AttributeDescriptor::required(name, kind)
                }
            })
            .collect()
    })
}

fn model(note_attrs: Vec<AttributeDescriptor>, item_attrs: Vec<AttributeDescriptor>) -> ModelDescriptor {
    let note = note_attrs
        .into_iter()
        .fold(EntityDescriptor::new("Note"), EntityDescriptor::attribute)
        .relationship(RelationshipDescriptor::to_many("items", "Item").inverse("note"));
    let item = item_attrs
        .into_iter()
        .fold(EntityDescriptor::new("Item"), EntityDescriptor::attribute)
        .relationship(RelationshipDescriptor::to_one("note", "Note").inverse("items"));
    ModelDescriptor::new("Props", 1).entity_def(note).entity_def(item)
}

proptest! {
    #![proptest_config(proptest_config())]

    #[test]
    fn declaration_order_does_not_matter(
        note_attrs in attributes(),
        item_attrs in attributes(),
    ) {
        let forward = model(note_attrs.clone(), item_attrs.clone());
        let mut shuffled = model(
            note_attrs.into_iter().rev().collect(),
            item_attrs.into_iter().rev().collect(),
        );
        shuffled.entities.reverse();
        prop_assert_eq!(forward.fingerprint(), shuffled.fingerprint());
        prop_assert_eq!(forward.entity_hashes(), shuffled.entity_hashes());
    }

    #[test]
    fn flipping_optionality_changes_fingerprint(
        note_attrs in attributes(),
        item_attrs in attributes(),
        index in any::<prop::sample::Index>(),
    ) {
        let original = model(note_attrs.clone(), item_attrs.clone());
        let mut flipped_attrs = note_attrs;
        let i = index.index(flipped_attrs.len());
        flipped_attrs[i].optional = !flipped_attrs[i].optional;
        let flipped = model(flipped_attrs, item_attrs);
        prop_assert_ne!(original.fingerprint(), flipped.fingerprint());
    }
}

#[test]
fn shipped_fingerprints_are_stable_across_calls() {
    for version in NotesModelVersion::ALL {
        assert_eq!(&version.descriptor().fingerprint(), version.fingerprint());
    }
}
