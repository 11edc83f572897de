//! Structural inference of mapping plans.
//!
//! Inference handles additive changes and renames: entities, attributes and
//! relationships are matched by name, or by the destination's renaming id.
//! Anything that needs values synthesized from old data is refused.

use notestore_core::{
    AttributeDescriptor, EntityDescriptor, MigrationError, MigrationResult, ModelDescriptor,
    RelationshipDescriptor,
};

use crate::mapping::{
    AttributeMapping, EntityMapping, MappingPlan, PlanKind, RelationshipMapping,
};
use crate::registry::SchemaVersion;

pub(crate) fn infer_plan(
    source: &SchemaVersion,
    destination: &SchemaVersion,
) -> MigrationResult<MappingPlan> {
    let src = source.model();
    let dst = destination.model();
    let fail = |detail: String| MigrationError::MappingInference {
        from_version: source.to_string(),
        to_version: destination.to_string(),
        detail,
    };

    let mut entity_mappings = Vec::new();
    for entity in dst.entities.iter().filter(|e| !e.is_abstract) {
        let Some(origin) = counterpart_entity(src, entity) else {
            if let Some(owner) = required_reference_to(src, dst, &entity.name) {
                return Err(fail(format!(
                    "new entity `{}` is required by `{owner}` but has no source records",
                    entity.name
                )));
            }
            continue;
        };

        let mut mapping = EntityMapping::new(
            format!("{}To{}", origin.name, entity.name),
            &origin.name,
            &entity.name,
        );

        for attr in dst.attributes_of(&entity.name) {
            match counterpart_attribute(src, &origin.name, attr) {
                Some(old) if old.kind != attr.kind => {
                    return Err(fail(format!(
                        "attribute `{}.{}` changes kind from {} to {}",
                        entity.name, attr.name, old.kind, attr.kind
                    )));
                }
                Some(old) if old.optional && !attr.optional => {
                    let Some(default) = attr.default.clone() else {
                        return Err(fail(format!(
                            "attribute `{}.{}` becomes required without a default",
                            entity.name, attr.name
                        )));
                    };
                    let from = old.name.clone();
                    mapping = mapping.attribute(AttributeMapping::computed(
                        &attr.name,
                        move |record| {
                            Ok(record
                                .attribute(&from)
                                .cloned()
                                .unwrap_or_else(|| default.clone()))
                        },
                    ));
                }
                Some(old) => {
                    mapping = mapping.attribute(AttributeMapping::renamed(&attr.name, &old.name));
                }
                None => match &attr.default {
                    Some(value) => {
                        mapping =
                            mapping.attribute(AttributeMapping::constant(&attr.name, value.clone()));
                    }
                    None if attr.optional => {}
                    None => {
                        return Err(fail(format!(
                            "new required attribute `{}.{}` has no default",
                            entity.name, attr.name
                        )));
                    }
                },
            }
        }

        for rel in dst.relationships_of(&entity.name) {
            match counterpart_relationship(src, &origin.name, rel) {
                Some(old) => {
                    mapping = mapping
                        .relationship(RelationshipMapping::from_relationship(&rel.name, &old.name));
                }
                None if rel.optional => {}
                None => {
                    return Err(fail(format!(
                        "new required relationship `{}.{}` cannot be inferred",
                        entity.name, rel.name
                    )));
                }
            }
        }

        entity_mappings.push(mapping);
    }

    Ok(MappingPlan {
        source: source.clone(),
        destination: destination.clone(),
        kind: PlanKind::Inferred,
        entity_mappings,
    })
}

fn counterpart_entity<'m>(
    src: &'m ModelDescriptor,
    entity: &EntityDescriptor,
) -> Option<&'m EntityDescriptor> {
    src.entity(entity.renaming_id.as_deref().unwrap_or(&entity.name))
        .filter(|e| !e.is_abstract)
}

fn counterpart_attribute<'m>(
    src: &'m ModelDescriptor,
    entity: &str,
    attr: &AttributeDescriptor,
) -> Option<&'m AttributeDescriptor> {
    src.attribute(entity, attr.renaming_id.as_deref().unwrap_or(&attr.name))
}

fn counterpart_relationship<'m>(
    src: &'m ModelDescriptor,
    entity: &str,
    rel: &RelationshipDescriptor,
) -> Option<&'m RelationshipDescriptor> {
    src.relationship(entity, rel.renaming_id.as_deref().unwrap_or(&rel.name))
}

/// A migrated destination entity whose required relationship targets `name`.
fn required_reference_to(
    src: &ModelDescriptor,
    dst: &ModelDescriptor,
    name: &str,
) -> Option<String> {
    dst.entities
        .iter()
        .filter(|e| !e.is_abstract && counterpart_entity(src, e).is_some())
        .find_map(|e| {
            dst.relationships_of(&e.name)
                .into_iter()
                .find(|r| !r.optional && dst.is_kind_of(name, &r.destination))
                .map(|r| format!("{}.{}", e.name, r.name))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::AttributeSource;
    use crate::registry::SchemaRegistry;
    use notestore_core::{AttributeKind, Value};

    fn pair(a: ModelDescriptor, b: ModelDescriptor) -> MigrationResult<MappingPlan> {
        let registry = SchemaRegistry::new(vec![a, b])?;
        let v = registry.versions();
        infer_plan(&v[0], &v[1])
    }

    fn item(version: u32, attrs: Vec<AttributeDescriptor>) -> ModelDescriptor {
        let entity = attrs
            .into_iter()
            .fold(EntityDescriptor::new("Item"), EntityDescriptor::attribute);
        ModelDescriptor::new(format!("M{version}"), version).entity_def(entity)
    }

    #[test]
    fn additive_optional_attribute_is_left_unset() {
        let plan = pair(
            item(1, vec![AttributeDescriptor::required("a", AttributeKind::String)]),
            item(
                2,
                vec![
                    AttributeDescriptor::required("a", AttributeKind::String),
                    AttributeDescriptor::optional("b", AttributeKind::Binary),
                ],
            ),
        )
        .unwrap();
        let mapping = &plan.entity_mappings[0];
        assert_eq!(mapping.name, "ItemToItem");
        assert_eq!(mapping.attributes.len(), 1);
    }

    #[test]
    fn renamed_attribute_copies_old_name() {
        let plan = pair(
            item(1, vec![AttributeDescriptor::required("heading", AttributeKind::String)]),
            item(
                2,
                vec![
                    AttributeDescriptor::required("title", AttributeKind::String)
                        .renamed_from("heading"),
                ],
            ),
        )
        .unwrap();
        let rule = &plan.entity_mappings[0].attributes[0];
        assert_eq!(rule.destination, "title");
        assert!(matches!(&rule.source, AttributeSource::Copy { from } if from == "heading"));
    }

    #[test]
    fn new_attribute_with_default_is_constant() {
        let plan = pair(
            item(1, vec![AttributeDescriptor::required("a", AttributeKind::String)]),
            item(
                2,
                vec![
                    AttributeDescriptor::required("a", AttributeKind::String),
                    AttributeDescriptor::required("rank", AttributeKind::Integer)
                        .with_default(Value::Integer(0)),
                ],
            ),
        )
        .unwrap();
        assert!(matches!(
            plan.entity_mappings[0].attributes[1].source,
            AttributeSource::Constant(Value::Integer(0))
        ));
    }

    #[test]
    fn kind_change_fails_naming_the_field() {
        let err = pair(
            item(1, vec![AttributeDescriptor::required("a", AttributeKind::String)]),
            item(2, vec![AttributeDescriptor::required("a", AttributeKind::Integer)]),
        )
        .unwrap_err();
        assert_eq!(err.error_code(), "MAPPING_INFERENCE_FAILED");
        assert!(err.to_string().contains("`Item.a`"));
    }

    #[test]
    fn new_required_attribute_without_default_fails() {
        let err = pair(
            item(1, vec![AttributeDescriptor::required("a", AttributeKind::String)]),
            item(
                2,
                vec![
                    AttributeDescriptor::required("a", AttributeKind::String),
                    AttributeDescriptor::required("b", AttributeKind::Double),
                ],
            ),
        )
        .unwrap_err();
        assert!(err.to_string().contains("`Item.b` has no default"));
    }

    #[test]
    fn optional_to_required_needs_default() {
        let err = pair(
            item(1, vec![AttributeDescriptor::optional("a", AttributeKind::String)]),
            item(2, vec![AttributeDescriptor::required("a", AttributeKind::String)]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("becomes required"));

        let plan = pair(
            item(1, vec![AttributeDescriptor::optional("a", AttributeKind::String)]),
            item(
                2,
                vec![
                    AttributeDescriptor::required("a", AttributeKind::String)
                        .with_default(Value::from("")),
                ],
            ),
        )
        .unwrap();
        assert!(matches!(
            plan.entity_mappings[0].attributes[0].source,
            AttributeSource::Computed(_)
        ));
    }

    #[test]
    fn inferred_v2_to_v3_would_drop_images() {
        let registry = SchemaRegistry::notes().unwrap();
        let v = registry.versions();
        let plan = infer_plan(&v[1], &v[2]).unwrap();
        assert_eq!(plan.entity_mappings.len(), 1);
        assert!(
            plan.entity_mappings[0]
                .attributes
                .iter()
                .all(|a| a.destination != "image")
        );
    }

    #[test]
    fn new_entity_required_by_migrated_one_fails() {
        let a = ModelDescriptor::new("M1", 1).entity_def(
            EntityDescriptor::new("Item")
                .attribute(AttributeDescriptor::required("a", AttributeKind::String)),
        );
        let b = ModelDescriptor::new("M2", 2)
            .entity_def(
                EntityDescriptor::new("Item")
                    .attribute(AttributeDescriptor::required("a", AttributeKind::String))
                    .relationship(RelationshipDescriptor::to_one("owner", "Owner")),
            )
            .entity_def(EntityDescriptor::new("Owner"));
        let err = pair(a, b).unwrap_err();
        assert!(err.to_string().contains("`Item.owner`"));
    }
}
