//! Union-schema resolution across source schemas.
//!
//! Takes the schemas collected from every source and finds the union of them,
//! building along the way the per-source mapping that says where each source
//! field lands in the output row.

use std::collections::{HashMap, HashSet};

use crate::types::{FieldType, Schema};

/// Mapping from a source's field positions to union field positions.
///
/// Indexed by source field position; the value is the union position the
/// field's values are routed to.
pub type FieldMapping = Vec<usize>;

/// Outcome of resolving the union schema over all source schemas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaResolution {
    /// The union schema, field order determined by first sighting.
    pub schema: Schema,
    /// Per-source field mappings, `None` for sources that sent no rows.
    pub mappings: Vec<Option<FieldMapping>>,
    /// Union positions whose type was rewritten to text after a conflicting
    /// declaration. Values routed to these positions are coerced.
    pub convert_to_text: HashSet<usize>,
}

impl SchemaResolution {
    /// Returns whether the union position must be coerced to text.
    pub fn needs_text_coercion(&self, union_position: usize) -> bool {
        self.convert_to_text.contains(&union_position)
    }
}

/// Resolves the union of the given source schemas.
///
/// The first non-absent schema is cloned as the base; every source's fields
/// are then scanned in configured order, appending unseen names and recording
/// each field's union position. A field name declared with two different
/// types rewrites the union field to [`FieldType::Text`] in place and marks
/// the position for coercion; the rewrite is idempotent when later sources
/// trigger it again.
///
/// Type conflicts always resolve to text, never to a wider numeric type: any
/// value can be rendered as text, while not any two numeric types can be
/// losslessly unified.
///
/// Callers only invoke this once at least one schema is present; an all-absent
/// input yields an empty resolution.
pub fn resolve(schemas: &[Option<Schema>]) -> SchemaResolution {
    let mut union = schemas
        .iter()
        .flatten()
        .next()
        .cloned()
        .unwrap_or_default();

    let mut positions: HashMap<String, usize> = union
        .fields
        .iter()
        .enumerate()
        .map(|(position, field)| (field.name.clone(), position))
        .collect();

    let mut convert_to_text = HashSet::new();
    let mut mappings = Vec::with_capacity(schemas.len());

    for schema in schemas {
        let Some(schema) = schema else {
            // Sources that never sent a row have no fields to map.
            mappings.push(None);
            continue;
        };

        let mut mapping = Vec::with_capacity(schema.len());
        for field in &schema.fields {
            let union_position = match positions.get(&field.name) {
                Some(&position) => position,
                None => {
                    union.add_field(field.clone());
                    let position = union.len() - 1;
                    positions.insert(field.name.clone(), position);
                    position
                }
            };
            mapping.push(union_position);

            if union.fields[union_position].typ != field.typ {
                union.fields[union_position].typ = FieldType::Text;
                convert_to_text.insert(union_position);
            }
        }
        mappings.push(Some(mapping));
    }

    SchemaResolution {
        schema: union,
        mappings,
        convert_to_text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldSchema;

    fn schema(fields: &[(&str, FieldType)], origin: &str) -> Schema {
        Schema::new(
            fields
                .iter()
                .map(|(name, typ)| FieldSchema::new(*name, *typ, origin))
                .collect(),
        )
    }

    #[test]
    fn test_union_field_count_equals_distinct_names() {
        let a = schema(&[("c1", FieldType::I64), ("c2", FieldType::Text)], "a");
        let b = schema(&[("c2", FieldType::Text), ("c3", FieldType::Bool)], "b");
        let c = schema(&[("c4", FieldType::Date)], "c");

        let resolution = resolve(&[Some(a), Some(b), Some(c)]);

        assert_eq!(resolution.schema.len(), 4);
        let names: Vec<_> = resolution.schema.field_names().collect();
        assert_eq!(names, vec!["c1", "c2", "c3", "c4"]);
    }

    #[test]
    fn test_mapping_targets_fields_with_matching_names() {
        let a = schema(&[("c1", FieldType::I64), ("c2", FieldType::Text)], "a");
        let b = schema(&[("c2", FieldType::Text), ("c1", FieldType::F64)], "b");

        let resolution = resolve(&[Some(a.clone()), Some(b.clone())]);

        for (source_index, source_schema) in [a, b].iter().enumerate() {
            let mapping = resolution.mappings[source_index]
                .as_ref()
                .expect("source has a mapping");
            for (field_position, field) in source_schema.fields.iter().enumerate() {
                let union_position = mapping[field_position];
                assert_eq!(resolution.schema.fields[union_position].name, field.name);
            }
        }
    }

    #[test]
    fn test_conflicting_types_rewrite_to_text() {
        let a = schema(&[("c1", FieldType::I64), ("c2", FieldType::Text)], "a");
        let b = schema(&[("c2", FieldType::Text), ("c1", FieldType::F64)], "b");

        let resolution = resolve(&[Some(a), Some(b)]);

        assert_eq!(resolution.schema.fields[0].name, "c1");
        assert_eq!(resolution.schema.fields[0].typ, FieldType::Text);
        assert_eq!(resolution.schema.fields[1].typ, FieldType::Text);
        assert!(resolution.needs_text_coercion(0));
        // c2 agrees on text everywhere, no coercion needed.
        assert!(!resolution.needs_text_coercion(1));
        assert_eq!(resolution.mappings[0], Some(vec![0, 1]));
        assert_eq!(resolution.mappings[1], Some(vec![1, 0]));
    }

    #[test]
    fn test_repeated_conflicts_are_idempotent() {
        let a = schema(&[("v", FieldType::I64)], "a");
        let b = schema(&[("v", FieldType::F64)], "b");
        let c = schema(&[("v", FieldType::Bool)], "c");

        let resolution = resolve(&[Some(a), Some(b), Some(c)]);

        assert_eq!(resolution.schema.len(), 1);
        assert_eq!(resolution.schema.fields[0].typ, FieldType::Text);
        assert_eq!(resolution.convert_to_text, HashSet::from([0]));
    }

    #[test]
    fn test_single_source_identity() {
        let a = schema(&[("c1", FieldType::I64), ("c2", FieldType::Text)], "a");

        let resolution = resolve(&[Some(a.clone())]);

        assert_eq!(resolution.schema, a);
        assert_eq!(resolution.mappings, vec![Some(vec![0, 1])]);
        assert!(resolution.convert_to_text.is_empty());
    }

    #[test]
    fn test_absent_sources_are_skipped() {
        let a = schema(&[("c1", FieldType::I64)], "a");
        let c = schema(&[("c2", FieldType::Text)], "c");

        let resolution = resolve(&[Some(a), None, Some(c)]);

        assert_eq!(resolution.schema.len(), 2);
        assert_eq!(resolution.mappings[1], None);
        assert_eq!(resolution.mappings[2], Some(vec![1]));
    }

    #[test]
    fn test_base_is_first_non_absent_schema() {
        let b = schema(&[("c2", FieldType::Text), ("c1", FieldType::F64)], "b");

        let resolution = resolve(&[None, Some(b.clone())]);

        assert_eq!(resolution.schema, b);
        assert_eq!(resolution.mappings, vec![None, Some(vec![0, 1])]);
    }

    #[test]
    fn test_later_agreement_does_not_undo_rewrite() {
        let a = schema(&[("v", FieldType::I64)], "a");
        let b = schema(&[("v", FieldType::F64)], "b");
        let c = schema(&[("v", FieldType::I64)], "c");

        let resolution = resolve(&[Some(a), Some(b), Some(c)]);

        // c's i64 still differs from the rewritten text type, so the position
        // stays marked and the type stays text.
        assert_eq!(resolution.schema.fields[0].typ, FieldType::Text);
        assert!(resolution.needs_text_coercion(0));
    }
}
