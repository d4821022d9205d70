//! Type inference over sampled documents

use std::collections::HashMap;

use bson::{Bson, Document};

use super::types::{FieldType, SchemaDescriptor, TypedField};

const MAX_SAMPLE_VALUES: usize = 3;

#[derive(Default)]
struct FieldStats {
    last_type: Option<FieldType>,
    present: usize,
    saw_null: bool,
    samples: Vec<String>,
    sub_fields: Option<Vec<String>>,
}

/// Infer a descriptor from sampled documents.
///
/// The type tag of a field is taken from its last non-null sample. Sub-field
/// names of an array of objects come from the first such value seen. A field
/// is nullable when any sample lacks it or holds null.
pub fn infer_schema(
    samples: &[Document],
    approximate_count: u64,
    sample_value_max_len: usize,
) -> SchemaDescriptor {
    let mut order: Vec<String> = Vec::new();
    let mut stats: HashMap<String, FieldStats> = HashMap::new();

    for document in samples {
        for (key, value) in document {
            let entry = stats.entry(key.clone()).or_insert_with(|| {
                order.push(key.clone());
                FieldStats::default()
            });
            entry.present += 1;

            if matches!(value, Bson::Null | Bson::Undefined) {
                entry.saw_null = true;
                continue;
            }
            entry.last_type = Some(FieldType::of(value));

            if entry.sub_fields.is_none() {
                if let Bson::Array(items) = value {
                    if let Some(Bson::Document(first)) = items.first() {
                        entry.sub_fields = Some(first.keys().cloned().collect());
                    }
                }
            }

            if let Some(text) = sample_text(value, sample_value_max_len) {
                if entry.samples.len() < MAX_SAMPLE_VALUES && !entry.samples.contains(&text) {
                    entry.samples.push(text);
                }
            }
        }
    }

    let typed_fields = order
        .into_iter()
        .filter_map(|field| {
            let stat = stats.remove(&field)?;
            Some(TypedField {
                nullable: stat.saw_null || stat.present < samples.len(),
                field_type: stat.last_type.unwrap_or(FieldType::Unknown),
                sample_values: stat.samples,
                sub_fields: stat.sub_fields,
                field,
            })
        })
        .collect();

    SchemaDescriptor::from_typed_fields(typed_fields, approximate_count)
}

/// Stringified scalar, truncated to `max_len` characters
fn sample_text(value: &Bson, max_len: usize) -> Option<String> {
    let text = match value {
        Bson::String(s) => s.clone(),
        Bson::Int32(n) => n.to_string(),
        Bson::Int64(n) => n.to_string(),
        Bson::Double(f) => f.to_string(),
        Bson::Boolean(b) => b.to_string(),
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::DateTime(dt) => crate::store::convert::datetime_to_string(*dt),
        _ => return None,
    };
    Some(text.chars().take(max_len).collect())
}
