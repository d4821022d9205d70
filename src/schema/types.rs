//! Runtime-discovered schema descriptors

use std::collections::BTreeSet;
use std::fmt::Write as _;

use bson::Bson;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Type tag inferred from sampled values
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Unknown,
    String,
    Int,
    Float,
    Boolean,
    ObjectId,
    DateTime,
    Object,
    /// Element type taken from the first element; `None` for an empty array
    Array(Option<Box<FieldType>>),
}

impl FieldType {
    /// Tag of a single sampled value
    pub fn of(value: &Bson) -> Self {
        match value {
            Bson::String(_) | Bson::Symbol(_) => FieldType::String,
            Bson::Int32(_) | Bson::Int64(_) => FieldType::Int,
            Bson::Double(_) | Bson::Decimal128(_) => FieldType::Float,
            Bson::Boolean(_) => FieldType::Boolean,
            Bson::ObjectId(_) => FieldType::ObjectId,
            Bson::DateTime(_) | Bson::Timestamp(_) => FieldType::DateTime,
            Bson::Document(_) => FieldType::Object,
            Bson::Array(items) => FieldType::Array(items.first().map(|e| Box::new(FieldType::of(e)))),
            _ => FieldType::Unknown,
        }
    }

    /// Tag as written in descriptors, e.g. `array<object>`
    pub fn type_name(&self) -> String {
        match self {
            FieldType::Unknown => "unknown".into(),
            FieldType::String => "string".into(),
            FieldType::Int => "int".into(),
            FieldType::Float => "float".into(),
            FieldType::Boolean => "boolean".into(),
            FieldType::ObjectId => "ObjectId".into(),
            FieldType::DateTime => "datetime".into(),
            FieldType::Object => "object".into(),
            FieldType::Array(None) => "array".into(),
            FieldType::Array(Some(inner)) => format!("array<{}>", inner.type_name()),
        }
    }

    /// Inverse of `type_name`; unrecognized tags read as `Unknown`
    pub fn parse(name: &str) -> Self {
        if let Some(inner) = name.strip_prefix("array<").and_then(|n| n.strip_suffix('>')) {
            return FieldType::Array(Some(Box::new(FieldType::parse(inner))));
        }
        match name {
            "string" => FieldType::String,
            "int" => FieldType::Int,
            "float" => FieldType::Float,
            "boolean" => FieldType::Boolean,
            "ObjectId" => FieldType::ObjectId,
            "datetime" => FieldType::DateTime,
            "object" => FieldType::Object,
            "array" => FieldType::Array(None),
            _ => FieldType::Unknown,
        }
    }

    pub fn is_array_of_objects(&self) -> bool {
        matches!(self, FieldType::Array(Some(inner)) if **inner == FieldType::Object)
    }
}

impl Serialize for FieldType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.type_name())
    }
}

impl<'de> Deserialize<'de> for FieldType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(FieldType::parse(&name))
    }
}

/// One top-level field of a collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedField {
    pub field: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// At most three distinct, stringified, truncated values
    pub sample_values: Vec<String>,
    pub nullable: bool,
    /// Element keys, for arrays of objects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_fields: Option<Vec<String>>,
}

/// Snapshot of one collection's shape.
///
/// Never mutated after construction; a refresh replaces the whole value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDescriptor {
    pub fields: BTreeSet<String>,
    pub typed_fields: Vec<TypedField>,
    pub approximate_count: u64,
}

impl SchemaDescriptor {
    /// "No schema information available"
    pub fn empty() -> Self {
        Self::default()
    }

    /// Descriptor built from typed fields, in order
    pub fn from_typed_fields(typed_fields: Vec<TypedField>, approximate_count: u64) -> Self {
        Self {
            fields: typed_fields.iter().map(|f| f.field.clone()).collect(),
            typed_fields,
            approximate_count,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn has_root(&self, name: &str) -> bool {
        self.fields.contains(name)
    }

    pub fn field(&self, name: &str) -> Option<&TypedField> {
        self.typed_fields.iter().find(|f| f.field == name)
    }

    /// Compact listing used as context for candidate generation
    pub fn render_summary(&self, collection: &str) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{} (~{} documents):", collection, self.approximate_count);
        for field in &self.typed_fields {
            let _ = write!(out, "  - {} ({})", field.field, field.field_type.type_name());
            if let Some(sub_fields) = &field.sub_fields {
                let _ = write!(out, " fields: {}", sub_fields.join(", "));
            }
            if !field.sample_values.is_empty() {
                let _ = write!(out, ", e.g.: {}", field.sample_values.join(" / "));
            }
            if field.nullable {
                out.push_str(", nullable");
            }
            out.push('\n');
        }
        out
    }
}
