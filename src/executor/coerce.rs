//! Native value coercion for store-bound queries
//!
//! Plans carry transport JSON. Before execution, extended notation
//! (`{"$date": ..}`, `{"$oid": ..}`) becomes native BSON, and 24-digit hex
//! strings become object ids when they sit under a reference-id field.
//! Operator keys inherit the context of the field they apply to, so
//! `{"user": {"$in": ["65a1..."]}}` is coerced as well.

use std::collections::BTreeSet;

use bson::oid::ObjectId;
use bson::{Bson, Document};
use serde_json::{Map, Value};

use crate::deployment::Deployment;
use crate::plan::paths::{is_operator, leaf_of};
use crate::store::convert::{extended_value, number_to_bson};

#[derive(Debug, Clone)]
pub struct Coercer {
    id_fields: BTreeSet<String>,
}

impl Coercer {
    pub fn new(deployment: &Deployment) -> Self {
        Self {
            id_fields: deployment.id_fields(),
        }
    }

    fn is_id_key(&self, key: &str) -> bool {
        self.id_fields.contains(key) || self.id_fields.contains(leaf_of(key))
    }

    pub fn document(&self, map: &Map<String, Value>) -> Document {
        self.document_in(map, false)
    }

    fn document_in(&self, map: &Map<String, Value>, id_context: bool) -> Document {
        let mut document = Document::new();
        for (key, value) in map {
            let context = if is_operator(key) {
                id_context
            } else {
                self.is_id_key(key)
            };
            document.insert(key.clone(), self.value(value, context));
        }
        document
    }

    pub fn value(&self, value: &Value, id_context: bool) -> Bson {
        match value {
            Value::Null => Bson::Null,
            Value::Bool(b) => Bson::Boolean(*b),
            Value::Number(n) => number_to_bson(n),
            Value::String(text) => match id_context.then(|| parse_object_id(text)).flatten() {
                Some(oid) => Bson::ObjectId(oid),
                None => Bson::String(text.clone()),
            },
            Value::Array(items) => {
                Bson::Array(items.iter().map(|item| self.value(item, id_context)).collect())
            }
            Value::Object(map) => match extended_value(map) {
                Some(native) => native,
                None => Bson::Document(self.document_in(map, id_context)),
            },
        }
    }
}

/// A 24-digit hex string as an object id
pub(crate) fn parse_object_id(text: &str) -> Option<ObjectId> {
    if text.len() != 24 || !text.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    ObjectId::parse_str(text).ok()
}
