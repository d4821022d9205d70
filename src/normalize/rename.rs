//! Stage-aware alias renaming
//!
//! Paths are renamed through the plan collection's alias table. Paths under
//! a join alias are renamed through the joined collection's table. Names a
//! stage introduces (group outputs, computed fields, counts) shadow the
//! table from that stage on. After a root replacement no path is renamed.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};

use crate::deployment::{AliasTable, Deployment};
use crate::plan::paths::{
    classify_new_root, classify_projection, field_ref, is_operator, rewrite_field_refs, root_of,
    NewRoot, ProjectionEntry,
};

/// Argument keys of date operators; never field names
pub(crate) const DATE_ARGUMENT_KEYS: &[&str] = &[
    "date",
    "format",
    "timezone",
    "onNull",
    "onError",
    "unit",
    "amount",
    "startDate",
    "endDate",
    "dateString",
    "binSize",
    "startOfWeek",
];

/// What later paths are relative to
#[derive(Debug, Clone, PartialEq, Eq)]
enum Frame {
    /// The collection's documents
    Document,
    /// Elements of the array at this document path
    Element(String),
    /// A replacement document unrelated to the collection
    Detached,
}

#[derive(Clone)]
pub(crate) struct Renamer<'a> {
    deployment: &'a Deployment,
    table: Option<&'a AliasTable>,
    joins: BTreeMap<String, String>,
    introduced: BTreeSet<String>,
    frame: Frame,
}

impl<'a> Renamer<'a> {
    pub(crate) fn new(deployment: &'a Deployment, collection: &str) -> Self {
        Self {
            deployment,
            table: deployment.aliases_for(collection),
            joins: BTreeMap::new(),
            introduced: BTreeSet::new(),
            frame: Frame::Document,
        }
    }

    fn rename_path(&self, path: &str) -> Option<String> {
        let root = root_of(path);
        if let Some(target) = self.joins.get(root) {
            let rest = path.strip_prefix(root)?.strip_prefix('.')?;
            let renamed = self.deployment.aliases_for(target)?.rename_path(rest)?;
            return Some(format!("{}.{}", root, renamed));
        }
        if self.introduced.contains(root) {
            return None;
        }
        match &self.frame {
            Frame::Document => self.table?.rename_path(path),
            Frame::Element(prefix) => {
                let renamed = self.table?.rename_path(&format!("{}.{}", prefix, path))?;
                Some(strip_element_prefix(&renamed, prefix)?.to_string())
            }
            Frame::Detached => None,
        }
    }

    /// Rename the keys of an `$elemMatch` document on the array at `array`,
    /// as paths under that array
    fn element_query(&self, array: &str, condition: &mut Map<String, Value>) {
        let entries = std::mem::take(condition);
        for (key, mut value) in entries {
            match key.as_str() {
                "$and" | "$or" | "$nor" => {
                    if let Value::Array(clauses) = &mut value {
                        for clause in clauses.iter_mut() {
                            if let Value::Object(inner) = clause {
                                self.element_query(array, inner);
                            }
                        }
                    }
                    condition.insert(key, value);
                }
                operator if is_operator(operator) => {
                    condition.insert(key, value);
                }
                path => {
                    let renamed = self
                        .rename_path(&format!("{}.{}", array, path))
                        .and_then(|full| strip_element_prefix(&full, array).map(str::to_string))
                        .unwrap_or_else(|| path.to_string());
                    condition.entry(renamed).or_insert(value);
                }
            }
        }
    }

    /// A path into the collection's own documents, not a stage output
    fn is_document_path(&self, path: &str) -> bool {
        let root = root_of(path);
        self.frame == Frame::Document && !self.joins.contains_key(root) && !self.introduced.contains(root)
    }

    fn renamed(&self, path: &str) -> String {
        self.rename_path(path).unwrap_or_else(|| path.to_string())
    }

    fn introduce(&mut self, name: &str) {
        let root = root_of(name).to_string();
        self.joins.remove(&root);
        self.introduced.insert(root);
    }

    fn expression(&self, value: &mut Value) {
        rewrite_field_refs(value, &|path: &str| self.rename_path(path));
    }

    /// Rename the field keys of a query document
    pub(crate) fn query(&self, filter: &mut Map<String, Value>) {
        let entries = std::mem::take(filter);
        for (key, mut value) in entries {
            match key.as_str() {
                "$and" | "$or" | "$nor" => {
                    if let Value::Array(clauses) = &mut value {
                        for clause in clauses.iter_mut() {
                            if let Value::Object(inner) = clause {
                                self.query(inner);
                            }
                        }
                    }
                    filter.insert(key, value);
                }
                "$expr" => {
                    self.expression(&mut value);
                    filter.insert(key, value);
                }
                operator if is_operator(operator) => {
                    filter.insert(key, value);
                }
                path => {
                    let renamed = self.renamed(path);
                    if let Some(Value::Object(condition)) = value.get_mut("$elemMatch") {
                        self.element_query(&renamed, condition);
                    }
                    filter.entry(renamed).or_insert(value);
                }
            }
        }
    }

    /// Rename a projection; returns the names it computes
    pub(crate) fn projection(&self, projection: &mut Map<String, Value>) -> Vec<String> {
        let mut computed = Vec::new();
        let entries = std::mem::take(projection);
        for (key, mut value) in entries {
            match classify_projection(&value) {
                ProjectionEntry::Computed => {
                    self.expression(&mut value);
                    computed.push(key.clone());
                    projection.insert(key, value);
                }
                _ => {
                    let renamed = self.renamed(&key);
                    projection.entry(renamed).or_insert(value);
                }
            }
        }
        computed
    }

    pub(crate) fn sort(&self, sort: &mut Map<String, Value>) {
        let entries = std::mem::take(sort);
        for (key, value) in entries {
            let renamed = if is_operator(&key) { key } else { self.renamed(&key) };
            sort.entry(renamed).or_insert(value);
        }
    }

    /// Rename every stage of a pipeline in order
    pub(crate) fn pipeline(&mut self, stages: &mut [Value]) {
        for stage in stages.iter_mut() {
            let Value::Object(map) = stage else { continue };
            for (name, argument) in map.iter_mut() {
                self.stage(name, argument);
            }
        }
    }

    fn stage(&mut self, name: &str, argument: &mut Value) {
        match (name, argument) {
            ("$match", Value::Object(filter)) => self.query(filter),
            ("$project", Value::Object(projection)) => {
                for name in self.projection(projection) {
                    self.introduce(&name);
                }
            }
            ("$addFields" | "$set", Value::Object(fields)) => {
                let mut outputs = Vec::new();
                for (key, value) in fields.iter_mut() {
                    self.expression(value);
                    outputs.push(key.clone());
                }
                for output in outputs {
                    self.introduce(&output);
                }
            }
            ("$group", Value::Object(group)) => {
                let mut outputs = Vec::new();
                for (key, value) in group.iter_mut() {
                    self.expression(value);
                    if key != "_id" {
                        outputs.push(key.clone());
                    }
                }
                for output in outputs {
                    self.introduce(&output);
                }
            }
            ("$lookup", Value::Object(lookup)) => self.lookup(lookup),
            ("$unwind", argument) => {
                if argument.is_string() {
                    self.expression(argument);
                } else if let Value::Object(options) = argument {
                    if let Some(path) = options.get_mut("path") {
                        self.expression(path);
                    }
                    if let Some(Value::String(index)) = options.get("includeArrayIndex") {
                        let index = index.clone();
                        self.introduce(&index);
                    }
                }
            }
            ("$sort", Value::Object(sort)) => self.sort(sort),
            ("$unset", argument) => match argument {
                Value::String(path) => *path = self.renamed(path),
                Value::Array(paths) => {
                    for path in paths.iter_mut() {
                        if let Value::String(text) = path {
                            *text = self.renamed(text);
                        }
                    }
                }
                _ => {}
            },
            ("$count", Value::String(output)) => {
                let output = output.clone();
                self.introduce(&output);
            }
            ("$sortByCount", argument) => {
                self.expression(argument);
                self.introduce("count");
            }
            ("$bucket" | "$bucketAuto", Value::Object(options)) => {
                if let Some(group_by) = options.get_mut("groupBy") {
                    self.expression(group_by);
                }
                if let Some(Value::Object(output)) = options.get_mut("output") {
                    for value in output.values_mut() {
                        self.expression(value);
                    }
                }
                let outputs: Vec<String> = match options.get("output") {
                    Some(Value::Object(output)) => output.keys().cloned().collect(),
                    _ => vec!["count".to_string()],
                };
                for output in outputs {
                    self.introduce(&output);
                }
            }
            ("$facet", Value::Object(facets)) => {
                let mut outputs = Vec::new();
                for (key, value) in facets.iter_mut() {
                    if let Value::Array(stages) = value {
                        self.clone().pipeline(stages);
                    }
                    outputs.push(key.clone());
                }
                for output in outputs {
                    self.introduce(&output);
                }
            }
            ("$replaceRoot" | "$replaceWith", argument) => {
                self.expression(argument);
                let frame = match classify_new_root(name, argument) {
                    NewRoot::Unchanged => return,
                    NewRoot::Path(path) if self.is_document_path(path) => Frame::Element(path.to_string()),
                    _ => Frame::Detached,
                };
                self.frame = frame;
                self.joins.clear();
                self.introduced.clear();
            }
            ("$limit" | "$skip" | "$sample", _) => {}
            (_, argument) => self.generic(argument),
        }
    }

    fn lookup(&mut self, lookup: &mut Map<String, Value>) {
        let from = lookup.get("from").and_then(Value::as_str).unwrap_or("").to_string();
        if let Some(Value::String(local)) = lookup.get_mut("localField") {
            *local = self.renamed(local);
        }
        if let Some(Value::String(foreign)) = lookup.get_mut("foreignField") {
            if let Some(renamed) = self.deployment.aliases_for(&from).and_then(|t| t.rename_path(foreign)) {
                *foreign = renamed;
            }
        }
        if let Some(Value::Object(bindings)) = lookup.get_mut("let") {
            for value in bindings.values_mut() {
                self.expression(value);
            }
        }
        if let Some(Value::Array(stages)) = lookup.get_mut("pipeline") {
            Renamer::new(self.deployment, &from).pipeline(stages);
        }
        if let Some(Value::String(alias)) = lookup.get("as") {
            let root = root_of(alias).to_string();
            self.introduced.remove(&root);
            self.joins.insert(root, from);
        }
    }

    /// Unrecognized stages: rename non-operator keys that are not date
    /// operator arguments, and field references anywhere
    fn generic(&self, value: &mut Value) {
        match value {
            Value::Object(map) => {
                let entries = std::mem::take(map);
                for (key, mut child) in entries {
                    self.generic(&mut child);
                    let key = if is_operator(&key) || DATE_ARGUMENT_KEYS.contains(&key.as_str()) {
                        key
                    } else {
                        self.renamed(&key)
                    };
                    map.entry(key).or_insert(child);
                }
            }
            Value::Array(items) => {
                for item in items.iter_mut() {
                    self.generic(item);
                }
            }
            Value::String(text) => {
                if let Some(renamed) = field_ref(text).and_then(|path| self.rename_path(path)) {
                    *text = format!("${}", renamed);
                }
            }
            _ => {}
        }
    }
}

/// `full` without its leading `prefix.`
fn strip_element_prefix<'p>(full: &'p str, prefix: &str) -> Option<&'p str> {
    full.strip_prefix(prefix)?.strip_prefix('.')
}
