//! In-process document store

use std::collections::{BTreeMap, BTreeSet};
use std::future::ready;
use std::sync::{PoisonError, RwLock};

use bson::oid::ObjectId;
use bson::{Bson, Document};
use serde_json::Value;

use super::aggregate::{run_pipeline, sort_documents};
use super::convert::json_to_bson;
use super::filter::matches;
use super::project::apply_projection;
use super::{DocumentStore, FindRequest, StoreError, StoreFuture, StoreResult};

/// Documents held in memory, keyed by collection
#[derive(Debug)]
pub struct InMemoryStore {
    database: String,
    collections: RwLock<BTreeMap<String, Vec<Document>>>,
    unavailable: RwLock<BTreeSet<String>>,
}

impl InMemoryStore {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collections: RwLock::new(BTreeMap::new()),
            unavailable: RwLock::new(BTreeSet::new()),
        }
    }

    /// Append documents, assigning an `_id` where missing
    pub fn insert_many(&self, collection: &str, documents: Vec<Document>) {
        let mut collections = self.collections.write().unwrap_or_else(PoisonError::into_inner);
        let target = collections.entry(collection.to_string()).or_default();
        for mut document in documents {
            if !document.contains_key("_id") {
                document.insert("_id", ObjectId::new());
            }
            target.push(document);
        }
    }

    /// Append JSON documents. `{"$oid": ..}` and `{"$date": ..}` become
    /// native values.
    pub fn insert_json(&self, collection: &str, documents: Vec<Value>) -> StoreResult<()> {
        let mut converted = Vec::with_capacity(documents.len());
        for value in &documents {
            match json_to_bson(value) {
                Bson::Document(document) => converted.push(document),
                _ => return Err(StoreError::query("only objects can be inserted")),
            }
        }
        self.insert_many(collection, converted);
        Ok(())
    }

    /// Make every read of `collection` fail with `Unavailable`
    pub fn set_unavailable(&self, collection: &str, unavailable: bool) {
        let mut set = self.unavailable.write().unwrap_or_else(PoisonError::into_inner);
        if unavailable {
            set.insert(collection.to_string());
        } else {
            set.remove(collection);
        }
    }

    fn check_available(&self, collection: &str) -> StoreResult<()> {
        let set = self.unavailable.read().unwrap_or_else(PoisonError::into_inner);
        if set.contains(collection) {
            return Err(StoreError::Unavailable(collection.to_string()));
        }
        Ok(())
    }

    fn documents(&self, collection: &str) -> StoreResult<Vec<Document>> {
        self.check_available(collection)?;
        let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        Ok(collections.get(collection).cloned().unwrap_or_default())
    }

    fn run_find(&self, collection: &str, request: FindRequest) -> StoreResult<Vec<Document>> {
        let mut selected = Vec::new();
        for document in self.documents(collection)? {
            if matches(&document, &request.filter)? {
                selected.push(document);
            }
        }
        if let Some(sort) = &request.sort {
            sort_documents(&mut selected, sort);
        }
        if let Some(limit) = request.limit.filter(|l| *l > 0) {
            selected.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        }
        match &request.projection {
            Some(projection) if !projection.is_empty() => selected
                .iter()
                .map(|document| apply_projection(document, projection))
                .collect(),
            _ => Ok(selected),
        }
    }

    fn run_aggregate(&self, collection: &str, pipeline: &[Document]) -> StoreResult<Vec<Document>> {
        let documents = self.documents(collection)?;
        let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        run_pipeline(&collections, documents, pipeline)
    }
}

impl DocumentStore for InMemoryStore {
    fn database(&self) -> &str {
        &self.database
    }

    fn list_collections(&self) -> StoreFuture<'_, Vec<String>> {
        let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        let names: Vec<String> = collections.keys().cloned().collect();
        Box::pin(ready(Ok(names)))
    }

    fn sample<'a>(&'a self, collection: &'a str, size: usize) -> StoreFuture<'a, Vec<Document>> {
        let result = self
            .documents(collection)
            .map(|documents| documents.into_iter().take(size).collect());
        Box::pin(ready(result))
    }

    fn estimated_count<'a>(&'a self, collection: &'a str) -> StoreFuture<'a, u64> {
        let result = self.documents(collection).map(|documents| documents.len() as u64);
        Box::pin(ready(result))
    }

    fn find<'a>(&'a self, collection: &'a str, request: FindRequest) -> StoreFuture<'a, Vec<Document>> {
        Box::pin(ready(self.run_find(collection, request)))
    }

    fn aggregate<'a>(
        &'a self,
        collection: &'a str,
        pipeline: Vec<Document>,
    ) -> StoreFuture<'a, Vec<Document>> {
        Box::pin(ready(self.run_aggregate(collection, &pipeline)))
    }
}
