//! Per-database schema cache
//!
//! Reads take a shared lock; invalidation and rebinding take the exclusive
//! lock. Sampling happens outside the lock. A generation counter keeps a
//! sample started before an invalidation from landing after it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::config::GuardConfig;
use crate::observability::{Event, Logger};
use crate::store::{DocumentStore, StoreResult};

use super::inference::infer_schema;
use super::types::SchemaDescriptor;

struct CacheState {
    database: String,
    generation: u64,
    catalog: Option<Arc<Vec<String>>>,
    schemas: HashMap<String, Arc<SchemaDescriptor>>,
}

pub struct SchemaCache {
    state: RwLock<CacheState>,
    sample_size: usize,
    sample_value_max_len: usize,
}

impl SchemaCache {
    pub fn new(database: impl Into<String>, config: &GuardConfig) -> Self {
        Self {
            state: RwLock::new(CacheState {
                database: database.into(),
                generation: 0,
                catalog: None,
                schemas: HashMap::new(),
            }),
            sample_size: config.sample_size,
            sample_value_max_len: config.sample_value_max_len,
        }
    }

    /// Database the cache is bound to
    pub async fn database(&self) -> String {
        self.state.read().await.database.clone()
    }

    /// Descriptor for `collection`, sampling it on first access.
    ///
    /// A read failure yields an empty descriptor, which is not cached.
    pub async fn describe(
        &self,
        store: &dyn DocumentStore,
        collection: &str,
    ) -> Arc<SchemaDescriptor> {
        let generation = {
            let state = self.state.read().await;
            if let Some(schema) = state.schemas.get(collection) {
                return Arc::clone(schema);
            }
            state.generation
        };

        match self.sample(store, collection).await {
            Ok(schema) => {
                let schema = Arc::new(schema);
                let mut state = self.state.write().await;
                if state.generation != generation {
                    return schema;
                }
                Arc::clone(
                    state
                        .schemas
                        .entry(collection.to_string())
                        .or_insert(schema),
                )
            }
            Err(err) => {
                let reason = err.to_string();
                Logger::event(
                    Event::SchemaSampleFailed,
                    &[("collection", collection), ("reason", reason.as_str())],
                );
                Arc::new(SchemaDescriptor::empty())
            }
        }
    }

    /// Cached descriptor, without sampling
    pub async fn cached(&self, collection: &str) -> Option<Arc<SchemaDescriptor>> {
        self.state.read().await.schemas.get(collection).cloned()
    }

    /// Sample every listed collection and replace the cache contents wholesale
    pub async fn preload_all(&self, store: &dyn DocumentStore, collections: &[String]) {
        let generation = self.state.read().await.generation;

        let mut schemas = HashMap::with_capacity(collections.len());
        for collection in collections {
            match self.sample(store, collection).await {
                Ok(schema) => {
                    schemas.insert(collection.clone(), Arc::new(schema));
                }
                Err(err) => {
                    let reason = err.to_string();
                    Logger::event(
                        Event::SchemaSampleFailed,
                        &[("collection", collection.as_str()), ("reason", reason.as_str())],
                    );
                }
            }
        }

        let mut state = self.state.write().await;
        if state.generation == generation {
            let loaded = schemas.len().to_string();
            state.schemas = schemas;
            Logger::event(
                Event::SchemaPreloaded,
                &[("collections", loaded.as_str()), ("database", state.database.as_str())],
            );
        }
    }

    /// Drop every cached descriptor and the collection catalogue
    pub async fn invalidate(&self) {
        let mut state = self.state.write().await;
        state.generation += 1;
        state.schemas = HashMap::new();
        state.catalog = None;
        Logger::event(
            Event::SchemaCacheInvalidated,
            &[("database", state.database.as_str())],
        );
    }

    /// Bind to another database, invalidating everything
    pub async fn rebind(&self, database: &str) {
        {
            let mut state = self.state.write().await;
            state.database = database.to_string();
        }
        self.invalidate().await;
    }

    /// Collection names of the bound database, sorted.
    ///
    /// A listing failure yields an empty catalogue, which is not cached.
    pub async fn catalog(&self, store: &dyn DocumentStore) -> Arc<Vec<String>> {
        let generation = {
            let state = self.state.read().await;
            if let Some(catalog) = &state.catalog {
                return Arc::clone(catalog);
            }
            state.generation
        };

        match store.list_collections().await {
            Ok(mut names) => {
                names.sort();
                let catalog = Arc::new(names);
                let mut state = self.state.write().await;
                if state.generation == generation {
                    state.catalog = Some(Arc::clone(&catalog));
                }
                catalog
            }
            Err(err) => {
                let reason = err.to_string();
                Logger::event(
                    Event::SchemaSampleFailed,
                    &[("collection", "*"), ("reason", reason.as_str())],
                );
                Arc::new(Vec::new())
            }
        }
    }

    async fn sample(
        &self,
        store: &dyn DocumentStore,
        collection: &str,
    ) -> StoreResult<SchemaDescriptor> {
        let documents = store.sample(collection, self.sample_size).await?;
        let count = store.estimated_count(collection).await?;
        let schema = infer_schema(&documents, count, self.sample_value_max_len);

        let fields = schema.fields.len().to_string();
        Logger::event(
            Event::SchemaSampled,
            &[("collection", collection), ("fields", fields.as_str())],
        );
        Ok(schema)
    }
}
