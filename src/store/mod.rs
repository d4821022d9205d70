//! Document store seam
//!
//! `DocumentStore` is the live connection the guard samples schemas from and
//! executes validated plans against. Calls are the pipeline's only
//! suspension points; no caller holds a lock across them.
//!
//! `InMemoryStore` evaluates filters, projections, sorts and aggregation
//! pipelines over BSON documents in process. It is built with the
//! `memory-store` feature (on by default) and always under test.

#[cfg(any(test, feature = "memory-store"))]
mod aggregate;
#[cfg(any(test, feature = "memory-store"))]
mod compare;
pub mod convert;
#[cfg(any(test, feature = "memory-store"))]
mod expr;
#[cfg(any(test, feature = "memory-store"))]
mod filter;
#[cfg(any(test, feature = "memory-store"))]
mod memory;
#[cfg(any(test, feature = "memory-store"))]
mod project;

#[cfg(any(test, feature = "memory-store"))]
pub use memory::InMemoryStore;

use std::future::Future;
use std::pin::Pin;

use bson::Document;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("collection '{0}' is unavailable")]
    Unavailable(String),

    #[error("unsupported by this store: {0}")]
    Unsupported(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("backend error: {0}")]
    Backend(String),
}

#[cfg(any(test, feature = "memory-store"))]
impl StoreError {
    pub(crate) fn query(message: impl Into<String>) -> Self {
        StoreError::Query(message.into())
    }

    pub(crate) fn unsupported(what: impl Into<String>) -> Self {
        StoreError::Unsupported(what.into())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Boxed future returned by store calls
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = StoreResult<T>> + Send + 'a>>;

/// A find request with native (coerced) values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindRequest {
    pub filter: Document,
    pub projection: Option<Document>,
    pub sort: Option<Document>,
    pub limit: Option<i64>,
}

/// Read-only access to one database
pub trait DocumentStore: Send + Sync {
    /// Name of the bound database
    fn database(&self) -> &str;

    fn list_collections(&self) -> StoreFuture<'_, Vec<String>>;

    /// Up to `size` documents of `collection`, in natural order
    fn sample<'a>(&'a self, collection: &'a str, size: usize) -> StoreFuture<'a, Vec<Document>>;

    /// Approximate document count
    fn estimated_count<'a>(&'a self, collection: &'a str) -> StoreFuture<'a, u64>;

    fn find<'a>(&'a self, collection: &'a str, request: FindRequest) -> StoreFuture<'a, Vec<Document>>;

    fn aggregate<'a>(
        &'a self,
        collection: &'a str,
        pipeline: Vec<Document>,
    ) -> StoreFuture<'a, Vec<Document>>;
}
