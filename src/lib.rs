//! # hierstore
//!
//! A translation layer between an object-relational query surface and a
//! hierarchical-key document store. Callers describe reads and writes
//! with a fluent builder; the crate translates them into the store's
//! native lookups, queries and batched mutations, processes results
//! into rows with key metadata, paginates with opaque cursors, retries
//! transient failures, and optionally caches results with tag-based
//! invalidation.
//!
//! ```
//! use std::sync::Arc;
//! use hierstore::{Connection, ConnectionConfig, MemoryStore, Operator, Value};
//!
//! # fn main() -> hierstore::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! let conn = Connection::new(store, ConnectionConfig::new("default"));
//!
//! let mut alice = hierstore::AttributeMap::new();
//! alice.insert("id".into(), Value::Text("alice".into()));
//! alice.insert("age".into(), Value::Integer(34));
//! conn.kind("Person").insert(vec![alice])?;
//!
//! let page = conn
//!     .kind("Person")
//!     .filter("age", Operator::GreaterThan, 21)
//!     .get()?;
//! assert_eq!(page.len(), 1);
//! assert_eq!(page.rows[0].id(), Some("alice"));
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod client;
pub mod core;
pub mod cursor;
pub mod facade;
pub mod iterate;
pub mod key;
pub mod mutation;
pub mod query;

pub use cache::{CacheBackend, CachedResult, MemoryCache};
pub use client::{ExponentialBackoff, MemoryStore, StoreTransport};
pub use crate::core::{AttributeMap, Result, StoreError, Value};
pub use cursor::PageCursor;
pub use facade::{Connection, ConnectionConfig, QueryBuilder};
pub use iterate::LazyRows;
pub use key::{Identifier, IdentifierType, Key, KeyBuilder, PathElement};
pub use mutation::{BatchMutator, WriteOptions};
pub use query::{
    Direction, Distinct, Filter, Operator, Order, PageResult, QuerySpec, QueryTranslator, Row,
};
