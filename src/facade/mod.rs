//! Caller-facing entry point: a [`Connection`] hands out fluent
//! [`QueryBuilder`]s and [`KeyBuilder`](crate::key::KeyBuilder)s wired
//! to one transport, one retry policy and (optionally) one cache.

pub mod builder;
pub mod config;

pub use builder::QueryBuilder;
pub use config::ConnectionConfig;

use std::sync::Arc;

use crate::cache::CacheBackend;
use crate::client::StoreTransport;
use crate::key::KeyBuilder;
use crate::mutation::BatchMutator;
use crate::query::{QuerySpec, QueryTranslator};

/// A handle over one store connection. Cheap to clone; clones share the
/// transport and cache.
#[derive(Clone)]
pub struct Connection {
    transport: Arc<dyn StoreTransport>,
    cache: Option<Arc<dyn CacheBackend>>,
    config: Arc<ConnectionConfig>,
}

impl Connection {
    pub fn new(transport: Arc<dyn StoreTransport>, config: ConnectionConfig) -> Self {
        Self {
            transport,
            cache: None,
            config: Arc::new(config),
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheBackend>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Start a query over one kind.
    pub fn kind(&self, kind: &str) -> QueryBuilder {
        let mut spec = QuerySpec::new(kind);
        spec.namespace = self.config.default_namespace().map(str::to_string);
        QueryBuilder::new(self.clone(), spec)
    }

    /// Start building a key of one kind, scoped to the connection's
    /// default namespace.
    pub fn key(&self, kind: &str) -> KeyBuilder {
        KeyBuilder::new(kind).namespace(self.config.default_namespace().map(str::to_string))
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub(crate) fn cache(&self) -> Option<&Arc<dyn CacheBackend>> {
        self.cache.as_ref()
    }

    pub(crate) fn translator(&self) -> QueryTranslator {
        QueryTranslator::new(self.transport.clone(), self.config.backoff())
    }

    pub(crate) fn mutator(&self) -> BatchMutator {
        BatchMutator::new(self.transport.clone(), self.config.backoff())
    }
}
