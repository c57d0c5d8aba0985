//! The seam between this crate and the remote store: the wire-level
//! request/response types and the [`StoreTransport`] trait the rest of
//! the crate is written against. The real RPC client lives outside this
//! crate; [`MemoryStore`] is the in-process implementation the tests
//! drive.

pub mod memory;
pub mod retry;

pub use memory::MemoryStore;
pub use retry::ExponentialBackoff;

use crate::core::{AttributeMap, Result};
use crate::key::Key;
use crate::query::{Direction, Operator};

/// One entity as submitted on a write, including the caller-declared
/// list of properties the store should not index.
#[derive(Debug, Clone, PartialEq)]
pub struct WireEntity {
    pub key: Key,
    pub properties: AttributeMap,
    pub excluded_from_indexes: Vec<String>,
}

/// One mutation inside a commit call. Mutation order is preserved by
/// the transport so commit results correlate back by index.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Insert(WireEntity),
    Upsert(WireEntity),
    Update(WireEntity),
    Delete(Key),
}

/// Per-mutation commit result. `key` is the completed key for
/// mutations that allocated an identifier, `None` otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationOutcome {
    pub key: Option<Key>,
}

/// One raw result row: the stored properties, the entity key and the
/// store's opaque continuation position immediately after this row.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub key: Key,
    pub properties: AttributeMap,
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LookupOptions {
    /// Restrict the fetched properties; a mask of only
    /// [`KEY_PSEUDO_COLUMN`](crate::query::KEY_PSEUDO_COLUMN) fetches
    /// the key alone.
    pub property_mask: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NativeFilter {
    pub property: String,
    pub operator: Operator,
    pub value: crate::core::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NativeOrder {
    pub property: String,
    pub direction: Direction,
}

/// A fully-translated query in the store's native shape. Produced by
/// the query translator; consumed verbatim by the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeQuery {
    pub kind: String,
    pub namespace: Option<String>,
    pub ancestor: Option<Key>,
    pub projection: Vec<String>,
    pub keys_only: bool,
    pub distinct_on: Vec<String>,
    pub filters: Vec<NativeFilter>,
    pub orders: Vec<NativeOrder>,
    pub limit: Option<usize>,
    pub offset: usize,
    pub start_cursor: Option<String>,
}

/// The remote store's primitive surface: strongly-consistent lookups by
/// key, eventually-consistent queries, and batched commits. Every call
/// is one blocking round trip.
pub trait StoreTransport: Send + Sync {
    fn lookup(&self, key: &Key, options: &LookupOptions) -> Result<Option<RawRow>>;

    /// Batch lookup. Keys that match nothing are simply absent from the
    /// result, in no guaranteed order.
    fn lookup_batch(&self, keys: &[Key], options: &LookupOptions) -> Result<Vec<RawRow>>;

    /// Run a translated query, returning rows in store order with a
    /// continuation cursor attached to each.
    fn run_query(&self, query: &NativeQuery) -> Result<Vec<RawRow>>;

    /// Apply a batch of mutations atomically. The first failing
    /// mutation aborts the whole call. Results are index-aligned with
    /// the submitted mutations.
    fn commit(&self, mutations: &[Mutation]) -> Result<Vec<MutationOutcome>>;
}
