use std::time::Duration;

use crate::cache::{
    CachedResult, lookup_cache_key, query_cache_key, tag_for_key, tag_for_kind,
};
use crate::client::LookupOptions;
use crate::core::{AttributeMap, Result, StoreError, Value};
use crate::cursor::PageCursor;
use crate::facade::Connection;
use crate::iterate::LazyRows;
use crate::key::{Identifier, IdentifierType, Key, KeyBuilder};
use crate::mutation::WriteOptions;
use crate::query::spec::normalize_columns;
use crate::query::{
    Direction, Distinct, Filter, ID_COLUMN, KEY_PSEUDO_COLUMN, Operator, Order, PageResult,
    QuerySpec, Row, process_row,
};

/// Caching behaviour of one builder.
#[derive(Debug, Clone, PartialEq, Default)]
enum CacheMode {
    /// Key lookups cache with the connection's default lifetime;
    /// queries are not cached.
    #[default]
    Default,
    Forever,
    Ttl(Duration),
    Off,
}

/// Fluent query and write builder over one kind.
///
/// Reads flow through the translator and result processor; writes flow
/// through the batch mutator and invalidate (then refresh) the cache.
#[derive(Clone)]
pub struct QueryBuilder {
    connection: Connection,
    spec: QuerySpec,
    exclude_key: Option<Key>,
    cache_mode: CacheMode,
    cache_tags: Vec<String>,
    write_options: WriteOptions,
    identifier_type: IdentifierType,
    last_cursor: Option<String>,
}

impl QueryBuilder {
    pub(crate) fn new(connection: Connection, spec: QuerySpec) -> Self {
        Self {
            connection,
            spec,
            exclude_key: None,
            cache_mode: CacheMode::Default,
            cache_tags: Vec::new(),
            write_options: WriteOptions::default(),
            identifier_type: IdentifierType::Auto,
            last_cursor: None,
        }
    }

    // -- query shaping ---------------------------------------------------

    pub fn filter(mut self, column: &str, operator: Operator, value: impl Into<Value>) -> Self {
        self.spec.filters.push(Filter {
            column: column.to_string(),
            operator,
            value: value.into(),
        });
        self
    }

    pub fn filter_key(self, key: Key) -> Self {
        self.filter(KEY_PSEUDO_COLUMN, Operator::Equal, Value::KeyRef(key))
    }

    pub fn order_by(mut self, column: &str) -> Self {
        self.spec.orders.push(Order {
            column: column.to_string(),
            direction: Direction::Ascending,
        });
        self
    }

    pub fn order_by_desc(mut self, column: &str) -> Self {
        self.spec.orders.push(Order {
            column: column.to_string(),
            direction: Direction::Descending,
        });
        self
    }

    pub fn select(mut self, columns: &[&str]) -> Self {
        self.spec.columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn keys_only(mut self) -> Self {
        self.spec.keys_only = true;
        self
    }

    /// De-duplicate on the projected columns.
    pub fn distinct(mut self) -> Self {
        self.spec.distinct = Distinct::OnProjection;
        self
    }

    pub fn distinct_on(mut self, columns: &[&str]) -> Self {
        self.spec.distinct = Distinct::On(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    /// Restrict results to descendants of `ancestor` (the ancestor
    /// itself is excluded).
    pub fn ancestor(mut self, ancestor: Key) -> Self {
        self.exclude_key = Some(ancestor.clone());
        self.spec.ancestor = Some(ancestor);
        self
    }

    pub fn namespace(mut self, namespace: &str) -> Self {
        self.spec.namespace = Some(namespace.to_string());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.spec.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.spec.offset = offset;
        self
    }

    /// Continue from a raw store cursor.
    pub fn start(mut self, cursor: &str) -> Self {
        self.spec.start_cursor = Some(cursor.to_string());
        self
    }

    /// Continue from a decoded client page cursor.
    pub fn start_page(mut self, cursor: &PageCursor) -> Self {
        self.spec.start_cursor = cursor.start_cursor().map(str::to_string);
        self
    }

    pub fn identifier_type(mut self, identifier_type: IdentifierType) -> Self {
        self.identifier_type = identifier_type;
        self
    }

    pub fn exclude_from_indexes(mut self, properties: &[&str]) -> Self {
        self.write_options.excluded_from_indexes =
            properties.iter().map(|p| p.to_string()).collect();
        self
    }

    // -- caching ---------------------------------------------------------

    pub fn cache_for(mut self, ttl: Duration) -> Self {
        self.cache_mode = CacheMode::Ttl(ttl);
        self
    }

    pub fn cache_forever(mut self) -> Self {
        self.cache_mode = CacheMode::Forever;
        self
    }

    pub fn dont_cache(mut self) -> Self {
        self.cache_mode = CacheMode::Off;
        self
    }

    pub fn cache_tags(mut self, tags: &[&str]) -> Self {
        self.cache_tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    // -- reads -----------------------------------------------------------

    /// Run the query and return one page of rows.
    pub fn get(&mut self) -> Result<PageResult> {
        let spec = self.spec.clone();
        self.run_query("get", spec)
    }

    /// First matching row, if any.
    pub fn first(&mut self) -> Result<Option<Row>> {
        let mut spec = self.spec.clone();
        spec.limit = Some(1);
        Ok(self.run_query("first", spec)?.rows.into_iter().next())
    }

    /// Fetch one entity by its identifier within this builder's kind,
    /// namespace and ancestor scope.
    pub fn find(&mut self, identifier: impl Into<Identifier>) -> Result<Option<Row>> {
        let key = self.build_key(Some(identifier.into()))?;
        self.find_by_key(&key)
    }

    /// Like [`find`](Self::find) but failing when nothing matches.
    pub fn find_or_fail(&mut self, identifier: impl Into<Identifier>) -> Result<Row> {
        let key = self.build_key(Some(identifier.into()))?;
        self.find_by_key(&key)?
            .ok_or_else(|| StoreError::NotFound(key.canonical()))
    }

    /// Strongly-consistent lookup of one key, cached by default when
    /// the connection carries a cache.
    pub fn find_by_key(&mut self, key: &Key) -> Result<Option<Row>> {
        let cache_plan = match &self.cache_mode {
            CacheMode::Off => None,
            CacheMode::Default => Some(self.connection.config().default_cache_ttl()),
            CacheMode::Forever => Some(None),
            CacheMode::Ttl(ttl) => Some(Some(*ttl)),
        };
        let options = self.lookup_options();
        let cache_key = lookup_cache_key(
            self.connection.config().name(),
            key,
            options.property_mask.as_deref(),
        );
        if let (Some(_), Some(cache)) = (&cache_plan, self.connection.cache()) {
            if let Some(CachedResult::Row(row)) = cache.get(&cache_key) {
                return Ok(row);
            }
        }
        let raw = self.connection.mutator().lookup(key, &options)?;
        let row = raw.and_then(|raw| process_row(raw, None));
        if let (Some(ttl), Some(cache)) = (cache_plan, self.connection.cache()) {
            cache.put(
                &cache_key,
                CachedResult::Row(row.clone()),
                ttl,
                &self.tags_for_keys(std::slice::from_ref(key)),
            );
        }
        Ok(row)
    }

    /// Batch lookup by identifiers. Keys that match nothing are absent
    /// from the result; never cached.
    pub fn find_many(&self, identifiers: Vec<Identifier>) -> Result<Vec<Row>> {
        let keys = identifiers
            .into_iter()
            .map(|identifier| self.build_key(Some(identifier)))
            .collect::<Result<Vec<_>>>()?;
        self.lookup_batch(&keys)
    }

    pub fn lookup_batch(&self, keys: &[Key]) -> Result<Vec<Row>> {
        let raw_rows = self
            .connection
            .mutator()
            .lookup_batch(keys, &self.lookup_options())?;
        Ok(raw_rows
            .into_iter()
            .filter_map(|raw| process_row(raw, None))
            .collect())
    }

    /// Values of one column across the result set, skipping rows that
    /// lack it.
    pub fn pluck(&mut self, column: &str) -> Result<Vec<Value>> {
        let mut spec = self.spec.clone();
        if column != ID_COLUMN {
            spec.columns = vec![column.to_string()];
        }
        let page = self.run_query("pluck", spec)?;
        Ok(page
            .rows
            .iter()
            .filter_map(|row| row.get(column).cloned())
            .collect())
    }

    /// Matching keys without fetching any properties.
    pub fn get_keys(&mut self) -> Result<Vec<Key>> {
        let mut spec = self.spec.clone();
        spec.keys_only = true;
        spec.columns = Vec::new();
        spec.distinct = Distinct::Off;
        let page = self.run_query("keys", spec)?;
        Ok(page.rows.into_iter().map(|row| row.key).collect())
    }

    pub fn count(&self) -> Result<usize> {
        self.connection
            .translator()
            .count(&self.spec, self.exclude_key.as_ref())
    }

    pub fn exists(&self) -> Result<bool> {
        self.connection
            .translator()
            .exists(&self.spec, self.exclude_key.as_ref())
    }

    /// Client-visible cursor for the page after the one the last read
    /// returned, if the result set was not exhausted.
    pub fn last_page_cursor(&self) -> Option<PageCursor> {
        self.last_cursor.as_deref().map(PageCursor::for_next_page)
    }

    // -- iteration -------------------------------------------------------

    /// Process the result set in pages of `page_size`, invoking the
    /// callback once per non-empty page. Returning `false` from the
    /// callback stops early; the return value reports whether the whole
    /// set was consumed.
    pub fn chunk<F>(&self, page_size: usize, callback: F) -> Result<bool>
    where
        F: FnMut(Vec<Row>, usize) -> bool,
    {
        crate::iterate::chunk_pages(self, page_size, callback)
    }

    /// Lazily iterate the result set row by row, fetching `chunk_size`
    /// rows per round trip.
    pub fn lazy(&self, chunk_size: usize) -> LazyRows {
        LazyRows::new(self.clone(), chunk_size)
    }

    pub fn chunk_by_id<F>(&self, _page_size: usize, _callback: F) -> Result<bool>
    where
        F: FnMut(Vec<Row>, usize) -> bool,
    {
        Err(StoreError::NotImplemented("chunk_by_id".into()))
    }

    pub fn lazy_by_id(&self, _chunk_size: usize) -> Result<LazyRows> {
        Err(StoreError::NotImplemented("lazy_by_id".into()))
    }

    // -- writes ----------------------------------------------------------

    /// Insert new entities, returning their (possibly store-assigned)
    /// keys in submission order.
    pub fn insert(&self, records: Vec<AttributeMap>) -> Result<Vec<Key>> {
        let builder = self.write_key_builder();
        let keys = self
            .connection
            .mutator()
            .insert(&builder, records.clone(), &self.write_options)?;
        self.flush_and_recache(&keys, Some(&records))?;
        Ok(keys)
    }

    /// Insert one entity with a store-assigned identifier and return
    /// its completed key.
    pub fn insert_get_key(&self, record: AttributeMap) -> Result<Key> {
        let builder = self.write_key_builder();
        let key = self
            .connection
            .mutator()
            .insert_get_key(&builder, record.clone(), &self.write_options)?;
        self.flush_and_recache(
            std::slice::from_ref(&key),
            Some(std::slice::from_ref(&record)),
        )?;
        Ok(key)
    }

    /// Write entities unconditionally, one record per key.
    pub fn upsert(&self, records: Vec<AttributeMap>, keys: Vec<Key>) -> Result<Vec<Key>> {
        let keys = self
            .connection
            .mutator()
            .upsert(records.clone(), keys, &self.write_options)?;
        self.flush_and_recache(&keys, Some(&records))?;
        Ok(keys)
    }

    /// Replace existing entities, one record per key. Last write wins.
    pub fn update(&self, records: Vec<AttributeMap>, keys: Vec<Key>) -> Result<Vec<Key>> {
        let keys = self
            .connection
            .mutator()
            .update(records.clone(), keys, &self.write_options)?;
        self.flush_and_recache(&keys, Some(&records))?;
        Ok(keys)
    }

    /// Delete entities by key; absent keys are ignored.
    pub fn delete(&self, keys: &[Key]) -> Result<()> {
        self.connection.mutator().delete(keys)?;
        self.flush_and_recache(keys, None)
    }

    /// Delete one entity by identifier.
    pub fn delete_by_id(&self, identifier: impl Into<Identifier>) -> Result<()> {
        let key = self.build_key(Some(identifier.into()))?;
        self.delete(std::slice::from_ref(&key))
    }

    // -- internals -------------------------------------------------------

    /// One iteration page: `limit = page_size`, resuming from the
    /// given continuation cursor. The builder's own offset applies only
    /// to the first page; a cursor already encodes the position.
    pub(crate) fn fetch_chunk(
        &self,
        page_size: usize,
        cursor: Option<&str>,
    ) -> Result<PageResult> {
        let mut spec = self.spec.clone();
        spec.limit = Some(page_size);
        if let Some(cursor) = cursor {
            spec.start_cursor = Some(cursor.to_string());
            spec.offset = 0;
        }
        self.connection
            .translator()
            .execute_excluding(&spec, self.exclude_key.as_ref())
    }

    fn build_key(&self, identifier: Option<Identifier>) -> Result<Key> {
        self.write_key_builder().build(identifier)
    }

    fn write_key_builder(&self) -> KeyBuilder {
        KeyBuilder::new(&self.spec.kind)
            .namespace(self.spec.namespace.clone())
            .ancestor(self.spec.ancestor.clone())
            .identifier_type(self.identifier_type)
    }

    fn lookup_options(&self) -> LookupOptions {
        if self.spec.keys_only {
            return LookupOptions {
                property_mask: Some(vec![KEY_PSEUDO_COLUMN.to_string()]),
            };
        }
        let mask = normalize_columns(&self.spec.columns);
        LookupOptions {
            property_mask: (!mask.is_empty()).then_some(mask),
        }
    }

    fn run_query(&mut self, method: &str, spec: QuerySpec) -> Result<PageResult> {
        // Queries cache only on an explicit opt-in; key lookups are the
        // default-cached path.
        let ttl = match &self.cache_mode {
            CacheMode::Ttl(ttl) => Some(Some(*ttl)),
            CacheMode::Forever => Some(None),
            CacheMode::Default | CacheMode::Off => None,
        };
        let cache_key = match (&ttl, self.connection.cache()) {
            (Some(_), Some(cache)) => {
                let cache_key = query_cache_key(self.connection.config().name(), method, &spec)?;
                if let Some(CachedResult::Page(page)) = cache.get(&cache_key) {
                    self.last_cursor = page.end_cursor.clone();
                    return Ok(page);
                }
                Some(cache_key)
            }
            _ => None,
        };
        let page = self
            .connection
            .translator()
            .execute_excluding(&spec, self.exclude_key.as_ref())?;
        self.last_cursor = page.end_cursor.clone();
        if let (Some(ttl), Some(cache_key), Some(cache)) =
            (ttl, cache_key, self.connection.cache())
        {
            let row_keys: Vec<Key> = page.rows.iter().map(|row| row.key.clone()).collect();
            cache.put(
                &cache_key,
                CachedResult::Page(page.clone()),
                ttl,
                &self.tags_for_keys(&row_keys),
            );
        }
        Ok(page)
    }

    fn tags_for_keys(&self, keys: &[Key]) -> Vec<String> {
        let connection = self.connection.config().name();
        let mut tags = Vec::with_capacity(keys.len() + 1 + self.cache_tags.len());
        tags.push(tag_for_kind(connection, &self.spec.kind));
        for key in keys {
            tags.push(tag_for_key(connection, key));
        }
        tags.extend(self.cache_tags.iter().cloned());
        tags
    }

    /// Drop every cached result a write may have staled, then refresh
    /// the single-entity entries for the written records so the next
    /// lookup is served without a round trip.
    fn flush_and_recache(&self, keys: &[Key], records: Option<&[AttributeMap]>) -> Result<()> {
        let Some(cache) = self.connection.cache() else {
            return Ok(());
        };
        cache.forget_by_tags(&self.tags_for_keys(keys));
        if self.cache_mode == CacheMode::Off {
            return Ok(());
        }
        if let Some(records) = records {
            let ttl = match &self.cache_mode {
                CacheMode::Default => self.connection.config().default_cache_ttl(),
                CacheMode::Forever => None,
                CacheMode::Ttl(ttl) => Some(*ttl),
                CacheMode::Off => return Ok(()),
            };
            let connection = self.connection.config().name();
            // Only the unprojected entry is refreshed; any masked
            // entries for these keys were dropped by the tag flush.
            for (key, record) in keys.iter().zip(records) {
                let row = written_row(key, record);
                cache.put(
                    &lookup_cache_key(connection, key, None),
                    CachedResult::Row(Some(row)),
                    ttl,
                    &self.tags_for_keys(std::slice::from_ref(key)),
                );
            }
        }
        Ok(())
    }
}

/// Reconstruct the row a lookup of `key` would return after the write.
fn written_row(key: &Key, record: &AttributeMap) -> Row {
    let mut attributes = record.clone();
    attributes.remove(ID_COLUMN);
    attributes.remove(KEY_PSEUDO_COLUMN);
    if let Some(identifier) = key.identifier() {
        attributes.insert(
            ID_COLUMN.to_string(),
            Value::Text(identifier.to_canonical_string()),
        );
    }
    Row {
        parent: key.parent(),
        key: key.clone(),
        attributes,
    }
}
