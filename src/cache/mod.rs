//! Read-through result cache with tag-based invalidation.
//!
//! Cache keys are derived from the canonical serialization of the full
//! request (connection, kind, namespace, every query parameter, and for
//! key lookups the whole key path plus the effective property mask), so
//! two requests share an entry only
//! when the store would answer them identically. Writes invalidate by
//! tag: every entry is tagged with its connection-scoped kind and with
//! the canonical form of each key it contains.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;

use crate::core::Result;
use crate::key::Key;
use crate::query::{PageResult, QuerySpec, Row};

/// What a cache entry holds: a single-entity lookup result (including
/// the negative case) or a whole query page.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedResult {
    Row(Option<Row>),
    Page(PageResult),
}

/// Storage interface the facade caches through. A `ttl` of `None` or a
/// zero duration means the entry never expires on its own; it lives
/// until invalidated or evicted.
pub trait CacheBackend: Send + Sync {
    fn get(&self, key: &str) -> Option<CachedResult>;
    fn put(&self, key: &str, value: CachedResult, ttl: Option<Duration>, tags: &[String]);
    fn forget(&self, key: &str);
    fn forget_by_tags(&self, tags: &[String]);
}

struct Entry {
    value: CachedResult,
    expires_at: Option<Instant>,
    tags: Vec<String>,
}

struct CacheState {
    entries: LruCache<String, Entry>,
    // tag -> cache keys carrying it
    tag_index: HashMap<String, HashSet<String>>,
}

impl CacheState {
    fn detach_tags(&mut self, key: &str, tags: &[String]) {
        for tag in tags {
            if let Some(members) = self.tag_index.get_mut(tag) {
                members.remove(key);
                if members.is_empty() {
                    self.tag_index.remove(tag);
                }
            }
        }
    }
}

/// In-process LRU implementation of [`CacheBackend`].
pub struct MemoryCache {
    state: Mutex<CacheState>,
}

impl MemoryCache {
    pub const DEFAULT_CAPACITY: usize = 1024;

    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            state: Mutex::new(CacheState {
                entries: LruCache::new(capacity),
                tag_index: HashMap::new(),
            }),
        }
    }

    /// Number of live entries, for assertions in tests.
    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl CacheBackend for MemoryCache {
    fn get(&self, key: &str) -> Option<CachedResult> {
        let mut state = self.state.lock().ok()?;
        let expired = match state.entries.get(key) {
            None => return None,
            Some(entry) => entry
                .expires_at
                .is_some_and(|deadline| Instant::now() >= deadline),
        };
        if expired {
            if let Some(entry) = state.entries.pop(key) {
                let key = key.to_string();
                state.detach_tags(&key, &entry.tags);
            }
            return None;
        }
        state.entries.get(key).map(|entry| entry.value.clone())
    }

    fn put(&self, key: &str, value: CachedResult, ttl: Option<Duration>, tags: &[String]) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        let entry = Entry {
            value,
            expires_at: ttl
                .filter(|ttl| !ttl.is_zero())
                .map(|ttl| Instant::now() + ttl),
            tags: tags.to_vec(),
        };
        for tag in tags {
            state
                .tag_index
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
        // push reports the displaced entry (replacement or LRU
        // eviction) so its tags can be detached.
        if let Some((old_key, old_entry)) = state.entries.push(key.to_string(), entry) {
            if old_key != key {
                state.detach_tags(&old_key, &old_entry.tags);
            }
        }
    }

    fn forget(&self, key: &str) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if let Some(entry) = state.entries.pop(key) {
            state.detach_tags(key, &entry.tags);
        }
    }

    fn forget_by_tags(&self, tags: &[String]) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        let mut doomed = HashSet::new();
        for tag in tags {
            if let Some(members) = state.tag_index.remove(tag) {
                doomed.extend(members);
            }
        }
        for key in doomed {
            if let Some(entry) = state.entries.pop(&key) {
                state.detach_tags(&key, &entry.tags);
            }
        }
    }
}

/// Cache key for a query-shaped request. Every parameter that changes
/// the result participates, so `limit(5)` and `limit(10)` never share
/// an entry.
pub fn query_cache_key(connection: &str, method: &str, spec: &QuerySpec) -> Result<String> {
    let params = serde_json::to_string(spec)?;
    Ok(format!("{connection}:{method}::{params}"))
}

/// Cache key for a single-key lookup. Uses the key's canonical form, so
/// a numeric identifier and its string spelling resolve to the same
/// entry, while different namespaces or ancestor paths never collide.
/// The effective property mask participates too: a projected lookup
/// must never be served the full entity, nor the other way round.
pub fn lookup_cache_key(connection: &str, key: &Key, mask: Option<&[String]>) -> String {
    match mask {
        Some(columns) => format!("{connection}:find:{}::{}", key.canonical(), columns.join(",")),
        None => format!("{connection}:find:{}", key.canonical()),
    }
}

/// Invalidation tag covering every cached result of a kind.
pub fn tag_for_kind(connection: &str, kind: &str) -> String {
    format!("{connection}:{kind}")
}

/// Invalidation tag covering every cached result containing this key.
pub fn tag_for_key(connection: &str, key: &Key) -> String {
    format!("{connection}:{}", key.canonical())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Operator;

    fn page(marker: &str) -> CachedResult {
        CachedResult::Page(PageResult {
            rows: Vec::new(),
            end_cursor: Some(marker.to_string()),
        })
    }

    #[test]
    fn put_get_round_trip() {
        let cache = MemoryCache::new(4);
        cache.put("k", page("a"), None, &[]);
        assert_eq!(cache.get("k"), Some(page("a")));
        assert_eq!(cache.get("missing"), None);
    }

    #[test]
    fn ttl_expires_entries() {
        let cache = MemoryCache::new(4);
        cache.put("k", page("a"), Some(Duration::from_millis(1)), &[]);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn zero_ttl_means_forever() {
        let cache = MemoryCache::new(4);
        cache.put("k", page("a"), Some(Duration::ZERO), &[]);
        assert_eq!(cache.get("k"), Some(page("a")));
    }

    #[test]
    fn forget_by_tags_removes_all_tagged_entries() {
        let cache = MemoryCache::new(8);
        cache.put("a", page("a"), None, &["t:Person".into()]);
        cache.put("b", page("b"), None, &["t:Person".into(), "t:extra".into()]);
        cache.put("c", page("c"), None, &["t:Basket".into()]);
        cache.forget_by_tags(&["t:Person".into()]);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("c"), Some(page("c")));
    }

    #[test]
    fn eviction_detaches_tags() {
        let cache = MemoryCache::new(1);
        cache.put("a", page("a"), None, &["t".into()]);
        cache.put("b", page("b"), None, &["t".into()]);
        // "a" was evicted by capacity; flushing the tag must still
        // remove "b" and not panic over the stale member.
        cache.forget_by_tags(&["t".into()]);
        assert_eq!(cache.get("b"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn query_keys_differ_when_any_parameter_differs() {
        let base = QuerySpec::new("Person");
        let mut limited = base.clone();
        limited.limit = Some(5);
        let mut filtered = base.clone();
        filtered.filters.push(crate::query::Filter {
            column: "age".into(),
            operator: Operator::GreaterThan,
            value: 21.into(),
        });
        let a = query_cache_key("default", "get", &base).unwrap();
        let b = query_cache_key("default", "get", &limited).unwrap();
        let c = query_cache_key("default", "get", &filtered).unwrap();
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
        assert_ne!(a, query_cache_key("default", "first", &base).unwrap());
        assert_ne!(a, query_cache_key("replica", "get", &base).unwrap());
    }

    #[test]
    fn lookup_keys_normalize_identifier_spelling() {
        let numeric = Key::with_id("Person", 123);
        let text = Key::with_name("Person", "123");
        assert_eq!(
            lookup_cache_key("default", &numeric, None),
            lookup_cache_key("default", &text, None)
        );
        let spaced = Key::with_id("Person", 123).in_namespace("tenant-a");
        assert_ne!(
            lookup_cache_key("default", &numeric, None),
            lookup_cache_key("default", &spaced, None)
        );
    }

    #[test]
    fn lookup_keys_separate_masked_and_full_entries() {
        let key = Key::with_name("Person", "alice");
        let age = vec!["age".to_string()];
        let city = vec!["city".to_string()];
        let full = lookup_cache_key("default", &key, None);
        assert_ne!(full, lookup_cache_key("default", &key, Some(&age)));
        assert_ne!(
            lookup_cache_key("default", &key, Some(&age)),
            lookup_cache_key("default", &key, Some(&city))
        );
    }
}
