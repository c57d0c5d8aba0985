use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::client::{
    LookupOptions, Mutation, MutationOutcome, NativeQuery, RawRow, StoreTransport, WireEntity,
};
use crate::core::{AttributeMap, Result, StoreError, Value};
use crate::key::{Identifier, Key};
use crate::query::KEY_PSEUDO_COLUMN;

/// In-process implementation of [`StoreTransport`].
///
/// Backs the test suite and small demos: full scoping (kind, namespace,
/// ancestor), filter/order/projection/distinct evaluation, positional
/// continuation cursors, and monotonic ID allocation for incomplete
/// keys. One mutex guards all state; a commit stages its mutations and
/// swaps them in only when every mutation validated.
pub struct MemoryStore {
    state: Mutex<State>,
}

struct State {
    entities: BTreeMap<String, StoredEntity>,
    next_id: i64,
}

#[derive(Debug, Clone)]
struct StoredEntity {
    key: Key,
    properties: AttributeMap,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                entities: BTreeMap::new(),
                next_id: 1000,
            }),
        }
    }

    /// Number of stored entities, for assertions in tests.
    pub fn entity_count(&self) -> usize {
        self.state.lock().map(|s| s.entities.len()).unwrap_or(0)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Storage index for a key. Unlike [`Key::canonical`], numeric IDs and
/// names stay distinct here: `#123` and `'123'` are different entities
/// as far as the store is concerned.
fn storage_key(key: &Key) -> String {
    let mut out = String::new();
    if let Some(ns) = key.namespace() {
        out.push_str("ns=");
        out.push_str(ns);
        out.push('|');
    }
    for (index, el) in key.path().iter().enumerate() {
        if index > 0 {
            out.push('/');
        }
        out.push_str(&el.kind);
        match &el.id {
            Some(Identifier::Id(v)) => {
                out.push('#');
                out.push_str(&v.to_string());
            }
            Some(Identifier::Name(s)) => {
                out.push('\'');
                out.push_str(s);
            }
            None => out.push('?'),
        }
    }
    out
}

fn masked_properties(properties: &AttributeMap, mask: &[String]) -> AttributeMap {
    if mask.iter().all(|c| c == KEY_PSEUDO_COLUMN) {
        return AttributeMap::new();
    }
    properties
        .iter()
        .filter(|(name, _)| mask.iter().any(|c| c == *name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

fn lookup_row(entity: &StoredEntity, options: &LookupOptions) -> RawRow {
    let properties = match &options.property_mask {
        Some(mask) => masked_properties(&entity.properties, mask),
        None => entity.properties.clone(),
    };
    RawRow {
        key: entity.key.clone(),
        properties,
        cursor: None,
    }
}

fn matches_filters(entity: &StoredEntity, query: &NativeQuery) -> Result<bool> {
    for filter in &query.filters {
        if filter.property == KEY_PSEUDO_COLUMN {
            let Some(wanted) = filter.value.as_key() else {
                return Err(StoreError::InvalidQuery(
                    "__key__ filter requires a key value".into(),
                ));
            };
            if !filter.operator.matches(std::cmp::Ordering::Equal) {
                return Err(StoreError::InvalidQuery(
                    "only equality filters are supported on __key__".into(),
                ));
            }
            if entity.key != *wanted {
                return Ok(false);
            }
            continue;
        }
        // Rows lacking the filtered property never match, and neither
        // do rows whose value is not comparable to the operand.
        let Some(value) = entity.properties.get(&filter.property) else {
            return Ok(false);
        };
        match value.compare(&filter.value) {
            Ok(ordering) if filter.operator.matches(ordering) => {}
            _ => return Ok(false),
        }
    }
    Ok(true)
}

fn order_entities(entities: &mut [StoredEntity], query: &NativeQuery) {
    if query.orders.is_empty() {
        return;
    }
    entities.sort_by(|a, b| {
        for order in &query.orders {
            let left = a.properties.get(&order.property).unwrap_or(&Value::Null);
            let right = b.properties.get(&order.property).unwrap_or(&Value::Null);
            let ordering = left.compare(right).unwrap_or(std::cmp::Ordering::Equal);
            let ordering = match order.direction {
                crate::query::Direction::Ascending => ordering,
                crate::query::Direction::Descending => ordering.reverse(),
            };
            if ordering != std::cmp::Ordering::Equal {
                return ordering;
            }
        }
        std::cmp::Ordering::Equal
    });
}

fn distinct_entities(entities: Vec<StoredEntity>, columns: &[String]) -> Vec<StoredEntity> {
    if columns.is_empty() {
        return entities;
    }
    let mut seen = std::collections::BTreeSet::new();
    let mut kept = Vec::with_capacity(entities.len());
    for entity in entities {
        let fingerprint = columns
            .iter()
            .map(|c| format!("{:?}", entity.properties.get(c)))
            .collect::<Vec<_>>()
            .join("\u{1}");
        if seen.insert(fingerprint) {
            kept.push(entity);
        }
    }
    kept
}

fn parse_cursor(cursor: &Option<String>) -> Result<usize> {
    match cursor {
        None => Ok(0),
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|_| StoreError::InvalidQuery(format!("malformed start cursor '{raw}'"))),
    }
}

impl StoreTransport for MemoryStore {
    fn lookup(&self, key: &Key, options: &LookupOptions) -> Result<Option<RawRow>> {
        let state = self.state.lock()?;
        Ok(state
            .entities
            .get(&storage_key(key))
            .map(|entity| lookup_row(entity, options)))
    }

    fn lookup_batch(&self, keys: &[Key], options: &LookupOptions) -> Result<Vec<RawRow>> {
        let state = self.state.lock()?;
        Ok(keys
            .iter()
            .filter_map(|key| state.entities.get(&storage_key(key)))
            .map(|entity| lookup_row(entity, options))
            .collect())
    }

    fn run_query(&self, query: &NativeQuery) -> Result<Vec<RawRow>> {
        let state = self.state.lock()?;

        let mut matched = Vec::new();
        for entity in state.entities.values() {
            if entity.key.kind() != query.kind {
                continue;
            }
            if entity.key.namespace() != query.namespace.as_deref() {
                continue;
            }
            if let Some(ancestor) = &query.ancestor {
                if !ancestor.is_ancestor_of(&entity.key) {
                    continue;
                }
            }
            if matches_filters(entity, query)? {
                matched.push(entity.clone());
            }
        }

        order_entities(&mut matched, query);
        let sequence = distinct_entities(matched, &query.distinct_on);

        let start = parse_cursor(&query.start_cursor)?;
        let mut rows = Vec::new();
        for (position, entity) in sequence.into_iter().enumerate() {
            if position < start + query.offset {
                continue;
            }
            if let Some(limit) = query.limit {
                if rows.len() >= limit {
                    break;
                }
            }
            let properties = if query.keys_only {
                AttributeMap::new()
            } else if !query.projection.is_empty() {
                masked_properties(&entity.properties, &query.projection)
            } else {
                entity.properties
            };
            rows.push(RawRow {
                key: entity.key,
                properties,
                cursor: Some((position + 1).to_string()),
            });
        }
        Ok(rows)
    }

    fn commit(&self, mutations: &[Mutation]) -> Result<Vec<MutationOutcome>> {
        let mut state = self.state.lock()?;
        let mut staged = state.entities.clone();
        let mut next_id = state.next_id;
        let mut outcomes = Vec::with_capacity(mutations.len());

        for mutation in mutations {
            match mutation {
                Mutation::Insert(entity) => {
                    let (key, allocated) = allocate(entity, &mut next_id);
                    let token = storage_key(&key);
                    if staged.contains_key(&token) {
                        return Err(StoreError::AlreadyExists(key.canonical()));
                    }
                    staged.insert(
                        token,
                        StoredEntity {
                            key: key.clone(),
                            properties: entity.properties.clone(),
                        },
                    );
                    outcomes.push(MutationOutcome {
                        key: allocated.then_some(key),
                    });
                }
                Mutation::Upsert(entity) => {
                    let (key, allocated) = allocate(entity, &mut next_id);
                    staged.insert(
                        storage_key(&key),
                        StoredEntity {
                            key: key.clone(),
                            properties: entity.properties.clone(),
                        },
                    );
                    outcomes.push(MutationOutcome {
                        key: allocated.then_some(key),
                    });
                }
                Mutation::Update(entity) => {
                    let token = storage_key(&entity.key);
                    if !staged.contains_key(&token) {
                        return Err(StoreError::NotFound(entity.key.canonical()));
                    }
                    // Full replace: partial updates require
                    // fetch-entire-then-resubmit-entire.
                    staged.insert(
                        token,
                        StoredEntity {
                            key: entity.key.clone(),
                            properties: entity.properties.clone(),
                        },
                    );
                    outcomes.push(MutationOutcome { key: None });
                }
                Mutation::Delete(key) => {
                    staged.remove(&storage_key(key));
                    outcomes.push(MutationOutcome { key: None });
                }
            }
        }

        state.entities = staged;
        state.next_id = next_id;
        Ok(outcomes)
    }
}

fn allocate(entity: &WireEntity, next_id: &mut i64) -> (Key, bool) {
    if entity.key.is_complete() {
        return (entity.key.clone(), false);
    }
    let mut key = entity.key.clone();
    let id = *next_id;
    *next_id += 1;
    // complete_with_id only fails on an already-complete key, which the
    // branch above just excluded.
    let _ = key.complete_with_id(id);
    (key, true)
}
