//! Batched writes: insert, upsert, update and delete over the commit
//! call, with allocated identifiers correlated back to the submitted
//! records by position.

use std::sync::Arc;

use crate::client::{
    ExponentialBackoff, LookupOptions, Mutation, RawRow, StoreTransport, WireEntity,
};
use crate::core::{AttributeMap, Result, StoreError, Value};
use crate::key::{Identifier, Key, KeyBuilder};
use crate::query::{ID_COLUMN, KEY_PSEUDO_COLUMN};

/// Write-time options carried alongside every mutation in a batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteOptions {
    /// Property names the store should not index.
    pub excluded_from_indexes: Vec<String>,
}

/// Issues commit calls against the transport and resolves their
/// per-mutation outcomes.
///
/// A commit is atomic: either every mutation in the batch applies or
/// none does. Inserts of complete keys that already exist fail the
/// whole batch. Note that a retried commit is not idempotent for
/// inserts with store-assigned identifiers; a transient failure after
/// the store applied the batch can surface as a duplicate on retry.
pub struct BatchMutator {
    transport: Arc<dyn StoreTransport>,
    backoff: ExponentialBackoff,
}

impl BatchMutator {
    pub fn new(transport: Arc<dyn StoreTransport>, backoff: ExponentialBackoff) -> Self {
        Self { transport, backoff }
    }

    /// Insert new entities. Each record may name its own identifier via
    /// an `id` attribute (or a full key via `__key__`); records without
    /// one get a store-assigned numeric ID, back-filled into the
    /// returned keys.
    pub fn insert(
        &self,
        builder: &KeyBuilder,
        records: Vec<AttributeMap>,
        options: &WriteOptions,
    ) -> Result<Vec<Key>> {
        let entities = records
            .into_iter()
            .map(|record| self.entity_from_record(builder, record, options))
            .collect::<Result<Vec<_>>>()?;
        self.commit_entities(entities, Mutation::Insert)
    }

    /// Insert one entity with a store-assigned identifier and return
    /// its completed key. Rejects records that already carry an `id` or
    /// `__key__` attribute.
    pub fn insert_get_key(
        &self,
        builder: &KeyBuilder,
        record: AttributeMap,
        options: &WriteOptions,
    ) -> Result<Key> {
        if record.contains_key(ID_COLUMN) || record.contains_key(KEY_PSEUDO_COLUMN) {
            return Err(StoreError::InvalidKey(
                "insert_get_key expects the store to assign the identifier; \
                 remove the explicit id from the record"
                    .into(),
            ));
        }
        let entity = self.entity_from_record(builder, record, options)?;
        let mut keys = self.commit_entities(vec![entity], Mutation::Insert)?;
        keys.pop()
            .ok_or_else(|| StoreError::Transport("commit returned no mutation result".into()))
    }

    /// Write entities unconditionally, one record per key. Records
    /// paired with an incomplete key are submitted as inserts so the
    /// store allocates their identifiers; the rest replace whatever is
    /// stored under their key.
    pub fn upsert(
        &self,
        records: Vec<AttributeMap>,
        keys: Vec<Key>,
        options: &WriteOptions,
    ) -> Result<Vec<Key>> {
        let entities = pair_records_with_keys(records, keys, options)?;
        self.commit_entities(entities, |entity: WireEntity| {
            if entity.key.is_complete() {
                Mutation::Upsert(entity)
            } else {
                Mutation::Insert(entity)
            }
        })
    }

    /// Replace existing entities, one record per key. The submitted
    /// record is the entire new state; properties absent from it are
    /// gone after the commit. Last write wins, with no version check.
    pub fn update(
        &self,
        records: Vec<AttributeMap>,
        keys: Vec<Key>,
        options: &WriteOptions,
    ) -> Result<Vec<Key>> {
        for key in &keys {
            if !key.is_complete() {
                return Err(StoreError::InvalidKey(format!(
                    "cannot update entity with incomplete key {}",
                    key.canonical()
                )));
            }
        }
        let entities = pair_records_with_keys(records, keys, options)?;
        self.commit_entities(entities, Mutation::Update)
    }

    /// Delete entities by key. Deleting a key that matches nothing is
    /// not an error.
    pub fn delete(&self, keys: &[Key]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mutations: Vec<Mutation> = keys.iter().cloned().map(Mutation::Delete).collect();
        self.backoff.execute(|| self.transport.commit(&mutations))?;
        Ok(())
    }

    /// Strongly-consistent single-key fetch.
    pub fn lookup(&self, key: &Key, options: &LookupOptions) -> Result<Option<RawRow>> {
        self.backoff.execute(|| self.transport.lookup(key, options))
    }

    /// Strongly-consistent multi-key fetch. Missing keys are simply
    /// absent from the result.
    pub fn lookup_batch(&self, keys: &[Key], options: &LookupOptions) -> Result<Vec<RawRow>> {
        self.backoff
            .execute(|| self.transport.lookup_batch(keys, options))
    }

    fn entity_from_record(
        &self,
        builder: &KeyBuilder,
        mut record: AttributeMap,
        options: &WriteOptions,
    ) -> Result<WireEntity> {
        let key = match record.remove(KEY_PSEUDO_COLUMN) {
            Some(Value::KeyRef(key)) => {
                record.remove(ID_COLUMN);
                key
            }
            Some(other) => {
                return Err(StoreError::InvalidKey(format!(
                    "__key__ attribute must hold a key, got {}",
                    other.type_name()
                )));
            }
            None => builder.build(identifier_from_record(&mut record)?)?,
        };
        Ok(WireEntity {
            key,
            properties: record,
            excluded_from_indexes: options.excluded_from_indexes.clone(),
        })
    }

    /// Submit one batch and back-fill store-assigned identifiers from
    /// the index-aligned mutation results.
    fn commit_entities<F>(&self, entities: Vec<WireEntity>, wrap: F) -> Result<Vec<Key>>
    where
        F: Fn(WireEntity) -> Mutation,
    {
        if entities.is_empty() {
            return Ok(Vec::new());
        }
        let mut keys: Vec<Key> = entities.iter().map(|e| e.key.clone()).collect();
        let mutations: Vec<Mutation> = entities.into_iter().map(wrap).collect();
        let outcomes = self.backoff.execute(|| self.transport.commit(&mutations))?;
        for (index, outcome) in outcomes.into_iter().enumerate() {
            if let (Some(slot), Some(completed)) = (keys.get_mut(index), outcome.key) {
                *slot = completed;
            }
        }
        Ok(keys)
    }
}

/// Map a record's `id` attribute to a key identifier. Text becomes a
/// name, integers become numeric IDs, anything else is a caller error.
fn identifier_from_record(record: &mut AttributeMap) -> Result<Option<Identifier>> {
    match record.remove(ID_COLUMN) {
        None => Ok(None),
        Some(Value::Text(name)) => Ok(Some(Identifier::Name(name))),
        Some(Value::Integer(id)) => Ok(Some(Identifier::Id(id))),
        Some(other) => Err(StoreError::InvalidKey(format!(
            "id attribute must be text or integer, got {}",
            other.type_name()
        ))),
    }
}

fn pair_records_with_keys(
    records: Vec<AttributeMap>,
    keys: Vec<Key>,
    options: &WriteOptions,
) -> Result<Vec<WireEntity>> {
    if records.len() != keys.len() {
        return Err(StoreError::KeyCountMismatch {
            values: records.len(),
            keys: keys.len(),
        });
    }
    Ok(records
        .into_iter()
        .zip(keys)
        .map(|(mut record, key)| {
            // `id` is key metadata, never a stored property.
            record.remove(ID_COLUMN);
            record.remove(KEY_PSEUDO_COLUMN);
            WireEntity {
                key,
                properties: record,
                excluded_from_indexes: options.excluded_from_indexes.clone(),
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryStore;

    fn mutator(store: Arc<MemoryStore>) -> BatchMutator {
        BatchMutator::new(store, ExponentialBackoff::new(1))
    }

    fn record(pairs: &[(&str, Value)]) -> AttributeMap {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn insert_backfills_allocated_ids_by_position() {
        let store = Arc::new(MemoryStore::new());
        let m = mutator(store);
        let builder = KeyBuilder::new("Person");
        let keys = m
            .insert(
                &builder,
                vec![
                    record(&[("name", "a".into())]),
                    record(&[("name", "b".into())]),
                    record(&[("name", "c".into())]),
                ],
                &WriteOptions::default(),
            )
            .unwrap();
        assert_eq!(keys.len(), 3);
        assert!(keys.iter().all(Key::is_complete));
        let ids: Vec<i64> = keys
            .iter()
            .map(|k| match k.identifier() {
                Some(Identifier::Id(v)) => *v,
                other => panic!("expected numeric id, got {other:?}"),
            })
            .collect();
        assert_eq!(ids, vec![1000, 1001, 1002]);
    }

    #[test]
    fn record_id_attribute_names_the_key() {
        let store = Arc::new(MemoryStore::new());
        let m = mutator(store.clone());
        let builder = KeyBuilder::new("Person");
        let keys = m
            .insert(
                &builder,
                vec![record(&[("id", "alice".into()), ("age", 30.into())])],
                &WriteOptions::default(),
            )
            .unwrap();
        assert_eq!(keys[0], Key::with_name("Person", "alice"));
        // The id attribute is key metadata, not a stored property.
        let stored = store
            .lookup(&keys[0], &LookupOptions::default())
            .unwrap()
            .unwrap();
        assert!(!stored.properties.contains_key("id"));
        assert_eq!(stored.properties.get("age"), Some(&Value::Integer(30)));
    }

    #[test]
    fn insert_existing_key_fails() {
        let store = Arc::new(MemoryStore::new());
        let m = mutator(store);
        let builder = KeyBuilder::new("Person");
        let rec = || record(&[("id", "alice".into())]);
        m.insert(&builder, vec![rec()], &WriteOptions::default())
            .unwrap();
        let err = m
            .insert(&builder, vec![rec()], &WriteOptions::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[test]
    fn insert_get_key_rejects_explicit_id() {
        let store = Arc::new(MemoryStore::new());
        let m = mutator(store);
        let builder = KeyBuilder::new("Person");
        let err = m
            .insert_get_key(
                &builder,
                record(&[("id", "alice".into())]),
                &WriteOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey(_)));
    }

    #[test]
    fn upsert_inserts_for_incomplete_keys() {
        let store = Arc::new(MemoryStore::new());
        let m = mutator(store);
        let keys = m
            .upsert(
                vec![record(&[("name", "a".into())])],
                vec![Key::incomplete("Person")],
                &WriteOptions::default(),
            )
            .unwrap();
        assert!(keys[0].is_complete());
    }

    #[test]
    fn upsert_key_count_mismatch() {
        let store = Arc::new(MemoryStore::new());
        let m = mutator(store);
        let err = m
            .upsert(
                vec![record(&[("name", "a".into())])],
                vec![],
                &WriteOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::KeyCountMismatch { values: 1, keys: 0 }
        ));
    }

    #[test]
    fn update_is_a_full_replace() {
        let store = Arc::new(MemoryStore::new());
        let m = mutator(store.clone());
        let key = Key::with_name("Person", "alice");
        m.upsert(
            vec![record(&[("age", 30.into()), ("city", "Kyiv".into())])],
            vec![key.clone()],
            &WriteOptions::default(),
        )
        .unwrap();
        m.update(
            vec![record(&[("age", 31.into())])],
            vec![key.clone()],
            &WriteOptions::default(),
        )
        .unwrap();
        let stored = store
            .lookup(&key, &LookupOptions::default())
            .unwrap()
            .unwrap();
        assert_eq!(stored.properties.get("age"), Some(&Value::Integer(31)));
        assert!(!stored.properties.contains_key("city"));
    }

    #[test]
    fn update_missing_entity_fails() {
        let store = Arc::new(MemoryStore::new());
        let m = mutator(store);
        let err = m
            .update(
                vec![record(&[("age", 31.into())])],
                vec![Key::with_name("Person", "ghost")],
                &WriteOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn delete_missing_is_fine() {
        let store = Arc::new(MemoryStore::new());
        let m = mutator(store.clone());
        m.delete(&[Key::with_name("Person", "ghost")]).unwrap();
        assert_eq!(store.entity_count(), 0);
    }
}
