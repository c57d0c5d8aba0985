use std::sync::Arc;

use crate::client::{
    ExponentialBackoff, NativeFilter, NativeOrder, NativeQuery, StoreTransport,
};
use crate::core::{Result, StoreError, Value};
use crate::key::Key;
use crate::query::processor::{PageResult, process_page};
use crate::query::spec::{
    Distinct, KEY_PSEUDO_COLUMN, Operator, QuerySpec, normalize_columns,
};

/// Turns a [`QuerySpec`] into the store's native query shape and drives
/// it through the retry-wrapped transport.
pub struct QueryTranslator {
    transport: Arc<dyn StoreTransport>,
    backoff: ExponentialBackoff,
}

impl QueryTranslator {
    pub fn new(transport: Arc<dyn StoreTransport>, backoff: ExponentialBackoff) -> Self {
        Self { transport, backoff }
    }

    /// Pure translation step: validates the spec and produces the
    /// native request, without touching the network.
    pub fn translate(spec: &QuerySpec) -> Result<NativeQuery> {
        let projection = normalize_columns(&spec.columns);

        // Keys-only always wins: the property mask is the key alone no
        // matter what projection was requested.
        let (keys_only, projection) = if spec.keys_only {
            (true, Vec::new())
        } else {
            (false, projection)
        };

        let distinct_on = match &spec.distinct {
            Distinct::Off => Vec::new(),
            Distinct::OnProjection => {
                if projection.is_empty() {
                    return Err(StoreError::InvalidQuery(
                        "must specify columns for distinct query".into(),
                    ));
                }
                projection.clone()
            }
            Distinct::On(columns) => {
                if columns.is_empty() {
                    return Err(StoreError::InvalidQuery(
                        "must specify columns for distinct query".into(),
                    ));
                }
                columns.clone()
            }
        };

        let mut filters = Vec::with_capacity(spec.filters.len());
        let mut key_filters = 0usize;
        for filter in &spec.filters {
            if filter.column == KEY_PSEUDO_COLUMN {
                validate_key_filter(filter.operator, &filter.value)?;
                key_filters += 1;
                if key_filters > 1 {
                    return Err(StoreError::InvalidQuery(
                        "only a single key-equality filter is supported per query; \
                         use a batch lookup for multiple keys"
                            .into(),
                    ));
                }
            }
            filters.push(NativeFilter {
                property: filter.column.clone(),
                operator: filter.operator,
                value: filter.value.clone(),
            });
        }

        let orders = spec
            .orders
            .iter()
            .map(|order| NativeOrder {
                property: order.column.clone(),
                direction: order.direction,
            })
            .collect();

        Ok(NativeQuery {
            kind: spec.kind.clone(),
            namespace: spec.namespace.clone(),
            ancestor: spec.ancestor.clone(),
            projection,
            keys_only,
            distinct_on,
            filters,
            orders,
            limit: spec.limit,
            offset: spec.offset,
            start_cursor: spec.start_cursor.clone(),
        })
    }

    pub fn execute(&self, spec: &QuerySpec) -> Result<PageResult> {
        self.execute_excluding(spec, None)
    }

    /// Execute with optional ancestor self-exclusion (rows whose key
    /// equals `exclude_key` are dropped from the page).
    pub fn execute_excluding(
        &self,
        spec: &QuerySpec,
        exclude_key: Option<&Key>,
    ) -> Result<PageResult> {
        if spec.kind.is_empty() {
            return Err(StoreError::InvalidQuery("No kind specified".into()));
        }
        let native = Self::translate(spec)?;
        log::debug!(
            "running query: kind={} filters={} orders={} limit={:?}",
            native.kind,
            native.filters.len(),
            native.orders.len(),
            native.limit
        );
        let raw_rows = self.backoff.execute(|| self.transport.run_query(&native))?;
        Ok(process_page(raw_rows, spec.limit, exclude_key))
    }

    /// Row count via the cheaper keys-only variant of the query. The
    /// store has no server-side count primitive.
    pub fn count(&self, spec: &QuerySpec, exclude_key: Option<&Key>) -> Result<usize> {
        let keys_spec = keys_only_variant(spec);
        Ok(self.execute_excluding(&keys_spec, exclude_key)?.len())
    }

    /// Non-emptiness via a keys-only variant of the query.
    pub fn exists(&self, spec: &QuerySpec, exclude_key: Option<&Key>) -> Result<bool> {
        let mut keys_spec = keys_only_variant(spec);
        // limit 1 would be enough without an exclusion; with one, the
        // single fetched row could be the excluded ancestor itself
        keys_spec.limit = if exclude_key.is_some() { Some(2) } else { Some(1) };
        Ok(!self.execute_excluding(&keys_spec, exclude_key)?.is_empty())
    }
}

fn keys_only_variant(spec: &QuerySpec) -> QuerySpec {
    let mut keys_spec = spec.clone();
    keys_spec.keys_only = true;
    keys_spec.columns = Vec::new();
    keys_spec.distinct = Distinct::Off;
    keys_spec
}

/// The key pseudo-column accepts exactly one discrete equality against
/// a key value. Range/IN-style key filtering is not supported by the
/// store; multi-key reads belong on the batch-lookup path.
fn validate_key_filter(operator: Operator, value: &Value) -> Result<()> {
    match (operator, value) {
        (Operator::Equal, Value::KeyRef(_)) => Ok(()),
        (_, Value::List(_)) => Err(StoreError::InvalidQuery(
            "filtering __key__ against multiple keys is not supported; \
             use a batch lookup instead"
                .into(),
        )),
        (Operator::Equal, _) => Err(StoreError::InvalidQuery(
            "__key__ filter requires a key value".into(),
        )),
        _ => Err(StoreError::InvalidQuery(
            "only equality filters are supported on __key__".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::spec::{Direction, Filter, Order};

    fn spec() -> QuerySpec {
        QuerySpec::new("Person")
    }

    #[test]
    fn keys_only_overrides_projection() {
        let mut s = spec();
        s.columns = vec!["name".into(), "age".into()];
        s.keys_only = true;
        let native = QueryTranslator::translate(&s).unwrap();
        assert!(native.keys_only);
        assert!(native.projection.is_empty());
    }

    #[test]
    fn star_projection_fetches_everything() {
        let mut s = spec();
        s.columns = vec!["*".into()];
        let native = QueryTranslator::translate(&s).unwrap();
        assert!(native.projection.is_empty());
        assert!(!native.keys_only);
    }

    #[test]
    fn distinct_without_projection_is_a_caller_error() {
        let mut s = spec();
        s.distinct = Distinct::OnProjection;
        let err = QueryTranslator::translate(&s).unwrap_err();
        assert!(err.to_string().contains("must specify columns"));
    }

    #[test]
    fn distinct_on_projection_uses_projected_columns() {
        let mut s = spec();
        s.columns = vec!["city".into()];
        s.distinct = Distinct::OnProjection;
        let native = QueryTranslator::translate(&s).unwrap();
        assert_eq!(native.distinct_on, vec!["city".to_string()]);
    }

    #[test]
    fn single_key_equality_filter_is_allowed() {
        let mut s = spec();
        s.filters.push(Filter {
            column: KEY_PSEUDO_COLUMN.into(),
            operator: Operator::Equal,
            value: Value::KeyRef(Key::with_id("Person", 1)),
        });
        assert!(QueryTranslator::translate(&s).is_ok());
    }

    #[test]
    fn multi_key_filter_is_rejected() {
        let mut s = spec();
        s.filters.push(Filter {
            column: KEY_PSEUDO_COLUMN.into(),
            operator: Operator::Equal,
            value: Value::List(vec![
                Value::KeyRef(Key::with_id("Person", 1)),
                Value::KeyRef(Key::with_id("Person", 2)),
            ]),
        });
        let err = QueryTranslator::translate(&s).unwrap_err();
        assert!(err.to_string().contains("batch lookup"));
    }

    #[test]
    fn two_key_filters_are_rejected() {
        let mut s = spec();
        for id in [1, 2] {
            s.filters.push(Filter {
                column: KEY_PSEUDO_COLUMN.into(),
                operator: Operator::Equal,
                value: Value::KeyRef(Key::with_id("Person", id)),
            });
        }
        assert!(QueryTranslator::translate(&s).is_err());
    }

    #[test]
    fn non_equality_key_filter_is_rejected() {
        let mut s = spec();
        s.filters.push(Filter {
            column: KEY_PSEUDO_COLUMN.into(),
            operator: Operator::GreaterThan,
            value: Value::KeyRef(Key::with_id("Person", 1)),
        });
        assert!(QueryTranslator::translate(&s).is_err());
    }

    #[test]
    fn filters_and_orders_translate_one_to_one() {
        let mut s = spec();
        s.filters.push(Filter {
            column: "age".into(),
            operator: Operator::GreaterThanOrEqual,
            value: Value::Integer(21),
        });
        s.orders.push(Order {
            column: "age".into(),
            direction: Direction::Descending,
        });
        let native = QueryTranslator::translate(&s).unwrap();
        assert_eq!(native.filters.len(), 1);
        assert_eq!(native.filters[0].property, "age");
        assert_eq!(native.orders.len(), 1);
        assert_eq!(native.orders[0].direction, Direction::Descending);
    }
}
