use crate::client::RawRow;
use crate::core::{AttributeMap, Value};
use crate::cursor::PageCursor;
use crate::key::Key;
use crate::query::spec::ID_COLUMN;

/// One processed result row: the caller-visible attribute map plus the
/// key-derived metadata. `key` and `parent` are side-channel metadata
/// and are never persisted back to the store as properties.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub key: Key,
    pub parent: Option<Key>,
    pub attributes: AttributeMap,
}

impl Row {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// The injected `id` attribute (the stringified terminal
    /// identifier).
    pub fn id(&self) -> Option<&str> {
        self.attributes.get(ID_COLUMN).and_then(Value::as_str)
    }
}

/// The output of one query execution: processed rows in store order,
/// plus the opaque end cursor of the page (`None` when the result set
/// is exhausted).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PageResult {
    pub rows: Vec<Row>,
    pub end_cursor: Option<String>,
}

impl PageResult {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Client-visible cursor for fetching the page after this one.
    pub fn next_page_cursor(&self) -> Option<PageCursor> {
        self.end_cursor
            .as_deref()
            .map(PageCursor::for_next_page)
    }
}

/// Convert one raw store result into a row: inject `id` (unless the
/// entity already carries one), derive the parent key, and collapse a
/// row whose key equals `exclude_key` to `None` (ancestor
/// self-exclusion; callers filter the empties out).
pub fn process_row(raw: RawRow, exclude_key: Option<&Key>) -> Option<Row> {
    if let Some(excluded) = exclude_key {
        if raw.key == *excluded {
            return None;
        }
    }
    let mut attributes = raw.properties;
    if let Some(identifier) = raw.key.identifier() {
        attributes
            .entry(ID_COLUMN.to_string())
            .or_insert_with(|| Value::Text(identifier.to_canonical_string()));
    }
    Some(Row {
        parent: raw.key.parent(),
        key: raw.key,
        attributes,
    })
}

/// Process a whole page, preserving encounter order (which is the
/// store's order, not necessarily any requested one) and capturing the
/// last row's continuation cursor. A page that came back short of
/// `limit` (or empty) is the end of the result set, so its end cursor
/// is cleared.
pub fn process_page(
    raw_rows: Vec<RawRow>,
    limit: Option<usize>,
    exclude_key: Option<&Key>,
) -> PageResult {
    let fetched = raw_rows.len();
    let mut end_cursor = None;
    let mut rows = Vec::with_capacity(fetched);
    for raw in raw_rows {
        end_cursor = raw.cursor.clone();
        if let Some(row) = process_row(raw, exclude_key) {
            rows.push(row);
        }
    }
    if fetched == 0 || limit.is_none_or(|limit| fetched < limit) {
        end_cursor = None;
    }
    PageResult { rows, end_cursor }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyBuilder;

    fn raw(key: Key, cursor: Option<&str>) -> RawRow {
        RawRow {
            key,
            properties: AttributeMap::new(),
            cursor: cursor.map(str::to_string),
        }
    }

    #[test]
    fn injects_stringified_id() {
        let row = process_row(raw(Key::with_id("Person", 42), None), None).unwrap();
        assert_eq!(row.id(), Some("42"));
        let row = process_row(raw(Key::with_name("Person", "bob"), None), None).unwrap();
        assert_eq!(row.id(), Some("bob"));
    }

    #[test]
    fn existing_id_attribute_wins() {
        let mut properties = AttributeMap::new();
        properties.insert("id".into(), Value::Text("explicit".into()));
        let row = process_row(
            RawRow {
                key: Key::with_id("Person", 42),
                properties,
                cursor: None,
            },
            None,
        )
        .unwrap();
        assert_eq!(row.id(), Some("explicit"));
    }

    #[test]
    fn excluded_key_collapses_to_none() {
        let key = Key::with_name("Person", "A");
        assert!(process_row(raw(key.clone(), None), Some(&key)).is_none());
    }

    #[test]
    fn parent_is_derived_from_the_path() {
        let parent = Key::with_name("Person", "A");
        let child = KeyBuilder::new("Basket")
            .ancestor(Some(parent.clone()))
            .build(Some(1.into()))
            .unwrap();
        let row = process_row(raw(child, None), None).unwrap();
        assert_eq!(row.parent, Some(parent));
    }

    #[test]
    fn short_page_clears_end_cursor() {
        let rows = vec![
            raw(Key::with_id("Person", 1), Some("1")),
            raw(Key::with_id("Person", 2), Some("2")),
        ];
        let page = process_page(rows, Some(5), None);
        assert_eq!(page.end_cursor, None);
    }

    #[test]
    fn full_page_keeps_last_row_cursor() {
        let rows = vec![
            raw(Key::with_id("Person", 1), Some("1")),
            raw(Key::with_id("Person", 2), Some("2")),
        ];
        let page = process_page(rows, Some(2), None);
        assert_eq!(page.end_cursor.as_deref(), Some("2"));
    }

    #[test]
    fn empty_page_has_no_cursor() {
        let page = process_page(Vec::new(), Some(2), None);
        assert!(page.is_empty());
        assert_eq!(page.end_cursor, None);
    }
}
