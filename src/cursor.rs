use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::{Map, Value as JsonValue};

/// JSON key carrying the pagination direction inside the encoded form.
pub const DIRECTION_KEY: &str = "_pointsToNextItems";

/// Parameter name under which the store's opaque continuation token is
/// carried between pages.
pub const CURSOR_PARAMETER: &str = "cursor";

/// A client-visible pagination token: the store's opaque continuation
/// parameters plus a flag saying which way the cursor points.
///
/// The encoded form travels in URLs and request bodies, so decoding is
/// total: malformed input of any shape yields `None`, never an error.
#[derive(Debug, Clone, PartialEq)]
pub struct PageCursor {
    parameters: Map<String, JsonValue>,
    points_to_next: bool,
}

impl PageCursor {
    pub fn new(parameters: Map<String, JsonValue>, points_to_next: bool) -> Self {
        Self {
            parameters,
            points_to_next,
        }
    }

    /// Cursor resuming after the page whose end cursor is given.
    pub fn for_next_page(end_cursor: &str) -> Self {
        let mut parameters = Map::new();
        parameters.insert(
            CURSOR_PARAMETER.to_string(),
            JsonValue::String(end_cursor.to_string()),
        );
        Self {
            parameters,
            points_to_next: true,
        }
    }

    pub fn parameter(&self, name: &str) -> Option<&JsonValue> {
        self.parameters.get(name)
    }

    /// The opaque continuation token to feed back into a query's
    /// start-cursor slot, when present.
    pub fn start_cursor(&self) -> Option<&str> {
        self.parameters.get(CURSOR_PARAMETER).and_then(|v| v.as_str())
    }

    pub fn points_to_next(&self) -> bool {
        self.points_to_next
    }

    pub fn points_to_previous(&self) -> bool {
        !self.points_to_next
    }

    /// base64url(JSON) with the direction flag folded into the object.
    pub fn encode(&self) -> String {
        let mut map = self.parameters.clone();
        map.insert(
            DIRECTION_KEY.to_string(),
            JsonValue::Bool(self.points_to_next),
        );
        URL_SAFE_NO_PAD.encode(JsonValue::Object(map).to_string())
    }

    /// Decode an externally-supplied cursor string.
    ///
    /// Invalid base64, invalid JSON, non-object JSON and a missing or
    /// non-boolean direction flag all yield `None`.
    pub fn decode(encoded: &str) -> Option<Self> {
        let bytes = URL_SAFE_NO_PAD.decode(encoded).ok()?;
        let json: JsonValue = serde_json::from_slice(&bytes).ok()?;
        let JsonValue::Object(mut map) = json else {
            return None;
        };
        let points_to_next = map.remove(DIRECTION_KEY)?.as_bool()?;
        Some(Self {
            parameters: map,
            points_to_next,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_parameters_and_direction() {
        let mut params = Map::new();
        params.insert("cursor".into(), JsonValue::String("abc123".into()));
        params.insert("page".into(), JsonValue::from(4));

        for direction in [true, false] {
            let cursor = PageCursor::new(params.clone(), direction);
            let decoded = PageCursor::decode(&cursor.encode()).unwrap();
            assert_eq!(decoded, cursor);
        }
    }

    #[test]
    fn decode_is_total() {
        assert_eq!(PageCursor::decode("not-base64!!"), None);
        // valid base64 of invalid JSON
        assert_eq!(
            PageCursor::decode(&URL_SAFE_NO_PAD.encode("{nope")),
            None
        );
        // valid JSON that is not an object
        assert_eq!(PageCursor::decode(&URL_SAFE_NO_PAD.encode("[1,2]")), None);
        // object without the direction flag
        assert_eq!(
            PageCursor::decode(&URL_SAFE_NO_PAD.encode(r#"{"cursor":"x"}"#)),
            None
        );
        // direction flag of the wrong type
        assert_eq!(
            PageCursor::decode(&URL_SAFE_NO_PAD.encode(r#"{"_pointsToNextItems":"yes"}"#)),
            None
        );
    }

    #[test]
    fn encoded_form_is_url_safe() {
        let mut params = Map::new();
        params.insert("cursor".into(), JsonValue::String("a+b/c=?&".into()));
        let encoded = PageCursor::new(params, true).encode();
        assert!(!encoded.contains('+'));
        assert!(!encoded.contains('/'));
        assert!(!encoded.contains('='));
    }
}
