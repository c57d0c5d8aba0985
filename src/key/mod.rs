use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::{Result, StoreError};

/// The identifier half of one key path segment.
///
/// The store assigns `Id` values on commit; callers assign `Name`
/// values up front.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Identifier {
    Id(i64),
    Name(String),
}

impl Identifier {
    /// Stringified form used wherever numeric and name identifiers must
    /// hash identically (cache keys, injected `id` attributes).
    pub fn to_canonical_string(&self) -> String {
        match self {
            Self::Id(v) => v.to_string(),
            Self::Name(s) => s.clone(),
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(v) => write!(f, "{v}"),
            Self::Name(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for Identifier {
    fn from(v: i64) -> Self {
        Identifier::Id(v)
    }
}

impl From<&str> for Identifier {
    fn from(v: &str) -> Self {
        Identifier::Name(v.to_string())
    }
}

impl From<String> for Identifier {
    fn from(v: String) -> Self {
        Identifier::Name(v)
    }
}

/// One `{kind, identifier}` segment of a key path. `id` is `None` only
/// for the trailing segment of an incomplete key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathElement {
    pub kind: String,
    pub id: Option<Identifier>,
}

/// A hierarchical entity key: an ordered path of `{kind, identifier}`
/// segments, optionally scoped to a namespace.
///
/// A key with more than one segment is a descendant of the key formed
/// by dropping its last segment. The parent relationship is always
/// derived from the path, never stored separately.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Key {
    namespace: Option<String>,
    path: Vec<PathElement>,
}

impl Key {
    /// A root-level incomplete key: the store allocates the numeric
    /// identifier on commit.
    pub fn incomplete(kind: &str) -> Self {
        Self {
            namespace: None,
            path: vec![PathElement {
                kind: kind.to_string(),
                id: None,
            }],
        }
    }

    pub fn with_id(kind: &str, id: i64) -> Self {
        Self {
            namespace: None,
            path: vec![PathElement {
                kind: kind.to_string(),
                id: Some(Identifier::Id(id)),
            }],
        }
    }

    pub fn with_name(kind: &str, name: &str) -> Self {
        Self {
            namespace: None,
            path: vec![PathElement {
                kind: kind.to_string(),
                id: Some(Identifier::Name(name.to_string())),
            }],
        }
    }

    pub fn in_namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn path(&self) -> &[PathElement] {
        &self.path
    }

    /// Kind of the terminal path segment.
    pub fn kind(&self) -> &str {
        self.path
            .last()
            .map(|el| el.kind.as_str())
            .unwrap_or_default()
    }

    /// Identifier of the terminal path segment, `None` when incomplete.
    pub fn identifier(&self) -> Option<&Identifier> {
        self.path.last().and_then(|el| el.id.as_ref())
    }

    pub fn is_complete(&self) -> bool {
        self.path.iter().all(|el| el.id.is_some())
    }

    /// The key formed by dropping the terminal segment, preserving the
    /// namespace. A one-segment key has no parent.
    pub fn parent(&self) -> Option<Key> {
        if self.path.len() < 2 {
            return None;
        }
        Some(Key {
            namespace: self.namespace.clone(),
            path: self.path[..self.path.len() - 1].to_vec(),
        })
    }

    /// Whether `other` sits at or below this key in the path hierarchy.
    /// Namespaces must match exactly; a key is its own ancestor.
    pub fn is_ancestor_of(&self, other: &Key) -> bool {
        self.namespace == other.namespace
            && other.path.len() >= self.path.len()
            && other.path[..self.path.len()] == self.path[..]
    }

    /// Fill in the terminal identifier after the store allocated it.
    pub fn complete_with_id(&mut self, id: i64) -> Result<()> {
        let Some(last) = self.path.last_mut() else {
            return Err(StoreError::InvalidKey("key has an empty path".into()));
        };
        if last.id.is_some() {
            return Err(StoreError::InvalidKey(format!(
                "key {} is already complete",
                self.canonical()
            )));
        }
        last.id = Some(Identifier::Id(id));
        Ok(())
    }

    /// Canonical serialization of the full key: namespace plus every
    /// path segment, with numeric and name identifiers normalized to
    /// the same stringified form. Two logically-equal spellings of a
    /// key (`123` vs `"123"`) serialize identically; keys under a
    /// different ancestor or namespace never collide.
    pub fn canonical(&self) -> String {
        let mut out = String::new();
        if let Some(ns) = &self.namespace {
            out.push_str("ns=");
            out.push_str(ns);
            out.push('|');
        }
        for (index, el) in self.path.iter().enumerate() {
            if index > 0 {
                out.push('/');
            }
            out.push_str(&el.kind);
            out.push(':');
            match &el.id {
                Some(id) => out.push_str(&id.to_canonical_string()),
                None => out.push('?'),
            }
        }
        out
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

/// How a kind's scalar identifiers are interpreted when a key is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdentifierType {
    /// Numeric-looking identifiers become numeric IDs, everything else
    /// a name.
    #[default]
    Auto,
    /// Identifiers must be numeric; a non-numeric name is a caller
    /// error.
    Id,
    /// Identifiers are always names, even when they look numeric.
    Name,
}

/// Builds fully-qualified keys for one kind: ancestor chaining,
/// namespace scoping and identifier coercion in one place.
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    kind: String,
    namespace: Option<String>,
    ancestor: Option<Key>,
    identifier_type: IdentifierType,
}

impl KeyBuilder {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            namespace: None,
            ancestor: None,
            identifier_type: IdentifierType::Auto,
        }
    }

    pub fn namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace;
        self
    }

    pub fn ancestor(mut self, ancestor: Option<Key>) -> Self {
        self.ancestor = ancestor;
        self
    }

    pub fn identifier_type(mut self, identifier_type: IdentifierType) -> Self {
        self.identifier_type = identifier_type;
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Build a key for the given identifier, or an incomplete key when
    /// no identifier is supplied (store-assigned ID on commit).
    pub fn build(&self, identifier: Option<Identifier>) -> Result<Key> {
        if self.kind.is_empty() {
            return Err(StoreError::InvalidQuery("No kind specified".into()));
        }

        let id = match identifier {
            Some(id) => Some(self.coerce(id)?),
            None => None,
        };

        let namespace = self.resolve_namespace()?;

        let mut path = match &self.ancestor {
            Some(ancestor) => {
                if !ancestor.is_complete() {
                    return Err(StoreError::InvalidKey(format!(
                        "ancestor key {} is incomplete",
                        ancestor.canonical()
                    )));
                }
                ancestor.path().to_vec()
            }
            None => Vec::new(),
        };
        path.push(PathElement {
            kind: self.kind.clone(),
            id,
        });

        Ok(Key { namespace, path })
    }

    fn coerce(&self, id: Identifier) -> Result<Identifier> {
        match (self.identifier_type, id) {
            (IdentifierType::Auto, Identifier::Name(s)) => match s.parse::<i64>() {
                Ok(v) => Ok(Identifier::Id(v)),
                Err(_) => Ok(Identifier::Name(s)),
            },
            (IdentifierType::Id, Identifier::Name(s)) => {
                s.parse::<i64>().map(Identifier::Id).map_err(|_| {
                    StoreError::InvalidKey(format!(
                        "non-numeric identifier '{s}' for numeric kind '{}'",
                        self.kind
                    ))
                })
            }
            (IdentifierType::Name, Identifier::Id(v)) => Ok(Identifier::Name(v.to_string())),
            (_, id) => Ok(id),
        }
    }

    fn resolve_namespace(&self) -> Result<Option<String>> {
        let ancestor_ns = self
            .ancestor
            .as_ref()
            .and_then(|a| a.namespace().map(str::to_string));
        match (&self.namespace, ancestor_ns) {
            (Some(ns), Some(ans)) if *ns != ans => Err(StoreError::InvalidKey(format!(
                "namespace '{ns}' does not match ancestor namespace '{ans}'"
            ))),
            (Some(ns), _) => Ok(Some(ns.clone())),
            (None, inherited) => Ok(inherited),
        }
    }
}
