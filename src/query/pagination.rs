//! Relay-style connections, page arguments and cursor slicing helpers.

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::types::{Result, StrataError};

/// Page request: forward (`first`/`after`) or backward (`last`/`before`), never both.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionArguments {
    /// Items wanted after `after`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first: Option<usize>,
    /// Exclusive lower cursor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    /// Items wanted before `before`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last: Option<usize>,
    /// Exclusive upper cursor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
}

impl ConnectionArguments {
    /// Forward page.
    pub fn forward(first: usize, after: Option<String>) -> Self {
        Self {
            first: Some(first),
            after,
            ..Self::default()
        }
    }

    /// Backward page.
    pub fn backward(last: usize, before: Option<String>) -> Self {
        Self {
            last: Some(last),
            before,
            ..Self::default()
        }
    }

    /// Rejects mixed forward and backward arguments.
    pub fn validate(&self) -> Result<()> {
        let forward = self.first.is_some() || self.after.is_some();
        let backward = self.last.is_some() || self.before.is_some();
        if forward && backward {
            return Err(StrataError::Contract(
                "forward (first/after) and backward (last/before) paging are mutually exclusive"
                    .into(),
            ));
        }
        Ok(())
    }

    /// Returns `true` for a `last`/`before` page.
    pub fn is_backward(&self) -> bool {
        self.last.is_some() || self.before.is_some()
    }

    /// Requested item count, if any.
    pub fn count(&self) -> Option<usize> {
        self.first.or(self.last)
    }

    /// Resume cursor, if any.
    pub fn cursor(&self) -> Option<&str> {
        self.after.as_deref().or(self.before.as_deref())
    }
}

/// Page boundaries of a connection.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    /// More items follow the last edge.
    pub has_next_page: bool,
    /// Items precede the first edge.
    pub has_previous_page: bool,
    /// Cursor of the first edge.
    pub start_cursor: Option<String>,
    /// Cursor of the last edge.
    pub end_cursor: Option<String>,
}

/// One item of a connection and its cursor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConnectionEdge<T> {
    /// Opaque resume token positioned at this item.
    pub cursor: String,
    /// The item.
    pub node: T,
}

/// Paginated result `{edges, page_info}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection<T> {
    /// Items in presentation order.
    pub edges: Vec<ConnectionEdge<T>>,
    /// Page boundaries.
    pub page_info: PageInfo,
}

impl<T> Default for Connection<T> {
    fn default() -> Self {
        Self {
            edges: Vec::new(),
            page_info: PageInfo::default(),
        }
    }
}

impl<T> Connection<T> {
    /// Builds a connection, deriving start/end cursors from the edges.
    ///
    /// Cursors must be unique within the page.
    pub fn new(edges: Vec<ConnectionEdge<T>>, has_next_page: bool, has_previous_page: bool) -> Result<Self> {
        ensure_unique(&edges)?;
        let page_info = PageInfo {
            has_next_page,
            has_previous_page,
            start_cursor: edges.first().map(|e| e.cursor.clone()),
            end_cursor: edges.last().map(|e| e.cursor.clone()),
        };
        Ok(Self { edges, page_info })
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Returns `true` for an empty page.
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Iterates the items.
    pub fn nodes(&self) -> impl Iterator<Item = &T> {
        self.edges.iter().map(|e| &e.node)
    }

    /// Consumes the connection, returning its items.
    pub fn into_nodes(self) -> Vec<T> {
        self.edges.into_iter().map(|e| e.node).collect()
    }

    /// Iterates the cursors.
    pub fn cursors(&self) -> impl Iterator<Item = &str> {
        self.edges.iter().map(|e| e.cursor.as_str())
    }

    /// Maps every item, keeping cursors and page info.
    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> Connection<U> {
        Connection {
            edges: self
                .edges
                .into_iter()
                .map(|e| ConnectionEdge {
                    cursor: e.cursor,
                    node: f(e.node),
                })
                .collect(),
            page_info: self.page_info,
        }
    }

    /// Fallible variant of [`Connection::map`].
    pub fn try_map<U>(self, mut f: impl FnMut(T) -> Result<U>) -> Result<Connection<U>> {
        let mut edges = Vec::with_capacity(self.edges.len());
        for e in self.edges {
            edges.push(ConnectionEdge {
                cursor: e.cursor,
                node: f(e.node)?,
            });
        }
        Ok(Connection {
            edges,
            page_info: self.page_info,
        })
    }
}

/// Anything positioned by a cursor.
pub trait HasCursor {
    /// The cursor string.
    fn cursor(&self) -> &str;
}

impl HasCursor for String {
    fn cursor(&self) -> &str {
        self
    }
}

impl HasCursor for &str {
    fn cursor(&self) -> &str {
        self
    }
}

impl<T> HasCursor for ConnectionEdge<T> {
    fn cursor(&self) -> &str {
        &self.cursor
    }
}

fn ensure_unique<T: HasCursor>(items: &[T]) -> Result<()> {
    let mut seen = FxHashSet::default();
    for item in items {
        if !seen.insert(item.cursor()) {
            return Err(StrataError::Contract(format!(
                "cursor {} appears more than once in one page",
                item.cursor()
            )));
        }
    }
    Ok(())
}

fn position<T: HasCursor>(items: &[T], cursor: &str) -> Result<usize> {
    let mut found = None;
    for (idx, item) in items.iter().enumerate() {
        if item.cursor() != cursor {
            continue;
        }
        if found.is_some() {
            return Err(StrataError::Contract(format!(
                "cursor {cursor} is ambiguous: it appears more than once"
            )));
        }
        found = Some(idx);
    }
    found.ok_or_else(|| StrataError::Contract(format!("cursor {cursor} is not part of this page")))
}

/// Items from `cursor` (inclusive) to the end.
pub fn from_cursor_inclusive<'a, T: HasCursor>(items: &'a [T], cursor: &str) -> Result<&'a [T]> {
    Ok(&items[position(items, cursor)?..])
}

/// Items strictly after `cursor`.
pub fn from_cursor_exclusive<'a, T: HasCursor>(items: &'a [T], cursor: &str) -> Result<&'a [T]> {
    Ok(&items[position(items, cursor)? + 1..])
}

/// Items from the start up to `cursor` (inclusive).
pub fn to_cursor_inclusive<'a, T: HasCursor>(items: &'a [T], cursor: &str) -> Result<&'a [T]> {
    Ok(&items[..=position(items, cursor)?])
}

/// Items strictly before `cursor`.
pub fn to_cursor_exclusive<'a, T: HasCursor>(items: &'a [T], cursor: &str) -> Result<&'a [T]> {
    Ok(&items[..position(items, cursor)?])
}
