//! Cursor trees and their opaque wire form.
//!
//! A cursor mirrors the paginating subtree of a query: one node per query
//! node, keyed by the query key, each carrying the position that node had
//! reached when the item was emitted. Identity lookups and reductions are
//! boundary leaves; their own children page independently.

use std::collections::BTreeMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use super::tree::QueryTree;
use crate::storage::TripleKey;
use crate::types::{Result, StrataError};

/// Position recorded by one query node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum CursorPayload {
    /// No position: start from the beginning, or the node is a boundary.
    #[serde(rename = "e")]
    Empty,
    /// Turn counter of a zip.
    #[serde(rename = "i")]
    Indexed {
        /// Turn at which the item was drawn.
        index: u64,
    },
    /// Last storage key seen.
    #[serde(rename = "h")]
    HasProp {
        /// Index key of the last triple read.
        key: TripleKey,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct CursorEntry {
    payload: CursorPayload,
    children: Vec<String>,
}

/// Tree of [`CursorPayload`]s keyed by query node keys.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cursor {
    root: String,
    entries: BTreeMap<String, CursorEntry>,
}

#[derive(Serialize, Deserialize)]
struct WireNode {
    k: String,
    p: CursorPayload,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    c: Vec<WireNode>,
}

impl Cursor {
    /// Single-node cursor.
    pub fn leaf(key: impl Into<String>, payload: CursorPayload) -> Self {
        let root = key.into();
        let mut entries = BTreeMap::new();
        entries.insert(
            root.clone(),
            CursorEntry {
                payload,
                children: Vec::new(),
            },
        );
        Self { root, entries }
    }

    /// Cursor whose root carries `payload` over the given child cursors.
    pub fn branch(
        key: impl Into<String>,
        payload: CursorPayload,
        children: impl IntoIterator<Item = Cursor>,
    ) -> Self {
        let mut cursor = Self::leaf(key, payload);
        for child in children {
            let child_root = child.root.clone();
            cursor.entries.extend(child.entries);
            if let Some(root) = cursor.entries.get_mut(&cursor.root) {
                root.children.push(child_root);
            }
        }
        cursor
    }

    /// All-empty cursor mirroring the paginating subtree at `key`.
    pub fn start(tree: &QueryTree, key: &str) -> Result<Self> {
        let node = tree.node(key)?;
        if node.is_cursor_boundary() {
            return Ok(Self::leaf(key, CursorPayload::Empty));
        }
        let children = tree
            .children(key)
            .iter()
            .map(|child| Self::start(tree, child))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::branch(key, CursorPayload::Empty, children))
    }

    /// Key of the root query node.
    pub fn root_key(&self) -> &str {
        &self.root
    }

    /// Payload of the root.
    pub fn root_node(&self) -> &CursorPayload {
        self.entries
            .get(&self.root)
            .map(|e| &e.payload)
            .unwrap_or(&CursorPayload::Empty)
    }

    /// Payload recorded for `key`.
    pub fn payload(&self, key: &str) -> Option<&CursorPayload> {
        self.entries.get(key).map(|e| &e.payload)
    }

    /// Children of `key` as `(key, payload)` pairs.
    pub fn child_nodes(&self, key: &str) -> Vec<(&str, &CursorPayload)> {
        let Some(entry) = self.entries.get(key) else {
            return Vec::new();
        };
        entry
            .children
            .iter()
            .filter_map(|child| {
                self.entries
                    .get(child)
                    .map(|e| (child.as_str(), &e.payload))
            })
            .collect()
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.entries.len()
    }

    /// Copy of the subtree rooted at `key`.
    pub fn sub_cursor(&self, key: &str) -> Option<Cursor> {
        self.entries.get(key)?;
        let mut entries = BTreeMap::new();
        let mut stack = vec![key.to_owned()];
        while let Some(current) = stack.pop() {
            if let Some(entry) = self.entries.get(&current) {
                stack.extend(entry.children.iter().cloned());
                entries.insert(current, entry.clone());
            }
        }
        Some(Cursor {
            root: key.to_owned(),
            entries,
        })
    }

    /// Checks that the cursor mirrors the paginating subtree of `tree` at `key`.
    pub fn validate(&self, tree: &QueryTree, key: &str) -> Result<()> {
        if self.root != key {
            return Err(mismatch(format!(
                "cursor is rooted at {} but the query pages {key}",
                self.root
            )));
        }
        let expected = Self::start(tree, key)?;
        if expected.entries.len() != self.entries.len() {
            return Err(mismatch(format!(
                "cursor has {} nodes, query expects {}",
                self.entries.len(),
                expected.entries.len()
            )));
        }
        for (k, entry) in &expected.entries {
            let Some(found) = self.entries.get(k) else {
                return Err(mismatch(format!("cursor has no position for {k}")));
            };
            let mut want = entry.children.clone();
            let mut got = found.children.clone();
            want.sort();
            got.sort();
            if want != got {
                return Err(mismatch(format!("cursor children of {k} differ from the query")));
            }
        }
        Ok(())
    }

    /// Opaque URL-safe encoding.
    pub fn encode(&self) -> Result<String> {
        let wire = self.to_wire(&self.root);
        let json = serde_json::to_vec(&wire)?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    /// Parses an encoded cursor.
    pub fn decode(raw: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(raw.as_bytes())
            .map_err(|err| StrataError::Contract(format!("cursor is not valid base64: {err}")))?;
        let wire: WireNode = serde_json::from_slice(&bytes)
            .map_err(|err| StrataError::Contract(format!("cursor is malformed: {err}")))?;
        let mut entries = BTreeMap::new();
        let root = wire.k.clone();
        Self::from_wire(wire, &mut entries)?;
        Ok(Self { root, entries })
    }

    fn to_wire(&self, key: &str) -> WireNode {
        let (payload, children) = match self.entries.get(key) {
            Some(entry) => (entry.payload.clone(), entry.children.as_slice()),
            None => (CursorPayload::Empty, &[][..]),
        };
        WireNode {
            k: key.to_owned(),
            p: payload,
            c: children.iter().map(|child| self.to_wire(child)).collect(),
        }
    }

    fn from_wire(wire: WireNode, entries: &mut BTreeMap<String, CursorEntry>) -> Result<()> {
        let children = wire.c.iter().map(|c| c.k.clone()).collect();
        if entries
            .insert(
                wire.k.clone(),
                CursorEntry {
                    payload: wire.p,
                    children,
                },
            )
            .is_some()
        {
            return Err(mismatch(format!("cursor repeats key {}", wire.k)));
        }
        for child in wire.c {
            Self::from_wire(child, entries)?;
        }
        Ok(())
    }
}

fn mismatch(message: String) -> StrataError {
    StrataError::Contract(format!("cursor does not match query: {message}"))
}
