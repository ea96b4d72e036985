//! Persistent query tree.
//!
//! Every mutating operation returns a new tree; unchanged maps are shared
//! between versions through `Arc` and only the touched map is copied.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::node::QueryNode;
use crate::types::{Result, StrataError};

/// Keyed DAG of query nodes with exactly one root once complete.
///
/// Children of a node are ordered by insertion; zip connections rely on it.
#[derive(Clone, Debug, Default)]
pub struct QueryTree {
    nodes: Arc<BTreeMap<String, Arc<QueryNode>>>,
    parents: Arc<BTreeMap<String, String>>,
    children: Arc<BTreeMap<String, Vec<String>>>,
}

impl QueryTree {
    /// Empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tree holding a single node.
    pub fn single(key: impl Into<String>, node: QueryNode) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(key.into(), Arc::new(node));
        Self {
            nodes: Arc::new(nodes),
            ..Self::default()
        }
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` when the tree holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns `true` when `key` names a node.
    pub fn contains(&self, key: &str) -> bool {
        self.nodes.contains_key(key)
    }

    /// Node stored under `key`.
    pub fn get(&self, key: &str) -> Option<&QueryNode> {
        self.nodes.get(key).map(|n| n.as_ref())
    }

    /// Node stored under `key`, or a contract error.
    pub fn node(&self, key: &str) -> Result<&QueryNode> {
        self.get(key)
            .ok_or_else(|| StrataError::Contract(format!("query tree has no node {key}")))
    }

    /// Iterates the keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Iterates `(key, node)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &QueryNode)> {
        self.nodes.iter().map(|(k, n)| (k.as_str(), n.as_ref()))
    }

    /// Ordered children of `key`.
    pub fn children(&self, key: &str) -> &[String] {
        self.children.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Parent of `key`, if any.
    pub fn parent(&self, key: &str) -> Option<&str> {
        self.parents.get(key).map(String::as_str)
    }

    /// Adds a node. Keys must be unique.
    pub fn add_node(&self, key: impl Into<String>, node: QueryNode) -> Result<Self> {
        let key = key.into();
        if self.nodes.contains_key(&key) {
            return Err(StrataError::Contract(format!(
                "query tree already has a node {key}"
            )));
        }
        let mut next = self.clone();
        Arc::make_mut(&mut next.nodes).insert(key, Arc::new(node));
        Ok(next)
    }

    /// Links `child` under `parent`, appending to the parent's child list.
    pub fn add_edge(&self, parent: &str, child: &str) -> Result<Self> {
        self.node(parent)?;
        self.node(child)?;
        if let Some(existing) = self.parent(child) {
            return Err(StrataError::Contract(format!(
                "{child} already has parent {existing}"
            )));
        }
        if parent == child || self.is_ancestor(child, parent) {
            return Err(StrataError::Contract(format!(
                "linking {child} under {parent} would create a cycle"
            )));
        }
        let mut next = self.clone();
        Arc::make_mut(&mut next.parents).insert(child.to_owned(), parent.to_owned());
        Arc::make_mut(&mut next.children)
            .entry(parent.to_owned())
            .or_default()
            .push(child.to_owned());
        Ok(next)
    }

    fn is_ancestor(&self, candidate: &str, key: &str) -> bool {
        let mut cursor = self.parent(key);
        while let Some(current) = cursor {
            if current == candidate {
                return true;
            }
            cursor = self.parent(current);
        }
        false
    }

    /// Key of the only parentless node.
    pub fn root_key(&self) -> Result<&str> {
        let mut roots = self
            .nodes
            .keys()
            .filter(|key| !self.parents.contains_key(*key));
        match (roots.next(), roots.next()) {
            (Some(root), None) => Ok(root),
            (None, _) => Err(StrataError::Contract("query tree is empty".into())),
            (Some(a), Some(b)) => Err(StrataError::Contract(format!(
                "query tree has more than one root ({a}, {b})"
            ))),
        }
    }

    /// Root node.
    pub fn root(&self) -> Result<&QueryNode> {
        self.node(self.root_key()?)
    }

    /// Keys of the subtree under `key` in pre-order, children in insertion order.
    pub fn descendants(&self, key: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut stack = vec![key.to_owned()];
        while let Some(current) = stack.pop() {
            for child in self.children(&current).iter().rev() {
                stack.push(child.clone());
            }
            out.push(current);
        }
        out
    }

    /// Copy of the subtree rooted at `key`.
    pub fn get_sub_tree(&self, key: &str) -> Result<Self> {
        self.node(key)?;
        let mut nodes = BTreeMap::new();
        let mut parents = BTreeMap::new();
        let mut children = BTreeMap::new();
        for current in self.descendants(key) {
            if let Some(node) = self.nodes.get(&current) {
                nodes.insert(current.clone(), Arc::clone(node));
            }
            if current != key {
                if let Some(parent) = self.parents.get(&current) {
                    parents.insert(current.clone(), parent.clone());
                }
            }
            if let Some(kids) = self.children.get(&current) {
                children.insert(current, kids.clone());
            }
        }
        Ok(Self {
            nodes: Arc::new(nodes),
            parents: Arc::new(parents),
            children: Arc::new(children),
        })
    }

    /// Grafts `sub` under `parent`. Keys of the two trees must be disjoint.
    pub fn add_sub_tree(&self, parent: &str, sub: &QueryTree) -> Result<Self> {
        self.node(parent)?;
        let sub_root = sub.root_key()?.to_owned();
        if let Some(clash) = sub.keys().find(|k| self.contains(k)) {
            return Err(StrataError::Contract(format!(
                "query tree already has a node {clash}"
            )));
        }
        let mut next = self.clone();
        {
            let nodes = Arc::make_mut(&mut next.nodes);
            for (key, node) in sub.nodes.iter() {
                nodes.insert(key.clone(), Arc::clone(node));
            }
            let parents = Arc::make_mut(&mut next.parents);
            for (child, p) in sub.parents.iter() {
                parents.insert(child.clone(), p.clone());
            }
            let children = Arc::make_mut(&mut next.children);
            for (p, kids) in sub.children.iter() {
                children.insert(p.clone(), kids.clone());
            }
        }
        next.add_edge(parent, &sub_root)
    }

    /// Replaces the node under `key`, keeping its links.
    pub fn replace_node(&self, key: &str, node: QueryNode) -> Result<Self> {
        self.node(key)?;
        let mut next = self.clone();
        Arc::make_mut(&mut next.nodes).insert(key.to_owned(), Arc::new(node));
        Ok(next)
    }

    /// Rewrites the node under `key` with `f`.
    pub fn update_node(
        &self,
        key: &str,
        f: impl FnOnce(&QueryNode) -> Result<QueryNode>,
    ) -> Result<Self> {
        let updated = f(self.node(key)?)?;
        self.replace_node(key, updated)
    }

    /// Rewrites every node with `f`.
    pub fn map_nodes(&self, mut f: impl FnMut(&QueryNode) -> QueryNode) -> Self {
        let nodes = self
            .nodes
            .iter()
            .map(|(k, n)| (k.clone(), Arc::new(f(n))))
            .collect();
        Self {
            nodes: Arc::new(nodes),
            parents: Arc::clone(&self.parents),
            children: Arc::clone(&self.children),
        }
    }

    /// Copy with every key prefixed by `prefix`.
    pub fn rekeyed(&self, prefix: &str) -> Self {
        let re = |k: &String| format!("{prefix}{k}");
        Self {
            nodes: Arc::new(self.nodes.iter().map(|(k, n)| (re(k), Arc::clone(n))).collect()),
            parents: Arc::new(self.parents.iter().map(|(c, p)| (re(c), re(p))).collect()),
            children: Arc::new(
                self.children
                    .iter()
                    .map(|(p, kids)| (re(p), kids.iter().map(re).collect()))
                    .collect(),
            ),
        }
    }
}
