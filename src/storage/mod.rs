//! Partitioned triple storage.
//!
//! The engines only talk to storage through [`TripleStore`]: a range query over
//! one partition's indexed objects and an all-or-nothing conditional write set.
//! Nodes and edges are decomposed into triples by [`triple`].

/// In-memory reference implementation of [`TripleStore`].
pub mod memory;

/// Triple keys and the entity ↔ triple layout.
pub mod triple;

use crate::types::Result;

pub use memory::MemoryTripleStore;
pub use triple::{PrimaryKey, Triple, TripleKey};

/// Range query over one partition, ordered by `(object, subject, predicate)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TripleQuery {
    /// Table to read.
    pub table: String,
    /// Partition to scan.
    pub partition: String,
    /// Only objects starting with this prefix are returned.
    pub object_prefix: String,
    /// Resume strictly after (forward) or before (backward) this key.
    pub exclusive_start_key: Option<TripleKey>,
    /// Ascending when `true`.
    pub scan_forward: bool,
    /// Maximum number of rows returned.
    pub limit: usize,
    /// Request a strongly consistent read.
    pub consistent_read: bool,
}

impl TripleQuery {
    /// Forward query over `partition` for objects starting with `object_prefix`.
    pub fn new(
        table: impl Into<String>,
        partition: impl Into<String>,
        object_prefix: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            partition: partition.into(),
            object_prefix: object_prefix.into(),
            exclusive_start_key: None,
            scan_forward: true,
            limit: usize::MAX,
            consistent_read: false,
        }
    }

    /// Sets the exclusive start key.
    pub fn start_after(mut self, key: Option<TripleKey>) -> Self {
        self.exclusive_start_key = key;
        self
    }

    /// Sets the scan direction.
    pub fn forward(mut self, forward: bool) -> Self {
        self.scan_forward = forward;
        self
    }

    /// Sets the row limit.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Sets the consistency flag.
    pub fn consistent(mut self, consistent: bool) -> Self {
        self.consistent_read = consistent;
        self
    }
}

/// One page of a [`TripleQuery`].
#[derive(Clone, Debug, Default)]
pub struct TriplePage {
    /// Matching triples in scan order.
    pub triples: Vec<Triple>,
    /// Key to resume from; `None` once the range is exhausted.
    pub continuation: Option<TripleKey>,
}

/// Precondition evaluated against the current row at a primary key.
#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    /// No row may exist.
    NotExists,
    /// A row must exist.
    Exists,
    /// A row must exist and carry exactly this version.
    VersionEquals(u64),
}

/// Operation carried by a [`WriteItem`].
#[derive(Clone, Debug, PartialEq)]
pub enum WriteOp {
    /// Insert or replace a triple.
    Put(Triple),
    /// Remove the row at a primary key.
    Delete(PrimaryKey),
    /// Only evaluate the condition.
    Check(PrimaryKey),
}

impl WriteOp {
    /// Primary key the operation addresses.
    pub fn primary_key(&self) -> PrimaryKey {
        match self {
            WriteOp::Put(triple) => triple.primary_key(),
            WriteOp::Delete(key) | WriteOp::Check(key) => key.clone(),
        }
    }
}

/// Single conditional operation within a [`WriteSet`].
#[derive(Clone, Debug, PartialEq)]
pub struct WriteItem {
    /// What to do.
    pub op: WriteOp,
    /// Condition that must hold before anything in the set is applied.
    pub condition: Option<Condition>,
}

impl WriteItem {
    /// Unconditional put.
    pub fn put(triple: Triple) -> Self {
        Self {
            op: WriteOp::Put(triple),
            condition: None,
        }
    }

    /// Unconditional delete.
    pub fn delete(key: PrimaryKey) -> Self {
        Self {
            op: WriteOp::Delete(key),
            condition: None,
        }
    }

    /// Condition-only item.
    pub fn check(key: PrimaryKey, condition: Condition) -> Self {
        Self {
            op: WriteOp::Check(key),
            condition: Some(condition),
        }
    }

    /// Attaches a condition.
    pub fn when(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }
}

/// Transactional batch: every condition is checked, then every op applied, atomically.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WriteSet {
    /// Table to write.
    pub table: String,
    /// Items in application order.
    pub items: Vec<WriteItem>,
}

impl WriteSet {
    /// Empty write set for a table.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            items: Vec::new(),
        }
    }

    /// Appends an item, returning its index.
    pub fn push(&mut self, item: WriteItem) -> usize {
        self.items.push(item);
        self.items.len() - 1
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` when the set holds no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Condition failure reported by [`TripleStore::put`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rejection {
    /// Index of the first failing item.
    pub index: usize,
    /// Why the condition failed.
    pub reason: String,
}

/// Outcome of a transactional put.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PutOutcome {
    /// Every item was applied.
    Committed,
    /// Nothing was applied.
    Rejected(Rejection),
}

/// Range-queryable, transactionally writable triple store.
pub trait TripleStore: Send + Sync {
    /// Returns up to `query.limit` triples of one partition in index order.
    fn query_by_partition_and_indexed_object(&self, query: &TripleQuery) -> Result<TriplePage>;

    /// Applies a write set atomically.
    fn put(&self, writes: WriteSet) -> Result<PutOutcome>;

    /// Drops every row of a table. Intended for development and tests.
    fn clear(&self, table: &str) -> Result<()>;
}
