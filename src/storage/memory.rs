use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::{debug, trace};

use super::triple::{PrimaryKey, Triple, TripleKey};
use super::{
    Condition, PutOutcome, Rejection, TriplePage, TripleQuery, TripleStore, WriteOp, WriteSet,
};
use crate::types::Result;

#[derive(Default)]
struct Table {
    rows: HashMap<PrimaryKey, Triple>,
    index: BTreeSet<TripleKey>,
}

impl Table {
    fn upsert(&mut self, triple: Triple) {
        if let Some(previous) = self.rows.insert(triple.primary_key(), triple.clone()) {
            self.index.remove(&previous.key());
        }
        self.index.insert(triple.key());
    }

    fn remove(&mut self, key: &PrimaryKey) {
        if let Some(previous) = self.rows.remove(key) {
            self.index.remove(&previous.key());
        }
    }

    fn row_for_index(&self, key: &TripleKey) -> Option<&Triple> {
        self.rows.get(&PrimaryKey {
            partition: key.partition.clone(),
            subject: key.subject.clone(),
            predicate: key.predicate.clone(),
        })
    }
}

/// Counters exposed for tests and diagnostics.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MemoryStoreStats {
    /// Range queries served.
    pub queries: u64,
    /// Rows returned by range queries.
    pub rows_read: u64,
    /// Write sets committed.
    pub commits: u64,
    /// Write sets rejected by a condition.
    pub rejections: u64,
}

/// Process-local [`TripleStore`] backed by ordered maps.
///
/// A put checks every condition and applies every item while holding the
/// table write lock, so partial application is never observable.
#[derive(Default)]
pub struct MemoryTripleStore {
    tables: RwLock<BTreeMap<String, Table>>,
    queries: AtomicU64,
    rows_read: AtomicU64,
    commits: AtomicU64,
    rejections: AtomicU64,
}

impl MemoryTripleStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the store counters.
    pub fn stats(&self) -> MemoryStoreStats {
        MemoryStoreStats {
            queries: self.queries.load(Ordering::Relaxed),
            rows_read: self.rows_read.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            rejections: self.rejections.load(Ordering::Relaxed),
        }
    }

    /// Number of rows stored in a table.
    pub fn row_count(&self, table: &str) -> usize {
        self.tables
            .read()
            .get(table)
            .map(|t| t.rows.len())
            .unwrap_or(0)
    }

    /// Returns the row stored at a primary key.
    pub fn get(&self, table: &str, key: &PrimaryKey) -> Option<Triple> {
        self.tables
            .read()
            .get(table)
            .and_then(|t| t.rows.get(key).cloned())
    }
}

fn check_condition(current: Option<&Triple>, condition: &Condition) -> std::result::Result<(), String> {
    match (condition, current) {
        (Condition::NotExists, None) => Ok(()),
        (Condition::NotExists, Some(_)) => Err("row already exists".to_owned()),
        (Condition::Exists, Some(_)) => Ok(()),
        (Condition::Exists | Condition::VersionEquals(_), None) => Err("row does not exist".to_owned()),
        (Condition::VersionEquals(expected), Some(row)) => match row.version {
            Some(found) if found == *expected => Ok(()),
            found => Err(format!(
                "version mismatch: expected {expected}, found {}",
                found.map(|v| v.to_string()).unwrap_or_else(|| "none".into())
            )),
        },
    }
}

impl TripleStore for MemoryTripleStore {
    fn query_by_partition_and_indexed_object(&self, query: &TripleQuery) -> Result<TriplePage> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        let tables = self.tables.read();
        let Some(table) = tables.get(&query.table) else {
            return Ok(TriplePage::default());
        };
        let in_range = |key: &TripleKey| {
            key.partition == query.partition && key.object.starts_with(&query.object_prefix)
        };
        let prefix_floor = TripleKey {
            partition: query.partition.clone(),
            object: query.object_prefix.clone(),
            subject: String::new(),
            predicate: String::new(),
        };
        let keys: Box<dyn Iterator<Item = &TripleKey> + '_> = if query.scan_forward {
            let lower = match &query.exclusive_start_key {
                Some(start) if *start >= prefix_floor => Bound::Excluded(start.clone()),
                _ => Bound::Included(prefix_floor),
            };
            Box::new(
                table
                    .index
                    .range((lower, Bound::Unbounded))
                    .skip_while(move |k| !in_range(*k))
                    .take_while(move |k| in_range(*k)),
            )
        } else {
            let upper = match &query.exclusive_start_key {
                Some(start) if *start <= prefix_floor => return Ok(TriplePage::default()),
                Some(start) => Bound::Excluded(start.clone()),
                None => Bound::Unbounded,
            };
            Box::new(
                table
                    .index
                    .range((Bound::Included(prefix_floor), upper))
                    .rev()
                    .skip_while(move |k| !in_range(*k))
                    .take_while(move |k| in_range(*k)),
            )
        };
        let mut triples = Vec::new();
        let mut continuation = None;
        for key in keys {
            if triples.len() == query.limit {
                continuation = triples.last().map(Triple::key);
                break;
            }
            if let Some(row) = table.row_for_index(key) {
                triples.push(row.clone());
            }
        }
        self.rows_read
            .fetch_add(triples.len() as u64, Ordering::Relaxed);
        trace!(
            partition = %query.partition,
            prefix = %query.object_prefix,
            rows = triples.len(),
            more = continuation.is_some(),
            "memory_store.query"
        );
        Ok(TriplePage {
            triples,
            continuation,
        })
    }

    fn put(&self, writes: WriteSet) -> Result<PutOutcome> {
        let mut tables = self.tables.write();
        let table = tables.entry(writes.table.clone()).or_default();
        for (index, item) in writes.items.iter().enumerate() {
            let Some(condition) = &item.condition else {
                continue;
            };
            let key = item.op.primary_key();
            if let Err(reason) = check_condition(table.rows.get(&key), condition) {
                self.rejections.fetch_add(1, Ordering::Relaxed);
                debug!(index, %reason, subject = %key.subject, "memory_store.put.rejected");
                return Ok(PutOutcome::Rejected(Rejection { index, reason }));
            }
        }
        let applied = writes.items.len();
        for item in writes.items {
            match item.op {
                WriteOp::Put(triple) => table.upsert(triple),
                WriteOp::Delete(key) => table.remove(&key),
                WriteOp::Check(_) => {}
            }
        }
        self.commits.fetch_add(1, Ordering::Relaxed);
        debug!(items = applied, "memory_store.put.committed");
        Ok(PutOutcome::Committed)
    }

    fn clear(&self, table: &str) -> Result<()> {
        self.tables.write().remove(table);
        Ok(())
    }
}
