#![forbid(unsafe_code)]

//! Query trees, cursors and the execution engine.
//!
//! A query is a [`QueryTree`] of [`QueryNode`]s. The [`Executor`] evaluates
//! it bottom-up against a triple store and returns the root output plus a
//! [`GraphResult`] for every evaluated node.

/// Cursor trees and their wire encoding.
///
/// A cursor mirrors the paginating subtree of the query it was produced by.
pub mod cursor;

/// Query execution engine.
///
/// Builds candidate streams from the tree and assembles the root page.
pub mod executor;

/// Property filters, orderings and predicates.
pub mod filter;

/// Query node catalogue.
pub mod node;

/// Relay-style connections and cursor slicing helpers.
pub mod pagination;

/// Performance profiling for query and mutation operations.
///
/// Collects timing and count statistics to identify performance bottlenecks.
pub mod profile;

/// Per-node results.
pub mod result;

mod stream;

/// Persistent query tree.
pub mod tree;

pub use cursor::{Cursor, CursorPayload};
pub use executor::{ExecuteOptions, Executor};
pub use filter::{EdgePredicate, Filter, NodePredicate, Order, Predicate};
pub use node::{ConnectionSpec, EntityKind, QueryNode, Reduction, Shape, TypedHop};
pub use pagination::{
    from_cursor_exclusive, from_cursor_inclusive, to_cursor_exclusive, to_cursor_inclusive,
    Connection, ConnectionArguments, ConnectionEdge, HasCursor, PageInfo,
};
pub use result::{
    EdgeConnectionResult, EdgeResult, ExecutionResult, GraphResult, NodeConnectionResult,
    NodeResult, QueryOutput, ResultMeta,
};
pub use tree::QueryTree;
