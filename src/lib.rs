//! Strata: a schemaless graph layer over a partitioned triple store.
//!
//! Queries are trees of composable nodes evaluated bottom-up into
//! cursor-paginated connections; mutations are planned into one conditional
//! write set guarded by optimistic node versions.

#![warn(missing_docs)]

pub mod client;
pub mod config;
pub mod model;
pub mod mutation;
pub mod query;
pub mod storage;
pub mod types;

pub use client::{EdgeConnectionQuery, EdgeQuery, GraphClient, NodeConnectionQuery, NodeQuery};
pub use config::EngineConfig;
pub use model::{Edge, EdgeSide, Entity, Node, Props};
pub use mutation::{EdgeByPropCheck, Mutator, PutEntity, PutOptions, PutRequest, PutResult};
pub use query::{
    Connection, ConnectionArguments, Cursor, ExecuteOptions, Executor, Filter, Order, QueryTree,
};
pub use storage::{MemoryTripleStore, TripleStore};
pub use types::{EdgeId, NodeId, Result, StrataError};
