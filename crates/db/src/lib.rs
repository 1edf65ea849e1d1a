//! `db` crate — entity models and the persistence layer.
//!
//! Provides the workflow graph model, typed entities, one repository trait
//! per entity, an in-memory store and a Postgres store.  No business logic
//! lives here.

pub mod error;
pub mod graph;
pub mod memory;
pub mod models;
pub mod pool;
pub mod repository;

pub use error::DbError;
pub use graph::{Node, NodeType, WorkflowGraph};
pub use memory::MemoryStore;
pub use pool::{DbPool, PgStore};
pub use repository::Repositories;
