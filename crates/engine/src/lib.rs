//! `engine` crate — graph validation and the workflow interpreter.

pub mod containers;
pub mod error;
pub mod executor;
pub mod hooks;
pub mod validate;

pub use error::EngineError;
pub use executor::{standard_registry, NodeRegistry, WorkflowEngine, WorkflowExecution};
pub use hooks::{Hooks, NodeErrorEvent, NodeEvent, NodeLogEvent, RunErrorEvent, RunEvent};
pub use validate::validate_graph;

#[cfg(test)]
mod executor_tests;
