//! `nodes` crate — the `ExecutableNode` trait and the leaf node executors.
//!
//! Every node kind the engine runs implements [`ExecutableNode`].  Executors
//! reach persistence, the ACME client and the provider registries through
//! [`NodeServices`]; per-run data flows through the scoped [`StateStore`].

pub mod config;
pub mod error;
pub mod executors;
pub mod expr;
pub mod logger;
pub mod mock;
pub mod probe;
pub mod providers;
pub mod services;
pub mod skip;
pub mod state;
pub mod template;
pub mod traits;

pub use error::NodeError;
pub use executors::standard_executors;
pub use logger::{LogRecord, NodeLogger};
pub use probe::{CertificateProbe, ProbeTarget, TlsProbe};
pub use services::NodeServices;
pub use state::{keys, Scope, StateStore, StateValue, Variable};
pub use traits::{BlockWalker, ExecutableNode, NodeContext, NodeOutcome, RunContext};
