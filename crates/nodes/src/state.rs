//! Scoped key/value store shared by the nodes of one run.
//!
//! Entries live for one run only.  A clone shares the same map; the store is
//! never handed to another run.

use std::sync::{Arc, PoisonError, RwLock};

use db::models::ValueType;
use indexmap::IndexMap;

/// Well-known state keys.
pub mod keys {
    pub const NODE_ID: &str = "node.id";
    pub const NODE_NAME: &str = "node.name";
    pub const SKIPPED: &str = "skipped";
    pub const CERTIFICATE: &str = "certificate";
    pub const CERTIFICATE_VALIDITY: &str = "certificate.validity";
    pub const CERTIFICATE_DAYS_LEFT: &str = "certificate.daysLeft";

    pub const ERROR_NODE_ID: &str = "$workflow.error.nodeId";
    pub const ERROR_NODE_NAME: &str = "$workflow.error.nodeName";
    pub const ERROR_MESSAGE: &str = "$workflow.error.message";
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    Node(String),
}

impl Scope {
    pub fn node(id: impl Into<String>) -> Self {
        Self::Node(id.into())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StateValue {
    pub value: String,
    pub value_type: ValueType,
}

impl StateValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self.value.as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.value.trim().parse().ok()
    }
}

impl From<bool> for StateValue {
    fn from(v: bool) -> Self {
        Self {
            value: v.to_string(),
            value_type: ValueType::Boolean,
        }
    }
}

impl From<i64> for StateValue {
    fn from(v: i64) -> Self {
        Self {
            value: v.to_string(),
            value_type: ValueType::Number,
        }
    }
}

impl From<f64> for StateValue {
    fn from(v: f64) -> Self {
        Self {
            value: v.to_string(),
            value_type: ValueType::Number,
        }
    }
}

impl From<String> for StateValue {
    fn from(v: String) -> Self {
        Self {
            value: v,
            value_type: ValueType::String,
        }
    }
}

impl From<&str> for StateValue {
    fn from(v: &str) -> Self {
        v.to_string().into()
    }
}

/// One variable produced by a node, applied under that node's scope.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub key: String,
    pub value: StateValue,
}

type Entries = IndexMap<(Scope, String), StateValue>;

#[derive(Debug, Clone, Default)]
pub struct StateStore {
    entries: Arc<RwLock<Entries>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, scope: Scope, key: impl Into<String>, value: impl Into<StateValue>) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((scope, key.into()), value.into());
    }

    pub fn get(&self, scope: &Scope, key: &str) -> Option<StateValue> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(scope.clone(), key.to_string()))
            .cloned()
    }

    pub fn get_node(&self, node_id: &str, key: &str) -> Option<StateValue> {
        self.get(&Scope::node(node_id), key)
    }

    pub fn get_global(&self, key: &str) -> Option<StateValue> {
        self.get(&Scope::Global, key)
    }

    /// Every scope that recorded `key`, in insertion order.
    pub fn scopes_with(&self, key: &str) -> Vec<(Scope, StateValue)> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|((_, k), _)| k == key)
            .map(|((scope, _), v)| (scope.clone(), v.clone()))
            .collect()
    }

    /// True when at least one node recorded `skipped` and every such record
    /// is true.
    pub fn all_recorded_skipped(&self) -> bool {
        let recorded = self.scopes_with(keys::SKIPPED);
        !recorded.is_empty() && recorded.iter().all(|(_, v)| v.as_bool() == Some(true))
    }

    pub fn record_error(&self, node_id: &str, node_name: &str, message: &str) {
        self.set(Scope::Global, keys::ERROR_NODE_ID, node_id);
        self.set(Scope::Global, keys::ERROR_NODE_NAME, node_name);
        self.set(Scope::Global, keys::ERROR_MESSAGE, message);
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
