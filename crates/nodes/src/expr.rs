//! Branch expressions.
//!
//! A small JSON expression tree evaluated against the run's state store.
//! Every value is coerced to text; ordering operators parse both sides as
//! numbers.
//!
//! ```json
//! { "type": "logical", "operator": "and",
//!   "left":  { "type": "comparison", "operator": "lt",
//!              "left": { "type": "var", "selector": { "id": "monitor", "name": "certificate.daysLeft" } },
//!              "right": { "type": "const", "value": 30 } },
//!   "right": { "type": "not", "expr": { "type": "var", "selector": { "id": "apply", "name": "skipped" } } } }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::{Scope, StateStore};
use crate::NodeError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selector {
    /// Node id; empty or absent selects the global scope.
    #[serde(default)]
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComparisonOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Expr {
    Const {
        value: Value,
    },
    Var {
        selector: Selector,
    },
    Comparison {
        operator: ComparisonOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        operator: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Not {
        expr: Box<Expr>,
    },
}

impl Expr {
    /// Evaluate to a boolean.
    pub fn eval_bool(&self, state: &StateStore) -> Result<bool, NodeError> {
        let text = self.eval(state)?;
        match text.as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(NodeError::Config(format!(
                "expression evaluated to '{other}', expected a boolean"
            ))),
        }
    }

    /// Evaluate to text.
    pub fn eval(&self, state: &StateStore) -> Result<String, NodeError> {
        match self {
            Self::Const { value } => Ok(value_to_text(value)),
            Self::Var { selector } => {
                let scope = if selector.id.is_empty() {
                    Scope::Global
                } else {
                    Scope::node(selector.id.as_str())
                };
                state
                    .get(&scope, &selector.name)
                    .map(|v| v.value)
                    .ok_or_else(|| {
                        NodeError::failed(format!(
                            "variable '{}' of node '{}' is not set",
                            selector.name, selector.id
                        ))
                    })
            }
            Self::Comparison {
                operator,
                left,
                right,
            } => {
                let l = left.eval(state)?;
                let r = right.eval(state)?;
                compare(*operator, &l, &r).map(|b| b.to_string())
            }
            Self::Logical {
                operator,
                left,
                right,
            } => {
                let l = left.eval_bool(state)?;
                let result = match operator {
                    LogicalOp::And => l && right.eval_bool(state)?,
                    LogicalOp::Or => l || right.eval_bool(state)?,
                };
                Ok(result.to_string())
            }
            Self::Not { expr } => Ok((!expr.eval_bool(state)?).to_string()),
        }
    }
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn compare(op: ComparisonOp, left: &str, right: &str) -> Result<bool, NodeError> {
    let numbers = || -> Result<(f64, f64), NodeError> { Ok((number(left)?, number(right)?)) };
    match op {
        ComparisonOp::Eq => Ok(left == right),
        ComparisonOp::Neq => Ok(left != right),
        ComparisonOp::Gt => numbers().map(|(l, r)| l > r),
        ComparisonOp::Gte => numbers().map(|(l, r)| l >= r),
        ComparisonOp::Lt => numbers().map(|(l, r)| l < r),
        ComparisonOp::Lte => numbers().map(|(l, r)| l <= r),
    }
}

fn number(s: &str) -> Result<f64, NodeError> {
    s.trim()
        .parse()
        .map_err(|_| NodeError::failed(format!("'{s}' is not a number")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::keys;
    use serde_json::json;

    fn state() -> StateStore {
        let state = StateStore::new();
        state.set(Scope::node("monitor"), keys::CERTIFICATE_DAYS_LEFT, 12i64);
        state.set(Scope::node("apply"), keys::SKIPPED, false);
        state
    }

    #[test]
    fn nested_expression_from_json() {
        let expr: Expr = serde_json::from_value(json!({
            "type": "logical", "operator": "and",
            "left": { "type": "comparison", "operator": "lt",
                      "left": { "type": "var", "selector": { "id": "monitor", "name": "certificate.daysLeft" } },
                      "right": { "type": "const", "value": 30 } },
            "right": { "type": "not",
                       "expr": { "type": "var", "selector": { "id": "apply", "name": "skipped" } } }
        }))
        .unwrap();

        assert!(expr.eval_bool(&state()).unwrap());
    }

    #[test]
    fn equality_compares_text() {
        let expr = Expr::Comparison {
            operator: ComparisonOp::Eq,
            left: Box::new(Expr::Var {
                selector: Selector {
                    id: "apply".into(),
                    name: "skipped".into(),
                },
            }),
            right: Box::new(Expr::Const { value: json!(false) }),
        };
        assert!(expr.eval_bool(&state()).unwrap());
    }

    #[test]
    fn missing_variable_and_non_numbers_fail() {
        let missing = Expr::Var {
            selector: Selector {
                id: "nope".into(),
                name: "x".into(),
            },
        };
        assert!(missing.eval(&state()).is_err());

        let bad = Expr::Comparison {
            operator: ComparisonOp::Gt,
            left: Box::new(Expr::Const { value: json!("abc") }),
            right: Box::new(Expr::Const { value: json!(1) }),
        };
        assert!(bad.eval_bool(&state()).is_err());
    }
}
