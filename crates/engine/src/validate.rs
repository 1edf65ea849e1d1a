//! Graph validation — run this before persisting or executing a workflow.
//!
//! Rules enforced:
//! 1. The graph is non-empty and its first node is a Start node.
//! 2. Node ids are present and unique across every nesting level.
//! 3. Containers hold the right children: a Condition holds BranchBlocks, a
//!    TryCatch holds TryBlocks followed by CatchBlocks, and block nodes only
//!    appear inside their container.  Leaf nodes have no children.
//! 4. Node configs decode.
//! 5. A deploy node's certificate source is an apply/upload node that comes
//!    earlier in walk order.

use std::collections::{HashMap, HashSet};

use db::graph::siblings;
use db::{Node, NodeType, WorkflowGraph};
use nodes::config::{
    ApplyConfig, BranchConfig, DelayConfig, DeployConfig, MonitorConfig, NotifyConfig,
    UploadConfig,
};

use crate::EngineError;

pub fn validate_graph(graph: &WorkflowGraph) -> Result<(), EngineError> {
    let top = siblings(&graph.nodes);
    let first = top.first().ok_or(EngineError::EmptyGraph)?;
    if first.node_type != NodeType::Start {
        return Err(EngineError::StartNotFirst(first.node_type.to_string()));
    }

    check_level(&graph.nodes, None)?;

    let order = graph.walk();
    let mut seen: HashSet<&str> = HashSet::new();
    for node in &order {
        if node.id.trim().is_empty() {
            return Err(EngineError::MissingNodeId(node.node_type.to_string()));
        }
        if !seen.insert(node.id.as_str()) {
            return Err(EngineError::DuplicateNodeId(node.id.clone()));
        }
        check_config(node)?;
    }

    // Position of every certificate producer in walk order.
    let producers: HashMap<&str, usize> = order
        .iter()
        .enumerate()
        .filter(|(_, n)| n.node_type.produces_certificate())
        .map(|(i, n)| (n.id.as_str(), i))
        .collect();

    for (position, node) in order.iter().enumerate() {
        if node.node_type != NodeType::DeployCertificate || node.disabled {
            continue;
        }
        let cfg: DeployConfig = decode(node)?;
        let reference = cfg.source_node_id();
        match producers.get(reference) {
            Some(&at) if at < position => {}
            _ => {
                return Err(EngineError::UnresolvedReference {
                    node_id: node.id.clone(),
                    reference: reference.to_string(),
                })
            }
        }
    }
    Ok(())
}

fn structure(node: &Node, message: impl Into<String>) -> EngineError {
    EngineError::InvalidStructure {
        node_id: node.id.clone(),
        message: message.into(),
    }
}

/// Check one sibling list whose parent has type `parent`.
fn check_level(nodes: &[Node], parent: Option<NodeType>) -> Result<(), EngineError> {
    let level = siblings(nodes);
    let mut catch_seen = false;

    for node in &level {
        let allowed = match node.node_type {
            NodeType::BranchBlock => parent == Some(NodeType::Condition),
            NodeType::TryBlock | NodeType::CatchBlock => parent == Some(NodeType::TryCatch),
            _ => !matches!(parent, Some(NodeType::Condition) | Some(NodeType::TryCatch)),
        };
        if !allowed {
            let place = parent.map_or_else(|| "the top level".to_string(), |p| format!("a {p} node"));
            return Err(structure(node, format!("{} is not allowed inside {place}", node.node_type)));
        }

        match node.node_type {
            NodeType::TryBlock if catch_seen => {
                return Err(structure(node, "try blocks must precede catch blocks"));
            }
            NodeType::CatchBlock => catch_seen = true,
            _ => {}
        }

        if !node.node_type.is_container() && !node.blocks.is_empty() {
            return Err(structure(node, "only container nodes may have child blocks"));
        }
        let children = siblings(&node.blocks);
        match node.node_type {
            NodeType::Condition if children.is_empty() => {
                return Err(structure(node, "a condition needs at least one branch"));
            }
            NodeType::TryCatch if !children.iter().any(|n| n.node_type == NodeType::TryBlock) => {
                return Err(structure(node, "a try/catch needs a try block"));
            }
            _ => {}
        }
        check_level(&node.blocks, Some(node.node_type))?;
    }

    Ok(())
}

fn decode<T: serde::de::DeserializeOwned>(node: &Node) -> Result<T, EngineError> {
    node.config_as().map_err(|e| EngineError::InvalidConfig {
        node_id: node.id.clone(),
        message: e.to_string(),
    })
}

fn check_config(node: &Node) -> Result<(), EngineError> {
    match node.node_type {
        NodeType::ApplyCertificate => {
            let cfg: ApplyConfig = decode(node)?;
            if !node.disabled {
                cfg.validate().map_err(|message| EngineError::InvalidConfig {
                    node_id: node.id.clone(),
                    message,
                })?;
            }
        }
        NodeType::UploadCertificate => {
            decode::<UploadConfig>(node)?;
        }
        NodeType::MonitorCertificate => {
            decode::<MonitorConfig>(node)?;
        }
        NodeType::DeployCertificate => {
            decode::<DeployConfig>(node)?;
        }
        NodeType::Notify => {
            decode::<NotifyConfig>(node)?;
        }
        NodeType::Delay => {
            decode::<DelayConfig>(node)?;
        }
        NodeType::BranchBlock => {
            decode::<BranchConfig>(node)?;
        }
        NodeType::Start
        | NodeType::End
        | NodeType::Condition
        | NodeType::TryCatch
        | NodeType::TryBlock
        | NodeType::CatchBlock => {}
    }
    Ok(())
}
