//! Workflow graph model.
//!
//! A graph is an ordered list of top-level nodes.  Every node may also point
//! at a `next` sibling (the linked authoring form) and container nodes carry
//! their children in `blocks`.  Both forms flatten to the same sibling order
//! through [`siblings`].

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// NodeType
// ---------------------------------------------------------------------------

/// Closed set of node kinds understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Start,
    End,
    Delay,
    Condition,
    BranchBlock,
    TryCatch,
    TryBlock,
    CatchBlock,
    ApplyCertificate,
    UploadCertificate,
    MonitorCertificate,
    DeployCertificate,
    Notify,
}

impl NodeType {
    /// Container nodes own child blocks instead of doing work themselves.
    pub fn is_container(self) -> bool {
        matches!(
            self,
            Self::Condition | Self::BranchBlock | Self::TryCatch | Self::TryBlock | Self::CatchBlock
        )
    }

    /// Nodes that produce a certificate consumable by deploy nodes.
    pub fn produces_certificate(self) -> bool {
        matches!(self, Self::ApplyCertificate | Self::UploadCertificate)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::End => "end",
            Self::Delay => "delay",
            Self::Condition => "condition",
            Self::BranchBlock => "branch_block",
            Self::TryCatch => "try_catch",
            Self::TryBlock => "try_block",
            Self::CatchBlock => "catch_block",
            Self::ApplyCertificate => "apply_certificate",
            Self::UploadCertificate => "upload_certificate",
            Self::MonitorCertificate => "monitor_certificate",
            Self::DeployCertificate => "deploy_certificate",
            Self::Notify => "notify",
        }
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// A vertex in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub disabled: bool,
    /// Type-specific configuration, decoded by the node's executor.
    #[serde(default)]
    pub config: serde_json::Value,
    /// Linked successor (alternative to listing siblings side by side).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<Box<Node>>,
    /// Ordered children of a container node.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocks: Vec<Node>,
}

impl Node {
    pub fn new(id: impl Into<String>, node_type: NodeType) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            node_type,
            disabled: false,
            config: serde_json::Value::Null,
            next: None,
            blocks: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    pub fn with_blocks(mut self, blocks: Vec<Node>) -> Self {
        self.blocks = blocks;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    /// Decode the configuration payload into the executor's typed config.
    pub fn config_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        let value = if self.config.is_null() {
            serde_json::Value::Object(Default::default())
        } else {
            self.config.clone()
        };
        serde_json::from_value(value)
    }
}

/// Flatten a sibling list: every listed node followed by its `next` chain.
pub fn siblings(nodes: &[Node]) -> Vec<&Node> {
    let mut out = Vec::with_capacity(nodes.len());
    for node in nodes {
        let mut cursor = Some(node);
        while let Some(current) = cursor {
            out.push(current);
            cursor = current.next.as_deref();
        }
    }
    out
}

// ---------------------------------------------------------------------------
// WorkflowGraph
// ---------------------------------------------------------------------------

/// The full graph of a workflow (or the snapshot held by a run).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowGraph {
    #[serde(default)]
    pub nodes: Vec<Node>,
}

impl WorkflowGraph {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    /// Depth-first walk over every node in document order.
    pub fn walk(&self) -> Vec<&Node> {
        fn visit<'a>(nodes: &'a [Node], out: &mut Vec<&'a Node>) {
            for node in siblings(nodes) {
                out.push(node);
                visit(&node.blocks, out);
            }
        }

        let mut out = Vec::new();
        visit(&self.nodes, &mut out);
        out
    }

    pub fn find(&self, node_id: &str) -> Option<&Node> {
        self.walk().into_iter().find(|n| n.id == node_id)
    }
}
