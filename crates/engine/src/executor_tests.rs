//! Engine tests.
//!
//! These tests use `MockNode` and the in-memory store so no Postgres
//! connection is required.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use async_trait::async_trait;
use db::models::{OutputEntry, ValueType, WorkflowTrigger};
use db::{MemoryStore, Node, NodeType, WorkflowGraph};
use nodes::executors::{EndNode, StartNode};
use nodes::mock::MockNode;
use nodes::{keys, ExecutableNode, NodeContext, NodeError, NodeOutcome};

use crate::containers::container_executors;
use crate::{EngineError, Hooks, NodeRegistry, WorkflowEngine, WorkflowExecution};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn registry<const N: usize>(entries: [(NodeType, Arc<dyn ExecutableNode>); N]) -> NodeRegistry {
    let mut registry: NodeRegistry = container_executors().into_iter().collect();
    registry.insert(NodeType::Start, Arc::new(StartNode));
    registry.insert(NodeType::End, Arc::new(EndNode));
    registry.extend(entries);
    registry
}

fn engine(registry: NodeRegistry) -> (WorkflowEngine, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    (WorkflowEngine::new(registry, store.clone()), store)
}

fn execution(nodes: Vec<Node>) -> WorkflowExecution {
    WorkflowExecution {
        workflow_id: Uuid::new_v4(),
        workflow_name: "test".into(),
        run_id: Uuid::new_v4(),
        trigger: WorkflowTrigger::Manual,
        graph: WorkflowGraph::new(nodes),
    }
}

fn start() -> Node {
    Node::new("start", NodeType::Start)
}

fn work(id: &str) -> Node {
    Node::new(id, NodeType::Delay)
}

type Events = Arc<Mutex<Vec<String>>>;

/// Hooks that record every event as a short string.
fn recording_hooks(events: &Events) -> Hooks {
    let mut hooks = Hooks::new();
    let e = events.clone();
    hooks.on_start(move |_| {
        let e = e.clone();
        async move {
            e.lock().unwrap().push("run:start".into());
            Ok(())
        }
    });
    let e = events.clone();
    hooks.on_end(move |_| {
        let e = e.clone();
        async move {
            e.lock().unwrap().push("run:end".into());
            Ok(())
        }
    });
    let e = events.clone();
    hooks.on_error(move |event| {
        let e = e.clone();
        async move {
            e.lock()
                .unwrap()
                .push(format!("run:error:cancelled={}", event.cancelled));
            Ok(())
        }
    });
    let e = events.clone();
    hooks.on_node_start(move |event| {
        let e = e.clone();
        async move {
            e.lock().unwrap().push(format!("start:{}", event.node_id));
            Ok(())
        }
    });
    let e = events.clone();
    hooks.on_node_end(move |event| {
        let e = e.clone();
        async move {
            e.lock().unwrap().push(format!("end:{}", event.node_id));
            Ok(())
        }
    });
    let e = events.clone();
    hooks.on_node_error(move |event| {
        let e = e.clone();
        async move {
            e.lock().unwrap().push(format!("error:{}", event.node.node_id));
            Ok(())
        }
    });
    hooks
}

/// Reads the well-known error keys when executed.
struct CaptureError(Arc<Mutex<Option<String>>>);

#[async_trait]
impl ExecutableNode for CaptureError {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        *self.0.lock().unwrap() = ctx.state().get_global(keys::ERROR_NODE_ID).map(|v| v.value);
        Ok(NodeOutcome::new())
    }
}

// ============================================================
// Walking
// ============================================================

#[tokio::test]
async fn nodes_run_in_order_and_fire_hooks() {
    let mock = Arc::new(MockNode::succeeding("work"));
    let (engine, _) = engine(registry([(NodeType::Delay, mock.clone())]));
    let events = Events::default();
    let logs = Arc::new(Mutex::new(Vec::new()));
    let mut hooks = recording_hooks(&events);
    let l = logs.clone();
    hooks.on_node_logging(move |event| {
        let l = l.clone();
        async move {
            l.lock().unwrap().push(event.node.node_id);
            Ok(())
        }
    });
    let engine = engine.with_hooks(hooks);

    engine
        .invoke(execution(vec![start(), work("a"), work("b")]), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(mock.called_nodes(), vec!["a", "b"]);
    assert_eq!(
        *events.lock().unwrap(),
        vec![
            "run:start", "start:start", "end:start", "start:a", "end:a", "start:b", "end:b",
            "run:end"
        ]
    );
    assert_eq!(*logs.lock().unwrap(), vec!["start", "a", "b"]);
}

#[tokio::test]
async fn next_chain_is_walked_like_a_sibling_list() {
    let mock = Arc::new(MockNode::succeeding("work"));
    let (engine, _) = engine(registry([(NodeType::Delay, mock.clone())]));

    let mut a = work("a");
    a.next = Some(Box::new(work("b")));
    engine
        .invoke(execution(vec![start(), a, work("c")]), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(mock.called_nodes(), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn end_node_terminates_successfully() {
    let mock = Arc::new(MockNode::succeeding("work"));
    let (engine, _) = engine(registry([(NodeType::Delay, mock.clone())]));
    let events = Events::default();
    let engine = engine.with_hooks(recording_hooks(&events));

    let result = engine
        .invoke(
            execution(vec![start(), work("a"), Node::new("end", NodeType::End), work("b")]),
            CancellationToken::new(),
        )
        .await;

    assert!(result.is_ok());
    assert_eq!(mock.called_nodes(), vec!["a"]);
    let events = events.lock().unwrap();
    assert_eq!(events.last().map(String::as_str), Some("run:end"));
    assert!(!events.iter().any(|e| e.starts_with("run:error")));
}

#[tokio::test]
async fn end_inside_containers_unwinds_every_level() {
    let mock = Arc::new(MockNode::succeeding("work"));
    let (engine, _) = engine(registry([(NodeType::Delay, mock.clone())]));

    let graph = vec![
        start(),
        Node::new("cond", NodeType::Condition).with_blocks(vec![Node::new(
            "branch",
            NodeType::BranchBlock,
        )
        .with_blocks(vec![
            Node::new("tc", NodeType::TryCatch).with_blocks(vec![Node::new(
                "try",
                NodeType::TryBlock,
            )
            .with_blocks(vec![Node::new("end", NodeType::End), work("inner")])]),
        ])]),
        work("after"),
    ];

    engine
        .invoke(execution(graph), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(mock.call_count(), 0);
}

#[tokio::test]
async fn disabled_nodes_are_skipped() {
    let mock = Arc::new(MockNode::succeeding("work"));
    let (engine, _) = engine(registry([(NodeType::Delay, mock.clone())]));

    engine
        .invoke(
            execution(vec![start(), work("a").disabled(), work("b")]),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(mock.called_nodes(), vec!["b"]);
}

// ============================================================
// Condition
// ============================================================

#[tokio::test]
async fn every_matching_branch_executes() {
    let flag = Arc::new(MockNode::returning(
        "flag",
        NodeOutcome::new().variable("ready", true).variable("days", 12_i64),
    ));
    let mock = Arc::new(MockNode::succeeding("work"));
    let (engine, _) = engine(registry([
        (NodeType::MonitorCertificate, flag.clone()),
        (NodeType::Delay, mock.clone()),
    ]));

    let ready_is = |value: bool| {
        json!({ "expression": {
            "type": "comparison", "operator": "eq",
            "left": { "type": "var", "selector": { "id": "probe", "name": "ready" } },
            "right": { "type": "const", "value": value }
        }})
    };
    let graph = vec![
        start(),
        Node::new("probe", NodeType::MonitorCertificate),
        Node::new("cond", NodeType::Condition).with_blocks(vec![
            Node::new("b1", NodeType::BranchBlock)
                .with_config(ready_is(true))
                .with_blocks(vec![work("x")]),
            Node::new("b2", NodeType::BranchBlock).with_blocks(vec![work("y")]),
            Node::new("b3", NodeType::BranchBlock)
                .with_config(ready_is(false))
                .with_blocks(vec![work("z")]),
            Node::new("b4", NodeType::BranchBlock)
                .with_config(json!({ "expression": {
                    "type": "comparison", "operator": "lt",
                    "left": { "type": "var", "selector": { "id": "probe", "name": "days" } },
                    "right": { "type": "const", "value": 30 }
                }}))
                .with_blocks(vec![work("w")]),
        ]),
    ];

    engine
        .invoke(execution(graph), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(mock.called_nodes(), vec!["x", "y", "w"]);
}

// ============================================================
// Failures
// ============================================================

#[tokio::test]
async fn failing_node_aborts_the_walk() {
    let mock = Arc::new(MockNode::succeeding("work"));
    let (engine, _) = engine(registry([
        (NodeType::Delay, mock.clone()),
        (NodeType::Notify, Arc::new(MockNode::failing("notify", "smtp down"))),
    ]));
    let events = Events::default();
    let engine = engine.with_hooks(recording_hooks(&events));

    let result = engine
        .invoke(
            execution(vec![start(), work("a"), Node::new("f", NodeType::Notify), work("b")]),
            CancellationToken::new(),
        )
        .await;

    assert_matches!(result, Err(EngineError::Node(NodeError::Failed(msg))) if msg == "smtp down");
    assert_eq!(mock.called_nodes(), vec!["a"]);
    let events = events.lock().unwrap();
    assert!(events.contains(&"error:f".to_string()));
    assert_eq!(events.last().map(String::as_str), Some("run:error:cancelled=false"));
}

#[tokio::test]
async fn try_catch_runs_catch_and_lets_siblings_continue() {
    let mock = Arc::new(MockNode::succeeding("work"));
    let seen = Arc::new(Mutex::new(None));
    let (engine, _) = engine(registry([
        (NodeType::Delay, mock.clone()),
        (NodeType::Notify, Arc::new(MockNode::failing("notify", "boom"))),
        (NodeType::UploadCertificate, Arc::new(CaptureError(seen.clone()))),
    ]));
    let events = Events::default();
    let engine = engine.with_hooks(recording_hooks(&events));

    let graph = vec![
        start(),
        Node::new("tc", NodeType::TryCatch).with_blocks(vec![
            Node::new("try", NodeType::TryBlock)
                .with_blocks(vec![Node::new("f", NodeType::Notify), work("skipped")]),
            Node::new("catch", NodeType::CatchBlock).with_blocks(vec![
                Node::new("capture", NodeType::UploadCertificate),
                work("handler"),
            ]),
        ]),
        work("after"),
    ];

    let result = engine.invoke(execution(graph), CancellationToken::new()).await;

    // Catch blocks do not swallow the error.
    assert_matches!(
        result,
        Err(EngineError::Node(NodeError::BlocksException(errors))) if errors.len() == 1
    );
    assert_eq!(mock.called_nodes(), vec!["handler", "after"]);
    assert_eq!(seen.lock().unwrap().as_deref(), Some("f"));

    // Only the failing leaf reports itself.
    let events = events.lock().unwrap();
    let errors: Vec<_> = events.iter().filter(|e| e.starts_with("error:")).collect();
    assert_eq!(errors, vec!["error:f"]);
}

#[tokio::test]
async fn catch_blocks_do_not_run_when_try_succeeds() {
    let mock = Arc::new(MockNode::succeeding("work"));
    let (engine, _) = engine(registry([(NodeType::Delay, mock.clone())]));

    let graph = vec![
        start(),
        Node::new("tc", NodeType::TryCatch).with_blocks(vec![
            Node::new("try", NodeType::TryBlock).with_blocks(vec![work("a")]),
            Node::new("catch", NodeType::CatchBlock).with_blocks(vec![work("handler")]),
        ]),
    ];

    engine
        .invoke(execution(graph), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(mock.called_nodes(), vec!["a"]);
}

#[tokio::test]
async fn unregistered_type_fails_the_run() {
    let (engine, _) = engine(registry([]));

    let result = engine
        .invoke(execution(vec![start(), work("a")]), CancellationToken::new())
        .await;

    assert_matches!(result, Err(EngineError::Node(NodeError::Unregistered(t))) if t == "delay");
}

#[tokio::test]
async fn panics_are_recovered() {
    let (engine, _) = engine(registry([(
        NodeType::Notify,
        Arc::new(MockNode::panicking("notify", "kaboom")),
    )]));
    let events = Events::default();
    let engine = engine.with_hooks(recording_hooks(&events));

    let result = engine
        .invoke(
            execution(vec![start(), Node::new("p", NodeType::Notify)]),
            CancellationToken::new(),
        )
        .await;

    assert_matches!(result, Err(EngineError::Panicked(msg)) if msg.contains("kaboom"));
    assert_eq!(
        events.lock().unwrap().last().map(String::as_str),
        Some("run:error:cancelled=false")
    );
}

#[tokio::test]
async fn hook_errors_do_not_abort_the_run() {
    let mock = Arc::new(MockNode::succeeding("work"));
    let (mut engine, _) = engine(registry([(NodeType::Delay, mock.clone())]));
    engine
        .hooks_mut()
        .on_node_start(|_| async { Err(anyhow::anyhow!("hook broke")) });

    engine
        .invoke(execution(vec![start(), work("a")]), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(mock.call_count(), 1);
}

// ============================================================
// Cancellation
// ============================================================

#[tokio::test]
async fn cancellation_stops_the_run() {
    let mock = Arc::new(MockNode::succeeding("work"));
    let (engine, _) = engine(registry([
        (NodeType::MonitorCertificate, Arc::new(MockNode::blocking("probe"))),
        (NodeType::Delay, mock.clone()),
    ]));
    let events = Events::default();
    let engine = engine.with_hooks(recording_hooks(&events));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let result = engine
        .invoke(
            execution(vec![start(), Node::new("probe", NodeType::MonitorCertificate), work("b")]),
            cancel,
        )
        .await;

    assert_matches!(result, Err(EngineError::Cancelled));
    assert_eq!(mock.call_count(), 0);
    assert_eq!(
        events.lock().unwrap().last().map(String::as_str),
        Some("run:error:cancelled=true")
    );
}

#[tokio::test]
async fn cancelled_before_start_runs_nothing() {
    let mock = Arc::new(MockNode::succeeding("work"));
    let (engine, _) = engine(registry([(NodeType::Delay, mock.clone())]));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = engine.invoke(execution(vec![start(), work("a")]), cancel).await;

    assert_matches!(result, Err(EngineError::Cancelled));
    assert_eq!(mock.call_count(), 0);
}

// ============================================================
// Outputs
// ============================================================

#[tokio::test]
async fn only_persistent_or_forced_outputs_are_stored() {
    let persistent = Arc::new(MockNode::returning(
        "persistent",
        NodeOutcome::new().output(OutputEntry::new("k", "v", ValueType::String).persistent()),
    ));
    let transient = Arc::new(MockNode::returning(
        "transient",
        NodeOutcome::new().output(OutputEntry::new("k", "v", ValueType::String)),
    ));
    let forced = Arc::new(MockNode::returning("forced", NodeOutcome::new().forced()));
    let (engine, store) = engine(registry([
        (NodeType::Delay, persistent),
        (NodeType::MonitorCertificate, transient),
        (NodeType::Notify, forced),
    ]));

    engine
        .invoke(
            execution(vec![
                start(),
                work("p").with_config(json!({ "wait": 0 })),
                Node::new("t", NodeType::MonitorCertificate),
                Node::new("f", NodeType::Notify),
            ]),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    let mut stored: Vec<_> = store
        .all_outputs()
        .await
        .into_iter()
        .map(|o| (o.node_id, o.node_config))
        .collect();
    stored.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(
        stored,
        vec![("f".to_string(), serde_json::Value::Null), ("p".to_string(), json!({ "wait": 0 }))]
    );
}
