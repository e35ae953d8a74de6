// SPDX-License-Identifier: MIT

//! Integration tests for canvas compilation, execution and lifecycle
//!
//! These tests drive whole canvases through the builder and the service
//! layer using mock components.

use async_trait::async_trait;
use kinetic_canvas::adk::error::{FlowError, ModelError};
use kinetic_canvas::adk::model::{Content, GenerationConfig, Model};
use kinetic_canvas::kinetic::config::EngineConfig;
use kinetic_canvas::kinetic::workflow::graph::{InvokeOptions, NodeType};
use kinetic_canvas::kinetic::workflow::reference::ValidateConfig;
use kinetic_canvas::kinetic::workflow::registry::NodeRegistry;
use kinetic_canvas::kinetic::workflow::repository::{
    CanvasProvider, InMemoryRepository, WorkflowRepository,
};
use kinetic_canvas::kinetic::workflow::service::{CheckType, CopyOutcome};
use kinetic_canvas::kinetic::workflow::state::InMemoryCheckpointStore;
use kinetic_canvas::kinetic::workflow::types::Canvas;
use kinetic_canvas::kinetic::workflow::{WorkflowBuilder, WorkflowService};
use serde_json::{json, Map, Value};
use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Mock Components
// ============================================================================

/// Mock model that replays scripted replies and records history sizes
struct MockModel {
    replies: Arc<Mutex<VecDeque<String>>>,
    history_lens: Arc<Mutex<Vec<usize>>>,
}

impl MockModel {
    fn new(replies: &[&str]) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies.iter().map(|r| r.to_string()).collect())),
            history_lens: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl Model for MockModel {
    async fn generate_content(
        &self,
        history: &[Content],
        _config: Option<&GenerationConfig>,
    ) -> Result<Content, ModelError> {
        self.history_lens.lock().unwrap().push(history.len());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ModelError::InvalidResponse("no scripted reply left".to_string()))?;
        Ok(Content::model(reply))
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn canvas(raw: Value) -> Canvas {
    serde_json::from_value(raw).unwrap()
}

fn input(raw: Value) -> Map<String, Value> {
    raw.as_object().cloned().unwrap()
}

fn builder(model: Option<Arc<dyn Model>>) -> (WorkflowBuilder, Arc<InMemoryCheckpointStore>) {
    let store = Arc::new(InMemoryCheckpointStore::new());
    let builder = WorkflowBuilder::new(NodeRegistry::with_builtins(model, 3), store.clone());
    (builder, store)
}

fn entry(outputs: Value) -> Value {
    json!({"id": "entry", "type": "entry", "data": {"outputs": outputs}})
}

fn reference(name: &str, block: &str, path: &str) -> Value {
    json!({"name": name, "input": {"type": "ref", "blockID": block, "path": path}})
}

fn exit(params: Vec<Value>) -> Value {
    json!({"id": "exit", "type": "exit", "data": {"inputs": {"inputParameters": params}}})
}

/// entry(query) -> qa -> exit(answer)
fn direct_qa_canvas() -> Canvas {
    canvas(json!({
        "nodes": [
            entry(json!([{"name": "query", "type": "string", "required": true}])),
            {"id": "qa", "type": "question_answer", "data": {"inputs": {
                "inputParameters": [reference("query", "entry", "query")],
                "config": {"questionTpl": "{{query}}"}
            }}},
            exit(vec![reference("answer", "qa", "USER_RESPONSE")])
        ],
        "edges": [
            {"sourceNodeID": "entry", "targetNodeID": "qa"},
            {"sourceNodeID": "qa", "targetNodeID": "exit"}
        ]
    }))
}

/// A choice question whose every port leads to the exit
fn choice_qa_canvas(config: Value, ports: &[&str], params: Vec<Value>) -> Canvas {
    let mut edges = vec![json!({"sourceNodeID": "entry", "targetNodeID": "qa"})];
    for port in ports {
        edges.push(json!({"sourceNodeID": "qa", "targetNodeID": "exit", "sourcePortID": port}));
    }
    canvas(json!({
        "nodes": [
            entry(json!([{"name": "options", "type": "array"}])),
            {"id": "qa", "type": "question_answer", "data": {"inputs": {
                "inputParameters": params,
                "config": config
            }}},
            exit(vec![
                reference("id", "qa", "option_id"),
                reference("content", "qa", "option_content")
            ])
        ],
        "edges": edges
    }))
}

/// entry -> sub_workflow(target) per target -> exit
fn calling(targets: &[i64]) -> Canvas {
    let mut nodes = vec![json!({"id": "entry", "type": "entry"})];
    let mut edges = Vec::new();
    let mut prev = "entry".to_string();
    for (i, target) in targets.iter().enumerate() {
        let id = format!("sub{}", i);
        nodes.push(json!({"id": id, "type": "sub_workflow",
                          "data": {"inputs": {"workflowId": target.to_string()}}}));
        edges.push(json!({"sourceNodeID": prev, "targetNodeID": id}));
        prev = id;
    }
    nodes.push(json!({"id": "exit", "type": "exit"}));
    edges.push(json!({"sourceNodeID": prev, "targetNodeID": "exit"}));
    canvas(json!({"nodes": nodes, "edges": edges}))
}

fn service() -> (WorkflowService, InMemoryRepository) {
    let repo = InMemoryRepository::new();
    let service = WorkflowService::new(
        Arc::new(repo.clone()),
        Arc::new(repo.clone()),
        EngineConfig::default(),
    );
    (service, repo)
}

// ============================================================================
// Question-answer runs
// ============================================================================

#[tokio::test]
async fn test_direct_answer_suspends_and_resumes() {
    let (builder, store) = builder(None);
    let workflow = builder.build(&direct_qa_canvas()).await.unwrap();

    let err = workflow
        .invoke(
            input(json!({"query": "what's your name?"})),
            InvokeOptions::checkpoint("direct"),
        )
        .await
        .unwrap_err();
    let info = err.interrupt_info().expect("run should suspend");
    assert_eq!(info.node_key, "qa");
    assert_eq!(info.checkpoint_id.as_deref(), Some("direct"));
    assert_eq!(info.payload, json!({"question": "what's your name?"}));
    assert_eq!(store.len().await, 1);

    let output = workflow
        .invoke(
            Map::new(),
            InvokeOptions::checkpoint("direct").resume("qa", json!("my name is eino")),
        )
        .await
        .unwrap();
    assert_eq!(Value::Object(output), json!({"answer": "my name is eino"}));
    assert!(store.is_empty().await);

    // The finished run's checkpoint is gone
    assert!(matches!(
        workflow
            .invoke(Map::new(), InvokeOptions::checkpoint("direct").resume_only())
            .await,
        Err(FlowError::CheckpointNotFound(id)) if id == "direct"
    ));
}

#[tokio::test]
async fn test_resume_without_answer_asks_again() {
    let (builder, _) = builder(None);
    let workflow = builder.build(&direct_qa_canvas()).await.unwrap();

    workflow
        .invoke(input(json!({"query": "name?"})), InvokeOptions::checkpoint("again"))
        .await
        .unwrap_err();
    let err = workflow
        .invoke(Map::new(), InvokeOptions::checkpoint("again"))
        .await
        .unwrap_err();
    let info = err.interrupt_info().unwrap();
    assert_eq!(info.node_key, "qa");
    assert_eq!(info.payload, json!({"question": "name?"}));
}

#[tokio::test]
async fn test_fixed_choice_falls_back_to_other() {
    let config = json!({
        "questionTpl": "What would you like to do?",
        "answerType": "choices",
        "choiceType": "fixed",
        "fixedChoices": ["make agent", "make workflow"]
    });
    let (builder, _) = builder(None);
    let workflow = builder
        .build(&choice_qa_canvas(
            config,
            &["branch_0", "branch_1", "default"],
            vec![],
        ))
        .await
        .unwrap();

    let err = workflow
        .invoke(input(json!({})), InvokeOptions::checkpoint("fixed"))
        .await
        .unwrap_err();
    assert_eq!(
        err.interrupt_info().unwrap().payload,
        json!({"question": "What would you like to do?", "choices": ["make agent", "make workflow"]})
    );

    let output = workflow
        .invoke(
            Map::new(),
            InvokeOptions::checkpoint("fixed").resume("qa", json!("make a plugin")),
        )
        .await
        .unwrap();
    assert_eq!(
        Value::Object(output),
        json!({"id": "other", "content": "make a plugin"})
    );
}

#[tokio::test]
async fn test_fixed_choice_matches_by_content() {
    let config = json!({
        "questionTpl": "Where do you live?",
        "answerType": "choices",
        "fixedChoices": ["beijing", "shanghai"]
    });
    let (builder, _) = builder(None);
    let workflow = builder
        .build(&choice_qa_canvas(
            config,
            &["branch_0", "branch_1", "default"],
            vec![],
        ))
        .await
        .unwrap();

    workflow
        .invoke(input(json!({})), InvokeOptions::checkpoint("content"))
        .await
        .unwrap_err();
    let output = workflow
        .invoke(
            Map::new(),
            InvokeOptions::checkpoint("content").resume("qa", json!("shanghai")),
        )
        .await
        .unwrap();
    assert_eq!(
        Value::Object(output),
        json!({"id": "B", "content": "shanghai"})
    );
}

#[tokio::test]
async fn test_dynamic_choice_maps_to_letter_id() {
    let config = json!({
        "questionTpl": "Pick a city",
        "answerType": "choices",
        "choiceType": "dynamic"
    });
    let (builder, _) = builder(None);
    let workflow = builder
        .build(&choice_qa_canvas(
            config,
            &["branch_0", "default"],
            vec![reference("dynamic_option", "entry", "options")],
        ))
        .await
        .unwrap();

    let err = workflow
        .invoke(
            input(json!({"options": ["beijing", "shanghai"]})),
            InvokeOptions::checkpoint("dynamic"),
        )
        .await
        .unwrap_err();
    assert_eq!(
        err.interrupt_info().unwrap().payload["choices"],
        json!(["beijing", "shanghai"])
    );

    let output = workflow
        .invoke(
            Map::new(),
            InvokeOptions::checkpoint("dynamic").resume("qa", json!("beijing")),
        )
        .await
        .unwrap();
    assert_eq!(Value::Object(output), json!({"id": "A", "content": "beijing"}));
}

#[tokio::test]
async fn test_multi_turn_extraction() {
    let model = MockModel::new(&[
        r#"{"question": "how old are you?"}"#,
        r#"{"fields": {"name": "eino", "age": "3"}}"#,
    ]);
    let history_lens = model.history_lens.clone();
    let (builder, _) = builder(Some(Arc::new(model)));

    let workflow = builder
        .build(&canvas(json!({
            "nodes": [
                entry(json!([])),
                {"id": "qa", "type": "question_answer", "data": {
                    "inputs": {"config": {
                        "questionTpl": "Tell me about yourself",
                        "extractFromAnswer": true
                    }},
                    "outputs": [
                        {"name": "name", "type": "string", "required": true},
                        {"name": "age", "type": "integer"}
                    ]
                }},
                exit(vec![
                    reference("name", "qa", "name"),
                    reference("age", "qa", "age"),
                    reference("last", "qa", "USER_RESPONSE")
                ])
            ],
            "edges": [
                {"sourceNodeID": "entry", "targetNodeID": "qa"},
                {"sourceNodeID": "qa", "targetNodeID": "exit"}
            ]
        })))
        .await
        .unwrap();

    let err = workflow
        .invoke(Map::new(), InvokeOptions::checkpoint("extract"))
        .await
        .unwrap_err();
    assert_eq!(
        err.interrupt_info().unwrap().payload,
        json!({"question": "Tell me about yourself"})
    );

    let err = workflow
        .invoke(
            Map::new(),
            InvokeOptions::checkpoint("extract").resume("qa", json!("I'm eino")),
        )
        .await
        .unwrap_err();
    assert_eq!(
        err.interrupt_info().unwrap().payload,
        json!({"question": "how old are you?"})
    );

    let output = workflow
        .invoke(
            Map::new(),
            InvokeOptions::checkpoint("extract").resume("qa", json!("3")),
        )
        .await
        .unwrap();
    assert_eq!(
        Value::Object(output),
        json!({"name": "eino", "age": 3, "last": "3"})
    );
    // System prompt plus one question/answer pair per round
    assert_eq!(*history_lens.lock().unwrap(), vec![3, 5]);
}

#[tokio::test]
async fn test_cancelled_run_saves_nothing() {
    let (builder, store) = builder(None);
    let workflow = builder.build(&direct_qa_canvas()).await.unwrap();

    let token = CancellationToken::new();
    token.cancel();
    let result = workflow
        .invoke(
            input(json!({"query": "q"})),
            InvokeOptions::checkpoint("cancelled").with_cancel(token),
        )
        .await;
    assert!(matches!(result, Err(FlowError::Cancelled)));
    assert!(store.is_empty().await);
}

// ============================================================================
// Repository-backed runs
// ============================================================================

#[tokio::test]
async fn test_interrupt_inside_stored_sub_workflow() {
    let (service, repo) = service();
    let child = service
        .create("ask", "", None, Some(direct_qa_canvas()))
        .await
        .unwrap();

    let parent = canvas(json!({
        "nodes": [
            entry(json!([{"name": "query", "type": "string"}])),
            {"id": "sub", "type": "sub_workflow", "data": {"inputs": {
                "workflowId": child.to_string(),
                "inputParameters": [reference("query", "entry", "query")]
            }}},
            exit(vec![reference("reply", "sub", "answer")])
        ],
        "edges": [
            {"sourceNodeID": "entry", "targetNodeID": "sub"},
            {"sourceNodeID": "sub", "targetNodeID": "exit"}
        ]
    }));

    let (builder, store) = builder(None);
    let provider: Arc<dyn CanvasProvider> = Arc::new(repo);
    let workflow = builder.with_provider(provider).build(&parent).await.unwrap();

    let err = workflow
        .invoke(input(json!({"query": "name?"})), InvokeOptions::checkpoint("nested"))
        .await
        .unwrap_err();
    let info = err.interrupt_info().unwrap();
    assert_eq!(info.node_key, "sub");
    assert_eq!(info.node_path, vec!["sub".to_string(), "qa".to_string()]);

    let output = workflow
        .invoke(
            Map::new(),
            InvokeOptions::checkpoint("nested").resume("sub", json!("eino")),
        )
        .await
        .unwrap();
    assert_eq!(Value::Object(output), json!({"reply": "eino"}));
    assert!(store.is_empty().await);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_test_run_then_publish_and_track_references() {
    let (service, repo) = service();
    let child = service.create("child", "", None, None).await.unwrap();
    let parent = service
        .create("parent", "", None, Some(calling(&[child])))
        .await
        .unwrap();

    // The compiled parent inlines the child's draft
    let schema = service.compile(parent, None).await.unwrap();
    let sub = schema.node("sub0").unwrap();
    assert!(sub.sub_schema.is_some());

    assert!(matches!(
        service.publish(parent, "v1.0.0", "", false).await,
        Err(FlowError::TestRunRequired(id)) if id == parent
    ));
    let draft = repo.get_draft(parent).await.unwrap().unwrap();
    assert!(service
        .mark_test_run_success(parent, &draft.commit_id)
        .await
        .unwrap());

    // Layout-only edits keep the flag
    let mut moved = calling(&[child]);
    moved.extra.insert("viewport".to_string(), json!({"zoom": 2}));
    let resaved = service.save(parent, moved).await.unwrap();
    assert!(resaved.test_run_success);

    service.publish(parent, "v1.0.9", "", false).await.unwrap();
    service.publish(parent, "v1.0.10", "", true).await.unwrap();
    assert!(matches!(
        service.publish(parent, "v1.0.2", "", true).await,
        Err(FlowError::VersionOrder { .. })
    ));
    assert_eq!(
        repo.get_meta(parent).await.unwrap().latest_version.as_deref(),
        Some("v1.0.10")
    );

    let referring = service.get_workflow_reference(child).await.unwrap();
    assert_eq!(referring.len(), 1);
    assert_eq!(referring[0].id, parent);
}

#[tokio::test]
async fn test_schema_check_reports_draft_targets() {
    let (service, _) = service();
    let child = service.create("child", "", None, None).await.unwrap();
    let parent = service
        .create("parent", "", None, Some(calling(&[child])))
        .await
        .unwrap();

    let config = ValidateConfig {
        disallowed_node_types: BTreeSet::from([NodeType::QuestionAnswer]),
    };
    let results = service
        .workflow_schema_check(
            parent,
            None,
            &[CheckType::Published, CheckType::AllowedNodes],
            &config,
        )
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
    assert!(!results[0].is_pass);
    assert!(results[1].is_pass);
}

#[tokio::test]
async fn test_validate_tree_reports_missing_target() {
    let (service, _) = service();
    let root = service
        .create("root", "", None, Some(calling(&[4040])))
        .await
        .unwrap();

    let issues = service
        .validate_tree(root, &ValidateConfig::default())
        .await
        .unwrap();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].workflow_id, root);
}

#[tokio::test]
async fn test_copy_diamond_to_library_once_per_workflow() {
    let (service, repo) = service();
    let app = Some(7);
    let d = service.create("d", "", app, None).await.unwrap();
    let b = service.create("b", "", app, Some(calling(&[d]))).await.unwrap();
    let c = service.create("c", "", app, Some(calling(&[d]))).await.unwrap();
    let a = service
        .create("a", "", app, Some(calling(&[b, c])))
        .await
        .unwrap();

    let outcome = service
        .copy_workflow_from_app_to_library(a, 7, &ValidateConfig::default())
        .await
        .unwrap();
    let CopyOutcome::Copied(copied) = outcome else {
        panic!("copy should pass validation");
    };
    assert_eq!(copied.copied_workflows.len(), 4);
    assert_eq!(copied.workflow_id_version_map.len(), 4);

    // The copy of `a` points at the copies of `b` and `c`
    let new_a = &copied.workflow_id_version_map[&a];
    let new_b = &copied.workflow_id_version_map[&b];
    let published = repo
        .get_version(new_a.id, &new_a.version)
        .await
        .unwrap()
        .expect("library copies are published");
    let first_target = published.canvas.nodes[1]
        .data
        .inputs
        .workflow_id
        .clone()
        .unwrap();
    assert_eq!(first_target, new_b.id.to_string());
}

#[tokio::test]
async fn test_duplicate_app_with_cycle_fails() {
    let (service, _) = service();
    let app = Some(9);
    let a = service.create("a", "", app, None).await.unwrap();
    let b = service.create("b", "", app, Some(calling(&[a]))).await.unwrap();
    service.save(a, calling(&[b])).await.unwrap();

    let err = service
        .duplicate_workflows_by_app(9, 10, &Default::default())
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::ReferenceCycle(_)));
}
