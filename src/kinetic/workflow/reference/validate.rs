// SPDX-License-Identifier: MIT

use super::build::workflow_targets;
use crate::adk::error::FlowError;
use crate::kinetic::workflow::graph::compile_canvas;
use crate::kinetic::workflow::graph::types::{NodeType, SubWorkflowRef};
use crate::kinetic::workflow::repository::{CanvasProvider, WorkflowRepository};
use crate::kinetic::workflow::types::Canvas;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet, VecDeque};

/// Product-mode restrictions applied while validating
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidateConfig {
    #[serde(default)]
    pub disallowed_node_types: BTreeSet<NodeType>,
}

/// A non-fatal problem found in one workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidateIssue {
    pub workflow_id: i64,
    pub workflow_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub message: String,
}

/// Issues in a single canvas; never fails
pub fn validate_canvas(
    workflow_id: i64,
    workflow_name: &str,
    canvas: &Canvas,
    config: &ValidateConfig,
) -> Vec<ValidateIssue> {
    let issue = |node_id: Option<&str>, message: String| ValidateIssue {
        workflow_id,
        workflow_name: workflow_name.to_string(),
        node_id: node_id.map(str::to_string),
        message,
    };

    let mut issues = Vec::new();
    for node in canvas.all_nodes() {
        if let Some(node_type) = NodeType::from_tag(&node.node_type) {
            if config.disallowed_node_types.contains(&node_type) {
                issues.push(issue(
                    Some(&node.id),
                    format!("node type '{}' is not allowed here", node_type),
                ));
            }
        }
    }
    if let Err(e) = compile_canvas(canvas) {
        issues.push(issue(e.node_id(), e.to_string()));
    }
    if let Err(e) = workflow_targets(canvas) {
        let message = e.to_string();
        if !issues.iter().any(|i| i.message == message) {
            issues.push(issue(e.node_id(), message));
        }
    }
    issues
}

/// Validate a workflow's draft and everything it reaches, each once.
///
/// Targets are keyed by `(id, version)` with `None` for drafts. A missing
/// target is reported against the workflow that points at it.
pub async fn validate_closure(
    repo: &dyn WorkflowRepository,
    root_id: i64,
    config: &ValidateConfig,
) -> Result<Vec<ValidateIssue>, FlowError> {
    let root_canvas = repo.get_workflow_canvas(root_id, None).await?;
    let mut visited: HashSet<(i64, Option<String>)> = HashSet::from([(root_id, None)]);
    let mut queue = VecDeque::from([(
        SubWorkflowRef {
            id: root_id,
            version: None,
        },
        root_canvas,
    )]);
    let mut issues = Vec::new();

    while let Some((current, canvas)) = queue.pop_front() {
        let name = repo.get_meta(current.id).await?.name;
        log::debug!(
            "Validating workflow {} ({})",
            current.id,
            current.version.as_deref().unwrap_or("draft")
        );
        issues.extend(validate_canvas(current.id, &name, &canvas, config));

        let Ok(targets) = workflow_targets(&canvas) else {
            continue;
        };
        for t in targets {
            let key = (t.target.id, t.target.version.clone());
            if !visited.insert(key) {
                continue;
            }
            match repo
                .get_workflow_canvas(t.target.id, t.target.version.as_deref())
                .await
            {
                Ok(sub_canvas) => queue.push_back((t.target, sub_canvas)),
                Err(e) if e.is_not_found() => issues.push(ValidateIssue {
                    workflow_id: current.id,
                    workflow_name: name.clone(),
                    node_id: Some(t.node_id),
                    message: e.to_string(),
                }),
                Err(e) => return Err(e),
            }
        }
    }
    Ok(issues)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinetic::workflow::repository::{DraftInfo, InMemoryRepository, WorkflowMeta};
    use chrono::Utc;
    use serde_json::json;

    fn calling(targets: &[i64]) -> Canvas {
        let mut nodes = vec![json!({"id": "entry", "type": "entry"})];
        let mut edges = Vec::new();
        let mut prev = "entry".to_string();
        for t in targets {
            let id = format!("sub_{}", t);
            nodes.push(json!({"id": id, "type": "sub_workflow",
                              "data": {"inputs": {"workflowId": t.to_string()}}}));
            edges.push(json!({"sourceNodeID": prev, "targetNodeID": id}));
            prev = id;
        }
        nodes.push(json!({"id": "exit", "type": "exit"}));
        edges.push(json!({"sourceNodeID": prev, "targetNodeID": "exit"}));
        serde_json::from_value(json!({"nodes": nodes, "edges": edges})).unwrap()
    }

    async fn store(repo: &InMemoryRepository, id: i64, canvas: Canvas) {
        repo.create_meta(WorkflowMeta {
            id,
            name: format!("wf_{}", id),
            description: String::new(),
            app_id: None,
            latest_version: None,
            created_at: Utc::now(),
        })
        .await
        .unwrap();
        repo.create_or_update_draft(
            id,
            DraftInfo {
                canvas,
                input_params: Vec::new(),
                output_params: Vec::new(),
                commit_id: "c".to_string(),
                test_run_success: false,
                modified: false,
                saved_at: Utc::now(),
            },
        )
        .await
        .unwrap();
    }

    #[test]
    fn test_canvas_issues() {
        let mut config = ValidateConfig::default();
        assert!(validate_canvas(1, "a", &calling(&[2]), &config).is_empty());

        config.disallowed_node_types.insert(NodeType::SubWorkflow);
        let issues = validate_canvas(1, "a", &calling(&[2]), &config);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].node_id.as_deref(), Some("sub_2"));

        let empty = validate_canvas(1, "a", &Canvas::default(), &ValidateConfig::default());
        assert_eq!(empty.len(), 1);
        assert_eq!(empty[0].node_id, None);
    }

    #[tokio::test]
    async fn test_closure_visits_shared_targets_once() {
        let repo = InMemoryRepository::new();
        store(&repo, 1, calling(&[2, 3])).await;
        store(&repo, 2, calling(&[4])).await;
        store(&repo, 3, calling(&[4])).await;
        // broken leaf: no exit node
        store(
            &repo,
            4,
            serde_json::from_value(json!({"nodes": [{"id": "entry", "type": "entry"}]})).unwrap(),
        )
        .await;

        let issues = validate_closure(&repo, 1, &ValidateConfig::default())
            .await
            .unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].workflow_id, 4);
        assert_eq!(issues[0].workflow_name, "wf_4");
    }

    #[tokio::test]
    async fn test_closure_terminates_on_cycle_and_reports_missing() {
        let repo = InMemoryRepository::new();
        store(&repo, 1, calling(&[2])).await;
        store(&repo, 2, calling(&[1, 99])).await;

        let issues = validate_closure(&repo, 1, &ValidateConfig::default())
            .await
            .unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].workflow_id, 2);
        assert_eq!(issues[0].node_id.as_deref(), Some("sub_99"));
    }

    #[tokio::test]
    async fn test_missing_root() {
        let repo = InMemoryRepository::new();
        let err = validate_closure(&repo, 5, &ValidateConfig::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
