// SPDX-License-Identifier: MIT

use super::relink::parse_id;
use crate::adk::error::FlowError;
use crate::kinetic::workflow::graph::types::NodeType;
use crate::kinetic::workflow::repository::CanvasProvider;
use crate::kinetic::workflow::types::Node;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

/// Resource ids a workflow needs, in discovery order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DependenceResource {
    pub plugin_ids: Vec<i64>,
    pub knowledge_ids: Vec<i64>,
    pub database_ids: Vec<i64>,
}

/// Walk a workflow's draft and the drafts it calls, collecting resource ids.
///
/// Shared sub-workflows are walked once per path, so ids may repeat. Only
/// draft targets are followed. A sub-workflow that calls one of its own
/// callers fails with `FlowError::ReferenceCycle`.
pub async fn collect_dependencies<P>(
    provider: &P,
    workflow_id: i64,
) -> Result<DependenceResource, FlowError>
where
    P: CanvasProvider + ?Sized,
{
    let canvas = provider.get_workflow_canvas(workflow_id, None).await?;
    let mut out = DependenceResource::default();
    let mut ancestors = vec![workflow_id];
    collect(provider, &canvas.nodes, &mut ancestors, &mut out).await?;
    Ok(out)
}

fn collect<'a, P>(
    provider: &'a P,
    nodes: &'a [Node],
    ancestors: &'a mut Vec<i64>,
    out: &'a mut DependenceResource,
) -> BoxFuture<'a, Result<(), FlowError>>
where
    P: CanvasProvider + ?Sized,
{
    Box::pin(async move {
        for node in nodes {
            let Some(node_type) = NodeType::from_tag(&node.node_type) else {
                continue;
            };
            let inputs = &node.data.inputs;
            let caps = node_type.capabilities();

            if caps.uses_database {
                if inputs.database_info_list.is_empty() {
                    return Err(FlowError::execution(&node.id, "database info is required"));
                }
                for info in &inputs.database_info_list {
                    out.database_ids.push(parse_id(&node.id, &info.database_id)?);
                }
                continue;
            }
            if caps.uses_knowledge {
                for dataset in &inputs.dataset_ids {
                    out.knowledge_ids.push(parse_id(&node.id, dataset)?);
                }
                continue;
            }
            if caps.uses_plugin {
                if let Some(api) = inputs.plugin_api.as_ref().filter(|a| a.plugin_version == "0") {
                    out.plugin_ids.push(parse_id(&node.id, &api.plugin_id)?);
                }
                continue;
            }

            match node_type {
                NodeType::Llm => {
                    if let Some(fc) = &inputs.fc_param {
                        for plugin in fc.plugin_list.iter().filter(|p| p.is_draft) {
                            out.plugin_ids.push(parse_id(&node.id, &plugin.plugin_id)?);
                        }
                        for knowledge in &fc.knowledge_list {
                            out.knowledge_ids.push(parse_id(&node.id, &knowledge.id)?);
                        }
                        for tool in fc.workflow_list.iter().filter(|t| t.is_draft) {
                            let id = parse_id(&node.id, &tool.workflow_id)?;
                            descend(provider, id, ancestors, out).await?;
                        }
                    }
                }
                NodeType::SubWorkflow => {
                    let is_draft = inputs.workflow_version.as_deref().unwrap_or("").is_empty();
                    if let (true, Some(raw)) = (is_draft, &inputs.workflow_id) {
                        let id = parse_id(&node.id, raw)?;
                        descend(provider, id, ancestors, out).await?;
                    }
                }
                _ => {}
            }

            if !node.blocks.is_empty() {
                collect(provider, &node.blocks, ancestors, out).await?;
            }
        }
        Ok(())
    })
}

async fn descend<P>(
    provider: &P,
    id: i64,
    ancestors: &mut Vec<i64>,
    out: &mut DependenceResource,
) -> Result<(), FlowError>
where
    P: CanvasProvider + ?Sized,
{
    if let Some(pos) = ancestors.iter().position(|a| *a == id) {
        let mut cycle = ancestors[pos..].to_vec();
        cycle.push(id);
        return Err(FlowError::ReferenceCycle(cycle));
    }
    let canvas = provider.get_workflow_canvas(id, None).await?;
    ancestors.push(id);
    collect(provider, &canvas.nodes, ancestors, out).await?;
    ancestors.pop();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinetic::workflow::types::Canvas;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;

    struct Drafts(HashMap<i64, Canvas>);

    #[async_trait]
    impl CanvasProvider for Drafts {
        async fn get_workflow_canvas(
            &self,
            id: i64,
            _version: Option<&str>,
        ) -> Result<Canvas, FlowError> {
            self.0
                .get(&id)
                .cloned()
                .ok_or_else(|| FlowError::not_found("workflow draft", id))
        }
    }

    fn canvas(value: serde_json::Value) -> Canvas {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_collects_through_draft_sub_workflows() {
        let drafts = Drafts(HashMap::from([
            (
                1,
                canvas(json!({"nodes": [
                    {"id": "db", "type": "database",
                     "data": {"inputs": {"databaseInfoList": [{"databaseId": "11"}]}}},
                    {"id": "plugin", "type": "plugin",
                     "data": {"inputs": {"pluginApi": {"pluginId": "21", "apiId": "1", "pluginVersion": "0"}}}},
                    {"id": "store_plugin", "type": "plugin",
                     "data": {"inputs": {"pluginApi": {"pluginId": "22", "apiId": "1", "pluginVersion": "v1.0.0"}}}},
                    {"id": "loop", "type": "loop", "blocks": [
                        {"id": "sub", "type": "sub_workflow", "data": {"inputs": {"workflowId": "2"}}},
                        {"id": "pinned", "type": "sub_workflow",
                         "data": {"inputs": {"workflowId": "3", "workflowVersion": "v1.0.0"}}}
                    ]}
                ]})),
            ),
            (
                2,
                canvas(json!({"nodes": [
                    {"id": "kb", "type": "knowledge_retriever", "data": {"inputs": {"datasetIds": ["31"]}}},
                    {"id": "llm", "type": "llm", "data": {"inputs": {"fcParam": {
                        "pluginList": [{"pluginId": "23", "apiId": "2", "isDraft": true},
                                       {"pluginId": "24", "apiId": "3"}],
                        "knowledgeList": [{"id": "32"}]
                    }}}}
                ]})),
            ),
        ]));

        let deps = collect_dependencies(&drafts, 1).await.unwrap();
        assert_eq!(deps.database_ids, vec![11]);
        assert_eq!(deps.plugin_ids, vec![21, 23]);
        assert_eq!(deps.knowledge_ids, vec![31, 32]);
    }

    #[tokio::test]
    async fn test_empty_database_list() {
        let drafts = Drafts(HashMap::from([(
            1,
            canvas(json!({"nodes": [{"id": "db", "type": "database"}]})),
        )]));
        let err = collect_dependencies(&drafts, 1).await.unwrap_err();
        assert_eq!(err.node_key(), Some("db"));
    }

    #[tokio::test]
    async fn test_cycle_through_tool_workflows() {
        let tool = |id: &str| {
            canvas(json!({"nodes": [{"id": "llm", "type": "llm", "data": {"inputs": {"fcParam": {
                "workflowList": [{"workflowId": id, "isDraft": true}]
            }}}}]}))
        };
        let drafts = Drafts(HashMap::from([(1, tool("2")), (2, tool("1"))]));
        let err = collect_dependencies(&drafts, 1).await.unwrap_err();
        assert!(matches!(err, FlowError::ReferenceCycle(path) if path == vec![1, 2, 1]));
    }
}
