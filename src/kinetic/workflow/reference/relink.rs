// SPDX-License-Identifier: MIT

use super::IdVersionPair;
use crate::adk::error::{CompileError, FlowError};
use crate::kinetic::workflow::graph::types::NodeType;
use crate::kinetic::workflow::types::{Canvas, Node};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Replacement plugin for a plugin id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginEntity {
    pub plugin_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_version: Option<String>,
}

/// Id mappings for resources a canvas uses outside the workflow graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExternalResourceRelated {
    #[serde(default)]
    pub plugin_map: HashMap<i64, PluginEntity>,
    /// Plugin API id to replacement API id
    #[serde(default)]
    pub plugin_tool_map: HashMap<i64, i64>,
    #[serde(default)]
    pub knowledge_map: HashMap<i64, i64>,
    #[serde(default)]
    pub database_map: HashMap<i64, i64>,
}

impl ExternalResourceRelated {
    pub fn is_empty(&self) -> bool {
        self.plugin_map.is_empty()
            && self.plugin_tool_map.is_empty()
            && self.knowledge_map.is_empty()
            && self.database_map.is_empty()
    }
}

/// Rewrite workflow and resource ids in place, descending into blocks.
///
/// Ids without a mapping are left alone. An empty replacement version
/// points the node at the target's draft.
pub fn replace_related_references(
    canvas: &mut Canvas,
    related_workflows: &HashMap<i64, IdVersionPair>,
    external: &ExternalResourceRelated,
) -> Result<(), FlowError> {
    for node in &mut canvas.nodes {
        relink_node(node, related_workflows, external)?;
    }
    Ok(())
}

fn relink_node(
    node: &mut Node,
    workflows: &HashMap<i64, IdVersionPair>,
    external: &ExternalResourceRelated,
) -> Result<(), FlowError> {
    let node_id = node.id.clone();
    let inputs = &mut node.data.inputs;

    match NodeType::from_tag(&node.node_type) {
        Some(NodeType::Database) => {
            for info in &mut inputs.database_info_list {
                remap(&node_id, &mut info.database_id, &external.database_map)?;
            }
        }
        Some(NodeType::KnowledgeRetriever) => {
            for dataset in &mut inputs.dataset_ids {
                remap(&node_id, dataset, &external.knowledge_map)?;
            }
        }
        Some(NodeType::Plugin) => {
            if let Some(api) = &mut inputs.plugin_api {
                if let Some(plugin) = lookup_plugin(&node_id, &api.plugin_id, external)? {
                    api.plugin_id = plugin.plugin_id.to_string();
                    if let Some(version) = &plugin.plugin_version {
                        api.plugin_version = version.clone();
                    }
                }
                remap(&node_id, &mut api.api_id, &external.plugin_tool_map)?;
            }
        }
        Some(NodeType::SubWorkflow) => {
            if let Some(raw) = &inputs.workflow_id {
                let id = parse_workflow_id(&node_id, raw)?;
                if let Some(pair) = workflows.get(&id) {
                    inputs.workflow_id = Some(pair.id.to_string());
                    inputs.workflow_version =
                        Some(pair.version.clone()).filter(|v| !v.is_empty());
                }
            }
        }
        Some(NodeType::Llm) => {
            if let Some(fc) = &mut inputs.fc_param {
                for tool in &mut fc.workflow_list {
                    let id = parse_workflow_id(&node_id, &tool.workflow_id)?;
                    if let Some(pair) = workflows.get(&id) {
                        tool.workflow_id = pair.id.to_string();
                        tool.workflow_version = Some(pair.version.clone()).filter(|v| !v.is_empty());
                        tool.is_draft = pair.version.is_empty();
                    }
                }
                for tool in &mut fc.plugin_list {
                    remap(&node_id, &mut tool.api_id, &external.plugin_tool_map)?;
                    if let Some(plugin) = lookup_plugin(&node_id, &tool.plugin_id, external)? {
                        tool.plugin_id = plugin.plugin_id.to_string();
                        tool.plugin_version = plugin.plugin_version.clone();
                        tool.is_draft = false;
                    }
                }
                for knowledge in &mut fc.knowledge_list {
                    remap(&node_id, &mut knowledge.id, &external.knowledge_map)?;
                }
            }
        }
        _ => {}
    }

    for child in &mut node.blocks {
        relink_node(child, workflows, external)?;
    }
    Ok(())
}

fn remap(node_id: &str, value: &mut String, map: &HashMap<i64, i64>) -> Result<(), FlowError> {
    if map.is_empty() {
        return Ok(());
    }
    let id = parse_id(node_id, value)?;
    if let Some(new_id) = map.get(&id) {
        *value = new_id.to_string();
    }
    Ok(())
}

fn lookup_plugin<'a>(
    node_id: &str,
    raw: &str,
    external: &'a ExternalResourceRelated,
) -> Result<Option<&'a PluginEntity>, FlowError> {
    if external.plugin_map.is_empty() {
        return Ok(None);
    }
    let id = parse_id(node_id, raw)?;
    Ok(external.plugin_map.get(&id))
}

pub(crate) fn parse_id(node_id: &str, raw: &str) -> Result<i64, FlowError> {
    raw.trim().parse::<i64>().map_err(|_| {
        CompileError::InvalidConfig {
            node: node_id.to_string(),
            message: format!("invalid resource id '{}'", raw),
        }
        .into()
    })
}

fn parse_workflow_id(node_id: &str, raw: &str) -> Result<i64, FlowError> {
    raw.trim().parse::<i64>().map_err(|_| {
        CompileError::InvalidWorkflowId {
            node: node_id.to_string(),
            value: raw.to_string(),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinetic::workflow::types::NodeInputs;
    use serde_json::json;

    fn canvas() -> Canvas {
        serde_json::from_value(json!({
            "nodes": [
                {"id": "db", "type": "database",
                 "data": {"inputs": {"databaseInfoList": [{"databaseId": "100"}]}}},
                {"id": "kb", "type": "knowledge_retriever",
                 "data": {"inputs": {"datasetIds": ["200", "201"]}}},
                {"id": "plugin", "type": "plugin",
                 "data": {"inputs": {"pluginApi": {"pluginId": "300", "apiId": "301", "pluginVersion": "0"}}}},
                {"id": "loop", "type": "loop", "blocks": [
                    {"id": "sub", "type": "sub_workflow",
                     "data": {"inputs": {"workflowId": "7"}}}
                ]},
                {"id": "llm", "type": "llm", "data": {"inputs": {"fcParam": {
                    "workflowList": [{"workflowId": "7", "isDraft": true}],
                    "pluginList": [{"pluginId": "300", "apiId": "301", "isDraft": true}],
                    "knowledgeList": [{"id": "200"}]
                }}}}
            ]
        }))
        .unwrap()
    }

    fn external() -> ExternalResourceRelated {
        ExternalResourceRelated {
            plugin_map: HashMap::from([(
                300,
                PluginEntity {
                    plugin_id: 310,
                    plugin_version: Some("v1.0.0".to_string()),
                },
            )]),
            plugin_tool_map: HashMap::from([(301, 311)]),
            knowledge_map: HashMap::from([(200, 210)]),
            database_map: HashMap::from([(100, 110)]),
        }
    }

    fn inputs_of<'a>(nodes: &[&'a Node], id: &str) -> &'a NodeInputs {
        &nodes.iter().find(|n| n.id == id).unwrap().data.inputs
    }

    #[test]
    fn test_rewrites_every_resource_kind() {
        let mut c = canvas();
        let workflows = HashMap::from([(7, IdVersionPair::new(70, "v0.0.1"))]);
        replace_related_references(&mut c, &workflows, &external()).unwrap();

        let nodes = c.all_nodes();
        let inputs = |id: &str| inputs_of(&nodes, id);

        assert_eq!(inputs("db").database_info_list[0].database_id, "110");
        assert_eq!(inputs("kb").dataset_ids, vec!["210", "201"]);

        let api = inputs("plugin").plugin_api.as_ref().unwrap();
        assert_eq!(
            (api.plugin_id.as_str(), api.api_id.as_str(), api.plugin_version.as_str()),
            ("310", "311", "v1.0.0")
        );

        assert_eq!(inputs("sub").workflow_id.as_deref(), Some("70"));
        assert_eq!(inputs("sub").workflow_version.as_deref(), Some("v0.0.1"));

        let fc = inputs("llm").fc_param.as_ref().unwrap();
        assert_eq!(fc.workflow_list[0].workflow_id, "70");
        assert!(!fc.workflow_list[0].is_draft);
        assert_eq!(fc.plugin_list[0].plugin_id, "310");
        assert_eq!(fc.plugin_list[0].api_id, "311");
        assert!(!fc.plugin_list[0].is_draft);
        assert_eq!(fc.knowledge_list[0].id, "210");
    }

    #[test]
    fn test_draft_target_clears_version() {
        let mut c = canvas();
        let workflows = HashMap::from([(7, IdVersionPair::new(71, ""))]);
        replace_related_references(&mut c, &workflows, &ExternalResourceRelated::default())
            .unwrap();

        let nodes = c.all_nodes();
        let sub = nodes.iter().find(|n| n.id == "sub").unwrap();
        assert_eq!(sub.data.inputs.workflow_id.as_deref(), Some("71"));
        assert_eq!(sub.data.inputs.workflow_version, None);
        let db = nodes.iter().find(|n| n.id == "db").unwrap();
        assert_eq!(db.data.inputs.database_info_list[0].database_id, "100");
    }

    #[test]
    fn test_bad_resource_id() {
        let mut c: Canvas = serde_json::from_value(json!({
            "nodes": [{"id": "db", "type": "database",
                       "data": {"inputs": {"databaseInfoList": [{"databaseId": "main"}]}}}]
        }))
        .unwrap();
        let err = replace_related_references(&mut c, &HashMap::new(), &external()).unwrap_err();
        assert!(matches!(
            err,
            FlowError::Compile(CompileError::InvalidConfig { node, .. }) if node == "db"
        ));
    }
}
