// SPDX-License-Identifier: MIT

//! Canvas document types
//!
//! A canvas is the editor-authored graph for one workflow: an ordered list of
//! nodes (container nodes own their children in `blocks`) and the edges
//! between them. Fields this crate does not model are kept in the flattened
//! `extra` maps so a canvas survives a load/save cycle unchanged.

use crate::adk::error::FlowError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Editor graph for one workflow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Canvas {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A node on the canvas
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique within the canvas, including nested blocks
    pub id: String,
    /// Type tag such as `entry`, `question_answer` or `loop`
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "NodeData::is_empty")]
    pub data: NodeData,
    /// Child nodes owned by a container node
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocks: Vec<Node>,
    /// Edges between the children in `blocks`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edges: Vec<Edge>,
    /// Id of the containing node, filled in by the compiler
    #[serde(skip)]
    pub parent_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<NodeMeta>,
    #[serde(default, skip_serializing_if = "NodeInputs::is_empty")]
    pub inputs: NodeInputs,
    /// Declared output fields
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<Variable>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMeta {
    #[serde(default)]
    pub title: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Type-specific node inputs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInputs {
    /// Field bindings consumed by the node
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub input_parameters: Vec<Param>,
    /// Bindings a container node exposes from its children
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output_parameters: Vec<Param>,
    /// Opaque per-type configuration
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub config: Value,
    /// Target of a sub-workflow node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    /// Published version of the target; absent means its draft
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_version: Option<String>,
    /// Tools an LLM node may call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fc_param: Option<FcParam>,
    /// Plugin API invoked by a plugin node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_api: Option<PluginApi>,
    /// Knowledge bases searched by a knowledge node
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dataset_ids: Vec<String>,
    /// Databases used by a database node
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub database_info_list: Vec<DatabaseInfo>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A named binding: `name` receives the value described by `input`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<DataType>,
    pub input: BlockInput,
}

/// Where a binding takes its value from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockInput {
    Literal {
        #[serde(default)]
        content: Value,
    },
    Ref {
        #[serde(rename = "blockID")]
        block_id: String,
        /// Dot-separated path into the referenced node's output
        #[serde(default)]
        path: String,
    },
}

/// Declared output field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Fields of an object-typed variable
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub schema: Vec<Variable>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FcParam {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub workflow_list: Vec<WorkflowTool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugin_list: Vec<PluginTool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub knowledge_list: Vec<KnowledgeTool>,
}

/// Another workflow exposed to an LLM node as a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowTool {
    pub workflow_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_version: Option<String>,
    #[serde(default)]
    pub is_draft: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginTool {
    pub plugin_id: String,
    pub api_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_version: Option<String>,
    #[serde(default)]
    pub is_draft: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeTool {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginApi {
    pub plugin_id: String,
    pub api_id: String,
    /// "0" marks a plugin owned by the application
    #[serde(default)]
    pub plugin_version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseInfo {
    pub database_id: String,
}

/// Connection between two nodes of the same canvas level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    #[serde(rename = "sourceNodeID")]
    pub source_node_id: String,
    #[serde(rename = "targetNodeID")]
    pub target_node_id: String,
    #[serde(
        rename = "sourcePortID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub source_port_id: Option<String>,
}

impl Canvas {
    pub fn from_json(content: &str) -> Result<Self, FlowError> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn to_json(&self) -> Result<String, FlowError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Every node in document order, descending into blocks
    pub fn all_nodes(&self) -> Vec<&Node> {
        let mut out = Vec::new();
        collect_nodes(&self.nodes, &mut out);
        out
    }

    /// Fill in `parent_id` for every nested node
    pub fn assign_parents(&mut self) {
        for node in &mut self.nodes {
            node.parent_id = None;
            assign_parents(node);
        }
    }
}

impl Node {
    pub fn title(&self) -> &str {
        match &self.data.meta {
            Some(meta) if !meta.title.is_empty() => &meta.title,
            _ => &self.id,
        }
    }
}

impl NodeData {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl NodeInputs {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl Param {
    pub fn literal(name: impl Into<String>, content: Value) -> Self {
        Self {
            name: name.into(),
            data_type: None,
            input: BlockInput::Literal { content },
        }
    }

    pub fn reference(name: impl Into<String>, block_id: impl Into<String>, path: &str) -> Self {
        Self {
            name: name.into(),
            data_type: None,
            input: BlockInput::Ref {
                block_id: block_id.into(),
                path: path.to_string(),
            },
        }
    }
}

fn collect_nodes<'a>(nodes: &'a [Node], out: &mut Vec<&'a Node>) {
    for node in nodes {
        out.push(node);
        collect_nodes(&node.blocks, out);
    }
}

fn assign_parents(node: &mut Node) {
    let id = node.id.clone();
    for child in &mut node.blocks {
        child.parent_id = Some(id.clone());
        assign_parents(child);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "nodes": [
                {
                    "id": "100001",
                    "type": "entry",
                    "data": {
                        "meta": {"title": "Start", "icon": "start.png"},
                        "outputs": [{"name": "query", "type": "string", "required": true}]
                    },
                    "position": {"x": 10, "y": 20}
                },
                {
                    "id": "loop",
                    "type": "loop",
                    "data": {
                        "inputs": {
                            "inputParameters": [
                                {"name": "items", "input": {"type": "ref", "blockID": "100001", "path": "list"}}
                            ]
                        }
                    },
                    "blocks": [
                        {"id": "inner", "type": "lambda", "data": {"inputs": {"config": {"name": "echo"}}}}
                    ]
                }
            ],
            "edges": [
                {"sourceNodeID": "100001", "targetNodeID": "loop"},
                {"sourceNodeID": "loop", "targetNodeID": "900001", "sourcePortID": "default"}
            ],
            "versions": {"loop": "v2"}
        })
    }

    #[test]
    fn test_round_trip_preserves_unknown_fields() {
        let raw = sample();
        let canvas: Canvas = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(serde_json::to_value(&canvas).unwrap(), raw);
    }

    #[test]
    fn test_parse_inputs() {
        let canvas: Canvas = serde_json::from_value(sample()).unwrap();
        let loop_node = &canvas.nodes[1];
        assert_eq!(loop_node.blocks.len(), 1);
        assert_eq!(
            loop_node.data.inputs.input_parameters[0].input,
            BlockInput::Ref {
                block_id: "100001".to_string(),
                path: "list".to_string()
            }
        );
        assert_eq!(canvas.edges[1].source_port_id.as_deref(), Some("default"));
        assert_eq!(canvas.nodes[0].title(), "Start");
        assert_eq!(loop_node.title(), "loop");
    }

    #[test]
    fn test_assign_parents_and_walk() {
        let mut canvas: Canvas = serde_json::from_value(sample()).unwrap();
        canvas.assign_parents();

        let ids: Vec<&str> = canvas.all_nodes().iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["100001", "loop", "inner"]);
        assert_eq!(canvas.nodes[1].blocks[0].parent_id.as_deref(), Some("loop"));
        assert_eq!(canvas.nodes[0].parent_id, None);
    }
}
