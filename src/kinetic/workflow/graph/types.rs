// SPDX-License-Identifier: MIT

//! Compiled workflow schema types
//!
//! A `WorkflowSchema` is the execution-ready form of a canvas: a flat list of
//! typed nodes (nested children point at their container through `parent`),
//! the connections between them, and the branch table derived from ported
//! connections.

use crate::kinetic::workflow::types::DataType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Unique identifier of a node within one compiled schema
pub type NodeKey = String;

/// Path into a node's input or output record
pub type FieldPath = Vec<String>;

/// Closed set of node kinds understood by the compiler and the runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Entry,
    Exit,
    Llm,
    QuestionAnswer,
    SubWorkflow,
    Lambda,
    Selector,
    Loop,
    Plugin,
    KnowledgeRetriever,
    Database,
}

impl NodeType {
    pub const ALL: [NodeType; 11] = [
        NodeType::Entry,
        NodeType::Exit,
        NodeType::Llm,
        NodeType::QuestionAnswer,
        NodeType::SubWorkflow,
        NodeType::Lambda,
        NodeType::Selector,
        NodeType::Loop,
        NodeType::Plugin,
        NodeType::KnowledgeRetriever,
        NodeType::Database,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            NodeType::Entry => "entry",
            NodeType::Exit => "exit",
            NodeType::Llm => "llm",
            NodeType::QuestionAnswer => "question_answer",
            NodeType::SubWorkflow => "sub_workflow",
            NodeType::Lambda => "lambda",
            NodeType::Selector => "selector",
            NodeType::Loop => "loop",
            NodeType::Plugin => "plugin",
            NodeType::KnowledgeRetriever => "knowledge_retriever",
            NodeType::Database => "database",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.tag() == tag)
    }

    /// Container nodes own a nested scope of child nodes
    pub fn is_container(&self) -> bool {
        matches!(self, NodeType::Loop)
    }

    /// Capability flags implied by the type alone
    pub fn capabilities(&self) -> NodeCapabilities {
        NodeCapabilities {
            uses_database: matches!(self, NodeType::Database),
            uses_knowledge: matches!(self, NodeType::KnowledgeRetriever),
            uses_plugin: matches!(self, NodeType::Plugin),
            ..Default::default()
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCapabilities {
    pub uses_database: bool,
    pub uses_knowledge: bool,
    pub uses_plugin: bool,
    pub enables_chat_history: bool,
    pub enables_user_query: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    pub from_node_key: NodeKey,
    /// Empty path selects the whole output record
    #[serde(default)]
    pub from_path: FieldPath,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldSource {
    Literal(Value),
    Ref(Reference),
}

/// Binding of one input field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub path: FieldPath,
    pub source: FieldSource,
}

impl FieldInfo {
    pub fn literal(name: &str, value: Value) -> Self {
        Self {
            path: vec![name.to_string()],
            source: FieldSource::Literal(value),
        }
    }

    pub fn reference(name: &str, from_node_key: &str, from_path: &[&str]) -> Self {
        Self {
            path: vec![name.to_string()],
            source: FieldSource::Ref(Reference {
                from_node_key: from_node_key.to_string(),
                from_path: from_path.iter().map(|s| s.to_string()).collect(),
            }),
        }
    }

    pub fn as_reference(&self) -> Option<&Reference> {
        match &self.source {
            FieldSource::Ref(r) => Some(r),
            FieldSource::Literal(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeInfo {
    pub data_type: DataType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, TypeInfo>,
}

impl TypeInfo {
    pub fn new(data_type: DataType, required: bool) -> Self {
        Self {
            data_type,
            required,
            properties: BTreeMap::new(),
        }
    }
}

/// A parameter of the workflow's external interface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedTypeInfo {
    pub name: String,
    #[serde(flatten)]
    pub type_info: TypeInfo,
}

/// Sub-workflow target, `version: None` meaning its draft
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubWorkflowRef {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSchema {
    pub key: NodeKey,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub name: String,
    /// Type-specific configuration, decoded by the node's executor
    #[serde(default)]
    pub configs: Value,
    #[serde(default)]
    pub input_sources: Vec<FieldInfo>,
    /// Container outputs gathered from child nodes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output_sources: Vec<FieldInfo>,
    #[serde(default)]
    pub output_types: BTreeMap<String, TypeInfo>,
    /// Container this node belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<NodeKey>,
    #[serde(default)]
    pub capabilities: NodeCapabilities,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_workflow: Option<SubWorkflowRef>,
    /// Inlined schema of the sub-workflow target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_schema: Option<Box<WorkflowSchema>>,
}

impl NodeSchema {
    pub fn new(key: impl Into<String>, node_type: NodeType) -> Self {
        let key = key.into();
        Self {
            name: key.clone(),
            key,
            node_type,
            configs: Value::Null,
            input_sources: Vec::new(),
            output_sources: Vec::new(),
            output_types: BTreeMap::new(),
            parent: None,
            capabilities: node_type.capabilities(),
            sub_workflow: None,
            sub_schema: None,
        }
    }

    pub fn with_configs(mut self, configs: Value) -> Self {
        self.configs = configs;
        self
    }

    pub fn with_input(mut self, field: FieldInfo) -> Self {
        self.input_sources.push(field);
        self
    }

    pub fn with_output_type(mut self, name: &str, type_info: TypeInfo) -> Self {
        self.output_types.insert(name.to_string(), type_info);
        self
    }

    /// Node keys this node reads from
    pub fn referenced_keys(&self) -> impl Iterator<Item = &str> {
        self.input_sources
            .iter()
            .filter_map(|f| f.as_reference())
            .map(|r| r.from_node_key.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Connection {
    pub from_node: NodeKey,
    pub to_node: NodeKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_port: Option<String>,
}

impl Connection {
    pub fn new(from: &str, to: &str) -> Self {
        Self {
            from_node: from.to_string(),
            to_node: to.to_string(),
            from_port: None,
        }
    }

    pub fn ported(from: &str, to: &str, port: &str) -> Self {
        Self {
            from_node: from.to_string(),
            to_node: to.to_string(),
            from_port: Some(port.to_string()),
        }
    }
}

/// Outbound targets of one node, grouped by port
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub ports: BTreeMap<String, Vec<NodeKey>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSchema {
    pub nodes: Vec<NodeSchema>,
    pub connections: Vec<Connection>,
    #[serde(default)]
    pub branches: BTreeMap<NodeKey, Branch>,
}

/// Per-node summary exposed to callers that inspect a draft
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeProperty {
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub is_enable_user_query: bool,
    pub is_enable_chat_history: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sub_workflow: BTreeMap<NodeKey, NodeProperty>,
}

impl WorkflowSchema {
    pub fn node(&self, key: &str) -> Option<&NodeSchema> {
        self.nodes.iter().find(|n| n.key == key)
    }

    pub fn entry(&self) -> Option<&NodeSchema> {
        self.nodes
            .iter()
            .find(|n| n.node_type == NodeType::Entry && n.parent.is_none())
    }

    pub fn exit(&self) -> Option<&NodeSchema> {
        self.nodes
            .iter()
            .find(|n| n.node_type == NodeType::Exit && n.parent.is_none())
    }

    /// Nodes whose container is `parent` (top level when `None`), in schema order
    pub fn scope_nodes<'a>(
        &'a self,
        parent: Option<&'a str>,
    ) -> impl Iterator<Item = &'a NodeSchema> + 'a {
        self.nodes
            .iter()
            .filter(move |n| n.parent.as_deref() == parent)
    }

    pub fn inbound<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections.iter().filter(move |c| c.to_node == key)
    }

    /// Chain of containers enclosing `key`, innermost first
    pub fn containers_of(&self, key: &str) -> Vec<&str> {
        let mut out = Vec::new();
        let mut current = self.node(key).and_then(|n| n.parent.as_deref());
        while let Some(parent) = current {
            out.push(parent);
            current = self.node(parent).and_then(|n| n.parent.as_deref());
        }
        out
    }

    /// All nodes nested (at any depth) inside `container`
    pub fn descendants_of(&self, container: &str) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| self.containers_of(&n.key).contains(&container))
            .map(|n| n.key.as_str())
            .collect()
    }

    /// Structural equality of the execution-relevant shape.
    ///
    /// Node order and connection order do not matter.
    pub fn is_equal(&self, other: &WorkflowSchema) -> bool {
        if self.nodes.len() != other.nodes.len() {
            return false;
        }
        let ours: BTreeMap<&str, &NodeSchema> =
            self.nodes.iter().map(|n| (n.key.as_str(), n)).collect();
        let equal_nodes = other
            .nodes
            .iter()
            .all(|n| ours.get(n.key.as_str()).is_some_and(|m| *m == n));
        if !equal_nodes {
            return false;
        }
        let a: BTreeSet<&Connection> = self.connections.iter().collect();
        let b: BTreeSet<&Connection> = other.connections.iter().collect();
        a == b
    }

    /// Properties of every node, descending into inlined sub-workflows
    pub fn node_properties(&self) -> BTreeMap<NodeKey, NodeProperty> {
        self.nodes
            .iter()
            .map(|n| {
                let sub_workflow = n
                    .sub_schema
                    .as_ref()
                    .map(|s| s.node_properties())
                    .unwrap_or_default();
                (
                    n.key.clone(),
                    NodeProperty {
                        node_type: n.node_type,
                        is_enable_user_query: n.capabilities.enables_user_query,
                        is_enable_chat_history: n.capabilities.enables_chat_history,
                        sub_workflow,
                    },
                )
            })
            .collect()
    }
}
