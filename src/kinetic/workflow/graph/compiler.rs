// SPDX-License-Identifier: MIT

//! Canvas to schema compilation

use super::branch::build_branches;
use super::types::{
    Connection, FieldInfo, FieldSource, NamedTypeInfo, NodeSchema, NodeType, Reference,
    SubWorkflowRef, TypeInfo, WorkflowSchema,
};
use crate::adk::error::{CompileError, FlowError};
use crate::kinetic::workflow::repository::CanvasProvider;
use crate::kinetic::workflow::types::{BlockInput, Canvas, DataType, Edge, Node, Param, Variable};
use futures::future::BoxFuture;
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// Entry output that marks a workflow as accepting a free-form user query
pub const USER_INPUT: &str = "USER_INPUT";

/// Externally visible parameters of a workflow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IoParams {
    pub input: Vec<NamedTypeInfo>,
    pub output: Vec<NamedTypeInfo>,
}

/// Compile one canvas level without resolving sub-workflow targets.
pub fn compile_canvas(canvas: &Canvas) -> Result<WorkflowSchema, CompileError> {
    let mut canvas = canvas.clone();
    canvas.assign_parents();

    let entry = unique_node(&canvas, NodeType::Entry)?;
    let exit = unique_node(&canvas, NodeType::Exit)?;

    let reachable = reachable_from(&entry, &canvas.edges);
    if !reachable.contains(&exit) {
        return Err(CompileError::UnreachableExit(exit));
    }
    let (kept, pruned): (Vec<Node>, Vec<Node>) = canvas
        .nodes
        .into_iter()
        .partition(|n| reachable.contains(&n.id));
    for node in &pruned {
        log::warn!("Pruning node '{}': not reachable from entry", node.id);
    }
    let edges: Vec<Edge> = canvas
        .edges
        .into_iter()
        .filter(|e| reachable.contains(&e.source_node_id))
        .collect();

    let mut schema = WorkflowSchema::default();
    let mut seen = HashSet::new();
    lower_level(&kept, &edges, &mut schema, &mut seen)?;

    check_connections(&schema)?;
    let graphs = scope_graphs(&schema);
    check_acyclic(&graphs)?;
    check_references(&schema, &graphs)?;

    schema.branches = build_branches(&schema)?;
    log::debug!(
        "Compiled canvas: {} nodes, {} connections",
        schema.nodes.len(),
        schema.connections.len()
    );
    Ok(schema)
}

/// Project the entry outputs and exit inputs into parameter lists.
///
/// Incomplete drafts without an entry or exit yield empty lists.
pub fn extract_io_params(canvas: &Canvas) -> IoParams {
    let find = |t: NodeType| canvas.nodes.iter().find(|n| n.node_type == t.tag());

    let input = find(NodeType::Entry)
        .map(|n| {
            n.data
                .outputs
                .iter()
                .map(|v| NamedTypeInfo {
                    name: v.name.clone(),
                    type_info: type_info_of(v),
                })
                .collect()
        })
        .unwrap_or_default();

    let output = find(NodeType::Exit)
        .map(|n| {
            n.data
                .inputs
                .input_parameters
                .iter()
                .map(|p| NamedTypeInfo {
                    name: p.name.clone(),
                    type_info: TypeInfo::new(p.data_type.unwrap_or(DataType::String), false),
                })
                .collect()
        })
        .unwrap_or_default();

    IoParams { input, output }
}

/// Compiler that also inlines sub-workflow targets fetched from a provider
#[derive(Default)]
pub struct SchemaCompiler<'a> {
    provider: Option<&'a dyn CanvasProvider>,
}

impl<'a> SchemaCompiler<'a> {
    pub fn new() -> Self {
        Self { provider: None }
    }

    pub fn with_provider(provider: &'a dyn CanvasProvider) -> Self {
        Self {
            provider: Some(provider),
        }
    }

    pub async fn compile(&self, canvas: &Canvas) -> Result<WorkflowSchema, FlowError> {
        self.compile_nested(canvas.clone(), Vec::new()).await
    }

    /// Fetch and compile a stored workflow, counting it as its own ancestor
    pub async fn compile_workflow(
        &self,
        id: i64,
        version: Option<&str>,
    ) -> Result<WorkflowSchema, FlowError> {
        let provider = self
            .provider
            .ok_or_else(|| FlowError::config("No canvas provider configured"))?;
        let canvas = provider.get_workflow_canvas(id, version).await?;
        let root = SubWorkflowRef {
            id,
            version: version.map(str::to_string),
        };
        self.compile_nested(canvas, vec![root]).await
    }

    fn compile_nested(
        &self,
        canvas: Canvas,
        stack: Vec<SubWorkflowRef>,
    ) -> BoxFuture<'_, Result<WorkflowSchema, FlowError>> {
        Box::pin(async move {
            let mut schema = compile_canvas(&canvas)?;
            let Some(provider) = self.provider else {
                return Ok(schema);
            };

            for node in schema.nodes.iter_mut() {
                let Some(target) = node.sub_workflow.clone() else {
                    continue;
                };
                if stack.contains(&target) {
                    return Err(CompileError::RecursiveSubWorkflow(target.id).into());
                }
                log::debug!(
                    "Inlining sub-workflow {} ({}) into node '{}'",
                    target.id,
                    target.version.as_deref().unwrap_or("draft"),
                    node.key
                );
                let sub_canvas = provider
                    .get_workflow_canvas(target.id, target.version.as_deref())
                    .await?;
                let mut nested = stack.clone();
                nested.push(target);
                let sub = self.compile_nested(sub_canvas, nested).await?;
                node.sub_schema = Some(Box::new(sub));
            }

            Ok(schema)
        })
    }
}

fn unique_node(canvas: &Canvas, node_type: NodeType) -> Result<String, CompileError> {
    let ids: Vec<String> = canvas
        .nodes
        .iter()
        .filter(|n| n.node_type == node_type.tag())
        .map(|n| n.id.clone())
        .collect();

    match (node_type, ids.len()) {
        (_, 1) => Ok(ids[0].clone()),
        (NodeType::Entry, 0) => Err(CompileError::MissingEntry),
        (NodeType::Entry, _) => Err(CompileError::DuplicateEntry(ids)),
        (_, 0) => Err(CompileError::MissingExit),
        _ => Err(CompileError::DuplicateExit(ids)),
    }
}

/// Node ids reachable from `start`, including edge targets that may not exist
fn reachable_from(start: &str, edges: &[Edge]) -> HashSet<String> {
    let mut seen = HashSet::from([start.to_string()]);
    let mut queue = VecDeque::from([start.to_string()]);

    while let Some(current) = queue.pop_front() {
        for edge in edges.iter().filter(|e| e.source_node_id == current) {
            if seen.insert(edge.target_node_id.clone()) {
                queue.push_back(edge.target_node_id.clone());
            }
        }
    }
    seen
}

fn lower_level(
    nodes: &[Node],
    edges: &[Edge],
    schema: &mut WorkflowSchema,
    seen: &mut HashSet<String>,
) -> Result<(), CompileError> {
    for node in nodes {
        if !seen.insert(node.id.clone()) {
            return Err(CompileError::DuplicateNodeKey(node.id.clone()));
        }
        schema.nodes.push(lower_node(node)?);
        lower_level(&node.blocks, &node.edges, schema, seen)?;
    }

    schema.connections.extend(edges.iter().map(|e| Connection {
        from_node: e.source_node_id.clone(),
        to_node: e.target_node_id.clone(),
        from_port: e.source_port_id.clone(),
    }));
    Ok(())
}

fn lower_node(node: &Node) -> Result<NodeSchema, CompileError> {
    let node_type = NodeType::from_tag(&node.node_type).ok_or_else(|| {
        CompileError::UnknownNodeType {
            node: node.id.clone(),
            tag: node.node_type.clone(),
        }
    })?;
    if !node_type.is_container() && !node.blocks.is_empty() {
        return Err(CompileError::InvalidConfig {
            node: node.id.clone(),
            message: format!("{} nodes cannot own blocks", node_type),
        });
    }

    let inputs = &node.data.inputs;
    let mut schema = NodeSchema::new(node.id.as_str(), node_type);
    schema.name = node.title().to_string();
    schema.configs = inputs.config.clone();
    schema.parent = node.parent_id.clone();
    schema.input_sources = inputs.input_parameters.iter().map(lower_param).collect();
    schema.output_sources = inputs.output_parameters.iter().map(lower_param).collect();
    schema.output_types = node
        .data
        .outputs
        .iter()
        .map(|v| (v.name.clone(), type_info_of(v)))
        .collect();

    schema.capabilities.enables_chat_history = inputs
        .config
        .pointer("/chatHistory/enabled")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    schema.capabilities.enables_user_query =
        node_type == NodeType::Entry && node.data.outputs.iter().any(|v| v.name == USER_INPUT);

    if node_type == NodeType::SubWorkflow {
        schema.sub_workflow = Some(sub_workflow_ref(node)?);
    }

    Ok(schema)
}

pub(crate) fn sub_workflow_ref(node: &Node) -> Result<SubWorkflowRef, CompileError> {
    let inputs = &node.data.inputs;
    let raw = inputs
        .workflow_id
        .as_deref()
        .ok_or_else(|| CompileError::InvalidConfig {
            node: node.id.clone(),
            message: "missing workflowId".to_string(),
        })?;
    let id = raw
        .trim()
        .parse::<i64>()
        .map_err(|_| CompileError::InvalidWorkflowId {
            node: node.id.clone(),
            value: raw.to_string(),
        })?;
    let version = inputs
        .workflow_version
        .clone()
        .filter(|v| !v.is_empty());
    Ok(SubWorkflowRef { id, version })
}

fn lower_param(param: &Param) -> FieldInfo {
    let source = match &param.input {
        BlockInput::Literal { content } => FieldSource::Literal(content.clone()),
        BlockInput::Ref { block_id, path } => FieldSource::Ref(Reference {
            from_node_key: block_id.clone(),
            from_path: split_path(path),
        }),
    };
    FieldInfo {
        path: split_path(&param.name),
        source,
    }
}

fn split_path(path: &str) -> Vec<String> {
    path.split('.')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn type_info_of(var: &Variable) -> TypeInfo {
    TypeInfo {
        data_type: var.data_type,
        required: var.required,
        properties: var
            .schema
            .iter()
            .map(|v| (v.name.clone(), type_info_of(v)))
            .collect(),
    }
}

fn check_connections(schema: &WorkflowSchema) -> Result<(), CompileError> {
    for conn in &schema.connections {
        let (Some(from), Some(to)) = (schema.node(&conn.from_node), schema.node(&conn.to_node))
        else {
            return Err(CompileError::DanglingEdge {
                from: conn.from_node.clone(),
                to: conn.to_node.clone(),
            });
        };
        if from.parent != to.parent {
            return Err(CompileError::CrossScopeEdge {
                from: conn.from_node.clone(),
                to: conn.to_node.clone(),
            });
        }
    }
    Ok(())
}

type ScopeGraphs<'s> = HashMap<Option<&'s str>, DiGraphMap<&'s str, ()>>;

/// One connection graph per scope, keyed by the enclosing container
fn scope_graphs(schema: &WorkflowSchema) -> ScopeGraphs<'_> {
    let mut graphs: ScopeGraphs<'_> = HashMap::new();
    for node in &schema.nodes {
        graphs
            .entry(node.parent.as_deref())
            .or_insert_with(DiGraphMap::new)
            .add_node(node.key.as_str());
    }
    for conn in &schema.connections {
        let scope = schema
            .node(&conn.from_node)
            .and_then(|n| n.parent.as_deref());
        graphs
            .entry(scope)
            .or_insert_with(DiGraphMap::new)
            .add_edge(conn.from_node.as_str(), conn.to_node.as_str(), ());
    }
    graphs
}

fn check_acyclic(graphs: &ScopeGraphs<'_>) -> Result<(), CompileError> {
    for graph in graphs.values() {
        if let Some((node, _, _)) = graph.all_edges().find(|(a, b, _)| a == b) {
            return Err(CompileError::CyclicConnections(node.to_string()));
        }
        toposort(graph, None)
            .map_err(|cycle| CompileError::CyclicConnections(cycle.node_id().to_string()))?;
    }
    Ok(())
}

/// Transitive predecessors of `key` within one scope graph
fn predecessors<'s>(graph: &DiGraphMap<&'s str, ()>, key: &'s str) -> BTreeSet<&'s str> {
    let mut found = BTreeSet::new();
    let mut stack: Vec<&str> = graph
        .neighbors_directed(key, Direction::Incoming)
        .collect();
    while let Some(current) = stack.pop() {
        if found.insert(current) {
            stack.extend(graph.neighbors_directed(current, Direction::Incoming));
        }
    }
    found
}

/// Nodes whose output may be read by `key`.
///
/// Within a container, a node also sees the container itself and everything
/// the container could see.
fn legal_sources<'s>(
    schema: &'s WorkflowSchema,
    graphs: &ScopeGraphs<'s>,
    key: &'s str,
) -> BTreeSet<&'s str> {
    let mut legal = BTreeSet::new();
    let mut current = Some(key);
    while let Some(k) = current {
        let parent = schema.node(k).and_then(|n| n.parent.as_deref());
        if let Some(graph) = graphs.get(&parent) {
            legal.extend(predecessors(graph, k));
        }
        if let Some(p) = parent {
            legal.insert(p);
        }
        current = parent;
    }
    legal
}

fn check_references<'s>(
    schema: &'s WorkflowSchema,
    graphs: &ScopeGraphs<'s>,
) -> Result<(), CompileError> {
    for node in &schema.nodes {
        let legal = legal_sources(schema, graphs, &node.key);
        for from in node.referenced_keys() {
            check_source(schema, &node.key, from, |k| legal.contains(k))?;
        }

        if node.output_sources.is_empty() {
            continue;
        }
        let children: BTreeSet<&str> = schema.descendants_of(&node.key).into_iter().collect();
        for from in node
            .output_sources
            .iter()
            .filter_map(|f| f.as_reference())
            .map(|r| r.from_node_key.as_str())
        {
            check_source(schema, &node.key, from, |k| children.contains(k))?;
        }
    }
    Ok(())
}

fn check_source(
    schema: &WorkflowSchema,
    node: &str,
    from: &str,
    is_legal: impl Fn(&str) -> bool,
) -> Result<(), CompileError> {
    if schema.node(from).is_none() {
        return Err(CompileError::UnresolvedReference {
            node: node.to_string(),
            from: from.to_string(),
        });
    }
    if !is_legal(from) {
        return Err(CompileError::IllegalReference {
            node: node.to_string(),
            from: from.to_string(),
        });
    }
    Ok(())
}
