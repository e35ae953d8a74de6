// SPDX-License-Identifier: MIT

//! Resumable workflow runner
//!
//! Nodes of a scope run once every inbound connection is settled and at
//! least one of them is active. A connection is active when its source
//! completed and, for ported connections, selected that port. Nodes whose
//! inbound connections all settled inactive are skipped, which propagates
//! down untaken branches.
//!
//! A node may suspend the run. The state is then checkpointed and the call
//! fails with `FlowError::Interrupted`; a later call with the same
//! checkpoint id and resume data for the suspended node continues it.
//! A checkpoint id with no saved state starts a fresh run unless the
//! caller asked to resume.

use super::types::{Connection, FieldSource, NodeKey, NodeSchema, NodeType, WorkflowSchema};
use crate::adk::error::FlowError;
use crate::kinetic::config::EngineConfig;
use crate::kinetic::workflow::nodes::NodeOutcome;
use crate::kinetic::workflow::registry::NodeRegistry;
use crate::kinetic::workflow::state::{
    set_path, CheckpointManager, CheckpointStore, ResumeContext, State, Suspension,
};
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Intermediate-result entry holding a sub-workflow's own state
const SUB_STATE_KEY: &str = "__sub_state";

/// Details of a suspended run
#[derive(Debug, Clone)]
pub struct InterruptInfo {
    /// Checkpoint the state was saved under, `None` when nothing was saved
    pub checkpoint_id: Option<String>,
    /// Top-level node the run is waiting on
    pub node_key: NodeKey,
    /// From `node_key` down through sub-workflows to the interrupting node
    pub node_path: Vec<NodeKey>,
    /// Pending interaction, e.g. a question and its choices
    pub payload: Value,
    pub state: State,
}

/// Mutates a loaded checkpoint before the run continues
pub type StateModifier = Box<dyn FnOnce(&mut ResumeContext<'_>) + Send>;

#[derive(Default)]
pub struct InvokeOptions {
    pub checkpoint_id: Option<String>,
    pub state_modifier: Option<StateModifier>,
    pub cancel: Option<CancellationToken>,
    /// Fail with `CheckpointNotFound` instead of starting fresh when no
    /// state is saved under `checkpoint_id`
    pub require_checkpoint: bool,
}

impl InvokeOptions {
    pub fn checkpoint(id: impl Into<String>) -> Self {
        Self {
            checkpoint_id: Some(id.into()),
            ..Default::default()
        }
    }

    /// Supply `value` as resume data for node `key`
    pub fn resume(mut self, key: impl Into<String>, value: Value) -> Self {
        let key = key.into();
        self.state_modifier = Some(Box::new(move |ctx: &mut ResumeContext<'_>| {
            ctx.resume(&key, value);
        }));
        self.require_checkpoint = true;
        self
    }

    /// Continue the saved run as is; a missing checkpoint is an error
    pub fn resume_only(mut self) -> Self {
        self.require_checkpoint = true;
        self
    }

    pub fn with_modifier<F>(mut self, modifier: F) -> Self
    where
        F: FnOnce(&mut ResumeContext<'_>) + Send + 'static,
    {
        self.state_modifier = Some(Box::new(modifier));
        self.require_checkpoint = true;
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// A compiled schema bound to its executors and checkpoint store
pub struct Workflow {
    schema: Arc<WorkflowSchema>,
    registry: NodeRegistry,
    checkpoints: CheckpointManager,
    config: EngineConfig,
}

impl Workflow {
    pub fn new(
        schema: WorkflowSchema,
        registry: NodeRegistry,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            schema: Arc::new(schema),
            registry,
            checkpoints: CheckpointManager::new(store),
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn schema(&self) -> &WorkflowSchema {
        &self.schema
    }

    /// Run to completion or suspension.
    ///
    /// Returns the Exit node's output record on success.
    pub async fn invoke(
        &self,
        input: Map<String, Value>,
        options: InvokeOptions,
    ) -> Result<Map<String, Value>, FlowError> {
        let InvokeOptions {
            checkpoint_id,
            state_modifier,
            cancel,
            require_checkpoint,
        } = options;
        let mut state = self
            .prepare_state(
                checkpoint_id.as_deref(),
                input,
                state_modifier,
                require_checkpoint,
            )
            .await?;

        log::info!("Workflow run started (checkpoint: {:?})", checkpoint_id);
        let mut run = Run {
            registry: &self.registry,
            max_steps: self.config.max_steps,
            cancel,
            steps: 0,
            iteration: 0,
        };

        match run.run_scope(&self.schema, None, &mut state).await? {
            Flow::Finished => {
                if let Some(id) = &checkpoint_id {
                    self.checkpoints.clear(id).await?;
                }
                log::info!("Workflow run finished after {} steps", run.steps);
                let output = self
                    .schema
                    .exit()
                    .and_then(|exit| state.output(&exit.key))
                    .cloned();
                Ok(match output {
                    Some(Value::Object(map)) => map,
                    Some(other) => {
                        let mut map = Map::new();
                        map.insert("output".to_string(), other);
                        map
                    }
                    None => Map::new(),
                })
            }
            Flow::Suspended(suspension) => {
                match &checkpoint_id {
                    Some(id) => self.checkpoints.save(id, &state).await?,
                    None => log::warn!(
                        "Run suspended without a checkpoint id; state is only returned to the caller"
                    ),
                }
                log::info!(
                    "Workflow suspended at node '{}' (path {:?})",
                    suspension.node_key,
                    suspension.node_path
                );
                Err(FlowError::Interrupted(Box::new(InterruptInfo {
                    checkpoint_id,
                    node_key: suspension.node_key,
                    node_path: suspension.node_path,
                    payload: suspension.payload,
                    state,
                })))
            }
        }
    }

    async fn prepare_state(
        &self,
        checkpoint_id: Option<&str>,
        input: Map<String, Value>,
        modifier: Option<StateModifier>,
        require_checkpoint: bool,
    ) -> Result<State, FlowError> {
        let Some(id) = checkpoint_id else {
            if modifier.is_some() {
                log::warn!("State modifier ignored: no checkpoint id given");
            }
            return Ok(State::new(input));
        };

        match self.checkpoints.load(id).await? {
            Some(checkpoint) => {
                if !input.is_empty() {
                    log::warn!("Ignoring input for resumed checkpoint '{}'", id);
                }
                log::info!(
                    "Resuming checkpoint '{}' suspended at {:?}",
                    id,
                    checkpoint.suspended_node
                );
                let mut state = checkpoint.state;
                if let Some(modify) = modifier {
                    modify(&mut ResumeContext::new(&mut state));
                }
                Ok(state)
            }
            None if require_checkpoint => Err(FlowError::CheckpointNotFound(id.to_string())),
            None => {
                log::debug!("No checkpoint '{}'; starting a fresh run", id);
                Ok(State::new(input))
            }
        }
    }
}

enum Flow {
    Finished,
    Suspended(Suspension),
}

struct Run<'w> {
    registry: &'w NodeRegistry,
    max_steps: usize,
    cancel: Option<CancellationToken>,
    steps: usize,
    iteration: usize,
}

impl<'w> Run<'w> {
    /// Run every node whose container is `scope` until the scope settles
    fn run_scope<'a>(
        &'a mut self,
        schema: &'a WorkflowSchema,
        scope: Option<&'a str>,
        state: &'a mut State,
    ) -> BoxFuture<'a, Result<Flow, FlowError>> {
        Box::pin(async move {
            loop {
                skip_unreachable(schema, scope, state);

                let ready: Vec<&NodeSchema> = schema
                    .scope_nodes(scope)
                    .filter(|n| is_ready(schema, n, state))
                    .collect();

                if ready.is_empty() {
                    if let Some(stuck) = schema.scope_nodes(scope).find(|n| !state.is_done(&n.key)) {
                        return Err(FlowError::execution(
                            &stuck.key,
                            "node can never become ready",
                        ));
                    }
                    return Ok(Flow::Finished);
                }

                self.iteration += 1;
                let keys: Vec<&str> = ready.iter().map(|n| n.key.as_str()).collect();
                log::info!(
                    "Graph iteration {}: executing {} nodes: {:?}",
                    self.iteration,
                    keys.len(),
                    keys
                );

                for node in ready {
                    if self.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
                        log::info!("Run cancelled before node '{}'", node.key);
                        return Err(FlowError::Cancelled);
                    }
                    self.steps += 1;
                    if self.steps > self.max_steps {
                        log::error!("Graph execution exceeded {} steps", self.max_steps);
                        return Err(FlowError::MaxIterations {
                            kind: "steps".to_string(),
                            limit: self.max_steps,
                        });
                    }

                    let flow = self.execute_node(schema, node, state).await.map_err(|e| {
                        if !e.is_interrupt() {
                            log::error!("Node {} failed: {}", node.key, e);
                        }
                        FlowError::node_failed(&node.key, e)
                    })?;
                    if let Flow::Suspended(suspension) = flow {
                        return Ok(Flow::Suspended(suspension));
                    }
                }
            }
        })
    }

    async fn execute_node(
        &mut self,
        schema: &WorkflowSchema,
        node: &NodeSchema,
        state: &mut State,
    ) -> Result<Flow, FlowError> {
        let resume = state.take_resume_data(&node.key);
        if resume.is_none() {
            if let Some(pending) = state.suspended().filter(|s| s.node_key == node.key) {
                log::info!("Node '{}' is still awaiting resume data", node.key);
                return Ok(Flow::Suspended(pending.clone()));
            }
        }

        let input = resolve_inputs(node, state);
        log::debug!("Executing node '{}' ({})", node.key, node.node_type);

        match node.node_type {
            NodeType::SubWorkflow => self.run_sub_workflow(node, input, resume, state).await,
            NodeType::Loop => self.run_loop(schema, node, input, state).await,
            _ => self.run_leaf(node, input, resume, state).await,
        }
    }

    async fn run_leaf(
        &mut self,
        node: &NodeSchema,
        input: Map<String, Value>,
        resume: Option<Value>,
        state: &mut State,
    ) -> Result<Flow, FlowError> {
        let executor = self.registry.get(node.node_type).await.ok_or_else(|| {
            FlowError::config(format!(
                "no executor registered for node type '{}'",
                node.node_type
            ))
        })?;

        let outcome = {
            let mut ctx = state.node_context(&node.key, resume);
            executor.execute(node, input, &mut ctx).await?
        };

        match outcome {
            NodeOutcome::Completed { output, port } => {
                log::debug!("Node '{}' completed (port {:?})", node.key, port);
                state.complete(&node.key, output, port);
                Ok(Flow::Finished)
            }
            NodeOutcome::Interrupted { payload } => {
                let suspension = Suspension {
                    node_key: node.key.clone(),
                    node_path: vec![node.key.clone()],
                    payload,
                };
                state.set_suspended(Some(suspension.clone()));
                Ok(Flow::Suspended(suspension))
            }
        }
    }

    /// Run the inlined schema against a nested state kept in this node's
    /// intermediate record, so a suspension inside it survives checkpoints
    async fn run_sub_workflow(
        &mut self,
        node: &NodeSchema,
        input: Map<String, Value>,
        resume: Option<Value>,
        state: &mut State,
    ) -> Result<Flow, FlowError> {
        let sub_schema = node.sub_schema.as_deref().ok_or_else(|| {
            FlowError::execution(&node.key, "sub-workflow schema was not inlined")
        })?;

        let mut nested = match state.intermediate(&node.key).and_then(|m| m.get(SUB_STATE_KEY)) {
            Some(saved) => serde_json::from_value::<State>(saved.clone())?,
            None => State::new(input),
        };
        if let Some(value) = resume {
            match nested.suspended().map(|s| s.node_key.clone()) {
                Some(inner) => nested.set_resume_data(&inner, value),
                None => log::warn!(
                    "Sub-workflow '{}' received resume data but is not suspended",
                    node.key
                ),
            }
        }

        match self.run_scope(sub_schema, None, &mut nested).await? {
            Flow::Finished => {
                let output = sub_schema
                    .exit()
                    .and_then(|exit| nested.output(&exit.key))
                    .cloned()
                    .unwrap_or_else(|| Value::Object(Map::new()));
                state.intermediate_mut(&node.key).remove(SUB_STATE_KEY);
                state.complete(&node.key, output, None);
                Ok(Flow::Finished)
            }
            Flow::Suspended(inner) => {
                let mut node_path = vec![node.key.clone()];
                node_path.extend(inner.node_path);
                let suspension = Suspension {
                    node_key: node.key.clone(),
                    node_path,
                    payload: inner.payload,
                };
                let saved = serde_json::to_value(&nested)?;
                state
                    .intermediate_mut(&node.key)
                    .insert(SUB_STATE_KEY.to_string(), saved);
                state.set_suspended(Some(suspension.clone()));
                Ok(Flow::Suspended(suspension))
            }
        }
    }

    /// Run the container's children once per element of its `items` input.
    ///
    /// Each pass sees `item` and `index` on the container's own output, and
    /// every bound output source is gathered into an array.
    async fn run_loop(
        &mut self,
        schema: &WorkflowSchema,
        node: &NodeSchema,
        input: Map<String, Value>,
        state: &mut State,
    ) -> Result<Flow, FlowError> {
        let items = match input.get("items") {
            Some(Value::Array(items)) => items.clone(),
            _ => {
                return Err(FlowError::execution(
                    &node.key,
                    "loop input 'items' must be an array",
                ))
            }
        };

        let body = schema.descendants_of(&node.key);
        let mut gathered: Vec<Vec<Value>> = vec![Vec::new(); node.output_sources.len()];

        for (index, item) in items.into_iter().enumerate() {
            state.reset_nodes(&body);
            let mut vars = input.clone();
            vars.insert("item".to_string(), item);
            vars.insert("index".to_string(), Value::from(index));
            state.set_output(&node.key, Value::Object(vars));

            if let Flow::Suspended(inner) = self.run_scope(schema, Some(&node.key), state).await? {
                return Err(FlowError::execution(
                    &node.key,
                    format!("node '{}' cannot suspend inside a loop", inner.node_key),
                ));
            }

            for (field, values) in node.output_sources.iter().zip(gathered.iter_mut()) {
                let value = match &field.source {
                    FieldSource::Literal(v) => v.clone(),
                    FieldSource::Ref(r) => state
                        .get_path(&r.from_node_key, &r.from_path)
                        .cloned()
                        .unwrap_or(Value::Null),
                };
                values.push(value);
            }
        }

        let mut output = Map::new();
        for (field, values) in node.output_sources.iter().zip(gathered) {
            set_path(&mut output, &field.path, Value::Array(values));
        }
        state.complete(&node.key, Value::Object(output), None);
        Ok(Flow::Finished)
    }
}

/// Completed source whose port, if any, was the one selected
fn is_active(connection: &Connection, state: &State) -> bool {
    state.is_completed(&connection.from_node)
        && match &connection.from_port {
            None => true,
            Some(port) => state.selected_port(&connection.from_node) == Some(port.as_str()),
        }
}

fn is_ready(schema: &WorkflowSchema, node: &NodeSchema, state: &State) -> bool {
    if state.is_done(&node.key) {
        return false;
    }

    let inbound: Vec<&Connection> = schema.inbound(&node.key).collect();
    if !inbound.is_empty() {
        let settled = inbound.iter().all(|c| state.is_done(&c.from_node));
        if !settled || !inbound.iter().any(|c| is_active(c, state)) {
            return false;
        }
    }

    let containers = schema.containers_of(&node.key);
    node.referenced_keys().all(|key| {
        state.is_done(key) || containers.contains(&key) || schema.node(key).is_none()
    })
}

fn skip_unreachable(schema: &WorkflowSchema, scope: Option<&str>, state: &mut State) {
    loop {
        let dead: Vec<String> = schema
            .scope_nodes(scope)
            .filter(|n| !state.is_done(&n.key))
            .filter(|n| {
                let inbound: Vec<&Connection> = schema.inbound(&n.key).collect();
                !inbound.is_empty()
                    && inbound.iter().all(|c| state.is_done(&c.from_node))
                    && !inbound.iter().any(|c| is_active(c, state))
            })
            .map(|n| n.key.clone())
            .collect();
        if dead.is_empty() {
            return;
        }
        for key in dead {
            log::debug!("Skipping node '{}' on an untaken branch", key);
            state.skip(&key);
        }
    }
}

/// Build a node's input record from literals and upstream outputs.
///
/// References to outputs that do not exist (skipped branches, absent
/// fields) leave the target field unset.
fn resolve_inputs(node: &NodeSchema, state: &State) -> Map<String, Value> {
    let mut input = Map::new();
    for field in &node.input_sources {
        let value = match &field.source {
            FieldSource::Literal(v) => v.clone(),
            FieldSource::Ref(r) => match state.get_path(&r.from_node_key, &r.from_path) {
                Some(v) => v.clone(),
                None => {
                    log::debug!(
                        "Node '{}': no value at {}.{:?}",
                        node.key,
                        r.from_node_key,
                        r.from_path
                    );
                    continue;
                }
            },
        };
        set_path(&mut input, &field.path, value);
    }
    input
}
