// SPDX-License-Identifier: MIT

//! Node executors
//!
//! Every leaf node type is run by a `NodeExecutor` looked up in the
//! `NodeRegistry`. Executors receive the node's resolved input record and a
//! `NodeContext` scoped to that node; they either complete with an output
//! record (optionally choosing a branch port) or ask the run to suspend.

pub mod entry;
pub mod exit;
pub mod lambda;
pub mod llm;
pub mod qa;
pub mod selector;
pub mod template;

use crate::adk::error::{CompileError, FlowError, ModelError};
use crate::kinetic::workflow::graph::types::{NodeSchema, TypeInfo};
use crate::kinetic::workflow::types::DataType;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

pub use entry::EntryExecutor;
pub use exit::ExitExecutor;
pub use lambda::{LambdaExecutor, LambdaFn};
pub use llm::LlmExecutor;
pub use qa::QuestionAnswerExecutor;
pub use selector::SelectorExecutor;

/// What a node produced
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutcome {
    Completed {
        output: Value,
        /// Selected branch port for nodes that declare ports
        port: Option<String>,
    },
    /// The node needs caller input before it can finish
    Interrupted { payload: Value },
}

impl NodeOutcome {
    pub fn complete(output: Value) -> Self {
        Self::Completed { output, port: None }
    }

    pub fn branch(output: Value, port: impl Into<String>) -> Self {
        Self::Completed {
            output,
            port: Some(port.into()),
        }
    }
}

/// Per-node view of the run state
pub struct NodeContext<'a> {
    pub node_key: &'a str,
    /// Input record the workflow was invoked with
    pub workflow_input: &'a Map<String, Value>,
    /// The node's private working data, persisted across suspensions
    pub intermediate: &'a mut Map<String, Value>,
    resume: Option<Value>,
}

impl<'a> NodeContext<'a> {
    pub fn new(
        node_key: &'a str,
        workflow_input: &'a Map<String, Value>,
        intermediate: &'a mut Map<String, Value>,
        resume: Option<Value>,
    ) -> Self {
        Self {
            node_key,
            workflow_input,
            intermediate,
            resume,
        }
    }

    /// Resume data supplied for this node, consumed on first read
    pub fn take_resume(&mut self) -> Option<Value> {
        self.resume.take()
    }

    pub fn has_resume(&self) -> bool {
        self.resume.is_some()
    }
}

#[async_trait]
pub trait NodeExecutor: Send + Sync {
    async fn execute(
        &self,
        node: &NodeSchema,
        input: Map<String, Value>,
        ctx: &mut NodeContext<'_>,
    ) -> Result<NodeOutcome, FlowError>;
}

/// Decode a node's config, treating an absent config as the default
pub fn decode_config<T>(node: &NodeSchema) -> Result<T, CompileError>
where
    T: DeserializeOwned + Default,
{
    if node.configs.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(node.configs.clone()).map_err(|e| CompileError::InvalidConfig {
        node: node.key.clone(),
        message: e.to_string(),
    })
}

/// Convert `value` to the declared type, parsing strings where sensible
pub fn coerce_value(value: Value, type_info: &TypeInfo) -> Result<Value, String> {
    if value.is_null() {
        return Ok(value);
    }
    match (type_info.data_type, value) {
        (DataType::String, Value::String(s)) => Ok(Value::String(s)),
        (DataType::String, other) => Ok(Value::String(value_as_text(&other))),

        (DataType::Integer, Value::Number(n)) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => Ok(Value::from(i)),
            (None, Some(f)) if f.fract() == 0.0 => Ok(Value::from(f as i64)),
            _ => Err(format!("{} is not an integer", n)),
        },
        (DataType::Integer, Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| format!("'{}' is not an integer", s)),

        (DataType::Number, Value::Number(n)) => Ok(Value::Number(n)),
        (DataType::Number, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| format!("'{}' is not a number", s)),

        (DataType::Boolean, Value::Bool(b)) => Ok(Value::Bool(b)),
        (DataType::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(format!("'{}' is not a boolean", s)),
        },

        (DataType::Object, Value::Object(map)) => coerce_object(map, type_info),
        (DataType::Array, Value::Array(items)) => Ok(Value::Array(items)),
        (DataType::Object | DataType::Array, Value::String(s)) => {
            let parsed: Value =
                serde_json::from_str(&s).map_err(|_| format!("'{}' is not valid JSON", s))?;
            if parsed.is_string() {
                return Err(format!("'{}' is not valid JSON", s));
            }
            coerce_value(parsed, type_info)
        }

        (expected, other) => Err(format!("expected {:?}, got {}", expected, other)),
    }
}

fn coerce_object(mut map: Map<String, Value>, type_info: &TypeInfo) -> Result<Value, String> {
    for (name, field_type) in &type_info.properties {
        if let Some(v) = map.remove(name) {
            let coerced = coerce_value(v, field_type).map_err(|e| format!("{}: {}", name, e))?;
            map.insert(name.clone(), coerced);
        }
    }
    Ok(Value::Object(map))
}

/// Text form of a value: strings verbatim, null empty, everything else JSON
pub fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Extract the JSON object from a model reply, tolerating code fences and
/// surrounding prose
pub fn parse_json_reply(reply: &str) -> Result<Value, FlowError> {
    let trimmed = reply.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if value.is_object() {
            return Ok(value);
        }
    }
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => {
            Ok(serde_json::from_str(&trimmed[start..=end])
                .map_err(|e| ModelError::InvalidResponse(format!("{}: {}", e, reply)))?)
        }
        _ => Err(ModelError::InvalidResponse(format!(
            "no JSON object in reply: {}",
            reply
        ))
        .into()),
    }
}
