// SPDX-License-Identifier: MIT

use super::{decode_config, NodeContext, NodeExecutor, NodeOutcome};
use crate::adk::error::FlowError;
use crate::kinetic::workflow::graph::types::NodeSchema;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Host function bound to lambda nodes
pub type LambdaFn = Arc<dyn Fn(Map<String, Value>) -> Result<Value, FlowError> + Send + Sync>;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LambdaConfig {
    /// Registered function name, the node key when absent
    pub function: Option<String>,
}

/// Runs host functions registered by name
#[derive(Clone, Default)]
pub struct LambdaExecutor {
    functions: HashMap<String, LambdaFn>,
}

impl LambdaExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_function<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Map<String, Value>) -> Result<Value, FlowError> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(f));
        self
    }
}

#[async_trait]
impl NodeExecutor for LambdaExecutor {
    async fn execute(
        &self,
        node: &NodeSchema,
        input: Map<String, Value>,
        _ctx: &mut NodeContext<'_>,
    ) -> Result<NodeOutcome, FlowError> {
        let config: LambdaConfig = decode_config(node)?;
        let name = config.function.as_deref().unwrap_or(&node.key);
        let f = self
            .functions
            .get(name)
            .ok_or_else(|| FlowError::config(format!("no lambda registered as '{}'", name)))?;

        let output = match f(input)? {
            obj @ Value::Object(_) => obj,
            other => json!({ "output": other }),
        };
        Ok(NodeOutcome::complete(output))
    }
}
