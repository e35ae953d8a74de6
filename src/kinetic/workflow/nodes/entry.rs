// SPDX-License-Identifier: MIT

use super::{coerce_value, decode_config, NodeContext, NodeExecutor, NodeOutcome};
use crate::adk::error::FlowError;
use crate::kinetic::workflow::graph::types::NodeSchema;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EntryConfig {
    /// Values used when the caller omits a declared field
    pub default_values: Map<String, Value>,
}

/// Projects the workflow input onto the entry's declared outputs
pub struct EntryExecutor;

#[async_trait]
impl NodeExecutor for EntryExecutor {
    async fn execute(
        &self,
        node: &NodeSchema,
        _input: Map<String, Value>,
        ctx: &mut NodeContext<'_>,
    ) -> Result<NodeOutcome, FlowError> {
        if node.output_types.is_empty() {
            return Ok(NodeOutcome::complete(Value::Object(
                ctx.workflow_input.clone(),
            )));
        }

        let config: EntryConfig = decode_config(node)?;
        let mut output = Map::new();
        for (name, type_info) in &node.output_types {
            let value = ctx
                .workflow_input
                .get(name)
                .filter(|v| !v.is_null())
                .or_else(|| config.default_values.get(name))
                .cloned();
            match value {
                Some(v) => {
                    let coerced = coerce_value(v, type_info).map_err(|e| {
                        FlowError::execution(&node.key, format!("input '{}': {}", name, e))
                    })?;
                    output.insert(name.clone(), coerced);
                }
                None if type_info.required => {
                    return Err(FlowError::execution(
                        &node.key,
                        format!("missing required input '{}'", name),
                    ));
                }
                None => {}
            }
        }
        Ok(NodeOutcome::complete(Value::Object(output)))
    }
}
