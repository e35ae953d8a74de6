// SPDX-License-Identifier: MIT

use super::{decode_config, NodeContext, NodeExecutor, NodeOutcome};
use crate::adk::error::{CompileError, FlowError};
use crate::kinetic::workflow::condition::{evaluate, parse};
use crate::kinetic::workflow::graph::branch::{branch_port, DEFAULT_PORT};
use crate::kinetic::workflow::graph::types::NodeSchema;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SelectorConfig {
    /// Ordered conditions; condition `i` selects port `branch_i`
    pub conditions: Vec<String>,
}

/// Routes to the first branch whose condition holds, `default` otherwise
pub struct SelectorExecutor;

#[async_trait]
impl NodeExecutor for SelectorExecutor {
    async fn execute(
        &self,
        node: &NodeSchema,
        input: Map<String, Value>,
        _ctx: &mut NodeContext<'_>,
    ) -> Result<NodeOutcome, FlowError> {
        let config: SelectorConfig = decode_config(node)?;

        for (i, source) in config.conditions.iter().enumerate() {
            let expr = parse(source).map_err(|e| CompileError::InvalidConfig {
                node: node.key.clone(),
                message: e.to_string(),
            })?;
            if evaluate(&expr, &input) {
                log::debug!("Selector '{}' matched condition {}: {}", node.key, i, source);
                let port = branch_port(i);
                return Ok(NodeOutcome::branch(json!({ "branch": port }), port));
            }
        }

        log::debug!("Selector '{}' fell through to default", node.key);
        Ok(NodeOutcome::branch(
            json!({ "branch": DEFAULT_PORT }),
            DEFAULT_PORT,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinetic::workflow::graph::types::NodeType;

    async fn select(conditions: Value, input: Value) -> Result<NodeOutcome, FlowError> {
        let node =
            NodeSchema::new("sel", NodeType::Selector).with_configs(json!({ "conditions": conditions }));
        let workflow_input = Map::new();
        let mut intermediate = Map::new();
        let mut ctx = NodeContext::new("sel", &workflow_input, &mut intermediate, None);
        SelectorExecutor
            .execute(&node, input.as_object().cloned().unwrap(), &mut ctx)
            .await
    }

    #[tokio::test]
    async fn test_first_matching_condition_wins() {
        let outcome = select(
            json!(["score > 5", "score > 1", "true"]),
            json!({"score": 3}),
        )
        .await
        .unwrap();
        assert_eq!(
            outcome,
            NodeOutcome::branch(json!({"branch": "branch_1"}), "branch_1")
        );
    }

    #[tokio::test]
    async fn test_default_when_nothing_matches() {
        let outcome = select(json!(["intent == 'search'"]), json!({"intent": "chat"}))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            NodeOutcome::branch(json!({"branch": "default"}), "default")
        );
    }

    #[tokio::test]
    async fn test_bad_condition_is_config_error() {
        let err = select(json!(["score >"]), json!({})).await.unwrap_err();
        assert!(matches!(
            err,
            FlowError::Compile(CompileError::InvalidConfig { .. })
        ));
    }
}
