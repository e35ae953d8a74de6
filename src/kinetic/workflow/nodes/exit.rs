// SPDX-License-Identifier: MIT

use super::template::render;
use super::{decode_config, NodeContext, NodeExecutor, NodeOutcome};
use crate::adk::error::FlowError;
use crate::kinetic::workflow::graph::types::NodeSchema;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TerminatePlan {
    /// Return the bound variables as the workflow output
    #[default]
    ReturnVariables,
    /// Render `content` and return it as `output`
    UseAnswerContent,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExitConfig {
    pub terminate_plan: TerminatePlan,
    pub content: Option<String>,
}

pub struct ExitExecutor;

#[async_trait]
impl NodeExecutor for ExitExecutor {
    async fn execute(
        &self,
        node: &NodeSchema,
        input: Map<String, Value>,
        _ctx: &mut NodeContext<'_>,
    ) -> Result<NodeOutcome, FlowError> {
        let config: ExitConfig = decode_config(node)?;
        let output = match config.terminate_plan {
            TerminatePlan::ReturnVariables => Value::Object(input),
            TerminatePlan::UseAnswerContent => {
                let content = config.content.as_deref().unwrap_or_default();
                json!({"output": render(&node.key, content, &input)?})
            }
        };
        Ok(NodeOutcome::complete(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinetic::workflow::graph::types::NodeType;

    async fn run(node: &NodeSchema, input: Value) -> NodeOutcome {
        let workflow_input = Map::new();
        let mut intermediate = Map::new();
        let mut ctx = NodeContext::new(&node.key, &workflow_input, &mut intermediate, None);
        ExitExecutor
            .execute(node, input.as_object().cloned().unwrap(), &mut ctx)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_return_variables() {
        let node = NodeSchema::new("900001", NodeType::Exit);
        let outcome = run(&node, json!({"answer": "my name is eino"})).await;
        assert_eq!(
            outcome,
            NodeOutcome::complete(json!({"answer": "my name is eino"}))
        );
    }

    #[tokio::test]
    async fn test_use_answer_content() {
        let node = NodeSchema::new("900001", NodeType::Exit).with_configs(json!({
            "terminatePlan": "useAnswerContent",
            "content": "Hello {{name}}!"
        }));
        let outcome = run(&node, json!({"name": "eino"})).await;
        assert_eq!(outcome, NodeOutcome::complete(json!({"output": "Hello eino!"})));
    }
}
