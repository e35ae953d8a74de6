// SPDX-License-Identifier: MIT

use super::template::render;
use super::{coerce_value, decode_config, parse_json_reply, NodeContext, NodeExecutor, NodeOutcome};
use crate::adk::error::{FlowError, ModelError};
use crate::adk::model::{Content, GenerationConfig, Model};
use crate::kinetic::workflow::graph::types::NodeSchema;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LlmConfig {
    pub system_prompt: Option<String>,
    pub prompt: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// Single model call with templated prompts.
///
/// One declared output receives the reply text. Several declared outputs
/// are read from a JSON object in the reply.
pub struct LlmExecutor {
    model: Option<Arc<dyn Model>>,
}

impl LlmExecutor {
    pub fn new(model: Option<Arc<dyn Model>>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl NodeExecutor for LlmExecutor {
    async fn execute(
        &self,
        node: &NodeSchema,
        input: Map<String, Value>,
        _ctx: &mut NodeContext<'_>,
    ) -> Result<NodeOutcome, FlowError> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| ModelError::NotConfigured(node.key.clone()))?;
        let config: LlmConfig = decode_config(node)?;

        let mut history = Vec::new();
        if let Some(system) = &config.system_prompt {
            history.push(Content::system(render(&node.key, system, &input)?));
        }
        history.push(Content::user(render(&node.key, &config.prompt, &input)?));

        let generation = GenerationConfig {
            temperature: config.temperature,
            max_output_tokens: config.max_tokens,
            ..Default::default()
        };
        log::debug!("LLM node '{}' calling model", node.key);
        let reply = model
            .generate_content(&history, Some(&generation))
            .await?
            .joined_text();

        let mut output = Map::new();
        match node.output_types.len() {
            0 => {
                output.insert("output".to_string(), Value::String(reply));
            }
            1 => {
                for (name, type_info) in &node.output_types {
                    let value = coerce_value(Value::String(reply.clone()), type_info)
                        .map_err(|e| FlowError::execution(&node.key, format!("{}: {}", name, e)))?;
                    output.insert(name.clone(), value);
                }
            }
            _ => {
                let parsed = parse_json_reply(&reply)?;
                for (name, type_info) in &node.output_types {
                    let Some(raw) = parsed.get(name) else {
                        if type_info.required {
                            return Err(FlowError::execution(
                                &node.key,
                                format!("model reply is missing field '{}'", name),
                            ));
                        }
                        continue;
                    };
                    let value = coerce_value(raw.clone(), type_info)
                        .map_err(|e| FlowError::execution(&node.key, format!("{}: {}", name, e)))?;
                    output.insert(name.clone(), value);
                }
            }
        }
        Ok(NodeOutcome::complete(Value::Object(output)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinetic::workflow::graph::types::{NodeType, TypeInfo};
    use crate::kinetic::workflow::types::DataType;
    use serde_json::json;
    use std::sync::Mutex;

    struct CannedModel {
        reply: String,
        seen: Arc<Mutex<Vec<Vec<Content>>>>,
    }

    #[async_trait]
    impl Model for CannedModel {
        async fn generate_content(
            &self,
            history: &[Content],
            _config: Option<&GenerationConfig>,
        ) -> Result<Content, ModelError> {
            self.seen.lock().unwrap().push(history.to_vec());
            Ok(Content::model(self.reply.clone()))
        }
    }

    async fn run(
        executor: &LlmExecutor,
        node: &NodeSchema,
        input: Value,
    ) -> Result<NodeOutcome, FlowError> {
        let workflow_input = Map::new();
        let mut intermediate = Map::new();
        let mut ctx = NodeContext::new(&node.key, &workflow_input, &mut intermediate, None);
        executor
            .execute(node, input.as_object().cloned().unwrap(), &mut ctx)
            .await
    }

    #[tokio::test]
    async fn test_single_output_takes_reply_text() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let executor = LlmExecutor::new(Some(Arc::new(CannedModel {
            reply: "Paris".to_string(),
            seen: seen.clone(),
        })));
        let node = NodeSchema::new("llm", NodeType::Llm)
            .with_configs(json!({"systemPrompt": "Be brief", "prompt": "Capital of {{country}}?"}))
            .with_output_type("answer", TypeInfo::new(DataType::String, true));

        let outcome = run(&executor, &node, json!({"country": "France"})).await.unwrap();
        assert_eq!(outcome, NodeOutcome::complete(json!({"answer": "Paris"})));

        let calls = seen.lock().unwrap();
        assert_eq!(calls[0][0], Content::system("Be brief"));
        assert_eq!(calls[0][1], Content::user("Capital of France?"));
    }

    #[tokio::test]
    async fn test_multiple_outputs_parse_json() {
        let executor = LlmExecutor::new(Some(Arc::new(CannedModel {
            reply: "```json\n{\"city\": \"Paris\", \"population\": \"2100000\"}\n```".to_string(),
            seen: Arc::new(Mutex::new(Vec::new())),
        })));
        let node = NodeSchema::new("llm", NodeType::Llm)
            .with_configs(json!({"prompt": "Describe"}))
            .with_output_type("city", TypeInfo::new(DataType::String, true))
            .with_output_type("population", TypeInfo::new(DataType::Integer, true));

        let outcome = run(&executor, &node, json!({})).await.unwrap();
        assert_eq!(
            outcome,
            NodeOutcome::complete(json!({"city": "Paris", "population": 2100000}))
        );
    }

    #[tokio::test]
    async fn test_missing_model() {
        let node = NodeSchema::new("llm", NodeType::Llm);
        let err = run(&LlmExecutor::new(None), &node, json!({})).await.unwrap_err();
        assert!(matches!(err, FlowError::Model(ModelError::NotConfigured(_))));
    }
}
