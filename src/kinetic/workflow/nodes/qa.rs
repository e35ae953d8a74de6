// SPDX-License-Identifier: MIT

//! Question-answer node
//!
//! The node suspends the run with a question, then resolves the caller's
//! answer on resume. Working data lives in the node's intermediate record:
//!
//! ```text
//! { "questions": [{"question": "..", "choices": [..]}], "answers": [".."] }
//! ```

use super::template::render;
use super::{coerce_value, decode_config, parse_json_reply, value_as_text};
use super::{NodeContext, NodeExecutor, NodeOutcome};
use crate::adk::error::{FlowError, ModelError};
use crate::adk::model::{Content, Model};
use crate::kinetic::workflow::graph::branch::{branch_port, DEFAULT_PORT};
use crate::kinetic::workflow::graph::types::NodeSchema;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;

pub const USER_RESPONSE_KEY: &str = "USER_RESPONSE";
pub const OPTION_ID_KEY: &str = "option_id";
pub const OPTION_CONTENT_KEY: &str = "option_content";
/// Option id reported when the answer matches none of the choices
pub const OTHER_OPTION_ID: &str = "other";
/// Input field holding the choice list in dynamic mode
pub const DYNAMIC_CHOICES_KEY: &str = "dynamic_option";

pub const QUESTIONS_KEY: &str = "questions";
pub const ANSWERS_KEY: &str = "answers";
pub const QUESTION_KEY: &str = "question";
pub const CHOICES_KEY: &str = "choices";

const EXTRACTION_PROMPT: &str = "Extract the requested fields from the user's answers. \
Reply with JSON only: {\"fields\": {..}} once every required field is known, \
or {\"question\": \"..\"} to ask the user for what is missing.";

const CHOICE_PROMPT: &str = "Decide which option the user's answer selects. \
Reply with the option index only, or -1 if it matches none of them.";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AnswerType {
    #[default]
    Direct,
    Choices,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChoiceType {
    #[default]
    Fixed,
    Dynamic,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QaConfig {
    pub question_tpl: String,
    pub answer_type: AnswerType,
    pub choice_type: ChoiceType,
    /// Choice templates rendered against the node input
    pub fixed_choices: Vec<String>,
    pub extract_from_answer: bool,
    pub additional_system_prompt_tpl: Option<String>,
    /// Answer rounds allowed while extracting; 0 uses the engine default
    pub max_answer_count: usize,
}

impl QaConfig {
    /// Number of numbered branch ports, `None` when the node does not branch
    pub fn branch_count(&self) -> Option<usize> {
        match (self.answer_type, self.choice_type) {
            (AnswerType::Direct, _) => None,
            (AnswerType::Choices, ChoiceType::Fixed) => Some(self.fixed_choices.len()),
            (AnswerType::Choices, ChoiceType::Dynamic) => Some(1),
        }
    }
}

/// Option id for the choice at `index`: A..Z, then AA, AB, ..
pub fn choice_id(index: usize) -> String {
    let mut n = index + 1;
    let mut id = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        id.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    id.reverse();
    String::from_utf8_lossy(&id).into_owned()
}

pub struct QuestionAnswerExecutor {
    model: Option<Arc<dyn Model>>,
    default_max_answer_count: usize,
}

impl QuestionAnswerExecutor {
    pub fn new(model: Option<Arc<dyn Model>>, default_max_answer_count: usize) -> Self {
        Self {
            model,
            default_max_answer_count,
        }
    }

    fn offered_choices(
        &self,
        node: &NodeSchema,
        config: &QaConfig,
        input: &Map<String, Value>,
    ) -> Result<Vec<String>, FlowError> {
        match config.choice_type {
            ChoiceType::Fixed => config
                .fixed_choices
                .iter()
                .map(|tpl| render(&node.key, tpl, input))
                .collect(),
            ChoiceType::Dynamic => match input.get(DYNAMIC_CHOICES_KEY) {
                Some(Value::Array(items)) => Ok(items.iter().map(value_as_text).collect()),
                _ => Err(FlowError::execution(
                    &node.key,
                    format!("input '{}' must be an array of choices", DYNAMIC_CHOICES_KEY),
                )),
            },
        }
    }

    /// Resolve `answer` to a choice index
    async fn match_choice(&self, choices: &[String], answer: &str) -> Result<Option<usize>, FlowError> {
        let trimmed = answer.trim();
        if let Some(i) = choices.iter().position(|c| c.trim() == trimmed) {
            return Ok(Some(i));
        }
        if let Some(i) = (0..choices.len()).find(|&i| choice_id(i).eq_ignore_ascii_case(trimmed)) {
            return Ok(Some(i));
        }

        let Some(model) = &self.model else {
            return Ok(None);
        };
        let options = choices
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{}: {}", i, c))
            .collect::<Vec<_>>()
            .join("\n");
        let history = [
            Content::system(format!("{}\n\nOptions:\n{}", CHOICE_PROMPT, options)),
            Content::user(answer),
        ];
        let reply = model.generate_content(&history, None).await?.joined_text();
        let index = reply.trim().parse::<i64>().map_err(|_| {
            ModelError::InvalidResponse(format!("expected an option index, got '{}'", reply))
        })?;
        Ok(usize::try_from(index).ok().filter(|&i| i < choices.len()))
    }

    async fn choose(
        &self,
        node: &NodeSchema,
        config: &QaConfig,
        intermediate: &Map<String, Value>,
        answer: String,
    ) -> Result<NodeOutcome, FlowError> {
        let choices: Vec<String> = first_question(intermediate)
            .and_then(|q| q.get(CHOICES_KEY))
            .and_then(Value::as_array)
            .map(|items| items.iter().map(value_as_text).collect())
            .unwrap_or_default();

        match self.match_choice(&choices, &answer).await? {
            Some(i) => {
                let port = match config.choice_type {
                    ChoiceType::Fixed => branch_port(i),
                    ChoiceType::Dynamic => branch_port(0),
                };
                log::debug!("QA node '{}' answer matched option {}", node.key, choice_id(i));
                Ok(NodeOutcome::branch(
                    json!({ OPTION_ID_KEY: choice_id(i), OPTION_CONTENT_KEY: choices[i] }),
                    port,
                ))
            }
            None => Ok(NodeOutcome::branch(
                json!({ OPTION_ID_KEY: OTHER_OPTION_ID, OPTION_CONTENT_KEY: answer }),
                DEFAULT_PORT,
            )),
        }
    }

    async fn extract(
        &self,
        node: &NodeSchema,
        config: &QaConfig,
        input: &Map<String, Value>,
        intermediate: &mut Map<String, Value>,
        answer: String,
    ) -> Result<NodeOutcome, FlowError> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| ModelError::NotConfigured(node.key.clone()))?;

        let fields = node
            .output_types
            .iter()
            .map(|(name, t)| {
                let required = if t.required { " (required)" } else { "" };
                format!("- {}: {:?}{}", name, t.data_type, required)
            })
            .collect::<Vec<_>>()
            .join("\n");
        let mut system = format!("{}\n\nFields:\n{}", EXTRACTION_PROMPT, fields);
        if let Some(tpl) = &config.additional_system_prompt_tpl {
            let extra = render(&node.key, tpl, input)?;
            if !extra.is_empty() {
                system = format!("{}\n\n{}", extra, system);
            }
        }

        let questions = list(intermediate, QUESTIONS_KEY);
        let answers = list(intermediate, ANSWERS_KEY);
        let mut history = vec![Content::system(system)];
        for (q, a) in questions.iter().zip(answers.iter()) {
            let asked = q.get(QUESTION_KEY).map(value_as_text).unwrap_or_default();
            history.push(Content::model(asked));
            history.push(Content::user(value_as_text(a)));
        }

        let reply = model.generate_content(&history, None).await?.joined_text();
        let parsed = parse_json_reply(&reply)?;

        if let Some(extracted) = parsed.get("fields").and_then(Value::as_object) {
            let mut output = Map::new();
            for (name, type_info) in &node.output_types {
                match extracted.get(name).filter(|v| !v.is_null()) {
                    Some(v) => {
                        let value = coerce_value(v.clone(), type_info).map_err(|e| {
                            FlowError::execution(&node.key, format!("{}: {}", name, e))
                        })?;
                        output.insert(name.clone(), value);
                    }
                    None if type_info.required => {
                        return Err(FlowError::execution(
                            &node.key,
                            format!("extraction is missing required field '{}'", name),
                        ));
                    }
                    None => {}
                }
            }
            output.insert(USER_RESPONSE_KEY.to_string(), Value::String(answer));
            return Ok(NodeOutcome::complete(Value::Object(output)));
        }

        let Some(next) = parsed.get(QUESTION_KEY).and_then(Value::as_str) else {
            return Err(ModelError::InvalidResponse(format!(
                "expected 'fields' or 'question': {}",
                reply
            ))
            .into());
        };
        let max = match config.max_answer_count {
            0 => self.default_max_answer_count,
            n => n,
        };
        if answers.len() >= max {
            return Err(FlowError::execution(
                &node.key,
                format!("no answer extracted after {} rounds", max),
            ));
        }
        log::debug!("QA node '{}' asking follow-up question", node.key);
        Ok(ask(intermediate, next.to_string(), None))
    }
}

#[async_trait]
impl NodeExecutor for QuestionAnswerExecutor {
    async fn execute(
        &self,
        node: &NodeSchema,
        input: Map<String, Value>,
        ctx: &mut NodeContext<'_>,
    ) -> Result<NodeOutcome, FlowError> {
        let config: QaConfig = decode_config(node)?;

        if list(ctx.intermediate, QUESTIONS_KEY).is_empty() {
            let choices = match config.answer_type {
                AnswerType::Direct => None,
                AnswerType::Choices => Some(self.offered_choices(node, &config, &input)?),
            };
            let question = render(&node.key, &config.question_tpl, &input)?;
            return Ok(ask(ctx.intermediate, question, choices));
        }

        let Some(resume) = ctx.take_resume() else {
            let payload = list(ctx.intermediate, QUESTIONS_KEY)
                .last()
                .cloned()
                .unwrap_or_default();
            return Ok(NodeOutcome::Interrupted { payload });
        };

        let answer = value_as_text(&resume);
        push(ctx.intermediate, ANSWERS_KEY, Value::String(answer.clone()));

        match config.answer_type {
            AnswerType::Direct if config.extract_from_answer => {
                self.extract(node, &config, &input, ctx.intermediate, answer)
                    .await
            }
            AnswerType::Direct => Ok(NodeOutcome::complete(
                json!({ USER_RESPONSE_KEY: answer }),
            )),
            AnswerType::Choices => self.choose(node, &config, ctx.intermediate, answer).await,
        }
    }
}

/// Record a question in the transcript and suspend with it
fn ask(intermediate: &mut Map<String, Value>, question: String, choices: Option<Vec<String>>) -> NodeOutcome {
    let mut entry = Map::new();
    entry.insert(QUESTION_KEY.to_string(), Value::String(question));
    if let Some(choices) = choices {
        entry.insert(CHOICES_KEY.to_string(), json!(choices));
    }
    let payload = Value::Object(entry);
    push(intermediate, QUESTIONS_KEY, payload.clone());
    NodeOutcome::Interrupted { payload }
}

fn list(intermediate: &Map<String, Value>, key: &str) -> Vec<Value> {
    intermediate
        .get(key)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn first_question(intermediate: &Map<String, Value>) -> Option<&Value> {
    intermediate
        .get(QUESTIONS_KEY)
        .and_then(Value::as_array)
        .and_then(|q| q.first())
}

fn push(intermediate: &mut Map<String, Value>, key: &str, value: Value) {
    let slot = intermediate
        .entry(key.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    match slot {
        Value::Array(items) => items.push(value),
        other => *other = Value::Array(vec![value]),
    }
}
