// SPDX-License-Identifier: MIT

//! OpenAI-compatible chat completions provider

use super::{Content, GenerationConfig, Model, Part};
use crate::adk::error::ModelError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::env;

const PROVIDER: &str = "openai";

/// Chat model reached over the `/chat/completions` endpoint
pub struct OpenAiModel {
    client: Client,
    api_key: String,
    model_name: String,
    base_url: String,
}

impl OpenAiModel {
    pub fn new(
        model_name: impl Into<String>,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            model_name: model_name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Build from `OPENAI_API_KEY`, `OPENAI_BASE_URL` and `KINETIC_MODEL`.
    ///
    /// Returns `None` when no API key is set.
    pub fn from_env() -> Option<Self> {
        let api_key = env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty())?;
        let base_url =
            env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let model_name = env::var("KINETIC_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        Some(Self::new(model_name, api_key, base_url))
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    fn to_message(content: &Content) -> Value {
        let role = match content.role.as_str() {
            "model" => "assistant",
            other => other,
        };
        json!({
            "role": role,
            "content": content.joined_text(),
        })
    }

    fn request_body(&self, history: &[Content], config: Option<&GenerationConfig>) -> Value {
        let messages: Vec<Value> = history.iter().map(Self::to_message).collect();
        let mut body = json!({
            "model": self.model_name,
            "messages": messages,
        });
        if let Some(cfg) = config {
            if let Some(temp) = cfg.temperature {
                body["temperature"] = json!(temp);
            }
            if let Some(max_tokens) = cfg.max_output_tokens {
                body["max_tokens"] = json!(max_tokens);
            }
            if let Some(top_p) = cfg.top_p {
                body["top_p"] = json!(top_p);
            }
        }
        body
    }

    fn parse_response(response: &Value) -> Result<Content, ModelError> {
        let message = response["choices"]
            .as_array()
            .and_then(|c| c.first())
            .map(|choice| &choice["message"])
            .ok_or_else(|| ModelError::InvalidResponse("no choices in response".to_string()))?;

        let mut parts = Vec::new();
        if let Some(reasoning) = message["reasoning_content"].as_str() {
            if !reasoning.is_empty() {
                parts.push(Part::Thinking(reasoning.to_string()));
            }
        }
        match message["content"].as_str() {
            Some(text) => parts.push(Part::Text(text.to_string())),
            None => {
                return Err(ModelError::InvalidResponse(
                    "message has no text content".to_string(),
                ))
            }
        }
        Ok(Content {
            role: "model".to_string(),
            parts,
        })
    }
}

fn provider_error(message: impl ToString) -> ModelError {
    ModelError::Provider {
        provider: PROVIDER.to_string(),
        message: message.to_string(),
    }
}

#[async_trait]
impl Model for OpenAiModel {
    async fn generate_content(
        &self,
        history: &[Content],
        config: Option<&GenerationConfig>,
    ) -> Result<Content, ModelError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(history, config);
        log::debug!("Calling {} with {} message(s)", url, history.len());

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(provider_error)?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(ModelError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(provider_error(format!("{}: {}", status, text)));
        }

        let json: Value = resp.json().await.map_err(provider_error)?;
        Self::parse_response(&json)
    }
}
