// SPDX-License-Identifier: MIT

//! `{{var}}` template rendering over a node's input record

use crate::adk::error::FlowError;
use minijinja::{Environment, Value};
use once_cell::sync::Lazy;
use serde_json::Map;

static ENV: Lazy<Environment<'static>> = Lazy::new(Environment::new);

/// Render `template` with the input record as context.
///
/// Missing variables render as empty strings.
pub fn render(
    node_key: &str,
    template: &str,
    context: &Map<String, serde_json::Value>,
) -> Result<String, FlowError> {
    if !template.contains("{{") && !template.contains("{%") {
        return Ok(template.to_string());
    }
    ENV.render_str(template, Value::from_serialize(context))
        .map_err(|e| {
            FlowError::execution(node_key, format!("failed to render template: {}", e))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(value: serde_json::Value) -> Map<String, serde_json::Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_render_variables_and_paths() {
        let context = ctx(json!({"input": "what's your name?", "user": {"name": "eino"}}));
        assert_eq!(render("qa", "{{input}}", &context).unwrap(), "what's your name?");
        assert_eq!(
            render("qa", "Hi {{ user.name | upper }}", &context).unwrap(),
            "Hi EINO"
        );
        assert_eq!(render("qa", "plain text", &context).unwrap(), "plain text");
        assert_eq!(render("qa", "[{{missing}}]", &context).unwrap(), "[]");
    }

    #[test]
    fn test_render_error_names_node() {
        let err = render("qa", "{{ unclosed", &Map::new()).unwrap_err();
        assert_eq!(err.node_key(), Some("qa"));
    }
}
