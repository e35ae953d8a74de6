// SPDX-License-Identifier: MIT

//! Runtime state for one workflow run

use crate::kinetic::workflow::graph::types::NodeKey;
use crate::kinetic::workflow::nodes::NodeContext;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Marker of the node a run is waiting on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suspension {
    /// Key of the suspended node in this state's own schema
    pub node_key: NodeKey,
    /// Keys from this schema down through nested sub-workflows to the
    /// node that actually raised the interrupt
    pub node_path: Vec<NodeKey>,
    /// Pending-interaction payload shown to the caller
    pub payload: Value,
}

/// Everything a run needs to continue after a suspension.
///
/// The whole value is serialized into a checkpoint, so it holds no handles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    input: Map<String, Value>,
    intermediate_result: BTreeMap<NodeKey, Map<String, Value>>,
    resume_data: BTreeMap<NodeKey, Value>,
    outputs: BTreeMap<NodeKey, Value>,
    completed: BTreeSet<NodeKey>,
    skipped: BTreeSet<NodeKey>,
    selected_ports: BTreeMap<NodeKey, String>,
    suspended: Option<Suspension>,
}

impl State {
    pub fn new(input: Map<String, Value>) -> Self {
        Self {
            input,
            ..Default::default()
        }
    }

    pub fn input(&self) -> &Map<String, Value> {
        &self.input
    }

    pub fn intermediate(&self, key: &str) -> Option<&Map<String, Value>> {
        self.intermediate_result.get(key)
    }

    pub fn intermediate_result(&self) -> &BTreeMap<NodeKey, Map<String, Value>> {
        &self.intermediate_result
    }

    pub fn output(&self, key: &str) -> Option<&Value> {
        self.outputs.get(key)
    }

    pub fn resume_data(&self, key: &str) -> Option<&Value> {
        self.resume_data.get(key)
    }

    pub fn is_completed(&self, key: &str) -> bool {
        self.completed.contains(key)
    }

    pub fn is_skipped(&self, key: &str) -> bool {
        self.skipped.contains(key)
    }

    /// Completed or skipped
    pub fn is_done(&self, key: &str) -> bool {
        self.is_completed(key) || self.is_skipped(key)
    }

    pub fn selected_port(&self, key: &str) -> Option<&str> {
        self.selected_ports.get(key).map(String::as_str)
    }

    pub fn suspended(&self) -> Option<&Suspension> {
        self.suspended.as_ref()
    }

    /// Value at `path` inside the output of `key`
    pub fn get_path(&self, key: &str, path: &[String]) -> Option<&Value> {
        lookup_path(self.outputs.get(key)?, path)
    }

    pub(crate) fn complete(&mut self, key: &str, output: Value, port: Option<String>) {
        self.outputs.insert(key.to_string(), output);
        self.completed.insert(key.to_string());
        self.skipped.remove(key);
        match port {
            Some(port) => self.selected_ports.insert(key.to_string(), port),
            None => self.selected_ports.remove(key),
        };
        if self.intermediate_result.get(key).is_some_and(Map::is_empty) {
            self.intermediate_result.remove(key);
        }
        if self.suspended.as_ref().is_some_and(|s| s.node_key == key) {
            self.suspended = None;
        }
    }

    pub(crate) fn skip(&mut self, key: &str) {
        self.skipped.insert(key.to_string());
    }

    /// Publish an output without marking the node done (container variables)
    pub(crate) fn set_output(&mut self, key: &str, value: Value) {
        self.outputs.insert(key.to_string(), value);
    }

    /// Forget everything recorded for `keys` so they can run again
    pub(crate) fn reset_nodes<S: AsRef<str>>(&mut self, keys: &[S]) {
        for key in keys {
            let key = key.as_ref();
            self.outputs.remove(key);
            self.completed.remove(key);
            self.skipped.remove(key);
            self.selected_ports.remove(key);
            self.intermediate_result.remove(key);
        }
    }

    pub(crate) fn take_resume_data(&mut self, key: &str) -> Option<Value> {
        self.resume_data.remove(key)
    }

    pub(crate) fn set_resume_data(&mut self, key: &str, value: Value) {
        self.resume_data.insert(key.to_string(), value);
    }

    pub(crate) fn intermediate_mut(&mut self, key: &str) -> &mut Map<String, Value> {
        self.intermediate_result.entry(key.to_string()).or_default()
    }

    pub(crate) fn set_suspended(&mut self, suspension: Option<Suspension>) {
        self.suspended = suspension;
    }

    /// Borrow the pieces a node executor may touch
    pub(crate) fn node_context<'a>(
        &'a mut self,
        key: &'a str,
        resume: Option<Value>,
    ) -> NodeContext<'a> {
        let intermediate = self.intermediate_result.entry(key.to_string()).or_default();
        NodeContext::new(key, &self.input, intermediate, resume)
    }
}

/// Caller-side view of a loaded checkpoint, handed to a state modifier.
///
/// Resume data is only accepted for the node the run is suspended on.
pub struct ResumeContext<'a> {
    state: &'a mut State,
}

impl<'a> ResumeContext<'a> {
    pub(crate) fn new(state: &'a mut State) -> Self {
        Self { state }
    }

    pub fn suspended_node(&self) -> Option<&str> {
        self.state.suspended().map(|s| s.node_key.as_str())
    }

    pub fn suspension(&self) -> Option<&Suspension> {
        self.state.suspended()
    }

    pub fn intermediate(&self, key: &str) -> Option<&Map<String, Value>> {
        self.state.intermediate(key)
    }

    /// Supply the answer for the suspended node.
    ///
    /// `key` may name the suspended node itself or, for nested runs, the
    /// innermost node that raised the interrupt. Returns false and leaves the
    /// state untouched for any other key.
    pub fn resume(&mut self, key: &str, value: Value) -> bool {
        let target = match self.state.suspended() {
            Some(s) if s.node_key == key || s.node_path.last().is_some_and(|k| k == key) => {
                s.node_key.clone()
            }
            _ => {
                log::warn!(
                    "Ignoring resume data for '{}': suspended node is {:?}",
                    key,
                    self.suspended_node()
                );
                return false;
            }
        };
        log::info!("Resume data supplied for node '{}'", target);
        self.state.set_resume_data(&target, value);
        true
    }
}

/// Walk `path` through objects (by key) and arrays (by index)
pub fn lookup_path<'v>(value: &'v Value, path: &[String]) -> Option<&'v Value> {
    path.iter().try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Insert `value` at `path`, creating intermediate objects as needed
pub fn set_path(target: &mut Map<String, Value>, path: &[String], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        if let Value::Object(map) = value {
            target.extend(map);
        }
        return;
    };

    let mut current = target;
    for segment in parents {
        let slot = current
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        let Value::Object(map) = slot else {
            return;
        };
        current = map;
    }
    current.insert(last.clone(), value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(p: &str) -> Vec<String> {
        p.split('.').map(str::to_string).collect()
    }

    #[test]
    fn test_lookup_path() {
        let value = json!({"result": {"items": [{"name": "a"}, {"name": "b"}]}});
        assert_eq!(
            lookup_path(&value, &path("result.items.1.name")),
            Some(&json!("b"))
        );
        assert_eq!(lookup_path(&value, &[]), Some(&value));
        assert_eq!(lookup_path(&value, &path("result.missing")), None);
        assert_eq!(lookup_path(&value, &path("result.items.x")), None);
    }

    #[test]
    fn test_set_path_nested() {
        let mut map = Map::new();
        set_path(&mut map, &path("user.name"), json!("eino"));
        set_path(&mut map, &path("user.age"), json!(3));
        set_path(&mut map, &path("flag"), json!(true));
        assert_eq!(
            Value::Object(map.clone()),
            json!({"user": {"name": "eino", "age": 3}, "flag": true})
        );

        set_path(&mut map, &[], json!({"extra": 1}));
        assert_eq!(map["extra"], json!(1));
    }

    #[test]
    fn test_complete_and_reset() {
        let mut state = State::new(Map::new());
        state.intermediate_mut("qa").insert("question".into(), json!("why?"));
        state.intermediate_mut("sel");
        state.complete("sel", json!({}), Some("branch_0".into()));
        state.complete("qa", json!({"answer": "because"}), None);

        assert!(state.is_done("qa"));
        assert_eq!(state.selected_port("sel"), Some("branch_0"));
        assert!(state.intermediate("sel").is_none());
        assert_eq!(state.intermediate("qa").unwrap()["question"], json!("why?"));
        assert_eq!(state.get_path("qa", &path("answer")), Some(&json!("because")));

        state.reset_nodes(&["qa", "sel"]);
        assert!(!state.is_done("qa"));
        assert!(state.selected_port("sel").is_none());
        assert!(state.intermediate("qa").is_none());
    }

    #[test]
    fn test_resume_context_only_accepts_suspended_node() {
        let mut state = State::new(Map::new());
        state.set_suspended(Some(Suspension {
            node_key: "sub".into(),
            node_path: vec!["sub".into(), "qa".into()],
            payload: json!({"question": "name?"}),
        }));

        let mut ctx = ResumeContext::new(&mut state);
        assert_eq!(ctx.suspended_node(), Some("sub"));
        assert!(!ctx.resume("other", json!("x")));
        assert!(ctx.resume("qa", json!("eino")));

        assert!(state.resume_data("other").is_none());
        assert_eq!(state.resume_data("sub"), Some(&json!("eino")));
        assert_eq!(state.take_resume_data("sub"), Some(json!("eino")));
        assert!(state.take_resume_data("sub").is_none());
    }

    #[test]
    fn test_state_serializes_round_trip() {
        let mut input = Map::new();
        input.insert("query".into(), json!("hi"));
        let mut state = State::new(input);
        state.complete("entry", json!({"query": "hi"}), None);
        state.skip("branch");

        let encoded = serde_json::to_value(&state).unwrap();
        let decoded: State = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, state);
        assert!(decoded.is_skipped("branch"));
    }
}
