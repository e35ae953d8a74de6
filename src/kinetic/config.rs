// SPDX-License-Identifier: MIT

//! Engine configuration
//!
//! Values come from `KINETIC_*` environment variables (a `.env` file is
//! honoured by the binary) or from a YAML document with the same field names.

use crate::adk::error::FlowError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Scheduler safety limit per invocation
    pub max_steps: usize,
    /// Answer rounds allowed when a question node does not set its own limit
    pub default_max_answer_count: u32,
    /// Directory used by the file-backed checkpoint store
    pub checkpoint_dir: PathBuf,
    /// Reject publishing drafts that never passed a test run
    pub publish_requires_test_run: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps: 1000,
            default_max_answer_count: 3,
            checkpoint_dir: PathBuf::from(".kinetic/checkpoints"),
            publish_requires_test_run: true,
        }
    }
}

impl EngineConfig {
    /// Build a config from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Parse a config from a YAML string; missing fields keep their defaults
    pub fn from_yaml(content: &str) -> Result<Self, FlowError> {
        Ok(serde_yaml::from_str(content)?)
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            max_steps: parse_or("KINETIC_MAX_STEPS", &lookup, defaults.max_steps),
            default_max_answer_count: parse_or(
                "KINETIC_MAX_ANSWER_COUNT",
                &lookup,
                defaults.default_max_answer_count,
            ),
            checkpoint_dir: lookup("KINETIC_CHECKPOINT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.checkpoint_dir),
            publish_requires_test_run: parse_or(
                "KINETIC_REQUIRE_TEST_RUN",
                &lookup,
                defaults.publish_requires_test_run,
            ),
        }
    }
}

fn parse_or<T, F>(key: &str, lookup: &F, default: T) -> T
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            log::warn!("Ignoring malformed {}={:?}", key, raw);
            default
        }),
        None => default,
    }
}
