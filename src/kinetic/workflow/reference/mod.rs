// SPDX-License-Identifier: MIT

//! Reference graph between workflows
//!
//! Canvases point at other workflows in two ways: a sub-workflow node runs
//! another workflow inline, and an LLM node may expose workflows as tools.
//! These edges are never held as in-memory pointers. They are read off the
//! canvas as `(id, version)` pairs and resolved through the repository, so
//! shared targets and cycles are caught with visited sets.

mod build;
mod closure;
mod dependence;
mod relink;
mod validate;

pub use build::{build_refs, workflow_targets, WorkflowTarget};
pub use closure::{build_ref_tree, materialize, Materializer, RefTree};
pub use dependence::{collect_dependencies, DependenceResource};
pub use relink::{replace_related_references, ExternalResourceRelated, PluginEntity};
pub use validate::{validate_canvas, validate_closure, ValidateConfig, ValidateIssue};

use serde::{Deserialize, Serialize};

/// How the referring workflow uses the referred one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferType {
    SubWorkflow,
    Tool,
}

/// Kind of entity holding the reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferringBizType {
    Workflow,
    Agent,
}

/// One edge of the reference graph
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkflowReferenceKey {
    pub referred_id: i64,
    pub referring_id: i64,
    pub refer_type: ReferType,
    pub referring_biz_type: ReferringBizType,
}

/// A workflow id paired with a published version; empty means its draft
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdVersionPair {
    pub id: i64,
    #[serde(default)]
    pub version: String,
}

impl IdVersionPair {
    pub fn new(id: i64, version: impl Into<String>) -> Self {
        Self {
            id,
            version: version.into(),
        }
    }
}
