// SPDX-License-Identifier: MIT

//! Typed error handling for kinetic-canvas
//!
//! `FlowError` is the single error type returned by the compiler, the runner
//! and the workflow service. Compilation failures are grouped under
//! `CompileError` so callers can report them without string matching, and a
//! suspended run surfaces as `FlowError::Interrupted` with a typed accessor.

use crate::kinetic::workflow::graph::InterruptInfo;
use thiserror::Error;

/// Top-level error type for kinetic-canvas
#[derive(Debug, Error)]
pub enum FlowError {
    /// Canvas could not be lowered into a schema
    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    /// A node's own logic failed
    #[error("Node '{node_key}' failed: {message}")]
    Execution { node_key: String, message: String },

    /// A typed error raised while a node ran, tagged with that node
    #[error("Node '{node_key}' failed: {source}")]
    NodeFailed {
        node_key: String,
        #[source]
        source: Box<FlowError>,
    },

    /// A node suspended the run and is waiting for resume data
    #[error("Workflow interrupted at node '{}'", .0.node_key)]
    Interrupted(Box<InterruptInfo>),

    /// A referenced workflow, version or draft does not exist
    #[error("{kind} '{id}' not found")]
    NotFound { kind: String, id: String },

    /// Publish attempted with a version that does not exceed the latest one
    #[error("Version {requested} must be greater than latest published version {latest}")]
    VersionOrder { latest: String, requested: String },

    /// Version string is not of the form v<major>.<minor>.<patch>
    #[error("Invalid version '{0}': expected v<major>.<minor>.<patch>")]
    InvalidVersion(String),

    /// Workflows reference each other in a loop
    #[error("Reference cycle detected: {0:?}")]
    ReferenceCycle(Vec<i64>),

    /// Publish attempted on a draft that never passed a test run
    #[error("Workflow {0} has not passed a test run")]
    TestRunRequired(i64),

    /// Resume requested for a checkpoint that does not exist
    #[error("Checkpoint '{0}' not found")]
    CheckpointNotFound(String),

    /// The caller cancelled the run
    #[error("Workflow execution cancelled")]
    Cancelled,

    /// Max iterations/steps reached
    #[error("Max {kind} reached: {limit}")]
    MaxIterations { kind: String, limit: usize },

    /// Model-backed node failures
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    /// Configuration errors (missing collaborators, invalid settings)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Checkpoint or repository backend failures
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O errors
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    /// Generic error wrapper
    #[error("{0}")]
    Other(String),
}

/// Canvas compilation failures
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("Canvas has no entry node")]
    MissingEntry,

    #[error("Canvas has more than one entry node: {0:?}")]
    DuplicateEntry(Vec<String>),

    #[error("Canvas has no exit node")]
    MissingExit,

    #[error("Canvas has more than one exit node: {0:?}")]
    DuplicateExit(Vec<String>),

    #[error("Exit node '{0}' is not reachable from the entry node")]
    UnreachableExit(String),

    #[error("Node '{node}' has unknown type '{tag}'")]
    UnknownNodeType { node: String, tag: String },

    #[error("Duplicate node key '{0}'")]
    DuplicateNodeKey(String),

    #[error("Edge {from} -> {to} references a missing node")]
    DanglingEdge { from: String, to: String },

    #[error("Edge {from} -> {to} crosses a container boundary")]
    CrossScopeEdge { from: String, to: String },

    #[error("Connections form a cycle through node '{0}'")]
    CyclicConnections(String),

    #[error("Node '{node}' references unknown node '{from}'")]
    UnresolvedReference { node: String, from: String },

    #[error("Node '{node}' references '{from}', which cannot precede it")]
    IllegalReference { node: String, from: String },

    #[error("Node '{node}' has no port '{port}'")]
    UnknownPort { node: String, port: String },

    #[error("Node '{node}' connects port '{port}' to '{to}' more than once")]
    DuplicatePort {
        node: String,
        port: String,
        to: String,
    },

    #[error("Port '{port}' of node '{node}' is not connected")]
    UnconnectedPort { node: String, port: String },

    #[error("Node '{0}' mixes branch ports with plain connections")]
    MixedPorts(String),

    #[error("Node '{node}' has invalid config: {message}")]
    InvalidConfig { node: String, message: String },

    #[error("Node '{node}' has invalid workflow id '{value}'")]
    InvalidWorkflowId { node: String, value: String },

    #[error("Sub-workflow {0} includes itself")]
    RecursiveSubWorkflow(i64),
}

/// Model/LLM-specific errors
#[derive(Debug, Error)]
pub enum ModelError {
    /// No model was configured for a node that needs one
    #[error("No model configured for node '{0}'")]
    NotConfigured(String),

    /// Rate limit exceeded
    #[error("Rate limit exceeded, retry after {retry_after_secs:?} seconds")]
    RateLimited { retry_after_secs: Option<u64> },

    /// Invalid response from model
    #[error("Invalid response from model: {0}")]
    InvalidResponse(String),

    /// Backend failure reported by the model provider
    #[error("Provider {provider} failed: {message}")]
    Provider { provider: String, message: String },
}

impl FlowError {
    /// Create an execution error attributed to a node
    pub fn execution(node_key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            node_key: node_key.into(),
            message: message.into(),
        }
    }

    /// Attach a node key to an error raised while that node ran.
    ///
    /// Control-flow errors pass through untouched, errors already tagged
    /// with `node_key` are kept as they are, and anything else is boxed
    /// under `NodeFailed` so the original variant stays reachable.
    pub fn node_failed(node_key: &str, err: FlowError) -> Self {
        match err {
            Self::Interrupted(_) | Self::Cancelled | Self::MaxIterations { .. } => err,
            Self::Execution { node_key: ref inner, .. }
            | Self::NodeFailed { node_key: ref inner, .. }
                if inner == node_key =>
            {
                err
            }
            other => Self::NodeFailed {
                node_key: node_key.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// Innermost error beneath any `NodeFailed` layers
    pub fn root_cause(&self) -> &FlowError {
        let mut err = self;
        while let Self::NodeFailed { source, .. } = err {
            err = source.as_ref();
        }
        err
    }

    pub fn model_error(&self) -> Option<&ModelError> {
        match self.root_cause() {
            Self::Model(e) => Some(e),
            _ => None,
        }
    }

    /// Create a not found error
    pub fn not_found(kind: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound {
            kind: kind.into(),
            id: id.to_string(),
        }
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Create from a generic error
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    /// Interrupt details if this error is a suspension
    pub fn interrupt_info(&self) -> Option<&InterruptInfo> {
        match self {
            Self::Interrupted(info) => Some(info),
            _ => None,
        }
    }

    pub fn is_interrupt(&self) -> bool {
        matches!(self, Self::Interrupted(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root_cause(), Self::NotFound { .. })
    }

    /// Node key attached to an execution error
    pub fn node_key(&self) -> Option<&str> {
        match self {
            Self::Execution { node_key, .. } | Self::NodeFailed { node_key, .. } => Some(node_key),
            Self::Interrupted(info) => Some(&info.node_key),
            _ => None,
        }
    }
}

impl CompileError {
    /// The canvas node the error points at, when there is one
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::UnknownNodeType { node, .. }
            | Self::UnresolvedReference { node, .. }
            | Self::IllegalReference { node, .. }
            | Self::UnknownPort { node, .. }
            | Self::DuplicatePort { node, .. }
            | Self::UnconnectedPort { node, .. }
            | Self::InvalidConfig { node, .. }
            | Self::InvalidWorkflowId { node, .. } => Some(node),
            Self::DuplicateNodeKey(node)
            | Self::UnreachableExit(node)
            | Self::CyclicConnections(node)
            | Self::MixedPorts(node) => Some(node),
            Self::DanglingEdge { from, .. } | Self::CrossScopeEdge { from, .. } => Some(from),
            _ => None,
        }
    }
}

impl From<String> for FlowError {
    fn from(s: String) -> Self {
        Self::Other(s)
    }
}

impl From<&str> for FlowError {
    fn from(s: &str) -> Self {
        Self::Other(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FlowError::execution("qa", "boom");
        assert_eq!(err.to_string(), "Node 'qa' failed: boom");

        let err = FlowError::not_found("workflow", 42);
        assert_eq!(err.to_string(), "workflow '42' not found");
        assert!(err.is_not_found());

        let err = FlowError::VersionOrder {
            latest: "v1.0.0".to_string(),
            requested: "v0.9.0".to_string(),
        };
        assert!(err.to_string().contains("v0.9.0"));
    }

    #[test]
    fn test_compile_error_conversion() {
        let err: FlowError = CompileError::MissingEntry.into();
        assert!(matches!(err, FlowError::Compile(CompileError::MissingEntry)));
        assert!(!err.is_interrupt());
    }

    #[test]
    fn test_node_failed_wraps_once() {
        let inner = FlowError::execution("llm", "bad reply");
        let err = FlowError::node_failed("llm", inner);
        assert_eq!(err.to_string(), "Node 'llm' failed: bad reply");

        let err = FlowError::node_failed("sub", FlowError::execution("llm", "bad reply"));
        assert_eq!(err.node_key(), Some("sub"));
        assert!(err.to_string().contains("Node 'llm' failed"));

        assert!(matches!(
            FlowError::node_failed("x", FlowError::Cancelled),
            FlowError::Cancelled
        ));

        let err = FlowError::node_failed("sub", FlowError::not_found("workflow", 7));
        let again = FlowError::node_failed("sub", err);
        assert!(matches!(
            &again,
            FlowError::NodeFailed { source, .. } if source.is_not_found()
        ));
    }

    #[test]
    fn test_node_failed_keeps_typed_source() {
        use std::error::Error as _;

        let err = FlowError::node_failed("docs", FlowError::not_found("workflow", 42));
        assert_eq!(err.node_key(), Some("docs"));
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Node 'docs' failed: workflow '42' not found");
        assert!(err.source().is_some());

        let model = ModelError::RateLimited {
            retry_after_secs: Some(3),
        };
        let err = FlowError::node_failed("outer", FlowError::node_failed("llm", model.into()));
        assert_eq!(err.node_key(), Some("outer"));
        assert!(matches!(
            err.model_error(),
            Some(ModelError::RateLimited {
                retry_after_secs: Some(3)
            })
        ));
        assert!(matches!(
            err.root_cause(),
            FlowError::Model(ModelError::RateLimited { .. })
        ));
    }

    #[test]
    fn test_compile_error_node_id() {
        let err = CompileError::UnknownPort {
            node: "qa".to_string(),
            port: "branch_9".to_string(),
        };
        assert_eq!(err.node_id(), Some("qa"));
        assert_eq!(CompileError::MissingExit.node_id(), None);
    }
}
