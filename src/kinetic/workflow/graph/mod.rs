// SPDX-License-Identifier: MIT

//! Compiled workflow graphs
//!
//! This module lowers canvases into `WorkflowSchema`s and runs them with
//! suspend/resume support.

pub mod branch;
pub mod compiler;
pub mod executor;
pub mod types;

pub use compiler::{compile_canvas, extract_io_params, IoParams, SchemaCompiler};
pub use executor::{InterruptInfo, InvokeOptions, StateModifier, Workflow};
pub use types::{
    Branch, Connection, FieldInfo, FieldSource, NodeKey, NodeSchema, NodeType, Reference,
    TypeInfo, WorkflowSchema,
};
