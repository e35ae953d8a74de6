// SPDX-License-Identifier: MIT

//! Canvas workflows: model, compilation, execution and lifecycle

pub mod builder;
pub mod condition;
pub mod graph;
pub mod loader;
pub mod nodes;
pub mod reference;
pub mod registry;
pub mod repository;
pub mod service;
pub mod state;
pub mod types;
pub mod version;

pub use builder::WorkflowBuilder;
pub use loader::CanvasLoader;
pub use service::WorkflowService;
