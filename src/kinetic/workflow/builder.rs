// SPDX-License-Identifier: MIT

//! Workflow builder - turns canvases into runnable workflows
//!
//! The builder compiles a canvas (inlining sub-workflows when a canvas
//! provider is attached) and binds the resulting schema to a node registry,
//! a checkpoint store and the engine configuration.

use crate::adk::error::FlowError;
use crate::adk::model::Model;
use crate::kinetic::config::EngineConfig;
use crate::kinetic::workflow::graph::{SchemaCompiler, Workflow};
use crate::kinetic::workflow::loader::CanvasLoader;
use crate::kinetic::workflow::registry::NodeRegistry;
use crate::kinetic::workflow::repository::CanvasProvider;
use crate::kinetic::workflow::state::{CheckpointStore, FileCheckpointStore};
use crate::kinetic::workflow::types::Canvas;

use std::path::Path;
use std::sync::Arc;

/// High-level builder for runnable workflows
pub struct WorkflowBuilder {
    loader: CanvasLoader,
    registry: NodeRegistry,
    store: Arc<dyn CheckpointStore>,
    provider: Option<Arc<dyn CanvasProvider>>,
    config: EngineConfig,
}

impl WorkflowBuilder {
    pub fn new(registry: NodeRegistry, store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            loader: CanvasLoader::new(),
            registry,
            store,
            provider: None,
            config: EngineConfig::default(),
        }
    }

    /// Builtin executors and a file checkpoint store under
    /// `config.checkpoint_dir`
    pub fn from_config(config: EngineConfig, model: Option<Arc<dyn Model>>) -> Self {
        let registry =
            NodeRegistry::with_builtins(model, config.default_max_answer_count as usize);
        let store = Arc::new(FileCheckpointStore::new(config.checkpoint_dir.clone()));
        Self::new(registry, store).with_config(config)
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Resolve sub-workflow nodes through `provider` when compiling
    pub fn with_provider(mut self, provider: Arc<dyn CanvasProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Compile a canvas and bind it for execution
    pub async fn build(&self, canvas: &Canvas) -> Result<Workflow, FlowError> {
        let compiler = match &self.provider {
            Some(provider) => SchemaCompiler::with_provider(provider.as_ref()),
            None => SchemaCompiler::new(),
        };
        let schema = compiler.compile(canvas).await?;

        log::info!(
            "Compiled workflow with {} nodes and {} connections",
            schema.nodes.len(),
            schema.connections.len()
        );

        Ok(Workflow::new(schema, self.registry.clone(), self.store.clone())
            .with_config(self.config.clone()))
    }

    /// Load a canvas from a JSON or YAML file and build it
    pub async fn build_from_file<P: AsRef<Path>>(&self, path: P) -> Result<Workflow, FlowError> {
        let canvas = self.loader.load_canvas(path)?;
        self.build(&canvas).await
    }
}
