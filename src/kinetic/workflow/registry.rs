// SPDX-License-Identifier: MIT

use crate::adk::model::Model;
use crate::kinetic::workflow::graph::types::NodeType;
use crate::kinetic::workflow::nodes::{
    EntryExecutor, ExitExecutor, LambdaExecutor, LlmExecutor, NodeExecutor,
    QuestionAnswerExecutor, SelectorExecutor,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Maps node types to the executors that run them.
///
/// SubWorkflow and Loop nodes are driven by the runner itself and never
/// looked up here.
#[derive(Clone)]
pub struct NodeRegistry {
    executors: Arc<RwLock<HashMap<NodeType, Arc<dyn NodeExecutor>>>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            executors: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Registry with every built-in leaf executor.
    ///
    /// Model-backed nodes fail with `ModelError::NotConfigured` until a
    /// model is supplied.
    pub fn with_builtins(model: Option<Arc<dyn Model>>, default_max_answer_count: usize) -> Self {
        let executors: HashMap<NodeType, Arc<dyn NodeExecutor>> = HashMap::from([
            (NodeType::Entry, Arc::new(EntryExecutor) as Arc<dyn NodeExecutor>),
            (NodeType::Exit, Arc::new(ExitExecutor)),
            (NodeType::Selector, Arc::new(SelectorExecutor)),
            (NodeType::Lambda, Arc::new(LambdaExecutor::new())),
            (NodeType::Llm, Arc::new(LlmExecutor::new(model.clone()))),
            (
                NodeType::QuestionAnswer,
                Arc::new(QuestionAnswerExecutor::new(model, default_max_answer_count)),
            ),
        ]);
        Self {
            executors: Arc::new(RwLock::new(executors)),
        }
    }

    pub async fn register(&self, node_type: NodeType, executor: Arc<dyn NodeExecutor>) {
        let mut executors = self.executors.write().await;
        executors.insert(node_type, executor);
    }

    pub async fn get(&self, node_type: NodeType) -> Option<Arc<dyn NodeExecutor>> {
        let executors = self.executors.read().await;
        executors.get(&node_type).cloned()
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
