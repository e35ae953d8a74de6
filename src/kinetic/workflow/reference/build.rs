// SPDX-License-Identifier: MIT

use super::{ReferType, ReferringBizType, WorkflowReferenceKey};
use crate::adk::error::CompileError;
use crate::kinetic::workflow::graph::compiler::sub_workflow_ref;
use crate::kinetic::workflow::graph::types::{NodeType, SubWorkflowRef};
use crate::kinetic::workflow::types::{Canvas, WorkflowTool};
use std::collections::BTreeSet;

/// A workflow pointed at by one canvas node
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowTarget {
    pub node_id: String,
    pub target: SubWorkflowRef,
    pub refer_type: ReferType,
}

/// Every workflow the canvas points at, in document order.
///
/// Nested blocks are included. Duplicates are kept so callers can tell
/// which nodes share a target.
pub fn workflow_targets(canvas: &Canvas) -> Result<Vec<WorkflowTarget>, CompileError> {
    let mut targets = Vec::new();
    for node in canvas.all_nodes() {
        match NodeType::from_tag(&node.node_type) {
            Some(NodeType::SubWorkflow) => targets.push(WorkflowTarget {
                node_id: node.id.clone(),
                target: sub_workflow_ref(node)?,
                refer_type: ReferType::SubWorkflow,
            }),
            Some(NodeType::Llm) => {
                let Some(fc) = &node.data.inputs.fc_param else {
                    continue;
                };
                for tool in &fc.workflow_list {
                    targets.push(WorkflowTarget {
                        node_id: node.id.clone(),
                        target: tool_ref(&node.id, tool)?,
                        refer_type: ReferType::Tool,
                    });
                }
            }
            _ => {}
        }
    }
    Ok(targets)
}

/// Reference edges from `referring_id` to every workflow its canvas uses
pub fn build_refs(
    referring_id: i64,
    canvas: &Canvas,
) -> Result<BTreeSet<WorkflowReferenceKey>, CompileError> {
    Ok(workflow_targets(canvas)?
        .into_iter()
        .map(|t| WorkflowReferenceKey {
            referred_id: t.target.id,
            referring_id,
            refer_type: t.refer_type,
            referring_biz_type: ReferringBizType::Workflow,
        })
        .collect())
}

fn tool_ref(node_id: &str, tool: &WorkflowTool) -> Result<SubWorkflowRef, CompileError> {
    let id = tool
        .workflow_id
        .trim()
        .parse::<i64>()
        .map_err(|_| CompileError::InvalidWorkflowId {
            node: node_id.to_string(),
            value: tool.workflow_id.clone(),
        })?;
    let version = if tool.is_draft {
        None
    } else {
        tool.workflow_version.clone().filter(|v| !v.is_empty())
    };
    Ok(SubWorkflowRef { id, version })
}
