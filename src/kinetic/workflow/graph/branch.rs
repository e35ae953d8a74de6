// SPDX-License-Identifier: MIT

//! Branch derivation
//!
//! Nodes that select among outgoing paths declare named ports. Their ported
//! connections are grouped into a `Branch` per node, and every declared port
//! must be wired exactly as declared.

use super::types::{Branch, NodeKey, NodeSchema, NodeType, WorkflowSchema};
use crate::adk::error::CompileError;
use crate::kinetic::workflow::condition;
use crate::kinetic::workflow::nodes::qa::QaConfig;
use crate::kinetic::workflow::nodes::selector::SelectorConfig;
use crate::kinetic::workflow::nodes::decode_config;
use std::collections::BTreeMap;

/// Port taken when no numbered branch matches
pub const DEFAULT_PORT: &str = "default";

pub fn branch_port(index: usize) -> String {
    format!("branch_{}", index)
}

/// Ports a node exposes, or `None` for nodes with a single plain exit
pub fn declared_ports(node: &NodeSchema) -> Result<Option<Vec<String>>, CompileError> {
    let numbered = match node.node_type {
        NodeType::Selector => {
            let config: SelectorConfig = decode_config(node)?;
            for expr in &config.conditions {
                condition::parse(expr).map_err(|e| CompileError::InvalidConfig {
                    node: node.key.clone(),
                    message: e.to_string(),
                })?;
            }
            Some(config.conditions.len())
        }
        NodeType::QuestionAnswer => {
            let config: QaConfig = decode_config(node)?;
            config.branch_count()
        }
        _ => None,
    };

    Ok(numbered.map(|n| {
        (0..n)
            .map(branch_port)
            .chain(std::iter::once(DEFAULT_PORT.to_string()))
            .collect()
    }))
}

/// Group ported connections by source node and port
pub fn build_branches(schema: &WorkflowSchema) -> Result<BTreeMap<NodeKey, Branch>, CompileError> {
    let mut branches = BTreeMap::new();

    for node in &schema.nodes {
        let outbound: Vec<_> = schema
            .connections
            .iter()
            .filter(|c| c.from_node == node.key)
            .collect();
        let has_plain = outbound.iter().any(|c| c.from_port.is_none());

        let Some(ports) = declared_ports(node)? else {
            if let Some(port) = outbound.iter().find_map(|c| c.from_port.as_ref()) {
                return Err(CompileError::UnknownPort {
                    node: node.key.clone(),
                    port: port.clone(),
                });
            }
            continue;
        };

        if has_plain {
            return Err(CompileError::MixedPorts(node.key.clone()));
        }

        let mut branch = Branch::default();
        for conn in outbound {
            let Some(port) = conn.from_port.as_ref() else {
                continue;
            };
            if !ports.contains(port) {
                return Err(CompileError::UnknownPort {
                    node: node.key.clone(),
                    port: port.clone(),
                });
            }
            let targets = branch.ports.entry(port.clone()).or_default();
            if targets.contains(&conn.to_node) {
                return Err(CompileError::DuplicatePort {
                    node: node.key.clone(),
                    port: port.clone(),
                    to: conn.to_node.clone(),
                });
            }
            targets.push(conn.to_node.clone());
        }

        if let Some(missing) = ports.iter().find(|p| !branch.ports.contains_key(*p)) {
            return Err(CompileError::UnconnectedPort {
                node: node.key.clone(),
                port: missing.clone(),
            });
        }

        branches.insert(node.key.clone(), branch);
    }

    Ok(branches)
}
