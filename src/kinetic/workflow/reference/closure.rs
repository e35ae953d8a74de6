// SPDX-License-Identifier: MIT

use super::build::workflow_targets;
use super::relink::{replace_related_references, ExternalResourceRelated};
use super::IdVersionPair;
use crate::adk::error::FlowError;
use crate::kinetic::workflow::types::Canvas;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

/// A workflow together with the in-scope workflows its canvas references.
///
/// Each child id appears at most once per parent.
#[derive(Debug, Clone, PartialEq)]
pub struct RefTree {
    pub id: i64,
    pub canvas: Canvas,
    pub children: Vec<RefTree>,
}

impl RefTree {
    /// Distinct ids in the tree, referenced workflows before their referrers
    pub fn post_order(&self) -> Vec<&RefTree> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        collect_post_order(self, &mut out, &mut seen);
        out
    }
}

fn collect_post_order<'a>(tree: &'a RefTree, out: &mut Vec<&'a RefTree>, seen: &mut HashSet<i64>) {
    for child in &tree.children {
        collect_post_order(child, out, seen);
    }
    if seen.insert(tree.id) {
        out.push(tree);
    }
}

/// Build the reference tree of `root_id` over a set of draft canvases.
///
/// Targets outside `drafts` stay external and are not descended. Sub-trees
/// already built are reused. A reference back to an ancestor fails with
/// `FlowError::ReferenceCycle` carrying the path that closes the loop.
pub fn build_ref_tree(root_id: i64, drafts: &HashMap<i64, Canvas>) -> Result<RefTree, FlowError> {
    let mut built = HashMap::new();
    let mut ancestors = Vec::new();
    build_node(root_id, drafts, &mut ancestors, &mut built)
}

fn build_node(
    id: i64,
    drafts: &HashMap<i64, Canvas>,
    ancestors: &mut Vec<i64>,
    built: &mut HashMap<i64, RefTree>,
) -> Result<RefTree, FlowError> {
    if let Some(tree) = built.get(&id) {
        return Ok(tree.clone());
    }
    let canvas = drafts
        .get(&id)
        .ok_or_else(|| FlowError::not_found("workflow draft", id))?;

    ancestors.push(id);
    let mut seen = HashSet::new();
    let mut children = Vec::new();
    for target in workflow_targets(canvas)? {
        let child = target.target.id;
        if !drafts.contains_key(&child) || !seen.insert(child) {
            continue;
        }
        if let Some(pos) = ancestors.iter().position(|a| *a == child) {
            let mut cycle = ancestors[pos..].to_vec();
            cycle.push(child);
            return Err(FlowError::ReferenceCycle(cycle));
        }
        children.push(build_node(child, drafts, ancestors, built)?);
    }
    ancestors.pop();

    let tree = RefTree {
        id,
        canvas: canvas.clone(),
        children,
    };
    built.insert(id, tree.clone());
    Ok(tree)
}

/// Creates the copy of one workflow during materialization
#[async_trait]
pub trait Materializer: Send + Sync {
    /// `canvas` already points at the copies of everything it references
    async fn materialize(&self, id: i64, canvas: Canvas) -> Result<IdVersionPair, FlowError>;
}

/// Copy every distinct workflow in `trees` exactly once, leaves first.
///
/// Ids already in `memo` are skipped. Each canvas is rewritten through the
/// memo before it is handed to `sink`, so a referrer is only copied after
/// all of its targets exist. Returns the original ids copied, in order.
pub async fn materialize(
    trees: &[RefTree],
    memo: &mut HashMap<i64, IdVersionPair>,
    external: &ExternalResourceRelated,
    sink: &dyn Materializer,
) -> Result<Vec<i64>, FlowError> {
    let mut copied = Vec::new();
    for tree in trees {
        for node in tree.post_order() {
            if memo.contains_key(&node.id) {
                continue;
            }
            let mut canvas = node.canvas.clone();
            replace_related_references(&mut canvas, memo, external)?;
            let pair = sink.materialize(node.id, canvas).await?;
            log::info!(
                "Materialized workflow {} as {} ({})",
                node.id,
                pair.id,
                if pair.version.is_empty() { "draft" } else { pair.version.as_str() }
            );
            memo.insert(node.id, pair);
            copied.push(node.id);
        }
    }
    Ok(copied)
}
