// SPDX-License-Identifier: MIT

//! Test-run carry-over between draft saves

use crate::kinetic::workflow::graph::types::WorkflowSchema;

/// Whether a draft keeps its "test run succeeded" flag after a re-save.
///
/// The flag survives only when the previous draft had passed, both drafts
/// compile, and the compiled graphs are structurally equal.
pub fn carry_test_run_success(
    previous: Option<&WorkflowSchema>,
    previous_success: bool,
    new: Option<&WorkflowSchema>,
) -> bool {
    match (previous_success, previous, new) {
        (true, Some(old), Some(new)) => old.is_equal(new),
        _ => false,
    }
}
