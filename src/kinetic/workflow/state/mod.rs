// SPDX-License-Identifier: MIT

//! Run state and its persistence
//!
//! This module provides:
//! - `State` - the serializable record of one run
//! - `CheckpointStore` / `CheckpointManager` - suspend/resume persistence
//! - `carry_test_run_success` - draft equivalence across saves

mod checkpoint;
mod draft;
mod store;

pub use checkpoint::{
    Checkpoint, CheckpointManager, CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore,
};
pub use draft::carry_test_run_success;
pub use store::{lookup_path, set_path, ResumeContext, State, Suspension};
