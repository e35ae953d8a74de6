// SPDX-License-Identifier: MIT

//! kinetic-canvas
//!
//! Compiles editor canvases into executable workflow schemas, runs them with
//! suspend/resume support backed by a checkpoint store, and walks the
//! reference graph between workflows for validation, copy and publish.

pub mod adk;
pub mod kinetic;
