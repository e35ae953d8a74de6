// SPDX-License-Identifier: MIT

//! Kit-level contracts shared by every workflow component

pub mod error;
pub mod model;
