// SPDX-License-Identifier: MIT

//! Conditions for selector nodes
//!
//! A selector holds an ordered list of expressions evaluated against its
//! resolved input record, for example:
//! - `intent == 'search'`
//! - `score > 0.8 and not flagged`
//! - `(tags contains 'bug' || priority >= 3)`

mod ast;
mod evaluator;
mod parser;

pub use ast::{CompareOp, ConditionError, Expression, Literal};
pub use evaluator::evaluate;
pub use parser::parse;
