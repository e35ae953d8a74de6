// SPDX-License-Identifier: MIT

//! Abstract Syntax Tree for selector conditions

use thiserror::Error;

/// A condition expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Comparison of a field path against a literal
    Compare {
        left: String,
        op: CompareOp,
        right: Literal,
    },
    And(Box<Expression>, Box<Expression>),
    Or(Box<Expression>, Box<Expression>),
    Not(Box<Expression>),
    /// A bare field path, true when the value is truthy
    Field(String),
    True,
    False,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Gt,
    Gte,
    Lt,
    Lte,
    /// Substring or array membership
    Contains,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    Number(f64),
    Boolean(bool),
    Null,
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("Invalid condition '{input}': {message}")]
pub struct ConditionError {
    pub input: String,
    pub message: String,
}

impl ConditionError {
    pub(crate) fn new(input: &str, message: impl Into<String>) -> Self {
        Self {
            input: input.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for CompareOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let symbol = match self {
            CompareOp::Eq => "==",
            CompareOp::NotEq => "!=",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
            CompareOp::Contains => "contains",
        };
        f.write_str(symbol)
    }
}
