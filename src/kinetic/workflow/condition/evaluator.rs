// SPDX-License-Identifier: MIT

//! Condition evaluation against a node's input record

use super::ast::{CompareOp, Expression, Literal};
use crate::kinetic::workflow::state::lookup_path;
use serde_json::{Map, Value};

/// Evaluate `expr` with field paths resolved inside `record`
pub fn evaluate(expr: &Expression, record: &Map<String, Value>) -> bool {
    match expr {
        Expression::True => true,
        Expression::False => false,
        Expression::Field(path) => is_truthy(resolve(record, path)),
        Expression::Compare { left, op, right } => compare(resolve(record, left), *op, right),
        Expression::And(left, right) => evaluate(left, record) && evaluate(right, record),
        Expression::Or(left, right) => evaluate(left, record) || evaluate(right, record),
        Expression::Not(inner) => !evaluate(inner, record),
    }
}

fn resolve<'r>(record: &'r Map<String, Value>, path: &str) -> Option<&'r Value> {
    let mut segments = path.split('.');
    let head = record.get(segments.next()?)?;
    let rest: Vec<String> = segments.map(str::to_string).collect();
    lookup_path(head, &rest)
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
    }
}

fn compare(left: Option<&Value>, op: CompareOp, right: &Literal) -> bool {
    match op {
        CompareOp::Eq => equals(left, right),
        CompareOp::NotEq => !equals(left, right),
        CompareOp::Gt => numeric(left, right, |a, b| a > b),
        CompareOp::Gte => numeric(left, right, |a, b| a >= b),
        CompareOp::Lt => numeric(left, right, |a, b| a < b),
        CompareOp::Lte => numeric(left, right, |a, b| a <= b),
        CompareOp::Contains => contains(left, right),
    }
}

fn equals(left: Option<&Value>, right: &Literal) -> bool {
    match (left, right) {
        (None | Some(Value::Null), Literal::Null) => true,
        (Some(Value::String(s)), Literal::String(r)) => s == r,
        (Some(Value::Bool(b)), Literal::Boolean(r)) => b == r,
        (Some(v), Literal::Number(_)) => numeric(Some(v), right, |a, b| a == b),
        _ => false,
    }
}

/// Numeric comparison; numeric strings count as numbers
fn numeric<F>(left: Option<&Value>, right: &Literal, cmp: F) -> bool
where
    F: Fn(f64, f64) -> bool,
{
    let Literal::Number(r) = right else {
        return false;
    };
    let l = match left {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    l.is_some_and(|l| cmp(l, *r))
}

fn contains(left: Option<&Value>, right: &Literal) -> bool {
    match (left, right) {
        (Some(Value::String(s)), Literal::String(sub)) => s.contains(sub.as_str()),
        (Some(Value::Array(items)), literal) => {
            items.iter().any(|item| equals(Some(item), literal))
        }
        _ => false,
    }
}
