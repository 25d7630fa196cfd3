//! Rule tree evaluation.
//!
//! Evaluates a tree against bars and a prebuilt `IndicatorCache`.
//!
//! # Evaluation Semantics
//!
//! - Any undefined operand (warm-up, offset before the first bar, division by
//!   zero) makes its comparison `false`; it is never an error
//! - `CROSS_UP`/`CROSS_DOWN`: need both sides defined at `i` and `i-1`,
//!   `false` at index 0
//! - `=` compares within `EPSILON`
//! - `AND` over no children is `true`, `OR` over no children is `false`
//! - `HISTORICAL_PATTERN`: count bars `j` in `[i-window, i]` (clamped at 0)
//!   where the condition holds, true when the count reaches `min_count`
//! - `PATTERN_DURATION`: nearest `j < i` within the horizon where the start
//!   condition holds; compares `i - j` with the node's threshold

use crate::domain::indicator_helpers::IndicatorCache;
use crate::domain::ohlcv::Bar;
use crate::domain::rule::{
    ArithOp, CompareOp, Comparison, Expr, GroupOp, HistoricalPattern, LogicGroup, Node, Operand,
    PatternDuration,
};

const EPSILON: f64 = 1e-9;

pub fn evaluate(node: &Node, index: usize, bars: &[Bar], cache: &IndicatorCache) -> bool {
    match node {
        Node::Group(group) => evaluate_group(group, index, bars, cache),
        Node::Comparison(c) => evaluate_comparison(c, index, bars, cache),
        Node::HistoricalPattern(p) => evaluate_historical_pattern(p, index, bars, cache),
        Node::PatternDuration(p) => evaluate_pattern_duration(p, index, bars, cache),
    }
}

pub fn evaluate_group(
    group: &LogicGroup,
    index: usize,
    bars: &[Bar],
    cache: &IndicatorCache,
) -> bool {
    match group.op {
        GroupOp::And => group
            .children
            .iter()
            .all(|child| evaluate(child, index, bars, cache)),
        GroupOp::Or => group
            .children
            .iter()
            .any(|child| evaluate(child, index, bars, cache)),
    }
}

pub fn evaluate_comparison(
    comparison: &Comparison,
    index: usize,
    bars: &[Bar],
    cache: &IndicatorCache,
) -> bool {
    let resolve = |expr: &Expr, i: usize| resolve_expr(expr, i, bars, cache);

    let (Some(left), Some(right)) = (
        resolve(&comparison.left, index),
        resolve(&comparison.right, index),
    ) else {
        return false;
    };

    match comparison.op {
        CompareOp::CrossUp | CompareOp::CrossDown => {
            if index == 0 {
                return false;
            }
            let (Some(left_prev), Some(right_prev)) = (
                resolve(&comparison.left, index - 1),
                resolve(&comparison.right, index - 1),
            ) else {
                return false;
            };
            if comparison.op == CompareOp::CrossUp {
                left > right && left_prev <= right_prev
            } else {
                left < right && left_prev >= right_prev
            }
        }
        op => compare(op, left, right),
    }
}

/// Every comparison holds at `index`.
pub fn evaluate_all(
    conditions: &[Comparison],
    index: usize,
    bars: &[Bar],
    cache: &IndicatorCache,
) -> bool {
    conditions
        .iter()
        .all(|c| evaluate_comparison(c, index, bars, cache))
}

fn evaluate_historical_pattern(
    pattern: &HistoricalPattern,
    index: usize,
    bars: &[Bar],
    cache: &IndicatorCache,
) -> bool {
    if pattern.min_count == 0 {
        return true;
    }
    let start = index.saturating_sub(pattern.window);
    let mut count = 0;
    for j in (start..=index).rev() {
        if evaluate_all(&pattern.condition, j, bars, cache) {
            count += 1;
            if count >= pattern.min_count {
                return true;
            }
        }
    }
    false
}

fn evaluate_pattern_duration(
    pattern: &PatternDuration,
    index: usize,
    bars: &[Bar],
    cache: &IndicatorCache,
) -> bool {
    let lower = index.saturating_sub(pattern.horizon);
    (lower..index)
        .rev()
        .find(|&j| evaluate_all(&pattern.start, j, bars, cache))
        .is_some_and(|j| compare(pattern.op, (index - j) as f64, pattern.value))
}

fn compare(op: CompareOp, left: f64, right: f64) -> bool {
    match op {
        CompareOp::Gt => left > right,
        CompareOp::Ge => left >= right,
        CompareOp::Lt => left < right,
        CompareOp::Le => left <= right,
        CompareOp::Eq => (left - right).abs() < EPSILON,
        CompareOp::CrossUp | CompareOp::CrossDown => false,
    }
}

/// Value of `expr` at bar `index`, or `None` where any input is undefined.
pub fn resolve_expr(expr: &Expr, index: usize, bars: &[Bar], cache: &IndicatorCache) -> Option<f64> {
    match expr {
        Expr::Operand(operand) => resolve_operand(operand, index, bars, cache),
        Expr::Binary { op, left, right } => {
            let l = resolve_expr(left, index, bars, cache)?;
            let r = resolve_expr(right, index, bars, cache)?;
            let value = match op {
                ArithOp::Add => l + r,
                ArithOp::Sub => l - r,
                ArithOp::Mul => l * r,
                ArithOp::Div => {
                    if r == 0.0 {
                        return None;
                    }
                    l / r
                }
            };
            value.is_finite().then_some(value)
        }
    }
}

pub fn resolve_operand(
    operand: &Operand,
    index: usize,
    bars: &[Bar],
    cache: &IndicatorCache,
) -> Option<f64> {
    match operand {
        Operand::Constant(v) => Some(*v),
        Operand::Field { field, offset } => {
            let at = index.checked_sub(*offset)?;
            bars.get(at).map(|bar| bar.field(*field))
        }
        Operand::Indicator(iref) => {
            let at = index.checked_sub(iref.offset)?;
            cache.value_at(&iref.indicator_type, at)
        }
    }
}
