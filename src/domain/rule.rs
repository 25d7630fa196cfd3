//! Rule tree data structures.
//!
//! A strategy is a `LogicGroup` whose children are further groups or leaf
//! conditions:
//! - `Comparison`: `Expr op Expr`, including cross-over operators
//! - `HistoricalPattern`: how often a condition held in a trailing window
//! - `PatternDuration`: bars elapsed since a condition last held
//!
//! Embedded condition text is parsed into `Comparison`s when the tree is
//! built, so evaluation never touches strings.

use crate::domain::indicator::IndicatorType;
use crate::domain::ohlcv::PriceField;
use std::fmt;

/// How far back `PatternDuration` searches for its start condition.
pub const DEFAULT_DURATION_HORIZON: usize = 200;

/// Largest period, offset, window or horizon a rule may name. Loaders reject
/// anything above it, so history arithmetic stays far from `usize::MAX`.
pub const MAX_HISTORY: usize = 1_000_000;

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Group(LogicGroup),
    Comparison(Comparison),
    HistoricalPattern(HistoricalPattern),
    PatternDuration(PatternDuration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupOp {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogicGroup {
    pub id: String,
    pub op: GroupOp,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    CrossUp,
    CrossDown,
}

impl CompareOp {
    /// Parse the operator spelling used by rule documents.
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol.trim().to_ascii_uppercase().as_str() {
            ">" => Some(CompareOp::Gt),
            ">=" => Some(CompareOp::Ge),
            "<" => Some(CompareOp::Lt),
            "<=" => Some(CompareOp::Le),
            "=" | "==" => Some(CompareOp::Eq),
            "CROSS_UP" => Some(CompareOp::CrossUp),
            "CROSS_DOWN" => Some(CompareOp::CrossDown),
            _ => None,
        }
    }

    pub fn is_cross(self) -> bool {
        matches!(self, CompareOp::CrossUp | CompareOp::CrossDown)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub id: String,
    pub left: Expr,
    pub op: CompareOp,
    pub right: Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Operand(Operand),
    Binary {
        op: ArithOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Field { field: PriceField, offset: usize },
    Constant(f64),
    Indicator(IndicatorRef),
}

/// An indicator read `offset` bars back from the evaluation index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndicatorRef {
    pub indicator_type: IndicatorType,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoricalPattern {
    pub id: String,
    pub window: usize,
    pub condition: Vec<Comparison>,
    pub min_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatternDuration {
    pub id: String,
    pub start: Vec<Comparison>,
    /// Cross operators are not meaningful here and are rejected at load time.
    pub op: CompareOp,
    pub value: f64,
    pub horizon: usize,
}

impl Expr {
    pub fn constant(value: f64) -> Self {
        Expr::Operand(Operand::Constant(value))
    }

    pub fn field(field: PriceField) -> Self {
        Expr::Operand(Operand::Field { field, offset: 0 })
    }

    pub fn indicator(indicator_type: IndicatorType) -> Self {
        Expr::Operand(Operand::Indicator(IndicatorRef {
            indicator_type,
            offset: 0,
        }))
    }

    pub fn binary(op: ArithOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn for_each_operand<F: FnMut(&Operand)>(&self, f: &mut F) {
        match self {
            Expr::Operand(operand) => f(operand),
            Expr::Binary { left, right, .. } => {
                left.for_each_operand(f);
                right.for_each_operand(f);
            }
        }
    }

    /// Bars of history needed before this expression is defined.
    fn reach(&self) -> usize {
        let mut reach = 0;
        self.for_each_operand(&mut |operand| {
            let r = match operand {
                Operand::Constant(_) => 0,
                Operand::Field { offset, .. } => *offset,
                Operand::Indicator(iref) => {
                    iref.indicator_type.lookback().saturating_add(iref.offset)
                }
            };
            reach = reach.max(r);
        });
        reach
    }
}

impl Comparison {
    pub fn new(id: impl Into<String>, left: Expr, op: CompareOp, right: Expr) -> Self {
        Self {
            id: id.into(),
            left,
            op,
            right,
        }
    }

    fn reach(&self) -> usize {
        self.left.reach().max(self.right.reach())
    }

    /// Reach including the extra bar a cross-over reads.
    fn history_reach(&self) -> usize {
        self.reach().saturating_add(usize::from(self.op.is_cross()))
    }
}

fn conditions_reach(conditions: &[Comparison]) -> usize {
    conditions.iter().map(Comparison::reach).max().unwrap_or(0)
}

fn conditions_history_reach(conditions: &[Comparison]) -> usize {
    conditions
        .iter()
        .map(Comparison::history_reach)
        .max()
        .unwrap_or(0)
}

impl Node {
    pub fn id(&self) -> &str {
        match self {
            Node::Group(g) => &g.id,
            Node::Comparison(c) => &c.id,
            Node::HistoricalPattern(p) => &p.id,
            Node::PatternDuration(p) => &p.id,
        }
    }

    fn comparisons(&self) -> Vec<&Comparison> {
        match self {
            Node::Group(g) => g.comparisons(),
            Node::Comparison(c) => vec![c],
            Node::HistoricalPattern(p) => p.condition.iter().collect(),
            Node::PatternDuration(p) => p.start.iter().collect(),
        }
    }

    fn warmup_index(&self) -> usize {
        match self {
            Node::Group(g) => g.warmup_index(),
            Node::Comparison(c) => c.reach(),
            Node::HistoricalPattern(p) => conditions_reach(&p.condition),
            Node::PatternDuration(p) => conditions_reach(&p.start),
        }
    }

    fn history_reach(&self) -> usize {
        match self {
            Node::Group(g) => g.required_history() - 1,
            Node::Comparison(c) => c.history_reach(),
            Node::HistoricalPattern(p) => {
                p.window.saturating_add(conditions_history_reach(&p.condition))
            }
            Node::PatternDuration(p) => {
                p.horizon.saturating_add(conditions_history_reach(&p.start))
            }
        }
    }
}

impl LogicGroup {
    pub fn new(id: impl Into<String>, op: GroupOp, children: Vec<Node>) -> Self {
        Self {
            id: id.into(),
            op,
            children,
        }
    }

    /// Distinct indicators referenced anywhere in the tree, in first-seen
    /// order. Offsets are ignored: `SMA(20)` and `SMA(20)[5]` share a series.
    pub fn extract_indicators(&self) -> Vec<IndicatorType> {
        let mut found: Vec<IndicatorType> = Vec::new();
        for comparison in self.comparisons() {
            for expr in [&comparison.left, &comparison.right] {
                expr.for_each_operand(&mut |operand| {
                    if let Operand::Indicator(iref) = operand {
                        if !found.contains(&iref.indicator_type) {
                            found.push(iref.indicator_type);
                        }
                    }
                });
            }
        }
        found
    }

    /// First bar index at which every operand in the tree is defined:
    /// the maximum of indicator lookback plus offset.
    pub fn warmup_index(&self) -> usize {
        self.children
            .iter()
            .map(Node::warmup_index)
            .max()
            .unwrap_or(0)
    }

    /// True when every indicator in the tree depends only on a fixed trailing
    /// window of bars (SMA, Bollinger). EMA and RSI carry state from the
    /// first bar, so their values depend on where the series starts.
    pub fn is_window_local(&self) -> bool {
        self.extract_indicators()
            .iter()
            .all(IndicatorType::is_window_local)
    }

    /// Trailing bars needed so that evaluating the last bar of a window sees
    /// the same inputs as evaluating it over full history. Exact for
    /// window-local indicators (SMA, Bollinger); EMA and RSI depend on their
    /// seed and only converge.
    pub fn required_history(&self) -> usize {
        self.children
            .iter()
            .map(Node::history_reach)
            .max()
            .unwrap_or(0)
            .saturating_add(1)
    }

    fn comparisons(&self) -> Vec<&Comparison> {
        self.children.iter().flat_map(Node::comparisons).collect()
    }
}

impl fmt::Display for ArithOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
        };
        f.write_str(s)
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Eq => "=",
            CompareOp::CrossUp => "CROSS_UP",
            CompareOp::CrossDown => "CROSS_DOWN",
        };
        f.write_str(s)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Constant(v) => write!(f, "{}", v),
            Operand::Field { field, offset: 0 } => write!(f, "{}", field),
            Operand::Field { field, offset } => write!(f, "{}[{}]", field, offset),
            Operand::Indicator(IndicatorRef {
                indicator_type,
                offset: 0,
            }) => write!(f, "{}", indicator_type),
            Operand::Indicator(IndicatorRef {
                indicator_type,
                offset,
            }) => write!(f, "{}[{}]", indicator_type, offset),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Operand(operand) => write!(f, "{}", operand),
            Expr::Binary { op, left, right } => write!(f, "({} {} {})", left, op, right),
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.left, self.op, self.right)
    }
}

fn write_conditions(f: &mut fmt::Formatter<'_>, conditions: &[Comparison]) -> fmt::Result {
    for (i, c) in conditions.iter().enumerate() {
        if i > 0 {
            f.write_str(" AND ")?;
        }
        write!(f, "{}", c)?;
    }
    Ok(())
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Group(g) => write!(f, "{}", g),
            Node::Comparison(c) => write!(f, "{}", c),
            Node::HistoricalPattern(p) => {
                write!(f, "HISTORICAL_PATTERN({}, ", p.window)?;
                write_conditions(f, &p.condition)?;
                write!(f, ", {})", p.min_count)
            }
            Node::PatternDuration(p) => {
                f.write_str("PATTERN_DURATION(")?;
                write_conditions(f, &p.start)?;
                write!(f, ") {} {}", p.op, p.value)
            }
        }
    }
}

impl fmt::Display for LogicGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.op {
            GroupOp::And => "AND",
            GroupOp::Or => "OR",
        };
        write!(f, "{}(", op)?;
        for (i, child) in self.children.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", child)?;
        }
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sma(period: usize) -> IndicatorType {
        IndicatorType::Sma {
            period,
            source: PriceField::Close,
        }
    }

    fn sma_at(period: usize, offset: usize) -> Expr {
        Expr::Operand(Operand::Indicator(IndicatorRef {
            indicator_type: sma(period),
            offset,
        }))
    }

    fn cmp(left: Expr, op: CompareOp, right: Expr) -> Comparison {
        Comparison::new("c", left, op, right)
    }

    #[test]
    fn compare_op_from_symbol() {
        assert_eq!(CompareOp::from_symbol(">="), Some(CompareOp::Ge));
        assert_eq!(CompareOp::from_symbol("cross_up"), Some(CompareOp::CrossUp));
        assert_eq!(CompareOp::from_symbol("=="), Some(CompareOp::Eq));
        assert_eq!(CompareOp::from_symbol("!="), None);
    }

    #[test]
    fn extract_indicators_dedups_and_ignores_offset() {
        let tree = LogicGroup::new(
            "root",
            GroupOp::And,
            vec![
                Node::Comparison(cmp(sma_at(20, 0), CompareOp::Gt, sma_at(20, 5))),
                Node::Group(LogicGroup::new(
                    "inner",
                    GroupOp::Or,
                    vec![Node::Comparison(cmp(
                        Expr::field(PriceField::Close),
                        CompareOp::Gt,
                        Expr::binary(
                            ArithOp::Mul,
                            Expr::indicator(IndicatorType::Rsi(14)),
                            Expr::constant(2.0),
                        ),
                    ))],
                )),
            ],
        );
        assert_eq!(
            tree.extract_indicators(),
            vec![sma(20), IndicatorType::Rsi(14)]
        );
    }

    #[test]
    fn extract_indicators_reaches_pattern_conditions() {
        let tree = LogicGroup::new(
            "root",
            GroupOp::And,
            vec![Node::HistoricalPattern(HistoricalPattern {
                id: "hp".into(),
                window: 10,
                condition: vec![cmp(sma_at(5, 0), CompareOp::Gt, sma_at(60, 0))],
                min_count: 1,
            })],
        );
        assert_eq!(tree.extract_indicators(), vec![sma(5), sma(60)]);
    }

    #[test]
    fn warmup_is_lookback_plus_offset() {
        let tree = LogicGroup::new(
            "root",
            GroupOp::And,
            vec![
                Node::Comparison(cmp(sma_at(200, 20), CompareOp::Lt, sma_at(20, 0))),
                Node::Comparison(cmp(
                    Expr::indicator(IndicatorType::Rsi(14)),
                    CompareOp::Lt,
                    Expr::constant(30.0),
                )),
            ],
        );
        assert_eq!(tree.warmup_index(), 199 + 20);
    }

    #[test]
    fn warmup_counts_field_offsets() {
        let prev_close = Expr::Operand(Operand::Field {
            field: PriceField::Close,
            offset: 1,
        });
        let tree = LogicGroup::new(
            "root",
            GroupOp::And,
            vec![Node::Comparison(cmp(
                Expr::field(PriceField::Close),
                CompareOp::Gt,
                prev_close,
            ))],
        );
        assert_eq!(tree.warmup_index(), 1);
    }

    #[test]
    fn empty_tree_has_no_warmup() {
        let tree = LogicGroup::new("root", GroupOp::And, vec![]);
        assert_eq!(tree.warmup_index(), 0);
        assert_eq!(tree.required_history(), 1);
        assert!(tree.extract_indicators().is_empty());
    }

    #[test]
    fn required_history_adds_cross_and_window() {
        let cross = LogicGroup::new(
            "root",
            GroupOp::And,
            vec![Node::Comparison(cmp(
                sma_at(5, 0),
                CompareOp::CrossUp,
                sma_at(20, 0),
            ))],
        );
        // SMA(20) lookback 19, +1 for the previous bar, +1 for the bar itself.
        assert_eq!(cross.required_history(), 21);

        let pattern = LogicGroup::new(
            "root",
            GroupOp::And,
            vec![Node::HistoricalPattern(HistoricalPattern {
                id: "hp".into(),
                window: 10,
                condition: vec![cmp(sma_at(5, 0), CompareOp::Gt, sma_at(20, 0))],
                min_count: 3,
            })],
        );
        assert_eq!(pattern.required_history(), 10 + 19 + 1);
    }

    #[test]
    fn display_renders_tree() {
        let tree = LogicGroup::new(
            "root",
            GroupOp::Or,
            vec![Node::Comparison(cmp(
                Expr::field(PriceField::Close),
                CompareOp::Ge,
                Expr::binary(ArithOp::Mul, sma_at(20, 5), Expr::constant(1.25)),
            ))],
        );
        assert_eq!(tree.to_string(), "OR(CLOSE >= (SMA(20)[5] * 1.25))");
    }

    #[test]
    fn node_id_lookup() {
        let node = Node::PatternDuration(PatternDuration {
            id: "since_cross".into(),
            start: vec![],
            op: CompareOp::Le,
            value: 5.0,
            horizon: DEFAULT_DURATION_HORIZON,
        });
        assert_eq!(node.id(), "since_cross");
    }

    #[test]
    fn history_arithmetic_saturates() {
        let huge = Node::Comparison(cmp(
            Expr::field(PriceField::Close),
            CompareOp::CrossUp,
            Expr::Operand(Operand::Indicator(IndicatorRef {
                indicator_type: IndicatorType::Sma {
                    period: 5,
                    source: PriceField::Close,
                },
                offset: usize::MAX,
            })),
        ));
        let pattern = Node::HistoricalPattern(HistoricalPattern {
            id: "p".into(),
            window: usize::MAX,
            condition: vec![],
            min_count: 1,
        });
        let tree = LogicGroup::new("root", GroupOp::And, vec![huge, pattern]);
        assert_eq!(tree.warmup_index(), usize::MAX);
        assert_eq!(tree.required_history(), usize::MAX);
    }

    #[test]
    fn window_locality() {
        let sma = LogicGroup::new(
            "s",
            GroupOp::And,
            vec![Node::Comparison(cmp(
                Expr::field(PriceField::Close),
                CompareOp::Gt,
                sma_at(20, 0),
            ))],
        );
        assert!(sma.is_window_local());

        let ema = LogicGroup::new(
            "e",
            GroupOp::Or,
            vec![
                Node::Group(sma),
                Node::Comparison(cmp(
                    Expr::field(PriceField::Close),
                    CompareOp::Gt,
                    Expr::indicator(IndicatorType::Ema {
                        period: 10,
                        source: PriceField::Close,
                    }),
                )),
            ],
        );
        assert!(!ema.is_window_local());
    }
}
