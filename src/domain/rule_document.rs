//! JSON rule documents.
//!
//! Reads the editor's tree shape and builds a typed `LogicGroup`. All text
//! (reference values, pattern conditions) is parsed here, so a document that
//! loads is a tree that evaluates.
//!
//! A HISTORICAL_PATTERN's required count is its `minCount` param when given.
//! Only without one does a numeric `comparisonValue` (rounded up) stand in,
//! and the default is 1.
//!
//! ```json
//! { "id": "root", "type": "GROUP", "operator": "AND", "children": [
//!     { "id": "c1", "type": "INDICATOR", "indicator": "SMA",
//!       "params": [{ "name": "period", "value": 5 }],
//!       "operator": "CROSS_UP", "comparisonType": "INDICATOR",
//!       "comparisonValue": "SMA(20)" } ] }
//! ```

use crate::domain::error::StratlabError;
use crate::domain::indicator::IndicatorType;
use crate::domain::ohlcv::PriceField;
use crate::domain::rule::{
    CompareOp, Comparison, DEFAULT_DURATION_HORIZON, Expr, GroupOp, HistoricalPattern,
    IndicatorRef, LogicGroup, MAX_HISTORY, Node, Operand, PatternDuration,
};
use crate::domain::rule_parser::{parse_condition, parse_expr};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
enum RawNode {
    Group(RawGroup),
    #[serde(alias = "PRICE", alias = "PATTERN", alias = "FUNDAMENTAL")]
    Indicator(RawCondition),
}

#[derive(Debug, Deserialize)]
struct RawGroup {
    id: String,
    operator: String,
    #[serde(default)]
    children: Vec<RawNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCondition {
    id: String,
    indicator: String,
    #[serde(default)]
    params: Vec<RawParam>,
    #[serde(default)]
    operator: Option<String>,
    #[serde(default)]
    comparison_value: Option<RawValue>,
    #[serde(default)]
    comparison_type: Option<ComparisonType>,
}

#[derive(Debug, Deserialize)]
struct RawParam {
    name: String,
    value: RawValue,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawValue {
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
enum ComparisonType {
    Number,
    Reference,
    Indicator,
}

impl RawValue {
    fn as_number(&self) -> Option<f64> {
        match self {
            RawValue::Number(n) => Some(*n),
            RawValue::Text(s) => s.trim().parse().ok(),
        }
    }

    fn as_text(&self) -> String {
        match self {
            RawValue::Number(n) => n.to_string(),
            RawValue::Text(s) => s.clone(),
        }
    }
}

impl RawCondition {
    fn param(&self, name: &str) -> Option<&RawValue> {
        self.params
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .map(|p| &p.value)
    }

    fn required_param(&self, name: &str) -> Result<&RawValue, StratlabError> {
        self.param(name)
            .ok_or_else(|| StratlabError::invalid_tree(&self.id, format!("missing param '{name}'")))
    }

    fn count_param(&self, name: &str) -> Result<Option<usize>, StratlabError> {
        let Some(value) = self.param(name) else {
            return Ok(None);
        };
        match value.as_number() {
            Some(n) if n.is_finite() && n >= 0.0 && n.fract() == 0.0 => {
                if n > MAX_HISTORY as f64 {
                    return Err(StratlabError::invalid_tree(
                        &self.id,
                        format!("param '{name}' exceeds {MAX_HISTORY}"),
                    ));
                }
                Ok(Some(n as usize))
            }
            _ => Err(StratlabError::invalid_tree(
                &self.id,
                format!(
                    "param '{name}' must be a non-negative integer, got '{}'",
                    value.as_text()
                ),
            )),
        }
    }

    fn operator(&self) -> Result<CompareOp, StratlabError> {
        let symbol = self
            .operator
            .as_deref()
            .ok_or_else(|| StratlabError::invalid_tree(&self.id, "missing operator"))?;
        CompareOp::from_symbol(symbol).ok_or_else(|| {
            StratlabError::invalid_tree(&self.id, format!("unknown operator '{symbol}'"))
        })
    }

    fn numeric_comparison_value(&self) -> Result<f64, StratlabError> {
        let value = self
            .comparison_value
            .as_ref()
            .ok_or_else(|| StratlabError::invalid_tree(&self.id, "missing comparisonValue"))?;
        value.as_number().ok_or_else(|| {
            StratlabError::invalid_tree(
                &self.id,
                format!("comparisonValue '{}' is not a number", value.as_text()),
            )
        })
    }
}

/// Parse a rule document. A bare condition at the root is wrapped in an
/// AND group.
pub fn parse_rule_document(json: &str) -> Result<LogicGroup, StratlabError> {
    let raw: RawNode = serde_json::from_str(json)?;
    match build_node(raw)? {
        Node::Group(group) => Ok(group),
        leaf => Ok(LogicGroup::new("root", GroupOp::And, vec![leaf])),
    }
}

pub fn read_rule_document(path: &Path) -> Result<LogicGroup, StratlabError> {
    let json = std::fs::read_to_string(path)?;
    parse_rule_document(&json)
}

fn build_node(raw: RawNode) -> Result<Node, StratlabError> {
    match raw {
        RawNode::Group(group) => build_group(group).map(Node::Group),
        RawNode::Indicator(cond) => build_condition(&cond),
    }
}

fn build_group(raw: RawGroup) -> Result<LogicGroup, StratlabError> {
    let op = match raw.operator.to_ascii_uppercase().as_str() {
        "AND" => GroupOp::And,
        "OR" => GroupOp::Or,
        other => {
            return Err(StratlabError::invalid_tree(
                &raw.id,
                format!("unknown group operator '{other}'"),
            ));
        }
    };
    let children = raw
        .children
        .into_iter()
        .map(build_node)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(LogicGroup::new(raw.id, op, children))
}

fn build_condition(cond: &RawCondition) -> Result<Node, StratlabError> {
    match cond.indicator.trim().to_ascii_uppercase().as_str() {
        "HISTORICAL_PATTERN" => build_historical_pattern(cond).map(Node::HistoricalPattern),
        "PATTERN_DURATION" => build_pattern_duration(cond).map(Node::PatternDuration),
        _ => build_comparison(cond).map(Node::Comparison),
    }
}

fn build_historical_pattern(cond: &RawCondition) -> Result<HistoricalPattern, StratlabError> {
    let window = cond
        .count_param("window")?
        .ok_or_else(|| StratlabError::invalid_tree(&cond.id, "missing param 'window'"))?;
    let text = cond.required_param("condition")?.as_text();
    let condition = parse_condition(&text, &cond.id).map_err(|e| e.in_text(&cond.id, &text))?;

    let min_count = match cond.count_param("minCount")? {
        Some(n) => n,
        None => match cond.comparison_value.as_ref().and_then(RawValue::as_number) {
            Some(n) if n.is_finite() && n >= 0.0 => n.ceil() as usize,
            _ => 1,
        },
    };

    Ok(HistoricalPattern {
        id: cond.id.clone(),
        window,
        condition,
        min_count,
    })
}

fn build_pattern_duration(cond: &RawCondition) -> Result<PatternDuration, StratlabError> {
    let text = cond.required_param("start")?.as_text();
    let start = parse_condition(&text, &cond.id).map_err(|e| e.in_text(&cond.id, &text))?;

    let op = match cond.operator {
        Some(_) => cond.operator()?,
        None => CompareOp::Ge,
    };
    if op.is_cross() {
        return Err(StratlabError::invalid_tree(
            &cond.id,
            format!("{op} cannot compare a duration"),
        ));
    }

    Ok(PatternDuration {
        id: cond.id.clone(),
        start,
        op,
        value: cond.numeric_comparison_value()?,
        horizon: cond
            .count_param("horizon")?
            .unwrap_or(DEFAULT_DURATION_HORIZON),
    })
}

fn build_comparison(cond: &RawCondition) -> Result<Comparison, StratlabError> {
    let left = build_left(cond)?;
    let op = cond.operator()?;

    let right = match cond.comparison_type {
        Some(ComparisonType::Number) => Expr::constant(cond.numeric_comparison_value()?),
        _ => match &cond.comparison_value {
            Some(RawValue::Number(n)) => Expr::constant(*n),
            Some(RawValue::Text(text)) => {
                parse_expr(text).map_err(|e| e.in_text(&cond.id, text))?
            }
            None => {
                return Err(StratlabError::invalid_tree(
                    &cond.id,
                    "missing comparisonValue",
                ));
            }
        },
    };

    Ok(Comparison::new(cond.id.clone(), left, op, right))
}

/// Left side: either free text in `indicator` (`Close`, `SMA20`,
/// `Open + Range`) or an indicator name whose parameters come from `params`.
fn build_left(cond: &RawCondition) -> Result<Expr, StratlabError> {
    if cond.params.is_empty() {
        return parse_expr(&cond.indicator).map_err(|e| e.in_text(&cond.id, &cond.indicator));
    }

    let mut args = Vec::new();
    let mut source = None;
    let mut offset = 0;
    for param in &cond.params {
        match param.name.to_ascii_lowercase().as_str() {
            "source" | "field" => {
                let text = param.value.as_text();
                source = Some(PriceField::from_name(text.trim()).ok_or_else(|| {
                    StratlabError::invalid_tree(&cond.id, format!("unknown price field '{text}'"))
                })?);
            }
            "offset" => {
                offset = cond.count_param("offset")?.unwrap_or(0);
            }
            _ => {
                let value = param.value.as_number().ok_or_else(|| {
                    StratlabError::invalid_tree(
                        &cond.id,
                        format!(
                            "param '{}' must be numeric, got '{}'",
                            param.name,
                            param.value.as_text()
                        ),
                    )
                })?;
                args.push(value);
            }
        }
    }

    let indicator_type = IndicatorType::from_name(cond.indicator.trim(), source, &args)?;
    Ok(Expr::Operand(Operand::Indicator(IndicatorRef {
        indicator_type,
        offset,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rule::ArithOp;

    fn sma(period: usize) -> IndicatorType {
        IndicatorType::Sma {
            period,
            source: PriceField::Close,
        }
    }

    const LOGIC_V2: &str = r#"{
        "id": "root", "type": "GROUP", "operator": "AND",
        "children": [
            { "id": "A", "type": "INDICATOR", "indicator": "SMA",
              "params": [{ "name": "period", "value": 50 }],
              "operator": ">", "comparisonValue": "SMA120", "comparisonType": "INDICATOR" },
            { "id": "B", "type": "PATTERN", "indicator": "HISTORICAL_PATTERN",
              "params": [
                { "name": "window", "value": 120 },
                { "name": "condition", "value": "SMA120 > SMA50 > SMA20 > SMA5" },
                { "name": "minCount", "value": 1 }
              ],
              "operator": ">=", "comparisonValue": 1, "comparisonType": "NUMBER" },
            { "id": "C", "type": "PATTERN", "indicator": "PATTERN_DURATION",
              "params": [{ "name": "start", "value": "SMA5_CROSS_UP_SMA20" }],
              "operator": ">=", "comparisonValue": 10, "comparisonType": "NUMBER" },
            { "id": "D", "type": "INDICATOR", "indicator": "SMA",
              "params": [{ "name": "period", "value": 120 }],
              "operator": ">=", "comparisonValue": "SMA120_20", "comparisonType": "INDICATOR" }
        ]
    }"#;

    #[test]
    fn parse_full_document() {
        let tree = parse_rule_document(LOGIC_V2).unwrap();
        assert_eq!(tree.id, "root");
        assert_eq!(tree.op, GroupOp::And);
        assert_eq!(tree.children.len(), 4);

        match &tree.children[1] {
            Node::HistoricalPattern(p) => {
                assert_eq!(p.window, 120);
                assert_eq!(p.min_count, 1);
                assert_eq!(p.condition.len(), 3);
            }
            other => panic!("expected historical pattern, got {other:?}"),
        }
        match &tree.children[2] {
            Node::PatternDuration(p) => {
                assert_eq!(p.op, CompareOp::Ge);
                assert_eq!(p.value, 10.0);
                assert_eq!(p.horizon, DEFAULT_DURATION_HORIZON);
                assert_eq!(p.start[0].op, CompareOp::CrossUp);
            }
            other => panic!("expected pattern duration, got {other:?}"),
        }
        match &tree.children[3] {
            Node::Comparison(c) => {
                assert_eq!(
                    c.right,
                    Expr::Operand(Operand::Indicator(IndicatorRef {
                        indicator_type: sma(120),
                        offset: 20
                    }))
                );
            }
            other => panic!("expected comparison, got {other:?}"),
        }
        assert_eq!(tree.warmup_index(), 119 + 20);
    }

    #[test]
    fn price_condition_with_arithmetic_reference() {
        let json = r#"{ "id": "lw", "type": "GROUP", "operator": "OR", "children": [
            { "id": "vol_breakout", "type": "PRICE", "indicator": "Close", "params": [],
              "operator": ">", "comparisonType": "INDICATOR",
              "comparisonValue": "Open + (Range * 0.5)" } ] }"#;
        let tree = parse_rule_document(json).unwrap();
        assert_eq!(tree.op, GroupOp::Or);
        match &tree.children[0] {
            Node::Comparison(c) => {
                assert_eq!(c.left, Expr::field(PriceField::Close));
                assert!(matches!(
                    c.right,
                    Expr::Binary {
                        op: ArithOp::Add,
                        ..
                    }
                ));
            }
            other => panic!("expected comparison, got {other:?}"),
        }
    }

    #[test]
    fn numeric_threshold() {
        let json = r#"{ "id": "r", "type": "GROUP", "operator": "AND", "children": [
            { "id": "rsi", "type": "INDICATOR", "indicator": "RSI",
              "params": [{ "name": "period", "value": 14 }],
              "operator": "<", "comparisonValue": 30, "comparisonType": "NUMBER" } ] }"#;
        let tree = parse_rule_document(json).unwrap();
        assert_eq!(tree.extract_indicators(), vec![IndicatorType::Rsi(14)]);
    }

    #[test]
    fn volume_source_param() {
        let json = r#"{ "id": "v", "type": "INDICATOR", "indicator": "SMA",
            "params": [{ "name": "source", "value": "Volume" }, { "name": "period", "value": 20 }],
            "operator": "<", "comparisonValue": "Volume", "comparisonType": "REFERENCE" }"#;
        let tree = parse_rule_document(json).unwrap();
        assert_eq!(tree.id, "root");
        assert_eq!(
            tree.extract_indicators(),
            vec![IndicatorType::Sma {
                period: 20,
                source: PriceField::Volume
            }]
        );
    }

    #[test]
    fn min_count_falls_back_to_comparison_value() {
        let json = r#"{ "id": "p", "type": "PATTERN", "indicator": "HISTORICAL_PATTERN",
            "params": [{ "name": "window", "value": 10 }, { "name": "condition", "value": "close > open" }],
            "operator": ">=", "comparisonValue": 3, "comparisonType": "NUMBER" }"#;
        match &parse_rule_document(json).unwrap().children[0] {
            Node::HistoricalPattern(p) => assert_eq!(p.min_count, 3),
            other => panic!("expected historical pattern, got {other:?}"),
        }

        let json = r#"{ "id": "p", "type": "PATTERN", "indicator": "HISTORICAL_PATTERN",
            "params": [{ "name": "window", "value": "10" }, { "name": "condition", "value": "close > open" }] }"#;
        match &parse_rule_document(json).unwrap().children[0] {
            Node::HistoricalPattern(p) => {
                assert_eq!(p.window, 10);
                assert_eq!(p.min_count, 1);
            }
            other => panic!("expected historical pattern, got {other:?}"),
        }
    }

    #[test]
    fn min_count_param_wins_over_comparison_value() {
        let json = r#"{ "id": "p", "type": "PATTERN", "indicator": "HISTORICAL_PATTERN",
            "params": [
                { "name": "window", "value": 10 },
                { "name": "condition", "value": "close > open" },
                { "name": "minCount", "value": 2 }
            ],
            "operator": ">=", "comparisonValue": 7, "comparisonType": "NUMBER" }"#;
        match &parse_rule_document(json).unwrap().children[0] {
            Node::HistoricalPattern(p) => assert_eq!(p.min_count, 2),
            other => panic!("expected historical pattern, got {other:?}"),
        }
    }

    #[test]
    fn oversized_counts_are_invalid_tree() {
        let offset = r#"{ "id": "big", "type": "INDICATOR", "indicator": "SMA",
            "params": [{ "name": "period", "value": 20 }, { "name": "offset", "value": 2e19 }],
            "operator": ">", "comparisonValue": 1, "comparisonType": "NUMBER" }"#;
        let err = parse_rule_document(offset).unwrap_err();
        assert!(matches!(err, StratlabError::InvalidTree { ref node, .. } if node == "big"));

        let window = r#"{ "id": "w", "type": "PATTERN", "indicator": "HISTORICAL_PATTERN",
            "params": [{ "name": "window", "value": 2e19 }, { "name": "condition", "value": "close > open" }] }"#;
        assert!(matches!(
            parse_rule_document(window),
            Err(StratlabError::InvalidTree { .. })
        ));

        let horizon = r#"{ "id": "d", "type": "PATTERN", "indicator": "PATTERN_DURATION",
            "params": [{ "name": "start", "value": "close > open" }, { "name": "horizon", "value": 18446744073709551615 }],
            "operator": "<=", "comparisonValue": 5 }"#;
        assert!(matches!(
            parse_rule_document(horizon),
            Err(StratlabError::InvalidTree { .. })
        ));

        let bracket = r#"{ "id": "b", "type": "INDICATOR", "indicator": "Close",
            "operator": ">", "comparisonValue": "SMA200_20[18446744073709551615]",
            "comparisonType": "INDICATOR" }"#;
        assert!(matches!(
            parse_rule_document(bracket),
            Err(StratlabError::RuleSyntax { .. })
        ));
    }

    #[test]
    fn syntax_errors_keep_their_text() {
        let json = r#"{ "id": "p", "type": "PATTERN", "indicator": "HISTORICAL_PATTERN",
            "params": [{ "name": "window", "value": 10 }, { "name": "condition", "value": "close > (open *" }] }"#;
        let err = parse_rule_document(json).unwrap_err();
        match &err {
            StratlabError::RuleSyntax { node, text, .. } => {
                assert_eq!(node, "p");
                assert_eq!(text, "close > (open *");
            }
            other => panic!("expected rule syntax error, got {other:?}"),
        }
        let diagnostic = err.diagnostic().unwrap();
        assert!(diagnostic.starts_with("close > (open *\n"));
        assert!(diagnostic.contains('^'));
    }

    #[test]
    fn duration_horizon_param() {
        let json = r#"{ "id": "d", "type": "PATTERN", "indicator": "PATTERN_DURATION",
            "params": [{ "name": "start", "value": "close > SMA(20)" }, { "name": "horizon", "value": 50 }],
            "operator": "<=", "comparisonValue": 5 }"#;
        match &parse_rule_document(json).unwrap().children[0] {
            Node::PatternDuration(p) => {
                assert_eq!(p.horizon, 50);
                assert_eq!(p.op, CompareOp::Le);
            }
            other => panic!("expected pattern duration, got {other:?}"),
        }
    }

    #[test]
    fn missing_period_is_invalid_tree() {
        let json = r#"{ "id": "r", "type": "INDICATOR", "indicator": "RSI", "params": [],
            "operator": "<", "comparisonValue": 30, "comparisonType": "NUMBER" }"#;
        assert!(matches!(
            parse_rule_document(json),
            Err(StratlabError::InvalidTree { .. })
        ));
    }

    #[test]
    fn non_numeric_number_value_is_invalid_tree() {
        let json = r#"{ "id": "r", "type": "INDICATOR", "indicator": "Close", "params": [],
            "operator": ">", "comparisonValue": "SMA(20)", "comparisonType": "NUMBER" }"#;
        let err = parse_rule_document(json).unwrap_err();
        assert!(matches!(err, StratlabError::InvalidTree { ref node, .. } if node == "r"));
    }

    #[test]
    fn unknown_indicator_fails_the_load() {
        let json = r#"{ "id": "r", "type": "INDICATOR", "indicator": "STOCHASTIC_K",
            "params": [{ "name": "period", "value": 14 }],
            "operator": "<", "comparisonValue": 20, "comparisonType": "NUMBER" }"#;
        assert!(matches!(
            parse_rule_document(json),
            Err(StratlabError::UnknownIndicator { .. })
        ));
    }

    #[test]
    fn bad_operators_are_invalid_tree() {
        let group = r#"{ "id": "g", "type": "GROUP", "operator": "XOR", "children": [] }"#;
        assert!(matches!(
            parse_rule_document(group),
            Err(StratlabError::InvalidTree { .. })
        ));

        let duration = r#"{ "id": "d", "type": "PATTERN", "indicator": "PATTERN_DURATION",
            "params": [{ "name": "start", "value": "close > open" }],
            "operator": "CROSS_UP", "comparisonValue": 5 }"#;
        assert!(matches!(
            parse_rule_document(duration),
            Err(StratlabError::InvalidTree { .. })
        ));
    }

    #[test]
    fn empty_groups_load() {
        let json = r#"{ "id": "g", "type": "GROUP", "operator": "or" }"#;
        let tree = parse_rule_document(json).unwrap();
        assert_eq!(tree.op, GroupOp::Or);
        assert!(tree.children.is_empty());
    }

    #[test]
    fn malformed_json_is_json_error() {
        assert!(matches!(
            parse_rule_document("{ not json"),
            Err(StratlabError::Json(_))
        ));
    }

    #[test]
    fn read_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rule.json");
        std::fs::write(&path, LOGIC_V2).unwrap();
        assert_eq!(read_rule_document(&path).unwrap().children.len(), 4);
    }
}
