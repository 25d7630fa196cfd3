//! Reference expression and condition text parser.
//!
//! Recursive descent over a small, case-insensitive grammar:
//!
//! ```text
//! condition := expr (cmp expr)+ | expr "_CROSS_UP_" expr | expr "_CROSS_DOWN_" expr
//! cmp       := ">" | ">=" | "<" | "<=" | "=" | "CROSS_UP" | "CROSS_DOWN"
//! expr      := term (("+" | "-") term)*
//! term      := unary (("*" | "/") unary)*
//! unary     := "-" unary | primary
//! primary   := number | "(" expr ")" | operand ("[" integer "]")?
//! operand   := field | NAME digits ("_" digits)? | NAME "(" (field ",")? number ("," number)* ")"
//! ```
//!
//! `SMA200_20` and `SMA(200, 20)` both read SMA(200) twenty bars back. A chain
//! `A > B > C` becomes one comparison per adjacent pair.

use crate::domain::error::{ParseError, StratlabError};
use crate::domain::indicator::IndicatorType;
use crate::domain::ohlcv::PriceField;
use crate::domain::rule::{
    ArithOp, CompareOp, Comparison, Expr, IndicatorRef, MAX_HISTORY, Operand,
};

struct Parser<'a> {
    input: &'a str,
    pos: usize,
    /// Offset of `input` within the text the user wrote, for error positions.
    base: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self::with_base(input, 0)
    }

    fn with_base(input: &'a str, base: usize) -> Self {
        Self {
            input,
            pos: 0,
            base,
        }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn error_at(&self, pos: usize, message: impl Into<String>) -> StratlabError {
        ParseError {
            message: message.into(),
            position: self.base + pos,
        }
        .into()
    }

    fn error(&self, message: impl Into<String>) -> StratlabError {
        self.error_at(self.pos, message)
    }

    fn consume_char(&mut self, expected: char) -> bool {
        self.skip_whitespace();
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_char(&mut self, expected: char) -> Result<(), StratlabError> {
        if self.consume_char(expected) {
            return Ok(());
        }
        Err(self.error(format!(
            "expected '{}', found {}",
            expected,
            self.describe_next()
        )))
    }

    fn peek_word(&self) -> &'a str {
        let remaining = self.remaining();
        let end = remaining
            .find(|c: char| !(c.is_alphanumeric() || c == '_'))
            .unwrap_or(remaining.len());
        &remaining[..end]
    }

    fn describe_next(&self) -> String {
        let word = self.peek_word();
        if !word.is_empty() {
            format!("'{}'", word)
        } else {
            self.peek()
                .map(|c| format!("'{}'", c))
                .unwrap_or_else(|| "end of input".to_string())
        }
    }

    fn parse_number(&mut self) -> Result<f64, StratlabError> {
        self.skip_whitespace();
        let start = self.pos;
        let mut has_dot = false;
        let mut digits = 0;

        if self.peek() == Some('-') {
            self.advance();
        }

        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                digits += 1;
                self.advance();
            } else if ch == '.' && !has_dot {
                has_dot = true;
                self.advance();
            } else {
                break;
            }
        }

        if digits == 0 {
            return Err(self.error_at(start, "expected number"));
        }

        let num_str = &self.input[start..self.pos];
        num_str
            .parse::<f64>()
            .map_err(|_| self.error_at(start, format!("invalid number: {}", num_str)))
    }

    fn parse_integer(&mut self) -> Result<usize, StratlabError> {
        self.skip_whitespace();
        let start = self.pos;
        while self.peek().is_some_and(|ch| ch.is_ascii_digit()) {
            self.advance();
        }
        if start == self.pos {
            return Err(self.error_at(start, "expected integer"));
        }
        let num_str = &self.input[start..self.pos];
        num_str
            .parse::<usize>()
            .map_err(|_| self.error_at(start, format!("invalid integer: {}", num_str)))
    }

    fn expect_end(&mut self) -> Result<(), StratlabError> {
        self.skip_whitespace();
        if self.pos < self.input.len() {
            return Err(self.error(format!("unexpected input: '{}'", self.remaining())));
        }
        Ok(())
    }

    fn parse_expr(&mut self) -> Result<Expr, StratlabError> {
        let mut left = self.parse_term()?;
        loop {
            self.skip_whitespace();
            let op = match self.peek() {
                Some('+') => ArithOp::Add,
                Some('-') => ArithOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_term()?;
            left = Expr::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr, StratlabError> {
        let mut left = self.parse_unary()?;
        loop {
            self.skip_whitespace();
            let op = match self.peek() {
                Some('*') => ArithOp::Mul,
                Some('/') => ArithOp::Div,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, StratlabError> {
        self.skip_whitespace();
        if self.peek() != Some('-') {
            return self.parse_primary();
        }
        self.advance();
        let inner = self.parse_unary()?;
        Ok(match inner {
            Expr::Operand(Operand::Constant(v)) => Expr::constant(-v),
            other => Expr::binary(ArithOp::Sub, Expr::constant(0.0), other),
        })
    }

    fn parse_primary(&mut self) -> Result<Expr, StratlabError> {
        self.skip_whitespace();
        match self.peek() {
            Some('(') => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect_char(')')?;
                Ok(expr)
            }
            Some(ch) if ch.is_ascii_digit() || ch == '.' => {
                Ok(Expr::constant(self.parse_number()?))
            }
            Some(ch) if ch.is_alphabetic() => self.parse_operand(),
            _ => Err(self.error(format!(
                "expected expression, found {}",
                self.describe_next()
            ))),
        }
    }

    fn parse_operand(&mut self) -> Result<Expr, StratlabError> {
        let start = self.pos;
        let word = self.peek_word();
        self.pos += word.len();

        let upper = word.to_ascii_uppercase();
        let split = upper
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(upper.len());
        let name = upper[..split].trim_end_matches('_');
        let suffix = &upper[split..];

        let mut operand = if !suffix.is_empty() {
            let (period, offset) = self.parse_compact_suffix(suffix, start)?;
            Operand::Indicator(indicator_ref(name, None, &[period as f64], offset)?)
        } else if let Some(field) = price_operand(name) {
            field
        } else {
            self.skip_whitespace();
            if self.peek() == Some('(') {
                self.advance();
                self.parse_indicator_call(name)?
            } else {
                Operand::Indicator(indicator_ref(name, None, &[], 0)?)
            }
        };

        if self.peek() == Some('[') {
            self.advance();
            let bracket = self.pos;
            let extra = self.parse_integer()?;
            self.expect_char(']')?;
            let offset = match &mut operand {
                Operand::Field { offset, .. } => Some(offset),
                Operand::Indicator(iref) => Some(&mut iref.offset),
                Operand::Constant(_) => None,
            };
            if let Some(offset) = offset {
                *offset = offset
                    .checked_add(extra)
                    .filter(|o| *o <= MAX_HISTORY)
                    .ok_or_else(|| {
                        self.error_at(bracket, format!("offset exceeds {MAX_HISTORY} bars"))
                    })?;
            }
        }

        Ok(Expr::Operand(operand))
    }

    /// `20` or `200_20` after an indicator name.
    fn parse_compact_suffix(
        &self,
        suffix: &str,
        start: usize,
    ) -> Result<(usize, usize), StratlabError> {
        let (period, offset) = match suffix.split_once('_') {
            Some((p, o)) => (p, Some(o)),
            None => (suffix, None),
        };
        let parse = |s: &str| -> Option<usize> {
            if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) {
                s.parse().ok()
            } else {
                None
            }
        };
        let malformed = || {
            self.error_at(
                start,
                format!("malformed indicator reference '{}'", &self.input[start..self.pos]),
            )
        };
        let period = parse(period).ok_or_else(malformed)?;
        let offset = match offset {
            Some(o) => parse(o).ok_or_else(malformed)?,
            None => 0,
        };
        if period > MAX_HISTORY || offset > MAX_HISTORY {
            return Err(self.error_at(
                start,
                format!("indicator reference exceeds {MAX_HISTORY} bars"),
            ));
        }
        Ok((period, offset))
    }

    /// Argument list after `NAME(`: an optional leading price field, then
    /// numeric parameters.
    fn parse_indicator_call(&mut self, name: &str) -> Result<Operand, StratlabError> {
        self.skip_whitespace();
        let mut source = None;
        let mut needs_args = true;

        if self.peek().is_some_and(|c| c.is_alphabetic()) {
            let word = self.peek_word();
            let field = PriceField::from_name(word).ok_or_else(|| {
                self.error(format!("expected price field or number, found '{}'", word))
            })?;
            self.pos += word.len();
            source = Some(field);
            needs_args = self.consume_char(',');
        }

        let mut args = Vec::new();
        if needs_args {
            args.push(self.parse_number()?);
            while self.consume_char(',') {
                args.push(self.parse_number()?);
            }
        }
        self.expect_char(')')?;

        Ok(Operand::Indicator(indicator_ref(name, source, &args, 0)?))
    }

    fn parse_compare_op(&mut self) -> Option<CompareOp> {
        self.skip_whitespace();
        let remaining = self.remaining();
        for (symbol, op) in [
            (">=", CompareOp::Ge),
            ("<=", CompareOp::Le),
            ("==", CompareOp::Eq),
            (">", CompareOp::Gt),
            ("<", CompareOp::Lt),
            ("=", CompareOp::Eq),
        ] {
            if remaining.starts_with(symbol) {
                self.pos += symbol.len();
                return Some(op);
            }
        }
        let word = self.peek_word();
        let op = match word.to_ascii_uppercase().as_str() {
            "CROSS_UP" => CompareOp::CrossUp,
            "CROSS_DOWN" => CompareOp::CrossDown,
            _ => return None,
        };
        self.pos += word.len();
        Some(op)
    }
}

fn price_operand(name: &str) -> Option<Operand> {
    match name {
        "PREVCLOSE" | "PREV_CLOSE" => Some(Operand::Field {
            field: PriceField::Close,
            offset: 1,
        }),
        _ => PriceField::from_name(name).map(|field| Operand::Field { field, offset: 0 }),
    }
}

/// Build an indicator reference. For the single-period indicators a second
/// argument is a bar offset, as in `SMA(200, 20)`.
fn indicator_ref(
    name: &str,
    source: Option<PriceField>,
    args: &[f64],
    offset: usize,
) -> Result<IndicatorRef, StratlabError> {
    let key: String = name.chars().filter(|c| *c != '_').collect();
    let single_period = matches!(key.to_ascii_uppercase().as_str(), "SMA" | "MA" | "EMA" | "RSI");

    let (params, extra) = if single_period && args.len() == 2 {
        let raw = args[1];
        if !(raw.is_finite() && raw >= 0.0 && raw.fract() == 0.0) {
            return Err(StratlabError::invalid_tree(
                name,
                format!("offset must be a non-negative integer, got {raw}"),
            ));
        }
        if raw > MAX_HISTORY as f64 {
            return Err(StratlabError::invalid_tree(
                name,
                format!("offset {raw} exceeds {MAX_HISTORY}"),
            ));
        }
        (&args[..1], raw as usize)
    } else {
        (args, 0)
    };

    if params.len() > 2 || (single_period && params.len() > 1) {
        return Err(StratlabError::invalid_tree(
            name,
            format!("too many arguments ({})", args.len()),
        ));
    }

    Ok(IndicatorRef {
        indicator_type: IndicatorType::from_name(name, source, params)?,
        offset: offset
            .checked_add(extra)
            .filter(|o| *o <= MAX_HISTORY)
            .ok_or_else(|| {
                StratlabError::invalid_tree(name, format!("offset exceeds {MAX_HISTORY}"))
            })?,
    })
}

/// Find `_CROSS_UP_` / `_CROSS_DOWN_` in compact condition text.
fn split_cross(input: &str) -> Option<(usize, usize, CompareOp)> {
    let upper = input.to_ascii_uppercase();
    for (marker, op) in [
        ("_CROSS_UP_", CompareOp::CrossUp),
        ("_CROSS_DOWN_", CompareOp::CrossDown),
    ] {
        if let Some(at) = upper.find(marker) {
            return Some((at, at + marker.len(), op));
        }
    }
    None
}

/// Parse a reference expression such as `SMA(Volume, 20) * 2`.
pub fn parse_expr(input: &str) -> Result<Expr, StratlabError> {
    let mut parser = Parser::new(input);
    let expr = parser.parse_expr()?;
    parser.expect_end()?;
    Ok(expr)
}

/// Parse condition text into comparisons that must all hold.
///
/// Comparison ids are `id` for a single comparison and `id.N` for the links
/// of a chain.
pub fn parse_condition(input: &str, id: &str) -> Result<Vec<Comparison>, StratlabError> {
    if let Some((left_end, right_start, op)) = split_cross(input) {
        let mut left = Parser::new(&input[..left_end]);
        let lhs = left.parse_expr()?;
        left.expect_end()?;
        let mut right = Parser::with_base(&input[right_start..], right_start);
        let rhs = right.parse_expr()?;
        right.expect_end()?;
        return Ok(vec![Comparison::new(id, lhs, op, rhs)]);
    }

    let mut parser = Parser::new(input);
    let mut exprs = vec![parser.parse_expr()?];
    let mut ops = Vec::new();
    while let Some(op) = parser.parse_compare_op() {
        ops.push(op);
        exprs.push(parser.parse_expr()?);
    }
    parser.expect_end()?;
    if ops.is_empty() {
        return Err(parser.error("expected comparison operator"));
    }

    let chained = ops.len() > 1;
    Ok(ops
        .into_iter()
        .enumerate()
        .map(|(i, op)| {
            let link_id = if chained {
                format!("{}.{}", id, i)
            } else {
                id.to_string()
            };
            Comparison::new(link_id, exprs[i].clone(), op, exprs[i + 1].clone())
        })
        .collect())
}
