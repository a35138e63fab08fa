//! Formula evaluation: AST + a cell-value lookup -> `f64` or `FormulaError`.

use super::ast::{BinaryOp, Node, UnaryOp};
use crate::cell::CellValue;
use crate::position::Position;
use thiserror::Error;

/// An in-band evaluation error. This is a *value*, not a Rust
/// `std::error::Error` failure: it flows through `CellValue` and
/// propagates through arithmetic exactly like a number would.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FormulaError {
    #[error("#REF!")]
    Ref,
    #[error("#VALUE!")]
    Value,
    #[error("#ARITHM!")]
    Arithmetic,
}

impl FormulaError {
    /// The fixed wire token used by `Sheet::print_values`.
    pub fn token(self) -> &'static str {
        match self {
            FormulaError::Ref => "#REF!",
            FormulaError::Value => "#VALUE!",
            FormulaError::Arithmetic => "#ARITHM!",
        }
    }
}

pub type EvalResult = Result<f64, FormulaError>;

/// Evaluate `node`, resolving references via `lookup`.
pub fn evaluate<F>(node: &Node, lookup: &F) -> EvalResult
where
    F: Fn(Position) -> CellValue,
{
    match node {
        Node::Number(n) => Ok(*n),
        Node::Reference(pos) => {
            if !pos.is_valid() {
                return Err(FormulaError::Ref);
            }
            coerce_to_number(&lookup(*pos))
        }
        Node::Unary { op, operand } => {
            let v = evaluate(operand, lookup)?;
            match op {
                UnaryOp::Neg => finite_or_arithmetic_error(-v),
                UnaryOp::Plus => finite_or_arithmetic_error(v),
            }
        }
        Node::Binary { op, left, right } => {
            // Left operand takes precedence on simultaneous errors: by
            // evaluating left first and propagating with `?`, a left
            // error short-circuits before the right is even evaluated.
            let l = evaluate(left, lookup)?;
            let r = evaluate(right, lookup)?;
            let raw = match op {
                BinaryOp::Add => l + r,
                BinaryOp::Sub => l - r,
                BinaryOp::Mul => l * r,
                BinaryOp::Div => l / r,
            };
            finite_or_arithmetic_error(raw)
        }
    }
}

fn finite_or_arithmetic_error(v: f64) -> EvalResult {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(FormulaError::Arithmetic)
    }
}

/// Converts a referenced cell's current value into the number an
/// arithmetic expression sees it as.
fn coerce_to_number(value: &CellValue) -> EvalResult {
    match value {
        CellValue::Empty => Ok(0.0),
        CellValue::Number(n) => Ok(*n),
        // A text cell whose only content was an escape sign displays as
        // the empty string, same as an Empty cell.
        CellValue::Text(s) if s.is_empty() => Ok(0.0),
        CellValue::Text(s) => match s.parse::<f64>() {
            Ok(n) if n.is_finite() => Ok(n),
            _ => Err(FormulaError::Value),
        },
        CellValue::Error(e) => Err(*e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::parser::parse;

    fn eval_str(src: &str, lookup: impl Fn(Position) -> CellValue) -> EvalResult {
        evaluate(&parse(src).unwrap(), &lookup)
    }

    #[test]
    fn arithmetic_precedence() {
        assert_eq!(eval_str("1+2*3", |_| CellValue::Empty), Ok(7.0));
    }

    #[test]
    fn division_by_zero_is_arithmetic_error() {
        assert_eq!(eval_str("1/0", |_| CellValue::Empty), Err(FormulaError::Arithmetic));
    }

    #[test]
    fn empty_cell_is_zero() {
        assert_eq!(eval_str("A1+1", |_| CellValue::Empty), Ok(1.0));
    }

    #[test]
    fn empty_text_from_stripped_escape_sign_is_zero() {
        // A cell set to just "'" displays as the empty string, same as
        // an Empty cell, and is treated as 0 in arithmetic.
        assert_eq!(eval_str("A1+1", |_| CellValue::Text(String::new())), Ok(1.0));
    }

    #[test]
    fn non_numeric_text_is_value_error() {
        assert_eq!(
            eval_str("A1+1", |_| CellValue::Text("hello".into())),
            Err(FormulaError::Value)
        );
    }

    #[test]
    fn text_that_parses_as_number_is_numeric() {
        assert_eq!(eval_str("A1+1", |_| CellValue::Text("41".into())), Ok(42.0));
    }

    #[test]
    fn invalid_reference_is_ref_error() {
        assert_eq!(
            eval_str("A99999", |_| CellValue::Empty),
            Err(FormulaError::Ref)
        );
    }

    #[test]
    fn error_propagates_through_arithmetic() {
        assert_eq!(
            eval_str("A1+1", |_| CellValue::Error(FormulaError::Arithmetic)),
            Err(FormulaError::Arithmetic)
        );
    }

    #[test]
    fn left_error_wins_on_simultaneous_errors() {
        // Both A1 and B1 would error; evaluation never reaches B1 since
        // `?` short-circuits on the left operand first.
        let lookup = |pos: Position| {
            if pos == Position::new(0, 0) {
                CellValue::Error(FormulaError::Ref)
            } else {
                CellValue::Error(FormulaError::Value)
            }
        };
        assert_eq!(eval_str("A1+B1", lookup), Err(FormulaError::Ref));
    }
}
