//! Canonical re-printing: minimal parentheses preserving precedence and
//! left-associativity.

use super::ast::{BinaryOp, Node, UnaryOp};

const ATOM_PREC: u8 = u8::MAX;
const UNARY_PREC: u8 = 3;

pub fn print(node: &Node) -> String {
    print_inner(node).0
}

/// Returns the printed text together with the node's own precedence,
/// so callers can decide whether to wrap it in parentheses.
fn print_inner(node: &Node) -> (String, u8) {
    match node {
        Node::Number(n) => (format_number(*n), ATOM_PREC),
        Node::Reference(pos) => (pos.to_a1(), ATOM_PREC),
        Node::Unary { op, operand } => {
            let (operand_str, operand_prec) = print_inner(operand);
            let needs_parens = operand_prec == BinaryOp::Add.precedence();
            let wrapped = if needs_parens {
                format!("({operand_str})")
            } else {
                operand_str
            };
            let symbol = match op {
                UnaryOp::Neg => '-',
                UnaryOp::Plus => '+',
            };
            (format!("{symbol}{wrapped}"), UNARY_PREC)
        }
        Node::Binary { op, left, right } => {
            let prec = op.precedence();
            let (left_str, left_prec) = print_inner(left);
            let (right_str, right_prec) = print_inner(right);

            let left_wrapped = if left_prec < prec {
                format!("({left_str})")
            } else {
                left_str
            };

            let right_needs_parens = right_prec < prec
                || (*op == BinaryOp::Sub && right_prec == prec)
                || (*op == BinaryOp::Div && right_prec == prec);
            let right_wrapped = if right_needs_parens {
                format!("({right_str})")
            } else {
                right_str
            };

            (format!("{left_wrapped}{}{right_wrapped}", op.symbol()), prec)
        }
    }
}

/// Shortest round-tripping decimal form. Rust's `f64` `Display` already
/// produces the shortest representation that round-trips exactly.
fn format_number(n: f64) -> String {
    format!("{n}")
}
