//! Formula expression AST (spec §4.7).
//!
//! Shaped directly on `sheet::eval::parser::ast` in the teacher: the same
//! `Expr`/`BinaryOp`/range-reference split, trimmed to the operator and
//! function set spec §4.7 actually calls for.

use crate::cell::CellValue;
use crate::coord::{Coordinate, Range};

/// The four arithmetic operators spec §4.7 calls for, with IEEE-754
/// semantics (`Div` by zero yields the `#DIV/0!` sentinel at evaluation
/// time, not here).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// A reference to another sheet, or `None` for "the formula's own sheet"
/// (mirrors the teacher's `RangeRef::sheet: String` but keeps the common
/// unqualified case allocation-free until resolution time).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetRef(pub Option<String>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeRef {
    pub sheet: SheetRef,
    pub range: Range,
}

/// Minimal expression AST used by the evaluator (spec §4.7 "Evaluation").
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(CellValue),
    Reference { sheet: SheetRef, coord: Coordinate },
    Range(RangeRef),
    /// A bare identifier that isn't a valid A1 reference and isn't
    /// followed by `(` — an unresolvable name, evaluates to `#NAME?`
    /// (mirrors the teacher's `Expr::Name` in `sheet::eval::parser::ast`).
    Name(String),
    UnaryMinus(Box<Expr>),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    FunctionCall { name: String, args: Vec<Expr> },
}
