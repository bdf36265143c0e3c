//! Synchronous expression evaluator (spec §4.7 "Evaluation").
//!
//! Grounded on `sheet::eval::engine` in the teacher: same dispatch shape
//! (arithmetic, reference dereference, a small built-in function table),
//! but synchronous — the teacher's evaluator is `async`/tokio-based to
//! support its live-recalculation pipeline; nothing else in this crate
//! needs async I/O, so this evaluator runs to completion on the calling
//! thread (a deliberate simplification, not a literal port).

use crate::cell::CellValue;
use crate::coord::{Coordinate, Range};

use super::ast::{BinaryOp, Expr, RangeRef};
use super::graph::CellRef;

/// Resolves a cell's current value during evaluation, decoupling the
/// evaluator from any particular worksheet/workbook type (mirrors the
/// teacher's `CellValueProvider` trait in `sheet::eval::engine`).
pub trait CellSource {
    /// The evaluating formula's own sheet name, used to resolve
    /// unqualified references.
    fn current_sheet(&self) -> &str;
    fn value_at(&self, sheet: &str, coord: Coordinate) -> CellValue;
}

/// Evaluate `expr` against `source`, returning either a value or an Excel
/// error-sentinel string (`#NAME?`, `#VALUE?`, `#DIV/0!`, ...).
pub fn evaluate(expr: &Expr, source: &dyn CellSource) -> Result<CellValue, &'static str> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Name(_) => Err("#NAME?"),
        Expr::Reference { sheet, coord } => {
            let sheet_name = sheet.0.as_deref().unwrap_or_else(|| source.current_sheet());
            Ok(source.value_at(sheet_name, *coord))
        }
        Expr::Range(range_ref) => {
            // A bare range outside an aggregate function has no scalar
            // value; SUM/AVERAGE etc. expand it themselves instead of
            // going through this arm (spec §4.7 "range arguments").
            let values = collect_range(range_ref, source);
            values.into_iter().next().ok_or("#VALUE!")
        }
        Expr::UnaryMinus(inner) => {
            let v = evaluate(inner, source)?;
            let n = coerce_number(&v)?;
            Ok(CellValue::Float(-n))
        }
        Expr::Binary { op, left, right } => {
            let l = coerce_number(&evaluate(left, source)?)?;
            let r = coerce_number(&evaluate(right, source)?)?;
            let result = match op {
                BinaryOp::Add => l + r,
                BinaryOp::Sub => l - r,
                BinaryOp::Mul => l * r,
                BinaryOp::Div => {
                    if r == 0.0 {
                        return Err("#DIV/0!");
                    }
                    l / r
                }
            };
            Ok(CellValue::Float(result))
        }
        Expr::FunctionCall { name, args } => call_function(name, args, source),
    }
}

fn coerce_number(v: &CellValue) -> Result<f64, &'static str> {
    match v {
        CellValue::Float(f) => Ok(*f),
        CellValue::Int(i) => Ok(*i as f64),
        CellValue::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        CellValue::Empty => Ok(0.0),
        CellValue::Error(e) => Err(e),
        CellValue::String(_) | CellValue::Formula { .. } => Err("#VALUE!"),
    }
}

fn collect_range(range_ref: &RangeRef, source: &dyn CellSource) -> Vec<CellValue> {
    let sheet_name = range_ref
        .sheet
        .0
        .clone()
        .unwrap_or_else(|| source.current_sheet().to_string());
    range_ref
        .range
        .iter_cells()
        .map(|c| source.value_at(&sheet_name, c))
        .collect()
}

/// Flatten an argument list into scalar values, expanding any bare
/// `Range` arguments in place (spec §4.7 "SUM/AVERAGE/... accept range
/// arguments").
fn flatten_args(args: &[Expr], source: &dyn CellSource) -> Result<Vec<CellValue>, &'static str> {
    let mut out = Vec::new();
    for arg in args {
        match arg {
            Expr::Range(range_ref) => out.extend(collect_range(range_ref, source)),
            other => out.push(evaluate(other, source)?),
        }
    }
    Ok(out)
}

type BuiltinFn = fn(&[Expr], &dyn CellSource) -> Result<CellValue, &'static str>;

/// Function-name to implementation lookup (spec §4.7 "built-in function
/// table"), a perfect-hash static mirroring the teacher's own
/// `phf_map!`-based name tables (`formula::omml::lookup::ELEMENT_TYPES`,
/// `odf::constants::ODF_EXTENSIONS`).
static BUILTINS: phf::Map<&'static str, BuiltinFn> = phf::phf_map! {
    "SUM" => fn_sum,
    "AVERAGE" => fn_average,
    "COUNT" => fn_count,
    "MAX" => fn_max,
    "MIN" => fn_min,
    "IF" => fn_if,
    "CONCATENATE" => fn_concatenate,
    "LEN" => fn_len,
    "ROUND" => fn_round,
    "NOW" => fn_now,
    "TODAY" => fn_today,
};

fn call_function(name: &str, args: &[Expr], source: &dyn CellSource) -> Result<CellValue, &'static str> {
    match BUILTINS.get(name) {
        Some(f) => f(args, source),
        None => Err("#NAME?"),
    }
}

fn fn_sum(args: &[Expr], source: &dyn CellSource) -> Result<CellValue, &'static str> {
    let values = flatten_args(args, source)?;
    let sum = numeric_values(&values).sum::<f64>();
    Ok(CellValue::Float(sum))
}

fn fn_average(args: &[Expr], source: &dyn CellSource) -> Result<CellValue, &'static str> {
    let values = flatten_args(args, source)?;
    let nums: Vec<f64> = numeric_values(&values).collect();
    if nums.is_empty() {
        return Err("#DIV/0!");
    }
    Ok(CellValue::Float(nums.iter().sum::<f64>() / nums.len() as f64))
}

fn fn_count(args: &[Expr], source: &dyn CellSource) -> Result<CellValue, &'static str> {
    let values = flatten_args(args, source)?;
    Ok(CellValue::Int(numeric_values(&values).count() as i64))
}

fn fn_max(args: &[Expr], source: &dyn CellSource) -> Result<CellValue, &'static str> {
    let values = flatten_args(args, source)?;
    let max = numeric_values(&values).fold(f64::NEG_INFINITY, f64::max);
    Ok(CellValue::Float(if max.is_finite() { max } else { 0.0 }))
}

fn fn_min(args: &[Expr], source: &dyn CellSource) -> Result<CellValue, &'static str> {
    let values = flatten_args(args, source)?;
    let min = numeric_values(&values).fold(f64::INFINITY, f64::min);
    Ok(CellValue::Float(if min.is_finite() { min } else { 0.0 }))
}

fn fn_if(args: &[Expr], source: &dyn CellSource) -> Result<CellValue, &'static str> {
    if args.len() < 2 || args.len() > 3 {
        return Err("#VALUE!");
    }
    let cond = evaluate(&args[0], source)?;
    let truthy = match cond {
        CellValue::Bool(b) => b,
        CellValue::Float(f) => f != 0.0,
        CellValue::Int(i) => i != 0,
        CellValue::Empty => false,
        _ => return Err("#VALUE!"),
    };
    if truthy {
        evaluate(&args[1], source)
    } else if args.len() == 3 {
        evaluate(&args[2], source)
    } else {
        Ok(CellValue::Bool(false))
    }
}

fn fn_concatenate(args: &[Expr], source: &dyn CellSource) -> Result<CellValue, &'static str> {
    let mut s = String::new();
    for arg in args {
        let v = evaluate(arg, source)?;
        s.push_str(&display_value(&v));
    }
    Ok(CellValue::String(s))
}

fn fn_len(args: &[Expr], source: &dyn CellSource) -> Result<CellValue, &'static str> {
    if args.len() != 1 {
        return Err("#VALUE!");
    }
    let v = evaluate(&args[0], source)?;
    Ok(CellValue::Int(display_value(&v).chars().count() as i64))
}

fn fn_round(args: &[Expr], source: &dyn CellSource) -> Result<CellValue, &'static str> {
    if args.len() != 2 {
        return Err("#VALUE!");
    }
    let n = coerce_number(&evaluate(&args[0], source)?)?;
    let digits = coerce_number(&evaluate(&args[1], source)?)? as i32;
    let factor = 10f64.powi(digits);
    Ok(CellValue::Float((n * factor).round() / factor))
}

fn fn_now(args: &[Expr], _source: &dyn CellSource) -> Result<CellValue, &'static str> {
    if !args.is_empty() {
        return Err("#VALUE!");
    }
    Ok(CellValue::Float(excel_now_serial()))
}

fn fn_today(args: &[Expr], _source: &dyn CellSource) -> Result<CellValue, &'static str> {
    if !args.is_empty() {
        return Err("#VALUE!");
    }
    Ok(CellValue::Float(excel_now_serial().floor()))
}

fn numeric_values(values: &[CellValue]) -> impl Iterator<Item = f64> + '_ {
    values.iter().filter_map(|v| match v {
        CellValue::Float(f) => Some(*f),
        CellValue::Int(i) => Some(*i as f64),
        CellValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    })
}

fn display_value(v: &CellValue) -> String {
    match v {
        CellValue::Empty => String::new(),
        CellValue::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        CellValue::Int(i) => i.to_string(),
        CellValue::Float(f) => {
            let mut buf = ryu::Buffer::new();
            buf.format(*f).to_string()
        }
        CellValue::String(s) => s.clone(),
        CellValue::Error(e) => e.to_string(),
        CellValue::Formula { cached_value, .. } => cached_value
            .as_deref()
            .map(display_value)
            .unwrap_or_default(),
    }
}

/// Excel's 1899-12-30 epoch serial, in fractional days.
fn excel_now_serial() -> f64 {
    const UNIX_TO_EXCEL_EPOCH_DAYS: f64 = 25_569.0;
    let now = chrono::Utc::now();
    now.timestamp() as f64 / 86_400.0 + now.timestamp_subsec_nanos() as f64 / 86_400e9
        + UNIX_TO_EXCEL_EPOCH_DAYS
}

/// Extract every single-cell and range reference an `Expr` touches,
/// expanded to individual `CellRef`s, for building dependency-graph
/// edges (spec §4.7 "Graph construction").
pub fn collect_references(expr: &Expr, current_sheet: &str) -> Vec<CellRef> {
    let mut out = Vec::new();
    collect_references_into(expr, current_sheet, &mut out);
    out
}

fn collect_references_into(expr: &Expr, current_sheet: &str, out: &mut Vec<CellRef>) {
    match expr {
        Expr::Literal(_) | Expr::Name(_) => {}
        Expr::Reference { sheet, coord } => {
            let sheet = sheet.0.clone().unwrap_or_else(|| current_sheet.to_string());
            out.push(CellRef::new(sheet, *coord));
        }
        Expr::Range(range_ref) => {
            let sheet = range_ref
                .sheet
                .0
                .clone()
                .unwrap_or_else(|| current_sheet.to_string());
            expand_range(&range_ref.range, &sheet, out);
        }
        Expr::UnaryMinus(inner) => collect_references_into(inner, current_sheet, out),
        Expr::Binary { left, right, .. } => {
            collect_references_into(left, current_sheet, out);
            collect_references_into(right, current_sheet, out);
        }
        Expr::FunctionCall { args, .. } => {
            for arg in args {
                collect_references_into(arg, current_sheet, out);
            }
        }
    }
}

fn expand_range(range: &Range, sheet: &str, out: &mut Vec<CellRef>) {
    for coord in range.iter_cells() {
        out.push(CellRef::new(sheet, coord));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::parser::parse_expression;
    use std::cell::RefCell;
    use std::collections::HashMap;

    struct FakeSource {
        sheet: String,
        values: RefCell<HashMap<(String, Coordinate), CellValue>>,
    }

    impl FakeSource {
        fn new() -> Self {
            Self {
                sheet: "Sheet1".to_string(),
                values: RefCell::new(HashMap::new()),
            }
        }

        fn set(&self, coord: Coordinate, v: CellValue) {
            self.values
                .borrow_mut()
                .insert((self.sheet.clone(), coord), v);
        }
    }

    impl CellSource for FakeSource {
        fn current_sheet(&self) -> &str {
            &self.sheet
        }

        fn value_at(&self, sheet: &str, coord: Coordinate) -> CellValue {
            self.values
                .borrow()
                .get(&(sheet.to_string(), coord))
                .cloned()
                .unwrap_or(CellValue::Empty)
        }
    }

    #[test]
    fn evaluates_arithmetic() {
        let src = FakeSource::new();
        let expr = parse_expression("1+2*3").unwrap();
        assert_eq!(evaluate(&expr, &src), Ok(CellValue::Float(7.0)));
    }

    #[test]
    fn divide_by_zero_yields_error_sentinel() {
        let src = FakeSource::new();
        let expr = parse_expression("1/0").unwrap();
        assert_eq!(evaluate(&expr, &src), Err("#DIV/0!"));
    }

    #[test]
    fn sum_over_range_dereferences_cells() {
        let src = FakeSource::new();
        src.set(Coordinate::new(1, 1), CellValue::Float(1.0));
        src.set(Coordinate::new(2, 1), CellValue::Float(2.0));
        src.set(Coordinate::new(3, 1), CellValue::Float(3.0));
        let expr = parse_expression("SUM(A1:A3)").unwrap();
        assert_eq!(evaluate(&expr, &src), Ok(CellValue::Float(6.0)));
    }

    #[test]
    fn if_branches_on_condition() {
        let src = FakeSource::new();
        let expr = parse_expression("IF(1,2,3)").unwrap();
        assert_eq!(evaluate(&expr, &src), Ok(CellValue::Float(2.0)));
    }

    #[test]
    fn unknown_function_yields_name_error() {
        let src = FakeSource::new();
        let expr = parse_expression("BOGUS(1)").unwrap();
        assert_eq!(evaluate(&expr, &src), Err("#NAME?"));
    }

    #[test]
    fn bare_name_yields_name_error() {
        let src = FakeSource::new();
        let expr = parse_expression("FOOBAR").unwrap();
        assert_eq!(evaluate(&expr, &src), Err("#NAME?"));
    }

    #[test]
    fn string_arithmetic_yields_value_error() {
        let src = FakeSource::new();
        src.set(Coordinate::new(1, 1), CellValue::String("x".to_string()));
        let expr = parse_expression("A1+1").unwrap();
        assert_eq!(evaluate(&expr, &src), Err("#VALUE!"));
    }

    #[test]
    fn collect_references_expands_ranges() {
        let expr = parse_expression("SUM(A1:A2)+B1").unwrap();
        let refs = collect_references(&expr, "Sheet1");
        assert_eq!(refs.len(), 3);
        assert!(refs.contains(&CellRef::new("Sheet1", Coordinate::new(1, 1))));
        assert!(refs.contains(&CellRef::new("Sheet1", Coordinate::new(2, 1))));
        assert!(refs.contains(&CellRef::new("Sheet1", Coordinate::new(1, 2))));
    }
}
