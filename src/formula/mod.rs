//! Formula parsing, dependency tracking and evaluation (spec §4.7).
//!
//! Mirrors `TXFormulaManager`'s external surface
//! (`examples/original_source/include/TinaXlsx/TXFormulaManager.hpp`):
//! `set_formula`/`calculate_all`/`recalc_dependents`/circular-reference
//! detection, but built as a thin coordinator over this crate's own
//! `graph`/`eval`/`parser` modules rather than owning cell storage
//! itself — callers supply a `CellSource` (typically a worksheet) to
//! read and a sink closure to write results back.

pub mod ast;
pub mod eval;
pub mod graph;
pub mod parser;
pub mod reference;

use std::collections::HashMap;

use crate::cell::CellValue;
use crate::coord::Coordinate;

pub use ast::Expr;
pub use eval::CellSource;
pub use graph::CellRef;

/// A parsed, tracked formula cell: its source text, its AST, and the
/// sheet it lives on (needed to resolve unqualified references when the
/// manager evaluates it out of its original calling context).
struct TrackedFormula {
    sheet: String,
    text: String,
    expr: Expr,
}

/// Coordinates formula parsing, dependency tracking and evaluation across
/// however many sheets a workbook has (spec §4.7).
#[derive(Default)]
pub struct FormulaManager {
    formulas: HashMap<CellRef, TrackedFormula>,
    graph: graph::DependencyGraph,
}

impl FormulaManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the formula at `cell` (spec §4.7 "set_formula").
    /// `text` excludes the leading `=`. Returns `false` on a syntax error,
    /// leaving any prior formula at `cell` untouched.
    pub fn set_formula(&mut self, sheet: &str, coord: Coordinate, text: &str) -> bool {
        let Some(expr) = parser::parse_expression(text) else {
            return false;
        };
        let cell = CellRef::new(sheet, coord);
        let deps = eval::collect_references(&expr, sheet);
        self.graph.set_formula(cell.clone(), deps);
        self.formulas.insert(
            cell,
            TrackedFormula {
                sheet: sheet.to_string(),
                text: text.to_string(),
                expr,
            },
        );
        true
    }

    /// Remove `cell`'s formula, if any (spec §4.7 "clear").
    pub fn clear_formula(&mut self, sheet: &str, coord: Coordinate) {
        let cell = CellRef::new(sheet, coord);
        self.graph.clear_formula(&cell);
        self.formulas.remove(&cell);
    }

    /// Relocate or drop every formula tracked on `sheet` per `f(coord)`,
    /// mirroring `CellStore::transform` for row/column insert and delete
    /// (spec §4.7, §8 "insert-rows shifting ... formulas"). `f` returning
    /// `None` drops the formula at that coordinate entirely.
    pub fn relocate(&mut self, sheet: &str, mut f: impl FnMut(Coordinate) -> Option<Coordinate>) {
        let affected: Vec<CellRef> = self
            .formulas
            .keys()
            .filter(|k| k.sheet == sheet)
            .cloned()
            .collect();
        for old in affected {
            let Some(tracked) = self.formulas.remove(&old) else { continue };
            self.graph.clear_formula(&old);
            match f(old.coord) {
                Some(new_coord) => {
                    let new_key = CellRef::new(sheet, new_coord);
                    let deps = eval::collect_references(&tracked.expr, sheet);
                    self.graph.set_formula(new_key.clone(), deps);
                    self.formulas.insert(new_key, tracked);
                }
                None => {}
            }
        }
    }

    /// Rewrite every tracked formula's home sheet from `old` to `new`
    /// (spec §4.15 sheet rename), preserving coordinates and dependency
    /// edges. Formulas on *other* sheets that reference `old` by name are
    /// left untouched; rewriting their formula text is out of scope.
    pub fn rename_sheet(&mut self, old: &str, new: &str) {
        let affected: Vec<CellRef> = self.formulas.keys().filter(|k| k.sheet == old).cloned().collect();
        for key in affected {
            let Some(mut tracked) = self.formulas.remove(&key) else { continue };
            self.graph.clear_formula(&key);
            tracked.sheet = new.to_string();
            let new_key = CellRef::new(new, key.coord);
            let deps = eval::collect_references(&tracked.expr, new);
            self.graph.set_formula(new_key.clone(), deps);
            self.formulas.insert(new_key, tracked);
        }
    }

    pub fn has_formula(&self, sheet: &str, coord: Coordinate) -> bool {
        self.formulas.contains_key(&CellRef::new(sheet, coord))
    }

    pub fn formula_text(&self, sheet: &str, coord: Coordinate) -> Option<&str> {
        self.formulas
            .get(&CellRef::new(sheet, coord))
            .map(|f| f.text.as_str())
    }

    /// Every single-cell/range reference `cell`'s formula reads directly
    /// (spec §4.7 "getDirectDependencies").
    pub fn direct_dependencies(&self, sheet: &str, coord: Coordinate) -> Vec<CellRef> {
        self.graph
            .dependencies_of(&CellRef::new(sheet, coord))
            .cloned()
            .collect()
    }

    /// Every formula cell that reads `cell` directly (spec §4.7
    /// "getDependents").
    pub fn direct_dependents(&self, sheet: &str, coord: Coordinate) -> Vec<CellRef> {
        self.graph
            .dependents_of(&CellRef::new(sheet, coord))
            .cloned()
            .collect()
    }

    /// `true` iff any formula cell participates in a dependency cycle
    /// (spec §4.7 "detectCircularReferences").
    pub fn has_circular_reference(&self) -> bool {
        self.graph.detect_cycle().is_some()
    }

    /// Evaluate every tracked formula in dependency order, writing each
    /// result back through `sink`. Stops and reports `#CIRCULAR!` for
    /// cells in a dependency cycle rather than evaluating them (spec
    /// §4.7 "calculateAllFormulas").
    pub fn calculate_all(
        &self,
        source: &dyn CellSource,
        mut sink: impl FnMut(&str, Coordinate, Result<CellValue, &'static str>),
    ) {
        match self.graph.topo_order() {
            Ok(order) => {
                for cell in order {
                    if let Some(formula) = self.formulas.get(&cell) {
                        let scoped = ScopedSource {
                            inner: source,
                            sheet: &formula.sheet,
                        };
                        let result = eval::evaluate(&formula.expr, &scoped);
                        sink(&cell.sheet, cell.coord, result);
                    }
                }
            }
            Err(cycle) => {
                for cell in &cycle {
                    if self.formulas.contains_key(cell) {
                        sink(&cell.sheet, cell.coord, Err("#CIRCULAR!"));
                    }
                }
            }
        }
    }

    /// Recalculate only `cell` and everything transitively dependent on
    /// it, in dependency order (spec §4.7 "recalculateDependents").
    pub fn recalc_dependents(
        &self,
        sheet: &str,
        coord: Coordinate,
        source: &dyn CellSource,
        mut sink: impl FnMut(&str, Coordinate, Result<CellValue, &'static str>),
    ) {
        let root = CellRef::new(sheet, coord);
        let affected = self.graph.reverse_reachable(&root);
        let order = match self.graph.topo_order() {
            Ok(order) => order,
            Err(cycle) => {
                for cell in &cycle {
                    if affected.contains(cell) && self.formulas.contains_key(cell) {
                        sink(&cell.sheet, cell.coord, Err("#CIRCULAR!"));
                    }
                }
                return;
            }
        };
        for cell in order {
            if cell == root || !affected.contains(&cell) {
                continue;
            }
            if let Some(formula) = self.formulas.get(&cell) {
                let scoped = ScopedSource {
                    inner: source,
                    sheet: &formula.sheet,
                };
                let result = eval::evaluate(&formula.expr, &scoped);
                sink(&cell.sheet, cell.coord, result);
            }
        }
    }

    pub fn clear(&mut self) {
        self.formulas.clear();
        self.graph = graph::DependencyGraph::new();
    }
}

/// Adapts a caller's `CellSource` (whose `current_sheet` may be wrong for
/// a formula being evaluated out of its usual calling context) to report
/// the formula's own home sheet.
struct ScopedSource<'a> {
    inner: &'a dyn CellSource,
    sheet: &'a str,
}

impl CellSource for ScopedSource<'_> {
    fn current_sheet(&self) -> &str {
        self.sheet
    }

    fn value_at(&self, sheet: &str, coord: Coordinate) -> CellValue {
        self.inner.value_at(sheet, coord)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap as StdHashMap;

    struct FakeSource {
        sheet: String,
        values: RefCell<StdHashMap<(String, Coordinate), CellValue>>,
    }

    impl FakeSource {
        fn new() -> Self {
            Self {
                sheet: "Sheet1".to_string(),
                values: RefCell::new(StdHashMap::new()),
            }
        }

        fn set(&self, coord: Coordinate, v: CellValue) {
            self.values.borrow_mut().insert((self.sheet.clone(), coord), v);
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
    fn rejects_malformed_formula() {
        let mut mgr = FormulaManager::new();
        assert!(!mgr.set_formula("Sheet1", Coordinate::new(1, 1), "1+"));
        assert!(!mgr.has_formula("Sheet1", Coordinate::new(1, 1)));
    }

    #[test]
    fn calculate_all_respects_dependency_order() {
        let src = FakeSource::new();
        src.set(Coordinate::new(1, 1), CellValue::Float(5.0));
        let mut mgr = FormulaManager::new();
        mgr.set_formula("Sheet1", Coordinate::new(2, 1), "A1*2");
        mgr.set_formula("Sheet1", Coordinate::new(3, 1), "A2+1");
        let mut results = Vec::new();
        mgr.calculate_all(&src, |sheet, coord, result| {
            results.push((sheet.to_string(), coord, result));
        });
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].2, Ok(CellValue::Float(10.0)));
        assert_eq!(results[1].2, Ok(CellValue::Float(11.0)));
    }

    #[test]
    fn circular_reference_reports_sentinel() {
        let src = FakeSource::new();
        let mut mgr = FormulaManager::new();
        mgr.set_formula("Sheet1", Coordinate::new(1, 1), "B1");
        mgr.set_formula("Sheet1", Coordinate::new(1, 2), "A1");
        assert!(mgr.has_circular_reference());
        let mut results = Vec::new();
        mgr.calculate_all(&src, |sheet, coord, result| {
            results.push((sheet.to_string(), coord, result));
        });
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, _, r)| *r == Err("#CIRCULAR!")));
    }

    #[test]
    fn recalc_dependents_skips_unaffected_cells() {
        let src = FakeSource::new();
        src.set(Coordinate::new(1, 1), CellValue::Float(1.0));
        src.set(Coordinate::new(9, 9), CellValue::Float(100.0));
        let mut mgr = FormulaManager::new();
        mgr.set_formula("Sheet1", Coordinate::new(2, 1), "A1+1");
        mgr.set_formula("Sheet1", Coordinate::new(5, 5), "I9*2");
        let mut results = Vec::new();
        mgr.recalc_dependents("Sheet1", Coordinate::new(1, 1), &src, |sheet, coord, result| {
            results.push((sheet.to_string(), coord, result));
        });
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].1, Coordinate::new(2, 1));
    }

    #[test]
    fn clear_formula_removes_tracking() {
        let mut mgr = FormulaManager::new();
        mgr.set_formula("Sheet1", Coordinate::new(1, 1), "1+1");
        mgr.clear_formula("Sheet1", Coordinate::new(1, 1));
        assert!(!mgr.has_formula("Sheet1", Coordinate::new(1, 1)));
    }
}
