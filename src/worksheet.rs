//! Per-sheet aggregate: cell store, row/column metadata, merged regions
//! and protection state for one worksheet (spec §3, §4.3-§4.6, §4.9).
//!
//! Carries no back-reference to its owning workbook (spec §9 "Cyclic
//! ownership"): formula parsing/evaluation is driven entirely by
//! `Workbook`, which implements `CellSource` itself and reaches into a
//! sheet's store directly. A worksheet on its own only knows how to hold
//! and shift its own cells, metadata, and merges.

use std::cell::RefCell;

use crate::cell::{CellStore, CellValue, MemoryStats};
use crate::coord::{ColIndex, Coordinate, Range, RowIndex};
use crate::error::Error;
use crate::grid::{MergeIndex, RowColManager};
use crate::pool::{ExtendedDataPool, StringPool};
use crate::protection::{ProtectionManager, ProtectionOptions};

/// Default font size (points) used by `auto_fit_column`/`auto_fit_row`
/// when the caller doesn't track per-cell font sizes (spec §4.5).
pub const DEFAULT_AUTO_FIT_FONT_SIZE: f64 = 11.0;
const AUTO_FIT_MIN_WIDTH: f64 = 2.0;
const AUTO_FIT_MAX_WIDTH: f64 = 80.0;

/// One worksheet: a name, its cell store, row/column metadata, merged
/// regions, and protection state.
pub struct Worksheet {
    name: String,
    store: CellStore,
    rowcol: RowColManager,
    merges: MergeIndex,
    protection: ProtectionManager,
    last_error: RefCell<Option<String>>,
}

impl Worksheet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            store: CellStore::new(),
            rowcol: RowColManager::new(),
            merges: MergeIndex::new(),
            protection: ProtectionManager::new(),
            last_error: RefCell::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Renaming is arbitrated by `Workbook` (duplicate-name check against
    /// its sibling sheets); this just applies the already-validated name.
    pub(crate) fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn store(&self) -> &CellStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut CellStore {
        &mut self.store
    }

    pub fn rowcol(&self) -> &RowColManager {
        &self.rowcol
    }

    pub fn rowcol_mut(&mut self) -> &mut RowColManager {
        &mut self.rowcol
    }

    pub fn merges(&self) -> &MergeIndex {
        &self.merges
    }

    pub fn merges_mut(&mut self) -> &mut MergeIndex {
        &mut self.merges
    }

    /// Disjoint mutable access to the store/rowcol/merges triple at once,
    /// for callers (the worksheet-XML loader) that need to populate all
    /// three from a single parse pass without three overlapping `&mut self`
    /// borrows.
    pub(crate) fn parts_mut(&mut self) -> (&mut CellStore, &mut RowColManager, &mut MergeIndex) {
        (&mut self.store, &mut self.rowcol, &mut self.merges)
    }

    /// Last recorded failure for this sheet, cleared at the start of every
    /// public operation and set on failure (SPEC_FULL §11 "last-error
    /// string").
    pub fn last_error(&self) -> Option<String> {
        self.last_error.borrow().clone()
    }

    fn clear_error(&self) {
        *self.last_error.borrow_mut() = None;
    }

    fn record_error(&self, err: &Error) {
        *self.last_error.borrow_mut() = Some(err.to_string());
    }

    // -- Cell values ------------------------------------------------

    pub fn get_value(&self, coord: Coordinate, strings: &StringPool, ext: &ExtendedDataPool) -> CellValue {
        self.clear_error();
        self.store.value_at(coord, strings, ext)
    }

    pub fn has_cell(&self, coord: Coordinate) -> bool {
        self.store.get(coord).is_some_and(|r| !r.is_empty())
    }

    pub fn set_value(&mut self, coord: Coordinate, value: &CellValue, strings: &StringPool, ext: &ExtendedDataPool) -> bool {
        self.clear_error();
        match self.store.set_value(coord, value, strings, ext) {
            Ok(()) => true,
            Err(e) => {
                self.record_error(&e);
                false
            }
        }
    }

    /// Batch-set many cells at once (spec §4.3, §8 "100k-pair parallel
    /// batch write").
    pub fn set_values(&mut self, pairs: Vec<(Coordinate, CellValue)>, strings: &StringPool, ext: &ExtendedDataPool) -> bool {
        self.clear_error();
        match self.store.set_values(pairs, strings, ext) {
            Ok(()) => true,
            Err(e) => {
                self.record_error(&e);
                false
            }
        }
    }

    pub fn remove_value(&mut self, coord: Coordinate, ext: &ExtendedDataPool) {
        self.clear_error();
        self.store.remove(coord, ext);
    }

    pub fn non_empty_count(&self) -> usize {
        self.store.non_empty_count()
    }

    pub fn used_range(&self) -> Range {
        self.store.used_range()
    }

    pub fn memory_stats(&self) -> MemoryStats {
        self.store.memory_stats()
    }

    // -- Row/column metadata ----------------------------------------

    pub fn row_height(&self, row: RowIndex) -> f64 {
        self.rowcol.row_height(row)
    }

    pub fn set_row_height(&mut self, row: RowIndex, height: f64) -> bool {
        self.clear_error();
        let ok = self.rowcol.set_row_height(row, height);
        if !ok {
            self.record_error(&Error::Argument(format!("invalid row height {height} for row {row}")));
        }
        ok
    }

    pub fn column_width(&self, col: ColIndex) -> f64 {
        self.rowcol.column_width(col)
    }

    pub fn set_column_width(&mut self, col: ColIndex, width: f64) -> bool {
        self.clear_error();
        let ok = self.rowcol.set_column_width(col, width);
        if !ok {
            self.record_error(&Error::Argument(format!("invalid column width {width} for column {col}")));
        }
        ok
    }

    pub fn is_row_hidden(&self, row: RowIndex) -> bool {
        self.rowcol.is_row_hidden(row)
    }

    pub fn set_row_hidden(&mut self, row: RowIndex, hidden: bool) -> bool {
        self.clear_error();
        let ok = self.rowcol.set_row_hidden(row, hidden);
        if !ok {
            self.record_error(&Error::Argument(format!("invalid row {row}")));
        }
        ok
    }

    pub fn is_column_hidden(&self, col: ColIndex) -> bool {
        self.rowcol.is_column_hidden(col)
    }

    pub fn set_column_hidden(&mut self, col: ColIndex, hidden: bool) -> bool {
        self.clear_error();
        let ok = self.rowcol.set_column_hidden(col, hidden);
        if !ok {
            self.record_error(&Error::Argument(format!("invalid column {col}")));
        }
        ok
    }

    pub fn auto_fit_column(&mut self, col: ColIndex, strings: &StringPool, ext: &ExtendedDataPool) -> bool {
        self.clear_error();
        let ok = self
            .rowcol
            .auto_fit_column(col, &self.store, strings, ext, DEFAULT_AUTO_FIT_FONT_SIZE, AUTO_FIT_MIN_WIDTH, AUTO_FIT_MAX_WIDTH);
        if !ok {
            self.record_error(&Error::Argument(format!("invalid column {col}")));
        }
        ok
    }

    pub fn auto_fit_row(&mut self, row: RowIndex, reference_col: ColIndex, strings: &StringPool, ext: &ExtendedDataPool) -> bool {
        self.clear_error();
        let ok = self
            .rowcol
            .auto_fit_row(row, reference_col, &self.store, strings, ext, DEFAULT_AUTO_FIT_FONT_SIZE);
        if !ok {
            self.record_error(&Error::Argument(format!("invalid row {row}")));
        }
        ok
    }

    // -- Structural edits ---------------------------------------------

    /// Insert `n` rows at `pos`, shifting cells, row/column metadata, and
    /// merged regions (spec §4.5, §8 "insert-rows shift law"). Formula
    /// relocation is `Workbook`'s job since `FormulaManager` lives there.
    pub fn insert_rows(&mut self, pos: RowIndex, n: u32, ext: &ExtendedDataPool) -> bool {
        self.clear_error();
        match self.rowcol.insert_rows(pos, n, &mut self.store, ext) {
            Ok(()) => {
                self.merges.transform(shift_rows_inserted(pos, n));
                true
            }
            Err(e) => {
                self.record_error(&e);
                false
            }
        }
    }

    pub fn delete_rows(&mut self, pos: RowIndex, n: u32, ext: &ExtendedDataPool) -> bool {
        self.clear_error();
        match self.rowcol.delete_rows(pos, n, &mut self.store, ext) {
            Ok(()) => {
                self.merges.transform(shift_rows_deleted(pos, n));
                true
            }
            Err(e) => {
                self.record_error(&e);
                false
            }
        }
    }

    pub fn insert_columns(&mut self, pos: ColIndex, n: u32, ext: &ExtendedDataPool) -> bool {
        self.clear_error();
        match self.rowcol.insert_columns(pos, n, &mut self.store, ext) {
            Ok(()) => {
                self.merges.transform(shift_cols_inserted(pos, n));
                true
            }
            Err(e) => {
                self.record_error(&e);
                false
            }
        }
    }

    pub fn delete_columns(&mut self, pos: ColIndex, n: u32, ext: &ExtendedDataPool) -> bool {
        self.clear_error();
        match self.rowcol.delete_columns(pos, n, &mut self.store, ext) {
            Ok(()) => {
                self.merges.transform(shift_cols_deleted(pos, n));
                true
            }
            Err(e) => {
                self.record_error(&e);
                false
            }
        }
    }

    // -- Merged regions -------------------------------------------------

    pub fn merge_cells(&mut self, region: Range) -> bool {
        self.clear_error();
        match self.merges.merge(region) {
            Ok(()) => true,
            Err(e) => {
                self.record_error(&e);
                false
            }
        }
    }

    pub fn unmerge_cell(&mut self, coord: Coordinate) -> bool {
        self.clear_error();
        self.merges.unmerge(coord)
    }

    pub fn unmerge_range(&mut self, range: Range) -> usize {
        self.clear_error();
        self.merges.unmerge_in(range)
    }

    pub fn is_merged(&self, coord: Coordinate) -> bool {
        self.merges.is_merged(coord)
    }

    pub fn merged_region(&self, coord: Coordinate) -> Option<Range> {
        self.merges.contains(coord).copied()
    }

    // -- Protection -------------------------------------------------

    pub fn is_protected(&self) -> bool {
        self.protection.is_protected()
    }

    pub fn protection_options(&self) -> ProtectionOptions {
        self.protection.options()
    }

    pub fn protect(&mut self, password: Option<&str>, options: ProtectionOptions) -> bool {
        self.clear_error();
        match self.protection.protect(password, options) {
            Ok(()) => true,
            Err(e) => {
                self.record_error(&e);
                false
            }
        }
    }

    pub fn unprotect(&mut self, password: Option<&str>) -> bool {
        self.clear_error();
        match self.protection.unprotect(password) {
            Ok(()) => true,
            Err(e) => {
                self.record_error(&e);
                false
            }
        }
    }

    pub fn is_operation_allowed(&self, op: ProtectionOptions) -> bool {
        self.protection.is_operation_allowed(op)
    }

    pub fn set_cell_locked(&mut self, coord: Coordinate, locked: bool) -> bool {
        self.clear_error();
        self.protection.set_cell_locked(&mut self.store, coord, locked)
    }

    pub fn is_cell_editable(&self, coord: Coordinate) -> bool {
        self.protection.is_cell_editable(&self.store, coord)
    }
}

/// Shift closures matching `RowColManager::insert_rows`/`delete_rows`/
/// `insert_columns`/`delete_columns`'s own shapes exactly, so a merged
/// region's corners move in lockstep with the cells inside it. Reused by
/// `Workbook` to relocate tracked formulas with the identical shape.
pub(crate) fn shift_rows_inserted(pos: RowIndex, n: u32) -> impl FnMut(Coordinate) -> Option<Coordinate> {
    move |c| {
        if c.row >= pos {
            let new_row = c.row + n;
            if new_row > crate::coord::MAX_ROW {
                None
            } else {
                Some(Coordinate::new(new_row, c.col))
            }
        } else {
            Some(c)
        }
    }
}

pub(crate) fn shift_rows_deleted(pos: RowIndex, n: u32) -> impl FnMut(Coordinate) -> Option<Coordinate> {
    let end = pos + n;
    move |c| {
        if c.row < pos {
            Some(c)
        } else if c.row < end {
            None
        } else {
            Some(Coordinate::new(c.row - n, c.col))
        }
    }
}

pub(crate) fn shift_cols_inserted(pos: ColIndex, n: u32) -> impl FnMut(Coordinate) -> Option<Coordinate> {
    move |c| {
        if c.col >= pos {
            let new_col = c.col + n;
            if new_col > crate::coord::MAX_COL {
                None
            } else {
                Some(Coordinate::new(c.row, new_col))
            }
        } else {
            Some(c)
        }
    }
}

pub(crate) fn shift_cols_deleted(pos: ColIndex, n: u32) -> impl FnMut(Coordinate) -> Option<Coordinate> {
    let end = pos + n;
    move |c| {
        if c.col < pos {
            Some(c)
        } else if c.col < end {
            None
        } else {
            Some(Coordinate::new(c.row, c.col - n))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pools() -> (StringPool, ExtendedDataPool) {
        (StringPool::default(), ExtendedDataPool::new())
    }

    #[test]
    fn set_and_get_round_trip_and_has_cell() {
        let (strings, ext) = pools();
        let mut sheet = Worksheet::new("S");
        let coord = Coordinate::new(1, 1);
        assert!(!sheet.has_cell(coord));
        assert!(sheet.set_value(coord, &CellValue::from("hi"), &strings, &ext));
        assert!(sheet.has_cell(coord));
        assert_eq!(sheet.get_value(coord, &strings, &ext), CellValue::from("hi"));
        assert!(sheet.last_error().is_none());
    }

    #[test]
    fn invalid_coordinate_records_last_error() {
        let (strings, ext) = pools();
        let mut sheet = Worksheet::new("S");
        assert!(!sheet.set_value(Coordinate::new(0, 1), &CellValue::Int(1), &strings, &ext));
        assert!(sheet.last_error().is_some());
    }

    #[test]
    fn merge_and_unmerge() {
        let (strings, ext) = pools();
        let mut sheet = Worksheet::new("S");
        sheet.set_value(Coordinate::new(1, 1), &CellValue::from("title"), &strings, &ext);
        assert!(sheet.merge_cells(Range::parse_a1("A1:C1").unwrap()));
        assert!(sheet.is_merged(Coordinate::new(1, 1)));
        assert!(sheet.is_merged(Coordinate::new(1, 2)));
        assert!(sheet.unmerge_cell(Coordinate::new(1, 2)));
        assert!(!sheet.is_merged(Coordinate::new(1, 1)));
        assert_eq!(sheet.get_value(Coordinate::new(1, 1), &strings, &ext), CellValue::from("title"));
        assert_eq!(sheet.merges().len(), 0);
    }

    #[test]
    fn insert_rows_shifts_cells_heights_and_merges() {
        let (strings, ext) = pools();
        let mut sheet = Worksheet::new("S");
        sheet.set_value(Coordinate::new(1, 1), &CellValue::from("X"), &strings, &ext);
        sheet.set_value(Coordinate::new(3, 1), &CellValue::from("Y"), &strings, &ext);
        sheet.merge_cells(Range::parse_a1("A5:B5").unwrap());
        sheet.set_row_height(3, 40.0);
        assert!(sheet.insert_rows(2, 1, &ext));
        assert_eq!(sheet.get_value(Coordinate::new(1, 1), &strings, &ext), CellValue::from("X"));
        assert_eq!(sheet.get_value(Coordinate::new(4, 1), &strings, &ext), CellValue::from("Y"));
        assert_eq!(sheet.row_height(4), 40.0);
        assert!(sheet.is_merged(Coordinate::new(6, 1)));
        assert!(!sheet.is_merged(Coordinate::new(5, 1)));
    }

    #[test]
    fn parallel_batch_write_preserves_all_values() {
        let (strings, ext) = pools();
        let mut sheet = Worksheet::new("S");
        let pairs: Vec<_> = (1..=100_000u32)
            .map(|i| (Coordinate::new(i, 1), CellValue::Int(i as i64)))
            .collect();
        assert!(sheet.set_values(pairs, &strings, &ext));
        assert_eq!(sheet.non_empty_count(), 100_000);
        for i in [1u32, 50_000, 100_000] {
            assert_eq!(sheet.get_value(Coordinate::new(i, 1), &strings, &ext), CellValue::Int(i as i64));
        }
    }

    #[test]
    fn protection_blocks_editing_locked_cells() {
        let mut sheet = Worksheet::new("S");
        let coord = Coordinate::new(1, 1);
        assert!(sheet.protect(None, ProtectionOptions::default()));
        assert!(!sheet.is_cell_editable(coord));
        assert!(sheet.set_cell_locked(coord, false));
        assert!(sheet.is_cell_editable(coord));
        assert!(!sheet.protect(Some("x"), ProtectionOptions::default()));
        assert!(sheet.unprotect(None));
        assert!(sheet.protect(Some("x"), ProtectionOptions::default()));
    }
}
