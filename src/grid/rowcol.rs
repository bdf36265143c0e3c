//! Row/column structural metadata: heights, widths, hidden flags, and
//! insert/delete shifting (spec §4.5).

use std::collections::HashMap;

use crate::cell::CellStore;
use crate::coord::{is_valid_col, is_valid_row, ColIndex, RowIndex, MAX_COL, MAX_ROW};
use crate::error::{Error, Result};
use crate::pool::ExtendedDataPool;

pub const DEFAULT_ROW_HEIGHT: f64 = 15.0;
pub const DEFAULT_COLUMN_WIDTH: f64 = 8.43;
const MAX_ROW_HEIGHT: f64 = 409.0;
const MAX_COLUMN_WIDTH: f64 = 255.0;
const MIN_AUTO_FIT_WIDTH: f64 = 1.0;

/// Sparse row/column metadata for one worksheet. Entries are only stored
/// for rows/columns that deviate from the default (spec §3.5, "sparse
/// maps").
#[derive(Debug, Default)]
pub struct RowColManager {
    row_heights: HashMap<RowIndex, f64>,
    row_hidden: HashMap<RowIndex, bool>,
    col_widths: HashMap<ColIndex, f64>,
    col_hidden: HashMap<ColIndex, bool>,
}

impl RowColManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row_height(&self, row: RowIndex) -> f64 {
        self.row_heights.get(&row).copied().unwrap_or(DEFAULT_ROW_HEIGHT)
    }

    pub fn set_row_height(&mut self, row: RowIndex, height: f64) -> bool {
        if !is_valid_row(row) || !(0.0..=MAX_ROW_HEIGHT).contains(&height) {
            return false;
        }
        self.row_heights.insert(row, height);
        true
    }

    pub fn column_width(&self, col: ColIndex) -> f64 {
        self.col_widths.get(&col).copied().unwrap_or(DEFAULT_COLUMN_WIDTH)
    }

    pub fn set_column_width(&mut self, col: ColIndex, width: f64) -> bool {
        if !is_valid_col(col) || !(0.0..=MAX_COLUMN_WIDTH).contains(&width) {
            return false;
        }
        self.col_widths.insert(col, width);
        true
    }

    pub fn is_row_hidden(&self, row: RowIndex) -> bool {
        self.row_hidden.get(&row).copied().unwrap_or(false)
    }

    pub fn set_row_hidden(&mut self, row: RowIndex, hidden: bool) -> bool {
        if !is_valid_row(row) {
            return false;
        }
        self.row_hidden.insert(row, hidden);
        true
    }

    pub fn is_column_hidden(&self, col: ColIndex) -> bool {
        self.col_hidden.get(&col).copied().unwrap_or(false)
    }

    pub fn set_column_hidden(&mut self, col: ColIndex, hidden: bool) -> bool {
        if !is_valid_col(col) {
            return false;
        }
        self.col_hidden.insert(col, hidden);
        true
    }

    /// Rows whose height was explicitly set away from the default, for
    /// worksheet XML generation's `<row ht="..." customHeight="1">`.
    pub fn custom_row_heights(&self) -> impl Iterator<Item = (RowIndex, f64)> + '_ {
        self.row_heights.iter().map(|(&r, &h)| (r, h))
    }

    /// Rows explicitly marked hidden, regardless of value.
    pub fn hidden_rows(&self) -> impl Iterator<Item = RowIndex> + '_ {
        self.row_hidden.iter().filter(|&(_, &hidden)| hidden).map(|(&r, _)| r)
    }

    /// Columns whose width was explicitly set away from the default, for
    /// worksheet XML generation's `<col min="" max="" width=""/>`.
    pub fn custom_column_widths(&self) -> impl Iterator<Item = (ColIndex, f64)> + '_ {
        self.col_widths.iter().map(|(&c, &w)| (c, w))
    }

    /// Columns explicitly marked hidden, regardless of width.
    pub fn hidden_columns(&self) -> impl Iterator<Item = ColIndex> + '_ {
        self.col_hidden.iter().filter(|&(_, &hidden)| hidden).map(|(&c, _)| c)
    }

    /// Insert `n` rows at `pos`, shifting cells (via `store.transform`) and
    /// every row-metadata entry at or after `pos` down by `n` (spec §4.5).
    pub fn insert_rows(&mut self, pos: RowIndex, n: u32, store: &mut CellStore, ext: &ExtendedDataPool) -> Result<()> {
        if !is_valid_row(pos) || n == 0 {
            return Err(Error::Argument(format!("invalid row insertion at {pos}")));
        }
        store.transform(
            move |c| {
                if c.row >= pos {
                    let new_row = c.row + n;
                    if new_row > MAX_ROW {
                        None
                    } else {
                        Some(crate::coord::Coordinate::new(new_row, c.col))
                    }
                } else {
                    Some(c)
                }
            },
            ext,
        );
        shift_map_up(&mut self.row_heights, pos, n, MAX_ROW);
        shift_map_up(&mut self.row_hidden, pos, n, MAX_ROW);
        Ok(())
    }

    /// Delete `n` rows starting at `pos`: drops any cell inside the deleted
    /// band, shifts cells below it up by `n`, and renumbers row metadata.
    pub fn delete_rows(&mut self, pos: RowIndex, n: u32, store: &mut CellStore, ext: &ExtendedDataPool) -> Result<()> {
        if !is_valid_row(pos) || n == 0 {
            return Err(Error::Argument(format!("invalid row deletion at {pos}")));
        }
        let end = pos + n;
        store.transform(
            move |c| {
                if c.row < pos {
                    Some(c)
                } else if c.row < end {
                    None
                } else {
                    Some(crate::coord::Coordinate::new(c.row - n, c.col))
                }
            },
            ext,
        );
        shift_map_down(&mut self.row_heights, pos, n);
        shift_map_down(&mut self.row_hidden, pos, n);
        Ok(())
    }

    /// Insert `n` columns at `pos`; symmetric to `insert_rows`.
    pub fn insert_columns(&mut self, pos: ColIndex, n: u32, store: &mut CellStore, ext: &ExtendedDataPool) -> Result<()> {
        if !is_valid_col(pos) || n == 0 {
            return Err(Error::Argument(format!("invalid column insertion at {pos}")));
        }
        store.transform(
            move |c| {
                if c.col >= pos {
                    let new_col = c.col + n;
                    if new_col > MAX_COL {
                        None
                    } else {
                        Some(crate::coord::Coordinate::new(c.row, new_col))
                    }
                } else {
                    Some(c)
                }
            },
            ext,
        );
        shift_map_up(&mut self.col_widths, pos, n, MAX_COL);
        shift_map_up(&mut self.col_hidden, pos, n, MAX_COL);
        Ok(())
    }

    /// Delete `n` columns starting at `pos`; symmetric to `delete_rows`.
    pub fn delete_columns(&mut self, pos: ColIndex, n: u32, store: &mut CellStore, ext: &ExtendedDataPool) -> Result<()> {
        if !is_valid_col(pos) || n == 0 {
            return Err(Error::Argument(format!("invalid column deletion at {pos}")));
        }
        let end = pos + n;
        store.transform(
            move |c| {
                if c.col < pos {
                    Some(c)
                } else if c.col < end {
                    None
                } else {
                    Some(crate::coord::Coordinate::new(c.row, c.col - n))
                }
            },
            ext,
        );
        shift_map_down(&mut self.col_widths, pos, n);
        shift_map_down(&mut self.col_hidden, pos, n);
        Ok(())
    }
}

/// Move every entry at or after `pos` up by `n`, dropping entries pushed
/// past `limit`. Iterates from the highest key down so a single backing
/// map can be mutated in place without overwriting not-yet-moved entries.
fn shift_map_up<T: Copy>(map: &mut HashMap<u32, T>, pos: u32, n: u32, limit: u32) {
    let mut keys: Vec<u32> = map.keys().filter(|&&k| k >= pos).copied().collect();
    keys.sort_unstable_by(|a, b| b.cmp(a));
    for k in keys {
        let v = map.remove(&k).unwrap();
        let new_k = k + n;
        if new_k <= limit {
            map.insert(new_k, v);
        }
    }
}

/// Drop entries in `[pos, pos+n)` and move every entry at or after
/// `pos + n` down by `n`.
fn shift_map_down<T: Copy>(map: &mut HashMap<u32, T>, pos: u32, n: u32) {
    let end = pos + n;
    let mut keys: Vec<u32> = map.keys().copied().collect();
    keys.sort_unstable();
    for k in keys {
        if k < pos {
            continue;
        }
        let v = map.remove(&k).unwrap();
        if k < end {
            continue;
        }
        map.insert(k - n, v);
    }
}

/// Approximate display width of `text` at `font_size` points, mirroring
/// the plain heuristic in spec §4.5: `char_count * font_size * 0.6 / 7`.
fn approx_display_width(text: &str, font_size: f64) -> f64 {
    text.chars().count() as f64 * font_size * 0.6 / 7.0
}

impl RowColManager {
    /// Auto-fit `col`'s width to the widest rendered value currently in
    /// the store, clamped to `[min_width, max_width]`.
    pub fn auto_fit_column(
        &mut self,
        col: ColIndex,
        store: &CellStore,
        strings: &crate::pool::StringPool,
        ext: &ExtendedDataPool,
        font_size: f64,
        min_width: f64,
        max_width: f64,
    ) -> bool {
        if !is_valid_col(col) {
            return false;
        }
        let used = store.used_range();
        if !used.is_valid() {
            return self.set_column_width(col, min_width);
        }
        let mut widest = min_width;
        for row in used.start.row..=used.end.row {
            let coord = crate::coord::Coordinate::new(row, col);
            let value = store.value_at(coord, strings, ext);
            let text = match &value {
                crate::cell::CellValue::String(s) => s.clone(),
                crate::cell::CellValue::Int(i) => i.to_string(),
                crate::cell::CellValue::Float(f) => f.to_string(),
                crate::cell::CellValue::Bool(b) => b.to_string(),
                _ => continue,
            };
            widest = widest.max(approx_display_width(&text, font_size));
        }
        self.set_column_width(col, widest.clamp(min_width, max_width))
    }

    /// Auto-fit `row`'s height from its widest cell's estimated line
    /// count, derived from text width over the row's reference column
    /// width (spec §4.5, "row auto-fit is analogous").
    pub fn auto_fit_row(
        &mut self,
        row: RowIndex,
        reference_col: ColIndex,
        store: &CellStore,
        strings: &crate::pool::StringPool,
        ext: &ExtendedDataPool,
        font_size: f64,
    ) -> bool {
        if !is_valid_row(row) {
            return false;
        }
        let used = store.used_range();
        if !used.is_valid() {
            return self.set_row_height(row, DEFAULT_ROW_HEIGHT);
        }
        let col_width = self.column_width(reference_col).max(MIN_AUTO_FIT_WIDTH);
        let mut max_lines = 1u32;
        for col in used.start.col..=used.end.col {
            let coord = crate::coord::Coordinate::new(row, col);
            let value = store.value_at(coord, strings, ext);
            if let crate::cell::CellValue::String(s) = value {
                let width = approx_display_width(&s, font_size);
                let lines = (width / col_width).ceil().max(1.0) as u32;
                max_lines = max_lines.max(lines);
            }
        }
        let height = DEFAULT_ROW_HEIGHT * max_lines as f64;
        self.set_row_height(row, height.min(MAX_ROW_HEIGHT))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::CellValue;
    use crate::coord::Coordinate;
    use crate::pool::StringPool;

    #[test]
    fn defaults_apply_until_overridden() {
        let mgr = RowColManager::new();
        assert_eq!(mgr.row_height(1), DEFAULT_ROW_HEIGHT);
        assert_eq!(mgr.column_width(1), DEFAULT_COLUMN_WIDTH);
    }

    #[test]
    fn set_row_height_rejects_out_of_range() {
        let mut mgr = RowColManager::new();
        assert!(!mgr.set_row_height(1, 500.0));
        assert!(mgr.set_row_height(1, 40.0));
        assert_eq!(mgr.row_height(1), 40.0);
    }

    #[test]
    fn insert_rows_shifts_cells_and_heights() {
        let strings = StringPool::default();
        let ext = ExtendedDataPool::new();
        let mut store = CellStore::new();
        let mut mgr = RowColManager::new();
        store
            .set_value(Coordinate::new(1, 1), &CellValue::from("X"), &strings, &ext)
            .unwrap();
        store
            .set_value(Coordinate::new(4, 1), &CellValue::from("Y"), &strings, &ext)
            .unwrap();
        mgr.set_row_height(4, 40.0);
        mgr.insert_rows(2, 3, &mut store, &ext).unwrap();
        assert_eq!(store.value_at(Coordinate::new(1, 1), &strings, &ext), CellValue::from("X"));
        assert_eq!(store.value_at(Coordinate::new(7, 1), &strings, &ext), CellValue::from("Y"));
        assert_eq!(mgr.row_height(7), 40.0);
        assert_eq!(mgr.row_height(3), DEFAULT_ROW_HEIGHT);
    }

    #[test]
    fn delete_rows_drops_cells_in_band() {
        let strings = StringPool::default();
        let ext = ExtendedDataPool::new();
        let mut store = CellStore::new();
        let mut mgr = RowColManager::new();
        store
            .set_value(Coordinate::new(3, 1), &CellValue::Int(1), &strings, &ext)
            .unwrap();
        store
            .set_value(Coordinate::new(10, 1), &CellValue::Int(2), &strings, &ext)
            .unwrap();
        mgr.delete_rows(2, 5, &mut store, &ext).unwrap();
        assert_eq!(store.value_at(Coordinate::new(3, 1), &strings, &ext), CellValue::Empty);
        assert_eq!(store.value_at(Coordinate::new(5, 1), &strings, &ext), CellValue::Int(2));
    }
}
