//! The cell store: a dense record arena plus a coordinate index (spec §3.4,
//! §4.3, §4.4).
//!
//! Grounded on the teacher's coordinate-keyed access pattern in
//! `src/ooxml/xlsx/cell.rs` and `src/sheet/types.rs`, generalised to hold
//! the packed `CellRecord` rather than an owned `CellValue` per cell.

use std::collections::HashMap;

use rayon::prelude::*;

use crate::cell::record::{encode_value, resolve_value, CellRecord, STYLE_OVERFLOW};
use crate::cell::CellValue;
use crate::coord::{Coordinate, Range};
use crate::error::{Error, Result};
use crate::pool::{ExtendedDataPool, StringPool};

/// Dense cell storage for one worksheet.
///
/// Records are appended to `records` and never reordered in place; removal
/// tombstones a slot (`CellRecord::EMPTY` with coordinate cleared) rather
/// than shifting the vector, so existing indices stay valid. `compact`
/// reclaims tombstoned slots when the caller wants to shrink memory.
pub struct CellStore {
    records: Vec<CellRecord>,
    index: HashMap<Coordinate, usize>,
    /// Style handles too wide for the record's inline 8-bit field (spec
    /// §3.2 `STYLE_OVERFLOW` sentinel), keyed by coordinate so `compact`
    /// doesn't have to renumber it.
    style_overflow: HashMap<Coordinate, u32>,
    /// Number of times `records` has reallocated to grow, tracked for
    /// `memory_stats` (SPEC_FULL §11 "memory pool statistics").
    chunks_grown: u64,
}

/// A point-in-time snapshot of this store's backing allocation, reported
/// in place of a literal fixed-block pool (SPEC_FULL §11, grounded on
/// `TXMemoryPool::PoolStats`'s shape).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub records_live: usize,
    pub records_capacity: usize,
    pub bytes_reserved: usize,
    pub chunks_grown: u64,
}

impl CellStore {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            index: HashMap::new(),
            style_overflow: HashMap::new(),
            chunks_grown: 0,
        }
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            records: Vec::with_capacity(cap),
            index: HashMap::with_capacity(cap),
            style_overflow: HashMap::new(),
            chunks_grown: 0,
        }
    }

    /// Snapshot of the record arena's current footprint (SPEC_FULL §11
    /// "memory pool statistics"). Read-only; never blocks a concurrent
    /// mutation of this store since a caller must already hold `&self`.
    pub fn memory_stats(&self) -> MemoryStats {
        MemoryStats {
            records_live: self.non_empty_count(),
            records_capacity: self.records.capacity(),
            bytes_reserved: self.records.capacity() * std::mem::size_of::<CellRecord>(),
            chunks_grown: self.chunks_grown,
        }
    }

    /// Number of tracked coordinates, including cells explicitly cleared to
    /// `Empty` but not yet removed.
    pub fn count(&self) -> usize {
        self.index.len()
    }

    /// Number of tracked coordinates whose record is not `Empty`.
    pub fn non_empty_count(&self) -> usize {
        self.index
            .values()
            .filter(|&&i| !self.records[i].is_empty())
            .count()
    }

    pub fn get(&self, coord: Coordinate) -> Option<&CellRecord> {
        self.index.get(&coord).map(|&i| &self.records[i])
    }

    pub fn get_mut(&mut self, coord: Coordinate) -> Option<&mut CellRecord> {
        match self.index.get(&coord) {
            Some(&i) => Some(&mut self.records[i]),
            None => None,
        }
    }

    /// Return the record at `coord`, inserting a fresh empty one if absent.
    pub fn get_or_create(&mut self, coord: Coordinate) -> &mut CellRecord {
        let idx = *self.index.entry(coord).or_insert_with(|| {
            let mut rec = CellRecord::EMPTY;
            rec.set_coordinate(coord);
            Self::push_tracked(&mut self.records, &mut self.chunks_grown, rec);
            self.records.len() - 1
        });
        &mut self.records[idx]
    }

    fn insert_record(&mut self, record: CellRecord) {
        let coord = record.coordinate();
        match self.index.get(&coord) {
            Some(&i) => self.records[i] = record,
            None => {
                self.index.insert(coord, self.records.len());
                Self::push_tracked(&mut self.records, &mut self.chunks_grown, record);
            }
        }
    }

    fn push_tracked(records: &mut Vec<CellRecord>, chunks_grown: &mut u64, record: CellRecord) {
        let before = records.capacity();
        records.push(record);
        if records.capacity() != before {
            *chunks_grown += 1;
        }
    }

    /// Set a single cell's value, interning strings/formulas as needed.
    pub fn set_value(
        &mut self,
        coord: Coordinate,
        value: &CellValue,
        strings: &StringPool,
        ext: &ExtendedDataPool,
    ) -> Result<()> {
        if !coord.is_valid() {
            return Err(Error::Argument(format!("coordinate out of range: {coord}")));
        }
        let record = encode_value(coord, value, strings, ext)?;
        self.insert_record(record);
        Ok(())
    }

    /// Resolve a cell's current value, or `CellValue::Empty` if untracked.
    pub fn value_at(&self, coord: Coordinate, strings: &StringPool, ext: &ExtendedDataPool) -> CellValue {
        match self.get(coord) {
            Some(rec) => resolve_value(rec, strings, ext),
            None => CellValue::Empty,
        }
    }

    /// Batch-set many cells. Value encoding (string interning, formula
    /// allocation) runs in parallel since the pools synchronise internally;
    /// insertion into this store's own index stays single-threaded (spec
    /// §4.3, §8 "100k-pair parallel batch write").
    pub fn set_values(
        &mut self,
        pairs: Vec<(Coordinate, CellValue)>,
        strings: &StringPool,
        ext: &ExtendedDataPool,
    ) -> Result<()> {
        for (coord, _) in &pairs {
            if !coord.is_valid() {
                return Err(Error::Argument(format!("coordinate out of range: {coord}")));
            }
        }
        let encoded: Vec<CellRecord> = pairs
            .into_par_iter()
            .map(|(coord, value)| encode_value(coord, &value, strings, ext))
            .collect::<Result<Vec<_>>>()?;
        for record in encoded {
            self.insert_record(record);
        }
        Ok(())
    }

    /// Set (or clear) the overflow style handle for a coordinate; only
    /// meaningful once the record's inline `style` byte reads
    /// `STYLE_OVERFLOW`.
    pub fn set_style_overflow(&mut self, coord: Coordinate, handle: u32) {
        if let Some(rec) = self.get_mut(coord) {
            rec.set_style_handle(None);
        }
        self.style_overflow.insert(coord, handle);
    }

    /// Resolve a cell's effective style handle, following the overflow
    /// side table when the inline field reads the sentinel.
    pub fn style_handle_at(&self, coord: Coordinate) -> Option<u32> {
        let rec = self.get(coord)?;
        match rec.style_handle() {
            Some(h) => Some(h as u32),
            None => self.style_overflow.get(&coord).copied(),
        }
    }

    /// Write a formula cell's freshly computed result into its existing
    /// extended-data slot, leaving the formula text and the slot itself
    /// untouched (spec §4.7 "calculateAllFormulas" / "recalculateDependents"
    /// writing results back through their sink). A no-op if `coord` isn't a
    /// tracked formula cell.
    pub fn set_formula_cached_value(&self, coord: Coordinate, value: CellValue, ext: &ExtendedDataPool) {
        if let Some(rec) = self.get(coord) {
            if let Some(offset) = rec.formula_ext_offset() {
                ext.with_mut(offset, |d| d.cached_value = Some(value));
            }
        }
    }

    pub fn remove(&mut self, coord: Coordinate, ext: &ExtendedDataPool) {
        if let Some(&i) = self.index.get(&coord) {
            if let Some(offset) = self.records[i].formula_ext_offset() {
                ext.release(offset);
            }
            self.records[i].clear();
            self.index.remove(&coord);
            self.style_overflow.remove(&coord);
        }
    }

    /// Remove every tracked cell within `range`, returning the count removed.
    pub fn remove_in_range(&mut self, range: Range, ext: &ExtendedDataPool) -> usize {
        let coords: Vec<Coordinate> = self
            .index
            .keys()
            .filter(|c| range.contains(**c))
            .copied()
            .collect();
        let n = coords.len();
        for c in coords {
            self.remove(c, ext);
        }
        n
    }

    /// The smallest range enclosing every non-empty cell, or
    /// `Range::INVALID` if the store has no non-empty cells (spec §4.4).
    pub fn used_range(&self) -> Range {
        let mut min_row = u32::MAX;
        let mut min_col = u32::MAX;
        let mut max_row = 0u32;
        let mut max_col = 0u32;
        let mut any = false;
        for (&coord, &i) in self.index.iter() {
            if self.records[i].is_empty() {
                continue;
            }
            any = true;
            min_row = min_row.min(coord.row);
            min_col = min_col.min(coord.col);
            max_row = max_row.max(coord.row);
            max_col = max_col.max(coord.col);
        }
        if !any {
            return Range::INVALID;
        }
        Range::new(Coordinate::new(min_row, min_col), Coordinate::new(max_row, max_col))
    }

    pub fn max_used_row(&self) -> u32 {
        self.used_range().end.row
    }

    pub fn max_used_column(&self) -> u32 {
        self.used_range().end.col
    }

    /// Apply `f` to every currently-tracked record in place (spec §4.13
    /// batch kernels build on top of this for SIMD-eligible slices).
    pub fn apply_in_place(&mut self, mut f: impl FnMut(&mut CellRecord)) {
        let records = &mut self.records;
        for &i in self.index.values() {
            f(&mut records[i]);
        }
    }

    /// Relocate or delete every live record per `f(coord)`: `Some(new)`
    /// moves the record to `new`, `None` deletes it (releasing any formula
    /// extended-data slot). Rebuilds the index in a single pass so the
    /// post-call state is internally consistent even under overlapping
    /// relocations (spec §4.4 `transform`).
    pub fn transform(&mut self, mut f: impl FnMut(Coordinate) -> Option<Coordinate>, ext: &ExtendedDataPool) {
        let mut new_records = Vec::with_capacity(self.records.len());
        let mut new_index = HashMap::with_capacity(self.index.len());
        let mut new_overflow = HashMap::new();
        for (&coord, &i) in self.index.iter() {
            match f(coord) {
                Some(new_coord) => {
                    let mut rec = self.records[i];
                    rec.set_coordinate(new_coord);
                    if let Some(&h) = self.style_overflow.get(&coord) {
                        new_overflow.insert(new_coord, h);
                    }
                    new_index.insert(new_coord, new_records.len());
                    new_records.push(rec);
                }
                None => {
                    if let Some(offset) = self.records[i].formula_ext_offset() {
                        ext.release(offset);
                    }
                }
            }
        }
        self.records = new_records;
        self.index = new_index;
        self.style_overflow = new_overflow;
    }

    /// Direct access to the dense record slice, e.g. for SIMD batch kernels
    /// that want contiguous memory (spec §4.13).
    pub fn records(&self) -> &[CellRecord] {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut [CellRecord] {
        &mut self.records
    }

    /// Rebuild the record vector dropping tombstones, renumbering the
    /// index. Invalidates any previously cached record offsets.
    pub fn compact(&mut self) {
        let mut new_records = Vec::with_capacity(self.index.len());
        let mut new_index = HashMap::with_capacity(self.index.len());
        let mut coords: Vec<Coordinate> = self.index.keys().copied().collect();
        coords.sort();
        for coord in coords {
            let i = self.index[&coord];
            new_index.insert(coord, new_records.len());
            new_records.push(self.records[i]);
        }
        self.records = new_records;
        self.index = new_index;
    }

}

impl Default for CellStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pools() -> (StringPool, ExtendedDataPool) {
        (StringPool::default(), ExtendedDataPool::new())
    }

    #[test]
    fn set_and_get_round_trips() {
        let (strings, ext) = pools();
        let mut store = CellStore::new();
        let coord = Coordinate::new(2, 3);
        store
            .set_value(coord, &CellValue::String("hi".into()), &strings, &ext)
            .unwrap();
        assert_eq!(store.value_at(coord, &strings, &ext), CellValue::String("hi".into()));
    }

    #[test]
    fn invalid_coordinate_rejected() {
        let (strings, ext) = pools();
        let mut store = CellStore::new();
        let err = store.set_value(Coordinate::new(0, 1), &CellValue::Int(1), &strings, &ext);
        assert!(err.is_err());
    }

    #[test]
    fn used_range_tracks_non_empty_only() {
        let (strings, ext) = pools();
        let mut store = CellStore::new();
        store
            .set_value(Coordinate::new(5, 5), &CellValue::Int(1), &strings, &ext)
            .unwrap();
        store
            .set_value(Coordinate::new(10, 2), &CellValue::Int(2), &strings, &ext)
            .unwrap();
        let range = store.used_range();
        assert_eq!(range.start, Coordinate::new(5, 2));
        assert_eq!(range.end, Coordinate::new(10, 5));
    }

    #[test]
    fn remove_clears_value_and_frees_formula() {
        let (strings, ext) = pools();
        let mut store = CellStore::new();
        let coord = Coordinate::new(1, 1);
        store
            .set_value(
                coord,
                &CellValue::Formula {
                    formula: "SUM(A1:A2)".into(),
                    cached_value: None,
                },
                &strings,
                &ext,
            )
            .unwrap();
        assert_eq!(ext.len(), 2);
        store.remove(coord, &ext);
        assert_eq!(store.value_at(coord, &strings, &ext), CellValue::Empty);
    }

    #[test]
    fn batch_set_matches_sequential() {
        let (strings, ext) = pools();
        let mut store = CellStore::new();
        let pairs: Vec<_> = (1..=1000u32)
            .map(|i| (Coordinate::new(i, 1), CellValue::Int(i as i64)))
            .collect();
        store.set_values(pairs, &strings, &ext).unwrap();
        assert_eq!(store.non_empty_count(), 1000);
        assert_eq!(store.value_at(Coordinate::new(500, 1), &strings, &ext), CellValue::Int(500));
    }

    #[test]
    fn transform_relocates_and_deletes() {
        let (strings, ext) = pools();
        let mut store = CellStore::new();
        store
            .set_value(Coordinate::new(3, 1), &CellValue::Int(42), &strings, &ext)
            .unwrap();
        store
            .set_value(Coordinate::new(1, 1), &CellValue::Int(1), &strings, &ext)
            .unwrap();
        store.transform(
            |c| {
                if c.row == 1 {
                    None
                } else {
                    Some(Coordinate::new(c.row + 5, c.col))
                }
            },
            &ext,
        );
        assert_eq!(store.value_at(Coordinate::new(1, 1), &strings, &ext), CellValue::Empty);
        assert_eq!(store.value_at(Coordinate::new(8, 1), &strings, &ext), CellValue::Int(42));
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn compact_drops_tombstones() {
        let (strings, ext) = pools();
        let mut store = CellStore::new();
        let coord = Coordinate::new(1, 1);
        store.set_value(coord, &CellValue::Int(1), &strings, &ext).unwrap();
        store.remove(coord, &ext);
        assert_eq!(store.records().len(), 1);
        store.compact();
        assert_eq!(store.records().len(), 0);
    }

    #[test]
    fn style_overflow_round_trips() {
        let (strings, ext) = pools();
        let mut store = CellStore::new();
        let coord = Coordinate::new(1, 1);
        store.set_value(coord, &CellValue::Int(1), &strings, &ext).unwrap();
        store.set_style_overflow(coord, 9000);
        assert_eq!(store.style_handle_at(coord), Some(9000));
        let _ = STYLE_OVERFLOW;
    }
}
