//! Extended-data pool for per-cell side state (spec §3.3, §4.2).
//!
//! Grounded on `TXExtendedDataPool` in
//! `examples/original_source/include/TinaXlsx/TXCompactCell.hpp`: a slot
//! vector with a free-list stack of released indices, guarded by a mutex.

use parking_lot::Mutex;

use crate::cell::CellValue;

/// Per-cell side data too large to fit inline in a `CellRecord`: an
/// attached formula, a custom number format override, or a style handle
/// that overflowed the record's 8-bit inline style field.
#[derive(Debug, Clone, Default)]
pub struct ExtendedData {
    /// Formula text (without the leading `=`), if this cell is a formula cell.
    pub formula: Option<String>,
    /// The formula's last computed result, written by
    /// `FormulaManager::calculate_all`/`recalc_dependents`; `None` until the
    /// first calculation (spec §4.7, §4.15 "cached value").
    pub cached_value: Option<CellValue>,
    /// Custom number-format string (e.g. `"#,##0.00"`), if set.
    pub number_format: Option<String>,
    /// Full-width style handle, used when the style catalogue has grown
    /// past the 254 values that fit in `CellRecord::style` directly.
    pub style_handle: u32,
}

struct Inner {
    slots: Vec<ExtendedData>,
    free_list: Vec<u32>,
}

/// Per-workbook extended-data pool. Slot 0 is reserved for "no extension".
pub struct ExtendedDataPool {
    inner: Mutex<Inner>,
}

impl ExtendedDataPool {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                slots: vec![ExtendedData::default()],
                free_list: Vec::new(),
            }),
        }
    }

    /// Allocate a slot, returning its index. Freed slots are reused.
    pub fn allocate(&self) -> u32 {
        let mut inner = self.inner.lock();
        if let Some(idx) = inner.free_list.pop() {
            inner.slots[idx as usize] = ExtendedData::default();
            idx
        } else {
            let idx = inner.slots.len() as u32;
            inner.slots.push(ExtendedData::default());
            idx
        }
    }

    /// Release a slot back to the free list. The caller must have already
    /// cleared the offset from any `CellRecord` referencing it; accessing a
    /// released offset afterwards is a logic error (spec §4.2).
    pub fn release(&self, offset: u32) {
        if offset == 0 {
            return;
        }
        let mut inner = self.inner.lock();
        inner.slots[offset as usize] = ExtendedData::default();
        inner.free_list.push(offset);
    }

    pub fn get(&self, offset: u32) -> ExtendedData {
        self.inner.lock().slots[offset as usize].clone()
    }

    pub fn set(&self, offset: u32, data: ExtendedData) {
        if offset == 0 {
            return;
        }
        self.inner.lock().slots[offset as usize] = data;
    }

    pub fn with_mut<R>(&self, offset: u32, f: impl FnOnce(&mut ExtendedData) -> R) -> R {
        let mut inner = self.inner.lock();
        f(&mut inner.slots[offset as usize])
    }

    pub fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }
}

impl Default for ExtendedDataPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_release_reuses_slots() {
        let pool = ExtendedDataPool::new();
        let a = pool.allocate();
        assert_ne!(a, 0);
        pool.set(
            a,
            ExtendedData {
                formula: Some("SUM(A1:A3)".to_string()),
                ..Default::default()
            },
        );
        assert_eq!(pool.get(a).formula.as_deref(), Some("SUM(A1:A3)"));
        pool.release(a);
        let b = pool.allocate();
        assert_eq!(a, b);
        assert_eq!(pool.get(b).formula, None);
    }

    #[test]
    fn slot_zero_is_reserved() {
        let pool = ExtendedDataPool::new();
        assert_eq!(pool.get(0).formula, None);
        assert_eq!(pool.len(), 1);
    }
}
