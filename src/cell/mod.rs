//! The cell layer: packed records, per-workbook pools, and the cell store
//! (spec §3.2, §3.4, §4.3, §4.4).

pub mod record;
pub mod store;

pub use record::{CellFlags, CellRecord, CellType, CellValue, FormulaErrorCode, STYLE_OVERFLOW};
pub use store::{CellStore, MemoryStats};
