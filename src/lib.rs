//! xlcore - a high-performance read/write engine for the XLSX (OOXML
//! SpreadsheetML) file format.
//!
//! xlcore is built for large, mostly-numeric workbooks: a packed 16-byte
//! cell record, SIMD-friendly batch kernels, and a worker-pool-driven
//! ZIP/XML pipeline keep per-cell overhead low even at millions of cells.
//!
//! # Example - build and save a workbook
//!
//! ```no_run
//! use xlcore::{CellValue, Coordinate, Workbook};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut wb = Workbook::new();
//! wb.add_sheet("Sheet1");
//! wb.set_value("Sheet1", Coordinate::new(1, 1), &CellValue::from("hello"));
//! wb.set_formula("Sheet1", Coordinate::new(1, 2), "LEN(A1)");
//! wb.calculate_all();
//! wb.save("out.xlsx");
//! # Ok(())
//! # }
//! ```
//!
//! # Example - load and read back
//!
//! ```no_run
//! use xlcore::{Coordinate, Workbook};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let wb = Workbook::load("out.xlsx")?;
//! for name in wb.sheet_names() {
//!     let sheet = wb.sheet_by_name(&name).unwrap();
//!     println!("{name}: {} cells, used range {}", sheet.non_empty_count(), sheet.used_range().to_a1());
//! }
//! # Ok(())
//! # }
//! ```

/// Workbook-wide configuration: memory ceiling, deflate level, thread pool
/// sizing, and the iterative/auto-calculate formula settings.
pub mod config;
/// The crate-wide error type and `Result` alias.
pub mod error;

/// The packed cell record, the public `CellValue` enum, and the dense
/// per-worksheet cell store.
pub mod cell;
/// Coordinates, A1 addresses, and rectangular ranges.
pub mod coord;
/// Formula parsing, the dependency graph, and evaluation.
pub mod formula;
/// Row/column metadata and merged-region tracking.
pub mod grid;
/// The fixed OOXML part table and the ZIP codec backing it.
pub mod package;
/// The workbook-scoped string pool and extended-data pool.
pub mod pool;
/// Sheet/workbook protection (structural, not cryptographic-strength).
pub mod protection;
/// The resource-budgeted task scheduler layered over the thread pool.
pub mod scheduler;
/// Scalar-reference and feature-gated vector kernels for batch cell
/// extraction and numeric reduction.
pub mod simd;
/// Font/fill/border/number-format styling and the style catalogue.
pub mod style;
/// The priority work-stealing thread pool underlying batch operations.
pub mod workpool;
/// XML scanning (read) and node building (write) for worksheet and
/// package parts.
pub mod xml;

/// One worksheet: cell store, row/column metadata, merges and protection.
pub mod worksheet;
/// The workbook orchestrator: sheet management, formula evaluation, and
/// save/load against the OOXML package.
pub mod workbook;

pub use cell::{CellValue, MemoryStats};
pub use config::{WorkbookConfig, WorkbookConfigBuilder};
pub use coord::{ColIndex, Coordinate, Range, RowIndex};
pub use error::{Error, Result};
pub use protection::ProtectionOptions;
pub use workbook::{Workbook, WorkbookMemoryStats};
pub use worksheet::Worksheet;
