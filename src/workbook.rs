//! The workbook orchestrator: sheet management, cross-sheet formula
//! evaluation, and save/load against the OOXML package (spec §4.15, §5,
//! §6, §7).
//!
//! `Worksheet` carries no back-reference to its owner (spec §9 "Cyclic
//! ownership"), so `Workbook` drives every cross-sheet operation itself:
//! it implements `CellSource` directly and reaches into a sheet's store
//! through a plain index, never a second owning handle.

use std::cell::RefCell;
use std::path::Path;
use std::sync::Arc;

use crate::cell::CellValue;
use crate::coord::{ColIndex, Coordinate, Range, RowIndex};
use crate::config::WorkbookConfig;
use crate::error::{Error, Result};
use crate::formula::{CellSource, FormulaManager};
use crate::package::parts::{
    content_types_xml, package_rels_xml, parse_styles_xml, parse_workbook_xml, parse_worksheet_xml, shared_strings_xml,
    styles_xml, workbook_rels_xml, workbook_xml, worksheet_xml, WorksheetXmlInput,
};
use crate::package::{ZipReader, ZipWriterHandle};
use crate::pool::{ExtendedDataPool, StringPool};
use crate::protection::ProtectionOptions;
use crate::style::StyleCatalogue;
use crate::workpool::ThreadPool;
use crate::worksheet::{shift_cols_deleted, shift_cols_inserted, shift_rows_deleted, shift_rows_inserted, Worksheet};
use crate::xml::reader::{scan_shared_strings, SharedStringsVisitor};

/// Aggregate memory usage across a workbook's arenas (SPEC_FULL §11
/// "memory pool statistics").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkbookMemoryStats {
    pub cell_records_live: usize,
    pub cell_bytes_reserved: usize,
    pub string_bytes_used: usize,
    pub extended_data_slots: usize,
}

/// A spreadsheet document: its sheets, shared pools, formula graph, and
/// thread pool (spec §2, §5).
pub struct Workbook {
    sheets: Vec<Worksheet>,
    strings: StringPool,
    ext: ExtendedDataPool,
    styles: StyleCatalogue,
    formulas: FormulaManager,
    pool: Arc<ThreadPool>,
    config: WorkbookConfig,
    last_error: RefCell<Option<String>>,
}

impl Workbook {
    pub fn new() -> Self {
        Self::with_config(WorkbookConfig::default())
    }

    pub fn with_config(config: WorkbookConfig) -> Self {
        Self {
            sheets: Vec::new(),
            strings: StringPool::default(),
            ext: ExtendedDataPool::new(),
            styles: StyleCatalogue::new(),
            formulas: FormulaManager::new(),
            pool: Arc::new(ThreadPool::new(config.thread_pool_size)),
            config,
            last_error: RefCell::new(None),
        }
    }

    pub fn config(&self) -> &WorkbookConfig {
        &self.config
    }

    /// Diagnostics for the workbook's priority thread pool (spec §4.11).
    /// Worksheet XML generation during `save` uses a scoped thread fan-out
    /// instead of this pool, since `ThreadPool::submit` requires `'static`
    /// closures and the per-sheet save data borrows from `self`; this pool
    /// backs the batch/SIMD cell kernels and any caller-submitted work.
    pub fn thread_pool_stats(&self) -> crate::workpool::PoolStatsSnapshot {
        self.pool.stats()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.borrow().clone()
    }

    fn clear_error(&self) {
        *self.last_error.borrow_mut() = None;
    }

    fn record_error(&self, err: &Error) {
        *self.last_error.borrow_mut() = Some(err.to_string());
    }

    // -- Sheet management ---------------------------------------------

    pub fn sheet_count(&self) -> usize {
        self.sheets.len()
    }

    pub fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|s| s.name().to_string()).collect()
    }

    pub fn sheet_index(&self, name: &str) -> Option<usize> {
        self.sheets.iter().position(|s| s.name() == name)
    }

    pub fn sheet(&self, idx: usize) -> Option<&Worksheet> {
        self.sheets.get(idx)
    }

    pub fn sheet_mut(&mut self, idx: usize) -> Option<&mut Worksheet> {
        self.sheets.get_mut(idx)
    }

    pub fn sheet_by_name(&self, name: &str) -> Option<&Worksheet> {
        self.sheets.iter().find(|s| s.name() == name)
    }

    /// Add a new, empty sheet named `name` (spec §4.15). Returns `false`
    /// (recording a state error) if the name is already taken.
    pub fn add_sheet(&mut self, name: impl Into<String>) -> bool {
        self.clear_error();
        let name = name.into();
        if self.sheet_index(&name).is_some() {
            self.record_error(&Error::State(format!("sheet '{name}' already exists")));
            return false;
        }
        self.sheets.push(Worksheet::new(name));
        true
    }

    /// Remove the sheet at `idx`, dropping every formula tracked on it.
    pub fn remove_sheet(&mut self, idx: usize) -> bool {
        self.clear_error();
        if idx >= self.sheets.len() {
            self.record_error(&Error::Argument(format!("no sheet at index {idx}")));
            return false;
        }
        let name = self.sheets[idx].name().to_string();
        self.formulas.relocate(&name, |_| None);
        self.sheets.remove(idx);
        true
    }

    /// Rename the sheet at `idx`, rejecting a clash with a sibling sheet's
    /// name and carrying the sheet's own tracked formulas over to the new
    /// name. Formulas on *other* sheets that reference the old name by
    /// text are left untouched (spec §9, formula-compatibility non-goal).
    pub fn rename_sheet(&mut self, idx: usize, new_name: impl Into<String>) -> bool {
        self.clear_error();
        let new_name = new_name.into();
        if idx >= self.sheets.len() {
            self.record_error(&Error::Argument(format!("no sheet at index {idx}")));
            return false;
        }
        if self.sheets.iter().enumerate().any(|(i, s)| i != idx && s.name() == new_name) {
            self.record_error(&Error::State(format!("sheet '{new_name}' already exists")));
            return false;
        }
        let old_name = self.sheets[idx].name().to_string();
        self.formulas.rename_sheet(&old_name, &new_name);
        self.sheets[idx].set_name(new_name);
        true
    }

    // -- Memory -----------------------------------------------------

    pub fn memory_stats(&self) -> WorkbookMemoryStats {
        let mut stats = WorkbookMemoryStats {
            string_bytes_used: self.strings.bytes_used(),
            extended_data_slots: self.ext.len(),
            ..Default::default()
        };
        for sheet in &self.sheets {
            let s = sheet.memory_stats();
            stats.cell_records_live += s.records_live;
            stats.cell_bytes_reserved += s.bytes_reserved;
        }
        stats
    }

    fn total_memory_bytes(&self) -> u64 {
        let stats = self.memory_stats();
        (stats.cell_bytes_reserved + stats.string_bytes_used) as u64
    }

    fn check_memory_ceiling(&self) -> bool {
        if self.total_memory_bytes() > self.config.memory_ceiling_bytes {
            self.record_error(&Error::Resource("memory ceiling exceeded".into()));
            return false;
        }
        true
    }

    // -- Cell values (cross-sheet, formula-transparent) ----------------

    /// The value at `(sheet, coord)`, resolving a formula cell to its
    /// last-cached result rather than the raw `Formula` wrapper (spec
    /// §4.7, §8 scenario 3: `get_value(B1) == 6.0`).
    pub fn get_value(&self, sheet: &str, coord: Coordinate) -> CellValue {
        self.clear_error();
        let Some(ws) = self.sheet_by_name(sheet) else {
            return CellValue::Empty;
        };
        resolve_for_read(ws.get_value(coord, &self.strings, &self.ext))
    }

    pub fn set_value(&mut self, sheet: &str, coord: Coordinate, value: &CellValue) -> bool {
        self.clear_error();
        if !self.check_memory_ceiling() {
            return false;
        }
        let strings = &self.strings;
        let ext = &self.ext;
        let Some(ws) = self.sheets.iter_mut().find(|s| s.name() == sheet) else {
            self.record_error(&Error::NotFound(sheet.to_string()));
            return false;
        };
        let ok = ws.set_value(coord, value, strings, ext);
        if !ok {
            if let Some(msg) = ws.last_error() {
                self.record_error(&Error::Other(msg));
            }
        }
        ok
    }

    pub fn set_values(&mut self, sheet: &str, pairs: Vec<(Coordinate, CellValue)>) -> bool {
        self.clear_error();
        if !self.check_memory_ceiling() {
            return false;
        }
        let strings = &self.strings;
        let ext = &self.ext;
        let Some(ws) = self.sheets.iter_mut().find(|s| s.name() == sheet) else {
            self.record_error(&Error::NotFound(sheet.to_string()));
            return false;
        };
        let ok = ws.set_values(pairs, strings, ext);
        if !ok {
            if let Some(msg) = ws.last_error() {
                self.record_error(&Error::Other(msg));
            }
        }
        ok
    }

    // -- Formulas -------------------------------------------------------

    /// Write a formula into `(sheet, coord)` and register it for
    /// dependency tracking (spec §4.7 "set_formula"). `text` excludes the
    /// leading `=`.
    pub fn set_formula(&mut self, sheet: &str, coord: Coordinate, text: &str) -> bool {
        self.clear_error();
        if !self.formulas.set_formula(sheet, coord, text) {
            self.record_error(&Error::Argument(format!("malformed formula: {text}")));
            return false;
        }
        let value = CellValue::Formula {
            formula: text.to_string(),
            cached_value: None,
        };
        self.set_value(sheet, coord, &value)
    }

    pub fn clear_formula(&mut self, sheet: &str, coord: Coordinate) {
        self.clear_error();
        self.formulas.clear_formula(sheet, coord);
    }

    pub fn has_formula(&self, sheet: &str, coord: Coordinate) -> bool {
        self.formulas.has_formula(sheet, coord)
    }

    pub fn formula_text(&self, sheet: &str, coord: Coordinate) -> Option<String> {
        self.formulas.formula_text(sheet, coord).map(str::to_string)
    }

    pub fn detect_circular_references(&self) -> bool {
        self.formulas.has_circular_reference()
    }

    /// Recompute every tracked formula in dependency order, writing each
    /// result back as the formula's cached value; cells in a dependency
    /// cycle get `#CIRCULAR!` instead of being evaluated (spec §4.7, §8
    /// scenarios 3-4).
    pub fn calculate_all(&self) {
        self.clear_error();
        self.formulas.calculate_all(self, |sheet, coord, result| {
            self.write_formula_result(sheet, coord, result);
        });
    }

    /// Recalculate only `(sheet, coord)` and everything transitively
    /// dependent on it (spec §4.7 "recalculateDependents").
    pub fn recalc_dependents(&self, sheet: &str, coord: Coordinate) {
        self.clear_error();
        self.formulas.recalc_dependents(sheet, coord, self, |s, c, result| {
            self.write_formula_result(s, c, result);
        });
    }

    fn write_formula_result(&self, sheet: &str, coord: Coordinate, result: std::result::Result<CellValue, &'static str>) {
        let Some(ws) = self.sheet_by_name(sheet) else { return };
        let value = match result {
            Ok(v) => v,
            Err(e) => CellValue::Error(e),
        };
        ws.store().set_formula_cached_value(coord, value, &self.ext);
    }

    pub fn direct_dependencies(&self, sheet: &str, coord: Coordinate) -> Vec<(String, Coordinate)> {
        self.formulas
            .direct_dependencies(sheet, coord)
            .into_iter()
            .map(|r| (r.sheet, r.coord))
            .collect()
    }

    pub fn direct_dependents(&self, sheet: &str, coord: Coordinate) -> Vec<(String, Coordinate)> {
        self.formulas
            .direct_dependents(sheet, coord)
            .into_iter()
            .map(|r| (r.sheet, r.coord))
            .collect()
    }

    // -- Structural edits (rows/columns) -------------------------------

    /// Insert `n` rows at `pos` on `sheet`: shifts cells, row/column
    /// metadata and merged regions (via `Worksheet::insert_rows`), then
    /// separately relocates every formula tracked on that sheet with the
    /// identical shift shape (spec §4.5, §8 scenario 5).
    pub fn insert_rows(&mut self, sheet: &str, pos: RowIndex, n: u32) -> bool {
        self.clear_error();
        let ext = &self.ext;
        let Some(ws) = self.sheets.iter_mut().find(|s| s.name() == sheet) else {
            self.record_error(&Error::NotFound(sheet.to_string()));
            return false;
        };
        if !ws.insert_rows(pos, n, ext) {
            if let Some(msg) = ws.last_error() {
                self.record_error(&Error::Other(msg));
            }
            return false;
        }
        self.formulas.relocate(sheet, shift_rows_inserted(pos, n));
        true
    }

    pub fn delete_rows(&mut self, sheet: &str, pos: RowIndex, n: u32) -> bool {
        self.clear_error();
        let ext = &self.ext;
        let Some(ws) = self.sheets.iter_mut().find(|s| s.name() == sheet) else {
            self.record_error(&Error::NotFound(sheet.to_string()));
            return false;
        };
        if !ws.delete_rows(pos, n, ext) {
            if let Some(msg) = ws.last_error() {
                self.record_error(&Error::Other(msg));
            }
            return false;
        }
        self.formulas.relocate(sheet, shift_rows_deleted(pos, n));
        true
    }

    pub fn insert_columns(&mut self, sheet: &str, pos: ColIndex, n: u32) -> bool {
        self.clear_error();
        let ext = &self.ext;
        let Some(ws) = self.sheets.iter_mut().find(|s| s.name() == sheet) else {
            self.record_error(&Error::NotFound(sheet.to_string()));
            return false;
        };
        if !ws.insert_columns(pos, n, ext) {
            if let Some(msg) = ws.last_error() {
                self.record_error(&Error::Other(msg));
            }
            return false;
        }
        self.formulas.relocate(sheet, shift_cols_inserted(pos, n));
        true
    }

    pub fn delete_columns(&mut self, sheet: &str, pos: ColIndex, n: u32) -> bool {
        self.clear_error();
        let ext = &self.ext;
        let Some(ws) = self.sheets.iter_mut().find(|s| s.name() == sheet) else {
            self.record_error(&Error::NotFound(sheet.to_string()));
            return false;
        };
        if !ws.delete_columns(pos, n, ext) {
            if let Some(msg) = ws.last_error() {
                self.record_error(&Error::Other(msg));
            }
            return false;
        }
        self.formulas.relocate(sheet, shift_cols_deleted(pos, n));
        true
    }

    // -- Merged regions & protection (thin sheet-scoped delegation) ----

    pub fn merge_cells(&mut self, sheet: &str, region: Range) -> bool {
        self.clear_error();
        match self.sheets.iter_mut().find(|s| s.name() == sheet) {
            Some(ws) => ws.merge_cells(region),
            None => {
                self.record_error(&Error::NotFound(sheet.to_string()));
                false
            }
        }
    }

    pub fn unmerge_cell(&mut self, sheet: &str, coord: Coordinate) -> bool {
        self.clear_error();
        match self.sheets.iter_mut().find(|s| s.name() == sheet) {
            Some(ws) => ws.unmerge_cell(coord),
            None => {
                self.record_error(&Error::NotFound(sheet.to_string()));
                false
            }
        }
    }

    pub fn is_merged(&self, sheet: &str, coord: Coordinate) -> bool {
        self.sheet_by_name(sheet).is_some_and(|ws| ws.is_merged(coord))
    }

    pub fn protect_sheet(&mut self, sheet: &str, password: Option<&str>, options: ProtectionOptions) -> bool {
        self.clear_error();
        match self.sheets.iter_mut().find(|s| s.name() == sheet) {
            Some(ws) => ws.protect(password, options),
            None => {
                self.record_error(&Error::NotFound(sheet.to_string()));
                false
            }
        }
    }

    // -- Save -----------------------------------------------------------

    /// Save the workbook to `path`, writing to a temporary file first and
    /// renaming it into place for atomicity (spec §4.15 "Save").
    pub fn save(&self, path: impl AsRef<Path>) -> bool {
        self.clear_error();
        match self.save_inner(path.as_ref()) {
            Ok(()) => true,
            Err(e) => {
                self.record_error(&e);
                false
            }
        }
    }

    fn save_inner(&self, path: &Path) -> Result<()> {
        tracing::debug!(path = %path.display(), sheets = self.sheets.len(), "opening package for save");

        let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        tmp_name.push(".tmp");
        let tmp_path = path.with_file_name(tmp_name);

        let sheet_names = self.sheet_names();
        let level = self.config.deflate_level as i64;

        // Each sheet's XML is independent of every other sheet's, so it is
        // generated on its own scoped thread (spec §4.15 "per-sheet XML
        // generation tasks, optionally parallel"); the single ZIP writer
        // below still receives them sequentially.
        let mut sheet_xml: Vec<Vec<u8>> = vec![Vec::new(); self.sheets.len()];
        std::thread::scope(|scope| {
            let mut handles = Vec::with_capacity(self.sheets.len());
            for (i, sheet) in self.sheets.iter().enumerate() {
                // Capture only the `Sync` sub-state a sheet needs for XML
                // generation, not `&Worksheet` itself: its `last_error` cell
                // makes the whole type `!Sync`.
                let store = sheet.store();
                let rowcol = sheet.rowcol();
                let merges = sheet.merges();
                let strings = &self.strings;
                let ext = &self.ext;
                let name = sheet.name();
                handles.push(scope.spawn(move || {
                    let xml = worksheet_xml(&WorksheetXmlInput { store, rowcol, merges, strings, ext });
                    tracing::debug!(sheet = name, bytes = xml.len(), "generated worksheet xml");
                    (i, xml)
                }));
            }
            for h in handles {
                let (i, xml) = h.join().expect("worksheet xml generation thread panicked");
                sheet_xml[i] = xml;
            }
        });

        {
            let mut writer = ZipWriterHandle::open_writer(&tmp_path, false)?;
            writer.write_entry("[Content_Types].xml", &content_types_xml(sheet_names.len()), level)?;
            writer.write_entry("_rels/.rels", &package_rels_xml(), level)?;
            writer.write_entry("xl/workbook.xml", &workbook_xml(&sheet_names), level)?;
            writer.write_entry("xl/_rels/workbook.xml.rels", &workbook_rels_xml(sheet_names.len()), level)?;
            writer.write_entry("xl/sharedStrings.xml", &shared_strings_xml(&self.strings.iter_all()), level)?;
            writer.write_entry("xl/styles.xml", &styles_xml(&self.styles.all()), level)?;
            for (i, xml) in sheet_xml.iter().enumerate() {
                writer.write_entry(&format!("xl/worksheets/sheet{}.xml", i + 1), xml, level)?;
            }
            writer.finish()?;
        }

        std::fs::rename(&tmp_path, path).map_err(Error::Io)?;
        tracing::debug!(path = %path.display(), "save complete");
        Ok(())
    }

    // -- Load -------------------------------------------------------------

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::load_with_config(path, WorkbookConfig::default())
    }

    pub fn load_with_config(path: impl AsRef<Path>, config: WorkbookConfig) -> Result<Self> {
        let mut reader = ZipReader::open_reader(path)?;
        Self::load_from_reader(&mut reader, config)
    }

    pub fn load_from_bytes(bytes: Vec<u8>) -> Result<Self> {
        Self::load_from_bytes_with_config(bytes, WorkbookConfig::default())
    }

    pub fn load_from_bytes_with_config(bytes: Vec<u8>, config: WorkbookConfig) -> Result<Self> {
        let mut reader = ZipReader::from_bytes(bytes)?;
        Self::load_from_reader(&mut reader, config)
    }

    fn load_from_reader<R: std::io::Read + std::io::Seek>(reader: &mut ZipReader<R>, config: WorkbookConfig) -> Result<Self> {
        tracing::debug!("opening package for load");
        let sheet_names = parse_workbook_xml(&reader.read_entry("xl/workbook.xml")?)?;
        tracing::debug!(sheets = sheet_names.len(), "parsed workbook.xml");

        let shared = if reader.contains("xl/sharedStrings.xml") {
            let bytes = reader.read_entry("xl/sharedStrings.xml")?;
            let mut collector = SharedStringCollector::default();
            scan_shared_strings(&bytes, &mut collector)?;
            collector.0
        } else {
            Vec::new()
        };

        let mut wb = Workbook::with_config(config);
        for s in &shared {
            let _ = wb.strings.intern(s);
        }

        if reader.contains("xl/styles.xml") {
            let parsed = parse_styles_xml(&reader.read_entry("xl/styles.xml")?)?;
            for style in parsed {
                wb.styles.get_or_insert(style);
            }
        }

        for name in &sheet_names {
            wb.sheets.push(Worksheet::new(name.clone()));
        }
        for (i, name) in sheet_names.iter().enumerate() {
            let part = format!("xl/worksheets/sheet{}.xml", i + 1);
            let xml = reader.read_entry(&part)?;
            tracing::debug!(sheet = %name, bytes = xml.len(), "parsing worksheet xml");
            let sheet = &mut wb.sheets[i];
            let (store, rowcol, merges) = sheet.parts_mut();
            parse_worksheet_xml(&xml, store, rowcol, merges, &wb.strings, &wb.ext, &shared)?;
        }

        wb.rebuild_formula_graph();
        if wb.config.auto_calculate {
            wb.calculate_all();
        }
        tracing::debug!("load complete");
        Ok(wb)
    }

    /// Repopulate the formula manager by scanning every `<f>` cell loaded
    /// from worksheet XML (spec §4.15 "Load"): the package itself only
    /// carries formula text and a cached `<v>`, not dependency edges.
    fn rebuild_formula_graph(&mut self) {
        let mut tracked: Vec<(String, Coordinate, String)> = Vec::new();
        for sheet in &self.sheets {
            for record in sheet.store().records() {
                if let Some(offset) = record.formula_ext_offset() {
                    if let Some(text) = self.ext.get(offset).formula {
                        tracked.push((sheet.name().to_string(), record.coordinate(), text));
                    }
                }
            }
        }
        for (sheet_name, coord, text) in tracked {
            self.formulas.set_formula(&sheet_name, coord, &text);
        }
    }
}

impl Default for Workbook {
    fn default() -> Self {
        Self::new()
    }
}

impl CellSource for Workbook {
    fn current_sheet(&self) -> &str {
        self.sheets.first().map(Worksheet::name).unwrap_or("")
    }

    fn value_at(&self, sheet: &str, coord: Coordinate) -> CellValue {
        match self.sheet_by_name(sheet) {
            Some(ws) => resolve_for_read(ws.get_value(coord, &self.strings, &self.ext)),
            None => CellValue::Empty,
        }
    }
}

/// Unwrap a formula cell to its cached result for read APIs (spec §4.7,
/// §8 scenario 3); a formula with no cached value yet reads as empty.
fn resolve_for_read(value: CellValue) -> CellValue {
    match value {
        CellValue::Formula { cached_value, .. } => cached_value.map(|b| *b).unwrap_or(CellValue::Empty),
        other => other,
    }
}

#[derive(Default)]
struct SharedStringCollector(Vec<String>);

impl SharedStringsVisitor for SharedStringCollector {
    fn on_shared_string(&mut self, index: usize, text: &str) {
        if index >= self.0.len() {
            self.0.resize(index + 1, String::new());
        }
        self.0[index] = text.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Capture `tracing` output on the test writer instead of letting it
    /// fall through unconsumed; harmless if another test already installed
    /// a subscriber.
    fn init_tracing() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    #[test]
    fn add_sheet_rejects_duplicate_name() {
        let mut wb = Workbook::new();
        assert!(wb.add_sheet("S"));
        assert!(!wb.add_sheet("S"));
        assert!(wb.last_error().is_some());
    }

    #[test]
    fn save_then_load_round_trips_values() {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.xlsx");

        let mut wb = Workbook::new();
        assert!(wb.add_sheet("S"));
        assert!(wb.set_value("S", Coordinate::new(1, 1), &CellValue::from("hi")));
        assert!(wb.set_value("S", Coordinate::new(2, 1), &CellValue::Float(3.5)));
        assert!(wb.set_value("S", Coordinate::new(3, 1), &CellValue::Int(7)));
        assert!(wb.save(&path));

        let loaded = Workbook::load(&path).unwrap();
        assert_eq!(loaded.sheet_count(), 1);
        assert_eq!(loaded.sheet_names(), vec!["S".to_string()]);
        assert_eq!(loaded.get_value("S", Coordinate::new(1, 1)), CellValue::from("hi"));
        assert_eq!(loaded.get_value("S", Coordinate::new(2, 1)), CellValue::Float(3.5));
        assert_eq!(loaded.get_value("S", Coordinate::new(3, 1)), CellValue::Int(7));
        assert_eq!(loaded.sheet_by_name("S").unwrap().used_range(), Range::parse_a1("A1:A3").unwrap());
    }

    #[test]
    fn merge_and_unmerge_preserve_value() {
        let mut wb = Workbook::new();
        wb.add_sheet("S");
        wb.set_value("S", Coordinate::new(1, 1), &CellValue::from("title"));
        assert!(wb.merge_cells("S", Range::parse_a1("A1:C1").unwrap()));
        assert!(wb.is_merged("S", Coordinate::new(1, 1)));
        assert!(wb.is_merged("S", Coordinate::new(1, 2)));
        assert!(wb.unmerge_cell("S", Coordinate::new(1, 2)));
        assert!(!wb.is_merged("S", Coordinate::new(1, 1)));
        assert_eq!(wb.get_value("S", Coordinate::new(1, 1)), CellValue::from("title"));
    }

    #[test]
    fn sum_formula_calculates_over_a_range() {
        let mut wb = Workbook::new();
        wb.add_sheet("S");
        wb.set_value("S", Coordinate::new(1, 1), &CellValue::Float(1.0));
        wb.set_value("S", Coordinate::new(2, 1), &CellValue::Float(2.0));
        wb.set_value("S", Coordinate::new(3, 1), &CellValue::Float(3.0));
        assert!(wb.set_formula("S", Coordinate::new(1, 2), "SUM(A1:A3)"));
        wb.calculate_all();
        assert_eq!(wb.get_value("S", Coordinate::new(1, 2)), CellValue::Float(6.0));
        let deps = wb.direct_dependencies("S", Coordinate::new(1, 2));
        assert_eq!(deps.len(), 3);
        assert!(deps.iter().all(|(sheet, _)| sheet == "S"));
    }

    #[test]
    fn circular_reference_is_detected_and_written_as_sentinel() {
        let mut wb = Workbook::new();
        wb.add_sheet("S");
        assert!(wb.set_formula("S", Coordinate::new(1, 1), "B1"));
        assert!(wb.set_formula("S", Coordinate::new(1, 2), "A1"));
        assert!(wb.detect_circular_references());
        wb.calculate_all();
        assert_eq!(wb.get_value("S", Coordinate::new(1, 1)), CellValue::Error("#CIRCULAR!"));
        assert_eq!(wb.get_value("S", Coordinate::new(1, 2)), CellValue::Error("#CIRCULAR!"));
    }

    #[test]
    fn insert_rows_shifts_cells_and_formulas() {
        let mut wb = Workbook::new();
        wb.add_sheet("S");
        wb.set_value("S", Coordinate::new(1, 1), &CellValue::Float(10.0));
        wb.set_value("S", Coordinate::new(2, 1), &CellValue::Float(20.0));
        assert!(wb.set_formula("S", Coordinate::new(3, 1), "A1+A2"));
        assert!(wb.insert_rows("S", 2, 1));
        assert_eq!(wb.get_value("S", Coordinate::new(1, 1)), CellValue::Float(10.0));
        assert_eq!(wb.get_value("S", Coordinate::new(3, 1)), CellValue::Float(20.0));
        assert!(wb.has_formula("S", Coordinate::new(4, 1)));
        assert!(!wb.has_formula("S", Coordinate::new(3, 1)));
        let deps = wb.direct_dependencies("S", Coordinate::new(4, 1));
        assert_eq!(deps.len(), 2);
    }
}
