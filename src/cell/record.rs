//! The 16-byte packed cell record (spec §3.2).
//!
//! Layout is a generalisation of `UltraCompactCell` in
//! `examples/original_source/include/TinaXlsx/TXUltraCompactCell.hpp`: an
//! 8-byte primary payload reinterpreted per type tag, and an 8-byte
//! secondary block carrying the tag itself, flags, style handle and
//! coordinate.
//!
//! The original packs `row`/`col` as `uint16_t` each, which only spans a
//! 65536x65536 grid. The legal sheet grid (spec §3.1, `MAX_ROW` = 2^20)
//! does not fit a `u16` row, so this record widens `row` to `u32` (using
//! only its low 20 bits) and keeps `col` at `u16` (`MAX_COL` = 2^14 fits
//! comfortably). To hold the total at exactly 16 bytes, the original's
//! separate `cell_type`/`flags` bytes are merged into a single
//! `tag_flags` byte: 3 bits of type tag, 5 bits of flags. A formula
//! cell's extended-data offset lives entirely inside the 8-byte primary
//! payload (as a `u32`), so unlike the original there is no need to
//! steal bits from the secondary block for it.

use zerocopy::{Immutable, IntoBytes, FromBytes, KnownLayout};

use crate::coord::Coordinate;
use crate::pool::{ExtendedDataPool, StringHandle, StringPool};

/// Discriminant for the primary payload's interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CellType {
    Empty = 0,
    String = 1,
    Number = 2,
    Integer = 3,
    Boolean = 4,
    Formula = 5,
    Error = 6,
}

impl CellType {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::String,
            2 => Self::Number,
            3 => Self::Integer,
            4 => Self::Boolean,
            5 => Self::Formula,
            6 => Self::Error,
            _ => Self::Empty,
        }
    }
}

bitflags::bitflags! {
    /// Flags packed into the high 5 bits of `tag_flags`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CellFlags: u8 {
        const HAS_STYLE = 0b0000_1000;
        const IS_MERGED = 0b0001_0000;
        const IS_LOCKED = 0b0010_0000;
        const IS_MASTER = 0b0100_0000;
    }
}

const TAG_MASK: u8 = 0b0000_0111;

/// Sentinel `style` byte value meaning "the real handle overflowed 8 bits;
/// look it up in `CellStore`'s overflow table" (spec §3.2 invariant).
pub const STYLE_OVERFLOW: u8 = 255;

/// Formula error sentinel codes, stored inline in an `Error`-tagged cell
/// (spec §7 "FormulaError variants are data, not raised errors").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FormulaErrorCode {
    Div0 = 0,
    Value = 1,
    Ref = 2,
    Name = 3,
    Num = 4,
    NA = 5,
    Circular = 6,
    Null = 7,
}

impl FormulaErrorCode {
    pub fn as_excel_str(self) -> &'static str {
        match self {
            Self::Div0 => "#DIV/0!",
            Self::Value => "#VALUE!",
            Self::Ref => "#REF!",
            Self::Name => "#NAME?",
            Self::Num => "#NUM!",
            Self::NA => "#N/A",
            Self::Circular => "#CIRCULAR!",
            Self::Null => "#NULL!",
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Value,
            2 => Self::Ref,
            3 => Self::Name,
            4 => Self::Num,
            5 => Self::NA,
            6 => Self::Circular,
            7 => Self::Null,
            _ => Self::Div0,
        }
    }
}

#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Clone, Copy)]
#[repr(C)]
struct StringPayload {
    handle: u32,
    _reserved: u32,
}

#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Clone, Copy)]
#[repr(C)]
struct FormulaPayload {
    ext_offset: u32,
    _reserved: u32,
}

#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Clone, Copy)]
#[repr(C)]
struct BooleanPayload {
    value: u8,
    _pad: [u8; 7],
}

#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Clone, Copy)]
#[repr(C)]
struct ErrorPayload {
    code: u8,
    _pad: [u8; 7],
}

/// The packed, fixed-size cell record. `size_of::<CellRecord>() == 16`
/// (spec §3.2 invariant, tested below).
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Clone, Copy)]
#[repr(C)]
pub struct CellRecord {
    primary: [u8; 8],
    tag_flags: u8,
    style: u8,
    col: u16,
    row: u32,
}

impl CellRecord {
    /// An empty, unpositioned record (`CellStore` positions it on insert).
    pub const EMPTY: CellRecord = CellRecord {
        primary: [0; 8],
        tag_flags: 0,
        style: 0,
        col: 0,
        row: 0,
    };

    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.row, self.col as u32)
    }

    pub fn set_coordinate(&mut self, coord: Coordinate) {
        self.row = coord.row;
        self.col = coord.col as u16;
    }

    pub fn cell_type(&self) -> CellType {
        CellType::from_u8(self.tag_flags & TAG_MASK)
    }

    fn set_tag(&mut self, tag: CellType) {
        self.tag_flags = (self.tag_flags & !TAG_MASK) | (tag as u8);
    }

    pub fn flags(&self) -> CellFlags {
        CellFlags::from_bits_truncate(self.tag_flags & !TAG_MASK)
    }

    pub fn set_flags(&mut self, flags: CellFlags) {
        self.tag_flags = (self.tag_flags & TAG_MASK) | flags.bits();
    }

    pub fn is_empty(&self) -> bool {
        self.cell_type() == CellType::Empty
    }

    pub fn is_formula(&self) -> bool {
        self.cell_type() == CellType::Formula
    }

    pub fn is_locked(&self) -> bool {
        self.flags().contains(CellFlags::IS_LOCKED)
    }

    pub fn set_locked(&mut self, locked: bool) {
        let mut f = self.flags();
        f.set(CellFlags::IS_LOCKED, locked);
        self.set_flags(f);
    }

    pub fn is_merged(&self) -> bool {
        self.flags().contains(CellFlags::IS_MERGED)
    }

    pub fn set_merged(&mut self, merged: bool, is_master: bool) {
        let mut f = self.flags();
        f.set(CellFlags::IS_MERGED, merged);
        f.set(CellFlags::IS_MASTER, merged && is_master);
        self.set_flags(f);
    }

    /// Inline style handle, or `None` if it overflowed into `CellStore`'s
    /// side table (spec §3.2, `STYLE_OVERFLOW` sentinel).
    pub fn style_handle(&self) -> Option<u8> {
        if self.style == STYLE_OVERFLOW {
            None
        } else {
            Some(self.style)
        }
    }

    pub fn set_style_handle(&mut self, handle: Option<u8>) {
        let mut f = self.flags();
        match handle {
            Some(h) if h != STYLE_OVERFLOW => {
                self.style = h;
                f.insert(CellFlags::HAS_STYLE);
            }
            Some(_) | None => {
                self.style = STYLE_OVERFLOW;
                f.insert(CellFlags::HAS_STYLE);
            }
        }
        self.set_flags(f);
    }

    pub fn clear_style(&mut self) {
        self.style = 0;
        let mut f = self.flags();
        f.remove(CellFlags::HAS_STYLE);
        self.set_flags(f);
    }

    fn clear_value(&mut self) {
        self.primary = [0; 8];
        self.set_tag(CellType::Empty);
    }

    pub fn set_number(&mut self, value: f64) {
        self.primary = value.to_ne_bytes();
        self.set_tag(CellType::Number);
    }

    pub fn number_value(&self) -> Option<f64> {
        (self.cell_type() == CellType::Number).then(|| f64::from_ne_bytes(self.primary))
    }

    pub fn set_integer(&mut self, value: i64) {
        self.primary = value.to_ne_bytes();
        self.set_tag(CellType::Integer);
    }

    pub fn integer_value(&self) -> Option<i64> {
        (self.cell_type() == CellType::Integer).then(|| i64::from_ne_bytes(self.primary))
    }

    pub fn set_boolean(&mut self, value: bool) {
        let payload = BooleanPayload {
            value: value as u8,
            _pad: [0; 7],
        };
        self.primary.copy_from_slice(payload.as_bytes());
        self.set_tag(CellType::Boolean);
    }

    pub fn boolean_value(&self) -> Option<bool> {
        if self.cell_type() != CellType::Boolean {
            return None;
        }
        let payload = BooleanPayload::read_from_bytes(&self.primary).unwrap();
        Some(payload.value != 0)
    }

    pub fn set_string_handle(&mut self, handle: StringHandle) {
        let payload = StringPayload {
            handle,
            _reserved: 0,
        };
        self.primary.copy_from_slice(payload.as_bytes());
        self.set_tag(CellType::String);
    }

    pub fn string_handle(&self) -> Option<StringHandle> {
        if self.cell_type() != CellType::String {
            return None;
        }
        let payload = StringPayload::read_from_bytes(&self.primary).unwrap();
        Some(payload.handle)
    }

    pub fn set_formula_ext_offset(&mut self, ext_offset: u32) {
        let payload = FormulaPayload {
            ext_offset,
            _reserved: 0,
        };
        self.primary.copy_from_slice(payload.as_bytes());
        self.set_tag(CellType::Formula);
    }

    pub fn formula_ext_offset(&self) -> Option<u32> {
        if self.cell_type() != CellType::Formula {
            return None;
        }
        let payload = FormulaPayload::read_from_bytes(&self.primary).unwrap();
        Some(payload.ext_offset)
    }

    pub fn set_error(&mut self, code: FormulaErrorCode) {
        let payload = ErrorPayload {
            code: code as u8,
            _pad: [0; 7],
        };
        self.primary.copy_from_slice(payload.as_bytes());
        self.set_tag(CellType::Error);
    }

    pub fn error_value(&self) -> Option<FormulaErrorCode> {
        if self.cell_type() != CellType::Error {
            return None;
        }
        let payload = ErrorPayload::read_from_bytes(&self.primary).unwrap();
        Some(FormulaErrorCode::from_u8(payload.code))
    }

    pub fn clear(&mut self) {
        self.clear_value();
        self.style = 0;
        self.tag_flags = 0;
    }
}

impl Default for CellRecord {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Public, owned cell value, the caller-facing counterpart to the packed
/// `CellRecord` (mirrors `sheet::types::CellValue` in the teacher, widened
/// with an `Error` variant per spec §3.2/§7).
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Error(&'static str),
    Formula {
        formula: String,
        cached_value: Option<Box<CellValue>>,
    },
}

impl CellValue {
    /// Infer a value's type from its string form, same precedence order as
    /// the teacher's `CellValue::infer_from_str`.
    pub fn infer_from_str<S: AsRef<str>>(s: S) -> Self {
        let s = s.as_ref();
        if s.is_empty() {
            return Self::Empty;
        }
        if let Ok(i) = s.parse::<i64>() {
            return Self::Int(i);
        }
        if let Ok(f) = fast_float2::parse(s) {
            return Self::Float(f);
        }
        match s.to_uppercase().as_str() {
            "TRUE" => Self::Bool(true),
            "FALSE" => Self::Bool(false),
            _ => Self::String(s.to_string()),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

impl From<bool> for CellValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for CellValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for CellValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

/// Resolve a `CellRecord` into an owned `CellValue`, consulting the string
/// and extended-data pools where the record only holds a handle.
pub fn resolve_value(
    record: &CellRecord,
    strings: &StringPool,
    ext: &ExtendedDataPool,
) -> CellValue {
    match record.cell_type() {
        CellType::Empty => CellValue::Empty,
        CellType::Boolean => CellValue::Bool(record.boolean_value().unwrap_or(false)),
        CellType::Integer => CellValue::Int(record.integer_value().unwrap_or(0)),
        CellType::Number => CellValue::Float(record.number_value().unwrap_or(0.0)),
        CellType::String => {
            let handle = record.string_handle().unwrap_or(0);
            CellValue::String(strings.resolve_string(handle))
        }
        CellType::Error => {
            CellValue::Error(record.error_value().unwrap_or(FormulaErrorCode::Div0).as_excel_str())
        }
        CellType::Formula => {
            let offset = record.formula_ext_offset().unwrap_or(0);
            let data = ext.get(offset);
            CellValue::Formula {
                formula: data.formula.unwrap_or_default(),
                cached_value: data.cached_value.map(Box::new),
            }
        }
    }
}

/// Encode a `CellValue` into a fresh, positioned `CellRecord`, interning
/// strings and allocating extended-data slots as needed. Pure with respect
/// to `CellStore`'s own collections — safe to call from multiple threads
/// concurrently since both pools serialise internally (spec §4.3 "batch
/// insert may resolve values in parallel").
pub fn encode_value(
    coord: Coordinate,
    value: &CellValue,
    strings: &StringPool,
    ext: &ExtendedDataPool,
) -> crate::error::Result<CellRecord> {
    let mut record = CellRecord::EMPTY;
    record.set_coordinate(coord);
    match value {
        CellValue::Empty => {}
        CellValue::Bool(b) => record.set_boolean(*b),
        CellValue::Int(i) => record.set_integer(*i),
        CellValue::Float(f) => record.set_number(*f),
        CellValue::String(s) => {
            let handle = strings
                .intern(s)
                .ok_or_else(|| crate::error::Error::Resource("string pool byte ceiling exceeded".into()))?;
            record.set_string_handle(handle);
        }
        CellValue::Error(code) => {
            let code = excel_str_to_code(code);
            record.set_error(code);
        }
        CellValue::Formula { formula, cached_value } => {
            let offset = ext.allocate();
            let cached = cached_value.as_ref().map(|v| (**v).clone());
            ext.with_mut(offset, |d| {
                d.formula = Some(formula.clone());
                d.cached_value = cached;
            });
            record.set_formula_ext_offset(offset);
        }
    }
    Ok(record)
}

fn excel_str_to_code(s: &str) -> FormulaErrorCode {
    match s {
        "#VALUE!" => FormulaErrorCode::Value,
        "#REF!" => FormulaErrorCode::Ref,
        "#NAME?" => FormulaErrorCode::Name,
        "#NUM!" => FormulaErrorCode::Num,
        "#N/A" => FormulaErrorCode::NA,
        "#CIRCULAR!" => FormulaErrorCode::Circular,
        "#NULL!" => FormulaErrorCode::Null,
        _ => FormulaErrorCode::Div0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_is_exactly_16_bytes() {
        assert_eq!(std::mem::size_of::<CellRecord>(), 16);
    }

    #[test]
    fn number_round_trips() {
        let mut r = CellRecord::EMPTY;
        r.set_number(3.5);
        assert_eq!(r.number_value(), Some(3.5));
        assert_eq!(r.cell_type(), CellType::Number);
    }

    #[test]
    fn integer_round_trips() {
        let mut r = CellRecord::EMPTY;
        r.set_integer(-42);
        assert_eq!(r.integer_value(), Some(-42));
    }

    #[test]
    fn boolean_round_trips() {
        let mut r = CellRecord::EMPTY;
        r.set_boolean(true);
        assert_eq!(r.boolean_value(), Some(true));
    }

    #[test]
    fn string_handle_round_trips() {
        let mut r = CellRecord::EMPTY;
        r.set_string_handle(7);
        assert_eq!(r.string_handle(), Some(7));
    }

    #[test]
    fn coordinate_round_trips_full_row_range() {
        let mut r = CellRecord::EMPTY;
        let coord = Coordinate::new(1_048_575, 16_383);
        r.set_coordinate(coord);
        assert_eq!(r.coordinate(), coord);
    }

    #[test]
    fn style_overflow_sentinel() {
        let mut r = CellRecord::EMPTY;
        r.set_style_handle(Some(254));
        assert_eq!(r.style_handle(), Some(254));
        r.set_style_handle(None);
        assert_eq!(r.style_handle(), None);
    }

    #[test]
    fn flags_survive_tag_changes() {
        let mut r = CellRecord::EMPTY;
        r.set_locked(true);
        r.set_number(1.0);
        assert!(r.is_locked());
        assert_eq!(r.cell_type(), CellType::Number);
    }

    #[test]
    fn clear_resets_to_empty() {
        let mut r = CellRecord::EMPTY;
        r.set_number(9.0);
        r.set_locked(true);
        r.clear();
        assert!(r.is_empty());
        assert!(!r.is_locked());
    }

    #[test]
    fn infer_from_str_matches_teacher_precedence() {
        assert_eq!(CellValue::infer_from_str(""), CellValue::Empty);
        assert_eq!(CellValue::infer_from_str("42"), CellValue::Int(42));
        assert_eq!(CellValue::infer_from_str("3.5"), CellValue::Float(3.5));
        assert_eq!(CellValue::infer_from_str("TRUE"), CellValue::Bool(true));
        assert_eq!(
            CellValue::infer_from_str("hello"),
            CellValue::String("hello".to_string())
        );
    }
}
