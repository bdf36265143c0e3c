//! Unified error type for xlcore operations (spec §7).
//!
//! Mirrors the teacher's two-layer convention: a `thiserror`-derived enum at
//! the crate root, with `#[from]` conversions from the narrower subsystem
//! errors (ZIP, OPC package) rather than one error variant per call site.
//! XML parse failures (`xml::reader`'s own scanner, not a parser crate)
//! are wrapped through the plain `Xml(String)` variant instead.

use thiserror::Error;

/// Result type for xlcore operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error type.
///
/// Variants map onto spec.md's error taxonomy (§7): `Argument` /
/// `InvalidCoordinate` for ArgumentError, `State` for StateError,
/// `Resource` for ResourceError, `Parse`/`Zip`/`Xml` for ParseError.
/// FormulaError is deliberately absent here: formula errors are data-level
/// (written into the cell as an error-sentinel `CellValue`), never raised
/// across this boundary.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid coordinate, out-of-range row/column/size, malformed A1 address.
    #[error("argument error: {0}")]
    Argument(String),

    /// Duplicate/overlapping merge, illegal protection transition, sheet rename clash.
    #[error("state error: {0}")]
    State(String),

    /// Allocation failed, string pool exhausted, task queue full.
    #[error("resource error: {0}")]
    Resource(String),

    /// Malformed XML.
    #[error("XML error: {0}")]
    Xml(String),

    /// Malformed ZIP/OPC package.
    #[error("ZIP/package error: {0}")]
    Zip(String),

    /// Malformed or truncated OOXML part; load aborts.
    #[error("parse error in {part}: {message}")]
    Parse { part: String, message: String },

    /// A referenced part/sheet/style does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Generic error for cases not covered above.
    #[error("{0}")]
    Other(String),
}

impl From<zip::result::ZipError> for Error {
    fn from(err: zip::result::ZipError) -> Self {
        Error::Zip(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_variant_message() {
        let e = Error::Argument("row 0 is invalid".to_string());
        assert_eq!(e.to_string(), "argument error: row 0 is invalid");
    }
}
