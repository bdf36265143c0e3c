//! Strict-OOXML XML writer and streaming reader (spec §4.13, §4.14).

pub mod reader;
pub mod writer;

pub use reader::{scan_shared_strings, scan_worksheet, CellNode, RowNode, SharedStringsVisitor, WorksheetVisitor};
pub use writer::{escape_xml, to_bytes, write_document, XmlNode};
