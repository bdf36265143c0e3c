//! OOXML package assembly: the ZIP codec and the fixed part table (spec
//! §6, §4.15).

pub mod parts;
pub mod zip_codec;

pub use zip_codec::{ZipReader, ZipWriterHandle};
