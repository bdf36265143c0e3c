//! Workbook-scoped interning pools (spec §3.3, §4.1, §4.2).

pub mod ext_data;
pub mod string_pool;

pub use ext_data::{ExtendedData, ExtendedDataPool};
pub use string_pool::{StringHandle, StringPool};
