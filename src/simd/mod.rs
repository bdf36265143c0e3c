//! Batch/SIMD kernels over contiguous cell-record arrays (spec §4.10).
//!
//! Grounded on `common::simd::cmp` in the teacher: every kernel exposes a
//! single public entry point that runtime-detects the widest available
//! instruction set (AVX2 -> SSE4.1/SSE2 -> scalar on x86_64, NEON on
//! aarch64) and dispatches to a `#[target_feature]`-gated `unsafe fn`,
//! falling back to a safe scalar loop when no accelerated path applies or
//! the slice is too short to vectorise profitably.
//!
//! `CellRecord` has no natural alignment requirement beyond 8 bytes (spec
//! §4.10 "Alignment"), so every kernel here accepts unaligned slices and
//! uses unaligned loads/stores throughout.

pub mod convert;
pub mod ops;
pub mod reduce;

pub use convert::*;
pub use ops::*;
pub use reduce::*;
