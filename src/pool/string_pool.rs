//! Append-only string interning pool (spec §3.3, §4.1).
//!
//! Scoped per-workbook rather than a process-wide singleton (spec §9,
//! "Static singletons" design note) — the original `TXStringPool` in
//! `examples/original_source/include/TinaXlsx/TXCompactCell.hpp` is a
//! `getInstance()` singleton guarded by `std::mutex`; here the same
//! synchronisation strategy (a single mutex guarding a `Vec` + index map)
//! is kept, but ownership moves onto `Workbook`.

use parking_lot::Mutex;
use std::collections::HashMap;

/// A stable handle into a `StringPool`. Handle 0 is always the empty string.
pub type StringHandle = u32;

struct Inner {
    /// Interned strings, indexed by handle. `strings[0]` is always `""`.
    strings: Vec<Box<str>>,
    index: HashMap<Box<str>, StringHandle>,
    byte_ceiling: usize,
    bytes_used: usize,
}

/// Per-workbook string interning pool.
///
/// `intern` is serialised by an internal mutex; `resolve` only takes a
/// shared lock and is safe to call concurrently with other resolves.
pub struct StringPool {
    inner: Mutex<Inner>,
}

impl StringPool {
    /// `byte_ceiling` bounds total interned byte size; exceeding it returns
    /// `None` from `intern` (spec §4.1 "Failures").
    pub fn new(byte_ceiling: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                strings: vec!["".into()],
                index: HashMap::new(),
                byte_ceiling,
                bytes_used: 0,
            }),
        }
    }

    /// Intern `s`, returning a stable handle. Equal strings produce equal
    /// handles (spec §4.1, §8 invariant 3).
    pub fn intern(&self, s: &str) -> Option<StringHandle> {
        if s.is_empty() {
            return Some(0);
        }
        let mut inner = self.inner.lock();
        if let Some(&h) = inner.index.get(s) {
            return Some(h);
        }
        if inner.bytes_used + s.len() > inner.byte_ceiling {
            return None;
        }
        let handle = inner.strings.len() as u32;
        let boxed: Box<str> = s.into();
        inner.bytes_used += boxed.len();
        inner.strings.push(boxed.clone());
        inner.index.insert(boxed, handle);
        Some(handle)
    }

    /// Resolve a handle back to its string. Panics on an unknown handle
    /// (an invariant violation — handles only ever come from `intern`).
    pub fn resolve(&self, handle: StringHandle) -> Box<str> {
        let inner = self.inner.lock();
        inner.strings[handle as usize].clone()
    }

    /// Resolve into an owned `String`; convenience wrapper over `resolve`.
    pub fn resolve_string(&self, handle: StringHandle) -> String {
        self.resolve(handle).into_string()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }

    pub fn bytes_used(&self) -> usize {
        self.inner.lock().bytes_used
    }

    /// Iterate all distinct strings in handle order, starting at handle 0.
    pub fn iter_all(&self) -> Vec<String> {
        self.inner.lock().strings.iter().map(|s| s.to_string()).collect()
    }
}

impl Default for StringPool {
    fn default() -> Self {
        // 1 GiB ceiling by default; callers needing a tighter bound (tied to
        // the workbook memory ceiling) construct explicitly via `new`.
        Self::new(1024 * 1024 * 1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_handle_zero() {
        let pool = StringPool::default();
        assert_eq!(pool.intern(""), Some(0));
        assert_eq!(pool.resolve_string(0), "");
    }

    #[test]
    fn interning_is_referentially_transparent() {
        let pool = StringPool::default();
        let h1 = pool.intern("hello").unwrap();
        let h2 = pool.intern("hello").unwrap();
        assert_eq!(h1, h2);
        assert_eq!(pool.resolve_string(h1), "hello");
    }

    #[test]
    fn distinct_strings_get_distinct_handles() {
        let pool = StringPool::default();
        let h1 = pool.intern("a").unwrap();
        let h2 = pool.intern("b").unwrap();
        assert_ne!(h1, h2);
    }

    #[test]
    fn exhausted_ceiling_returns_none() {
        let pool = StringPool::new(4);
        assert!(pool.intern("hello").is_none());
    }
}
