//! Per-sheet protection manager (spec §3.8, §4.9).
//!
//! The original engine hashes the protection password with a single
//! unsalted round (`examples/original_source` carries this scheme); spec
//! §9 explicitly rules that out. This implementation follows OOXML's own
//! documented scheme instead: a random salt plus an iterated SHA-512,
//! grounded on the teacher's use of `sha2`/`rand` for its document
//! signature routines.

use bitflags::bitflags;
use rand::RngCore;
use sha2::{Digest, Sha512};

use crate::cell::CellStore;
use crate::coord::Coordinate;
use crate::error::{Error, Result};

/// Default iteration count for the password hash (spec §4.9).
pub const DEFAULT_SPIN_COUNT: u32 = 100_000;

bitflags! {
    /// Closed set of sheet operations that can be individually allowed
    /// while the sheet is protected (spec §3.8).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ProtectionOptions: u32 {
        const SELECT_LOCKED     = 1 << 0;
        const SELECT_UNLOCKED   = 1 << 1;
        const FORMAT_CELLS      = 1 << 2;
        const FORMAT_COLUMNS    = 1 << 3;
        const FORMAT_ROWS       = 1 << 4;
        const INSERT_COLUMNS    = 1 << 5;
        const INSERT_ROWS       = 1 << 6;
        const DELETE_COLUMNS    = 1 << 7;
        const DELETE_ROWS       = 1 << 8;
        const INSERT_HYPERLINKS = 1 << 9;
        const SORT              = 1 << 10;
        const AUTO_FILTER       = 1 << 11;
        const PIVOT_TABLES      = 1 << 12;
        const OBJECTS           = 1 << 13;
        const SCENARIOS         = 1 << 14;
    }
}

impl Default for ProtectionOptions {
    /// Excel's own default when protecting with no explicit options: only
    /// cell/object selection remains unrestricted.
    fn default() -> Self {
        Self::SELECT_LOCKED | Self::SELECT_UNLOCKED
    }
}

#[derive(Debug, Clone)]
struct PasswordHash {
    salt: [u8; 16],
    spin_count: u32,
    hash: [u8; 64],
}

fn derive_hash(password: &str, salt: &[u8; 16], spin_count: u32) -> [u8; 64] {
    let mut state = Sha512::new();
    state.update(salt);
    state.update(password.as_bytes());
    let mut digest: [u8; 64] = state.finalize().into();
    for i in 0..spin_count {
        let mut round = Sha512::new();
        round.update(digest);
        round.update(i.to_le_bytes());
        digest = round.finalize().into();
    }
    digest
}

/// Per-worksheet protection state (spec §3.8).
#[derive(Debug, Default)]
pub struct ProtectionManager {
    is_protected: bool,
    password: Option<PasswordHash>,
    options: ProtectionOptions,
}

impl ProtectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_protected(&self) -> bool {
        self.is_protected
    }

    pub fn options(&self) -> ProtectionOptions {
        self.options
    }

    /// Protect the sheet. If `password` is non-empty, a fresh random salt
    /// is drawn and the spin-counted hash stored; `unprotect` is required
    /// before re-protecting with a different password (spec §8, "Protecting
    /// an already-protected sheet with a different password requires
    /// first unprotecting").
    pub fn protect(&mut self, password: Option<&str>, options: ProtectionOptions) -> Result<()> {
        if self.is_protected {
            return Err(Error::State("sheet is already protected; unprotect first".into()));
        }
        self.options = options;
        self.password = match password {
            Some(p) if !p.is_empty() => {
                let mut salt = [0u8; 16];
                rand::rng().fill_bytes(&mut salt);
                let hash = derive_hash(p, &salt, DEFAULT_SPIN_COUNT);
                Some(PasswordHash {
                    salt,
                    spin_count: DEFAULT_SPIN_COUNT,
                    hash,
                })
            }
            _ => None,
        };
        self.is_protected = true;
        Ok(())
    }

    /// Unprotect the sheet. Succeeds iff no password hash is stored, or
    /// the supplied password's hash matches.
    pub fn unprotect(&mut self, password: Option<&str>) -> Result<()> {
        if !self.is_protected {
            return Ok(());
        }
        match &self.password {
            None => {}
            Some(stored) => {
                let supplied = password.unwrap_or("");
                let candidate = derive_hash(supplied, &stored.salt, stored.spin_count);
                if candidate != stored.hash {
                    return Err(Error::State("incorrect protection password".into()));
                }
            }
        }
        self.is_protected = false;
        self.password = None;
        self.options = ProtectionOptions::default();
        Ok(())
    }

    pub fn is_operation_allowed(&self, op: ProtectionOptions) -> bool {
        !self.is_protected || self.options.contains(op)
    }

    /// Set a cell's `locked` flag via the cell store (spec §4.9).
    pub fn set_cell_locked(&self, store: &mut CellStore, coord: Coordinate, locked: bool) -> bool {
        match store.get_mut(coord) {
            Some(rec) => {
                rec.set_locked(locked);
                true
            }
            None => {
                store.get_or_create(coord).set_locked(locked);
                true
            }
        }
    }

    /// A cell is editable iff the sheet isn't protected, or the cell
    /// itself isn't locked (spec §3.8, §4.9).
    pub fn is_cell_editable(&self, store: &CellStore, coord: Coordinate) -> bool {
        if !self.is_protected {
            return true;
        }
        match store.get(coord) {
            Some(rec) => !rec.is_locked(),
            // Untracked cells default to locked (spec §3.8 "default true").
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protect_without_password_allows_unprotect() {
        let mut mgr = ProtectionManager::new();
        mgr.protect(None, ProtectionOptions::default()).unwrap();
        assert!(mgr.is_protected());
        mgr.unprotect(None).unwrap();
        assert!(!mgr.is_protected());
    }

    #[test]
    fn wrong_password_rejected() {
        let mut mgr = ProtectionManager::new();
        mgr.protect(Some("secret"), ProtectionOptions::default()).unwrap();
        assert!(mgr.unprotect(Some("wrong")).is_err());
        assert!(mgr.unprotect(Some("secret")).is_ok());
    }

    #[test]
    fn reprotecting_without_unprotect_fails() {
        let mut mgr = ProtectionManager::new();
        mgr.protect(None, ProtectionOptions::default()).unwrap();
        assert!(mgr.protect(Some("x"), ProtectionOptions::default()).is_err());
    }

    #[test]
    fn cell_editability_follows_locked_flag_and_protection_state() {
        let mut store = CellStore::new();
        let coord = Coordinate::new(1, 1);
        store.get_or_create(coord).set_locked(true);
        let mut mgr = ProtectionManager::new();
        assert!(mgr.is_cell_editable(&store, coord));
        mgr.protect(None, ProtectionOptions::default()).unwrap();
        assert!(!mgr.is_cell_editable(&store, coord));
        mgr.set_cell_locked(&mut store, coord, false);
        assert!(mgr.is_cell_editable(&store, coord));
    }
}
