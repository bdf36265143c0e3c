//! Merged-region index (spec §3.6, §4.6).

use crate::coord::{Coordinate, Range};
use crate::error::{Error, Result};

/// Index of merged regions for one worksheet. Invariants (spec §3.6): no
/// two regions overlap; no region is a single cell.
#[derive(Debug, Default)]
pub struct MergeIndex {
    regions: Vec<Range>,
}

impl MergeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt to merge `region`. Rejects invalid regions, 1x1 regions,
    /// and regions overlapping any existing region.
    pub fn merge(&mut self, region: Range) -> Result<()> {
        if !region.is_valid() {
            return Err(Error::Argument(format!("invalid merge region {}", region.to_a1())));
        }
        if region.is_single_cell() {
            return Err(Error::Argument("cannot merge a single cell".into()));
        }
        if self.regions.iter().any(|r| r.overlaps(&region)) {
            return Err(Error::State(format!(
                "merge region {} overlaps an existing merge",
                region.to_a1()
            )));
        }
        self.regions.push(region);
        Ok(())
    }

    /// Find and delete the unique region containing `(row, col)`.
    pub fn unmerge(&mut self, coord: Coordinate) -> bool {
        if let Some(pos) = self.regions.iter().position(|r| r.contains(coord)) {
            self.regions.remove(pos);
            true
        } else {
            false
        }
    }

    /// Delete every region overlapping `range`, returning the count removed.
    pub fn unmerge_in(&mut self, range: Range) -> usize {
        let before = self.regions.len();
        self.regions.retain(|r| !r.overlaps(&range));
        before - self.regions.len()
    }

    /// Return the unique region containing `coord`, if any.
    pub fn contains(&self, coord: Coordinate) -> Option<&Range> {
        self.regions.iter().find(|r| r.contains(coord))
    }

    pub fn is_merged(&self, coord: Coordinate) -> bool {
        self.contains(coord).is_some()
    }

    pub fn all(&self) -> impl Iterator<Item = &Range> {
        self.regions.iter()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Shift every region's coordinates per `f`, dropping a region if
    /// either corner maps to `None` (spec §4.5 interaction with row/column
    /// insert-delete; mirrors `CellStore::transform`'s relocate-or-delete
    /// shape).
    pub fn transform(&mut self, mut f: impl FnMut(Coordinate) -> Option<Coordinate>) {
        self.regions.retain_mut(|r| match (f(r.start), f(r.end)) {
            (Some(start), Some(end)) => {
                *r = Range::new(start, end);
                true
            }
            _ => false,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_and_query() {
        let mut idx = MergeIndex::new();
        let region = Range::parse_a1("A1:C1").unwrap();
        idx.merge(region).unwrap();
        assert!(idx.is_merged(Coordinate::new(1, 2)));
        assert!(!idx.is_merged(Coordinate::new(2, 1)));
    }

    #[test]
    fn rejects_single_cell_and_overlap() {
        let mut idx = MergeIndex::new();
        assert!(idx.merge(Range::parse_a1("A1").unwrap()).is_err());
        idx.merge(Range::parse_a1("A1:B2").unwrap()).unwrap();
        assert!(idx.merge(Range::parse_a1("B2:C3").unwrap()).is_err());
    }

    #[test]
    fn unmerge_removes_region() {
        let mut idx = MergeIndex::new();
        idx.merge(Range::parse_a1("A1:C1").unwrap()).unwrap();
        assert!(idx.unmerge(Coordinate::new(1, 2)));
        assert!(!idx.is_merged(Coordinate::new(1, 1)));
        assert_eq!(idx.len(), 0);
    }

    #[test]
    fn unmerge_in_deletes_overlapping() {
        let mut idx = MergeIndex::new();
        idx.merge(Range::parse_a1("A1:B2").unwrap()).unwrap();
        idx.merge(Range::parse_a1("D1:E2").unwrap()).unwrap();
        let removed = idx.unmerge_in(Range::parse_a1("A1:C3").unwrap());
        assert_eq!(removed, 1);
        assert_eq!(idx.len(), 1);
    }
}
