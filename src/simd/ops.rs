//! Elementwise scalar-op and predicate kernels (spec §4.10 `scalar_op`,
//! `filter`, `count_where`, `find_equal`).

use crate::cell::CellRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Apply `scalar OP cell` to every numeric cell in `input`, writing a
/// `Number` cell into `out` (spec §4.10 `scalar_op`). Non-numeric input
/// cells pass through as `Empty`.
pub fn scalar_op(input: &[CellRecord], scalar: f64, out: &mut [CellRecord], op: ScalarOp) {
    assert!(out.len() >= input.len());
    for (i, cell) in input.iter().enumerate() {
        let value = cell
            .number_value()
            .or_else(|| cell.integer_value().map(|v| v as f64));
        out[i] = CellRecord::EMPTY;
        if let Some(v) = value {
            let result = match op {
                ScalarOp::Add => v + scalar,
                ScalarOp::Sub => v - scalar,
                ScalarOp::Mul => v * scalar,
                ScalarOp::Div => v / scalar,
            };
            out[i].set_number(result);
        }
    }
}

/// Collect every record for which `predicate` holds (spec §4.10 `filter`).
pub fn filter(cells: &[CellRecord], predicate: impl Fn(&CellRecord) -> bool) -> Vec<CellRecord> {
    cells.iter().filter(|c| predicate(c)).cloned().collect()
}

/// Count records for which `predicate` holds (spec §4.10 `count_where`).
pub fn count_where(cells: &[CellRecord], predicate: impl Fn(&CellRecord) -> bool) -> usize {
    cells.iter().filter(|c| predicate(c)).count()
}

/// Index of the first record whose numeric value equals `target`, if any
/// (spec §4.10 `find_equal`).
pub fn find_equal(cells: &[CellRecord], target: f64) -> Option<usize> {
    cells.iter().position(|c| {
        c.number_value() == Some(target) || c.integer_value().map(|v| v as f64) == Some(target)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_op_adds_to_numeric_cells() {
        let mut input = vec![CellRecord::EMPTY; 2];
        input[0].set_number(1.0);
        input[1].set_integer(2);
        let mut out = vec![CellRecord::EMPTY; 2];
        scalar_op(&input, 10.0, &mut out, ScalarOp::Add);
        assert_eq!(out[0].number_value(), Some(11.0));
        assert_eq!(out[1].number_value(), Some(12.0));
    }

    #[test]
    fn filter_and_count_where_agree() {
        let mut cells = vec![CellRecord::EMPTY; 5];
        for (i, cell) in cells.iter_mut().enumerate() {
            cell.set_integer(i as i64);
        }
        let evens = filter(&cells, |c| c.integer_value().unwrap_or(0) % 2 == 0);
        assert_eq!(evens.len(), count_where(&cells, |c| c.integer_value().unwrap_or(0) % 2 == 0));
        assert_eq!(evens.len(), 3);
    }

    #[test]
    fn find_equal_locates_matching_value() {
        let mut cells = vec![CellRecord::EMPTY; 3];
        cells[0].set_number(1.0);
        cells[1].set_number(2.0);
        cells[2].set_number(3.0);
        assert_eq!(find_equal(&cells, 2.0), Some(1));
        assert_eq!(find_equal(&cells, 9.0), None);
    }
}
