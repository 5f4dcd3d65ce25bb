//! Per-row mask storage: the entity mask array and the tracker layers
//! (snapshot / dirty / changed) that back `Added`/`Removed`/`Changed` query
//! modifiers.

use crate::bitset::BitSet;

/// A `BitSet` per entity row, growable as new rows are allocated.
///
/// Used both for the world's live entity masks and for each tracker's
/// snapshot/dirty/changed layers.
#[derive(Debug, Clone, Default)]
pub(crate) struct MaskArray {
    rows: Vec<BitSet>,
    empty: BitSet,
}

impl MaskArray {
    pub(crate) fn new() -> Self {
        Self {
            rows: Vec::new(),
            empty: BitSet::default(),
        }
    }

    /// Ensure storage exists up to and including `row`, zero-extending new
    /// slots so previously-registered traits read as absent on them.
    pub(crate) fn ensure_row(&mut self, row: usize) {
        if row >= self.rows.len() {
            self.rows.resize(row + 1, BitSet::default());
        }
    }

    pub(crate) fn get(&self, row: usize) -> &BitSet {
        self.rows.get(row).unwrap_or(&self.empty)
    }

    pub(crate) fn get_mut(&mut self, row: usize) -> &mut BitSet {
        self.ensure_row(row);
        &mut self.rows[row]
    }

    pub(crate) fn clear_row(&mut self, row: usize) {
        if let Some(bits) = self.rows.get_mut(row) {
            bits.clear_all();
        }
    }

    pub(crate) fn copy_row_from(&mut self, row: usize, other: &BitSet) {
        self.ensure_row(row);
        self.rows[row].copy_from(other);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_row_zero_extends() {
        let mut masks = MaskArray::new();
        masks.get_mut(0).set(3);
        masks.ensure_row(5);
        assert!(masks.get(5).is_empty());
        assert!(masks.get(0).contains(3));
    }

    #[test]
    fn clear_row_resets_bits() {
        let mut masks = MaskArray::new();
        masks.get_mut(2).set(1);
        masks.clear_row(2);
        assert!(masks.get(2).is_empty());
    }

    #[test]
    fn get_on_unallocated_row_returns_empty() {
        let masks = MaskArray::new();
        assert!(masks.get(100).is_empty());
    }

    #[test]
    fn copy_row_from_advances_snapshot() {
        let mut snapshot = MaskArray::new();
        let mut live = BitSet::default();
        live.set(4);
        snapshot.copy_row_from(1, &live);
        assert!(snapshot.get(1).contains(4));
    }
}
