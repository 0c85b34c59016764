//! Sparse cube codec
//!
//! Qualifier label volumes are `L x L x L` grids that are almost entirely
//! zero. `SparseCube` keeps only the non-zero cells as `(i, j, k, value)`
//! entries next to the volume's shape. `0` means "absent" and is never
//! stored. A `(0, 0, 0)` shape stands for "no volume computed".
//!
//! Equality is defined over the materialized dense form: entry order does
//! not matter, and a repeated coordinate counts once with its last value.

use std::collections::{BTreeMap, HashMap};

use ndarray::{Array3, ArrayBase, Data, Ix3};
use serde::{Deserialize, Serialize};

use crate::warning::DuplicateCoordinateWarning;
use crate::{LabelId, QuintaError, Result};

/// One stored cell: `(i, j, k, value)`
pub type CubeEntry = (usize, usize, usize, LabelId);

type Coordinate = (usize, usize, usize);

/// Compact non-zero representation of a 3-D label volume
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SparseCube {
    shape: (usize, usize, usize),
    entries: Vec<CubeEntry>,
}

impl SparseCube {
    /// The "no volume" cube
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from a raw entry list.
    ///
    /// Out-of-range coordinates and zero values are rejected. Repeated
    /// coordinates are accepted but reported, since materializing them
    /// silently keeps only the last value.
    pub fn from_entries(
        shape: (usize, usize, usize),
        entries: Vec<CubeEntry>,
    ) -> Result<(Self, Option<DuplicateCoordinateWarning>)> {
        let cube = Self { shape, entries };
        let warning = cube.validate()?;
        Ok((cube, warning))
    }

    /// Scan a dense volume and keep every non-zero cell.
    ///
    /// The result is duplicate-free by construction.
    pub fn from_dense<S>(dense: &ArrayBase<S, Ix3>) -> Self
    where
        S: Data<Elem = LabelId>,
    {
        let entries = dense
            .indexed_iter()
            .filter(|(_, value)| **value != 0)
            .map(|((i, j, k), &value)| (i, j, k, value))
            .collect();

        Self {
            shape: dense.dim(),
            entries,
        }
    }

    /// Materialize into a zero-filled dense volume of `shape`.
    ///
    /// Fails fast on an out-of-range coordinate. Conflicting duplicates
    /// resolve to the last entry and are logged.
    pub fn to_dense(&self) -> Result<Array3<LabelId>> {
        self.numel()?;
        let mut dense = Array3::<LabelId>::zeros(self.shape);
        let mut conflicts = 0usize;

        for &(i, j, k, value) in &self.entries {
            let cell = dense
                .get_mut((i, j, k))
                .ok_or_else(|| self.out_of_bounds((i, j, k, value)))?;
            if *cell != 0 && *cell != value {
                conflicts += 1;
            }
            *cell = value;
        }

        if conflicts > 0 {
            tracing::warn!(
                conflicts,
                shape = ?self.shape,
                "Materialized cube with conflicting duplicate coordinates; last entry kept"
            );
        }

        Ok(dense)
    }

    /// Nested-list view of the dense volume
    pub fn to_nested(&self) -> Result<Vec<Vec<Vec<LabelId>>>> {
        let dense = self.to_dense()?;
        Ok(dense
            .outer_iter()
            .map(|table| table.outer_iter().map(|row| row.to_vec()).collect())
            .collect())
    }

    /// Check bounds and the sparsity invariant, and report duplicates
    pub fn validate(&self) -> Result<Option<DuplicateCoordinateWarning>> {
        let (ni, nj, nk) = self.shape;
        for &entry in &self.entries {
            let (i, j, k, value) = entry;
            if i >= ni || j >= nj || k >= nk {
                return Err(self.out_of_bounds(entry));
            }
            if value == 0 {
                return Err(QuintaError::InvalidCubeEntry(format!(
                    "explicit zero stored at ({i}, {j}, {k})"
                )));
            }
        }
        Ok(self.duplicate_report())
    }

    /// Report repeated coordinates, if any
    pub fn duplicate_report(&self) -> Option<DuplicateCoordinateWarning> {
        let mut seen: HashMap<Coordinate, Vec<LabelId>> = HashMap::new();
        for &(i, j, k, value) in &self.entries {
            seen.entry((i, j, k)).or_default().push(value);
        }

        let mut coordinates = Vec::new();
        let mut conflicting = 0;
        for (coordinate, values) in seen {
            if values.len() > 1 {
                if values.iter().any(|v| *v != values[0]) {
                    conflicting += 1;
                }
                coordinates.push(coordinate);
            }
        }

        if coordinates.is_empty() {
            return None;
        }
        coordinates.sort_unstable();
        Some(DuplicateCoordinateWarning {
            coordinates,
            conflicting,
        })
    }

    /// Coordinate -> value map with last-write-wins, zeros dropped
    pub fn materialize(&self) -> BTreeMap<Coordinate, LabelId> {
        let mut cells = BTreeMap::new();
        for &(i, j, k, value) in &self.entries {
            if value == 0 {
                cells.remove(&(i, j, k));
            } else {
                cells.insert((i, j, k), value);
            }
        }
        cells
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        self.shape
    }

    pub fn entries(&self) -> &[CubeEntry] {
        &self.entries
    }

    /// Number of stored entries
    pub fn nnz(&self) -> usize {
        self.entries.len()
    }

    /// Number of cells in the conceptual dense volume.
    ///
    /// Fails with `ShapeMismatch` when the shape is too large to index.
    pub fn numel(&self) -> Result<usize> {
        let (i, j, k) = self.shape;
        i.checked_mul(j)
            .and_then(|n| n.checked_mul(k))
            .filter(|&n| n <= isize::MAX as usize)
            .ok_or_else(|| {
                QuintaError::ShapeMismatch(format!("cube shape {:?} overflows", self.shape))
            })
    }

    /// Whether no cell is stored
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether this is the "no volume" cube
    pub fn has_volume(&self) -> bool {
        let (i, j, k) = self.shape;
        i > 0 && j > 0 && k > 0
    }

    /// Fraction of stored cells, `0.0` for a cube without volume
    pub fn density(&self) -> Result<f64> {
        Ok(match self.numel()? {
            0 => 0.0,
            n => self.materialize().len() as f64 / n as f64,
        })
    }

    fn out_of_bounds(&self, (i, j, k, value): CubeEntry) -> QuintaError {
        QuintaError::InvalidCubeEntry(format!(
            "({i}, {j}, {k}) = {value} lies outside shape {:?}",
            self.shape
        ))
    }
}

impl PartialEq for SparseCube {
    fn eq(&self, other: &Self) -> bool {
        self.shape == other.shape && self.materialize() == other.materialize()
    }
}

impl Eq for SparseCube {}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_entry_to_dense() {
        let (cube, warning) = SparseCube::from_entries((2, 2, 2), vec![(0, 1, 1, 5)]).unwrap();
        assert!(warning.is_none());

        let dense = cube.to_dense().unwrap();
        assert_eq!(dense.dim(), (2, 2, 2));
        assert_eq!(dense[[0, 1, 1]], 5);
        assert_eq!(dense.iter().filter(|&&v| v != 0).count(), 1);
    }

    #[test]
    fn test_empty_cube_round_trip() {
        let cube = SparseCube::empty();
        assert!(!cube.has_volume());

        let dense = cube.to_dense().unwrap();
        assert_eq!(dense.len(), 0);
        assert_eq!(dense.dim(), (0, 0, 0));
        assert_eq!(SparseCube::from_dense(&dense), cube);
    }

    #[test]
    fn test_zero_sized_dimension_preserved() {
        let dense = Array3::<LabelId>::zeros((3, 0, 2));
        let cube = SparseCube::from_dense(&dense);
        assert_eq!(cube.shape(), (3, 0, 2));
        assert_eq!(cube.to_dense().unwrap().dim(), (3, 0, 2));
    }

    #[test]
    fn test_equality_ignores_entry_order() {
        let (a, _) =
            SparseCube::from_entries((3, 3, 3), vec![(0, 0, 1, 2), (2, 1, 0, 4)]).unwrap();
        let (b, _) =
            SparseCube::from_entries((3, 3, 3), vec![(2, 1, 0, 4), (0, 0, 1, 2)]).unwrap();
        assert_eq!(a, b);

        let (c, _) = SparseCube::from_entries((3, 3, 4), vec![(0, 0, 1, 2), (2, 1, 0, 4)]).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_duplicates_are_flagged() {
        let entries = vec![(0, 0, 0, 3), (1, 1, 1, 2), (0, 0, 0, 4), (1, 1, 1, 2)];
        let (cube, warning) = SparseCube::from_entries((2, 2, 2), entries).unwrap();
        let warning = warning.expect("duplicates must be reported");

        assert_eq!(warning.coordinates, vec![(0, 0, 0), (1, 1, 1)]);
        assert_eq!(warning.conflicting, 1);

        // Last write wins once materialized
        let dense = cube.to_dense().unwrap();
        assert_eq!(dense[[0, 0, 0]], 4);
    }

    #[test]
    fn test_duplicate_equal_to_collapsed() {
        let (dup, _) =
            SparseCube::from_entries((2, 2, 2), vec![(0, 0, 0, 3), (0, 0, 0, 3)]).unwrap();
        let (single, _) = SparseCube::from_entries((2, 2, 2), vec![(0, 0, 0, 3)]).unwrap();
        assert_eq!(dup, single);
    }

    #[test]
    fn test_rejects_out_of_bounds_and_zero() {
        assert!(SparseCube::from_entries((2, 2, 2), vec![(2, 0, 0, 1)]).is_err());
        assert!(SparseCube::from_entries((2, 2, 2), vec![(0, 0, 0, 0)]).is_err());
    }

    #[test]
    fn test_to_dense_fails_fast_on_unchecked_input() {
        let cube: SparseCube =
            serde_json::from_str(r#"{"shape":[1,1,1],"entries":[[0,0,3,7]]}"#).unwrap();
        assert!(cube.to_dense().is_err());
    }

    #[test]
    fn test_oversized_shape_is_rejected() {
        let cube: SparseCube = serde_json::from_str(
            r#"{"shape":[4294967296,4294967296,2],"entries":[]}"#,
        )
        .unwrap();
        assert!(cube.has_volume());
        assert!(matches!(cube.numel(), Err(QuintaError::ShapeMismatch(_))));
        assert!(matches!(cube.density(), Err(QuintaError::ShapeMismatch(_))));
        assert!(matches!(cube.to_dense(), Err(QuintaError::ShapeMismatch(_))));
    }

    #[test]
    fn test_wire_format() {
        let (cube, _) = SparseCube::from_entries((2, 3, 4), vec![(1, 2, 3, 9)]).unwrap();
        let json = serde_json::to_value(&cube).unwrap();
        assert_eq!(json["shape"], serde_json::json!([2, 3, 4]));
        assert_eq!(json["entries"], serde_json::json!([[1, 2, 3, 9]]));
    }

    #[test]
    fn test_density_and_nested() {
        let (cube, _) = SparseCube::from_entries((1, 2, 2), vec![(0, 1, 0, 6)]).unwrap();
        assert!((cube.density().unwrap() - 0.25).abs() < 1e-12);
        assert_eq!(cube.to_nested().unwrap(), vec![vec![vec![0, 0], vec![6, 0]]]);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn dense_volume() -> impl Strategy<Value = Array3<LabelId>> {
        (0usize..5, 0usize..5, 0usize..5).prop_flat_map(|shape| {
            let len = shape.0 * shape.1 * shape.2;
            prop::collection::vec(prop_oneof![3 => Just(0u32), 1 => 1u32..20], len).prop_map(
                move |cells| Array3::from_shape_vec(shape, cells).expect("length matches shape"),
            )
        })
    }

    proptest! {
        #[test]
        fn dense_round_trip(dense in dense_volume()) {
            let cube = SparseCube::from_dense(&dense);
            prop_assert!(cube.entries().iter().all(|e| e.3 != 0));
            prop_assert!(cube.duplicate_report().is_none());
            prop_assert_eq!(cube.to_dense().unwrap(), dense);
        }

        #[test]
        fn equality_is_order_independent(dense in dense_volume(), seed in any::<u64>()) {
            let cube = SparseCube::from_dense(&dense);
            let mut shuffled = cube.entries().to_vec();
            // Deterministic rotation stands in for an arbitrary permutation
            if !shuffled.is_empty() {
                let by = (seed as usize) % shuffled.len();
                shuffled.rotate_left(by);
                shuffled.reverse();
            }
            let (other, warning) = SparseCube::from_entries(cube.shape(), shuffled).unwrap();
            prop_assert!(warning.is_none());
            prop_assert_eq!(other, cube);
        }
    }
}
