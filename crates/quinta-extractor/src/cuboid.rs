//! Exact cuboid recovery
//!
//! Reads qualifier facts back out of a dense label volume. Cells are grouped
//! by label and split into 6-connected components. A component that fills
//! its bounding box exactly is one cuboid. Anything else is decomposed
//! greedily into maximal boxes and reported.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use ndarray::{ArrayBase, Data, Ix3};

use quinta_core::{LabelId, Result, Span, Warning};

type Cell = (usize, usize, usize);

/// An axis-aligned box of one label in the qualifier volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cuboid {
    pub head: Span,
    pub tail: Span,
    pub value: Span,
    pub label: LabelId,
}

impl Cuboid {
    pub fn volume(&self) -> usize {
        self.head.len() * self.tail.len() * self.value.len()
    }
}

/// Cuboids found in a volume, with any non-rectangular clusters reported
#[derive(Debug, Clone, Default)]
pub struct CuboidRecovery {
    pub cuboids: Vec<Cuboid>,
    pub warnings: Vec<Warning>,
}

/// Recover the cuboids of a dense qualifier volume.
///
/// Output is ordered by label, then by the first cell of each box.
pub fn recover_cuboids<S>(dense: &ArrayBase<S, Ix3>) -> Result<CuboidRecovery>
where
    S: Data<Elem = LabelId>,
{
    let mut by_label: BTreeMap<LabelId, BTreeSet<Cell>> = BTreeMap::new();
    for ((i, j, k), &value) in dense.indexed_iter() {
        if value != 0 {
            by_label.entry(value).or_default().insert((i, j, k));
        }
    }

    let mut recovery = CuboidRecovery::default();
    for (label, mut cells) in by_label {
        while let Some(seed) = cells.pop_first() {
            let component = take_component(&mut cells, seed);
            let (lo, hi) = bounding_box(&component);

            if box_volume(lo, hi) == component.len() {
                recovery.cuboids.push(to_cuboid(lo, hi, label)?);
                continue;
            }

            let boxes = decompose(component.clone());
            tracing::debug!(
                label,
                cells = component.len(),
                boxes = boxes.len(),
                "Non-rectangular qualifier cluster"
            );
            recovery.warnings.push(Warning::NonRectangularCluster {
                label,
                cells: component.len(),
                boxes: boxes.len(),
            });
            for (lo, hi) in boxes {
                recovery.cuboids.push(to_cuboid(lo, hi, label)?);
            }
        }
    }

    Ok(recovery)
}

/// Remove and return the 6-connected component grown from `seed`,
/// which the caller has already taken out of `cells`
fn take_component(cells: &mut BTreeSet<Cell>, seed: Cell) -> BTreeSet<Cell> {
    let mut component = BTreeSet::new();
    let mut queue = VecDeque::from([seed]);

    while let Some(cell) = queue.pop_front() {
        component.insert(cell);
        for neighbor in neighbors(cell) {
            if cells.remove(&neighbor) {
                queue.push_back(neighbor);
            }
        }
    }
    component
}

fn neighbors((i, j, k): Cell) -> impl Iterator<Item = Cell> {
    let below = [
        i.checked_sub(1).map(|i| (i, j, k)),
        j.checked_sub(1).map(|j| (i, j, k)),
        k.checked_sub(1).map(|k| (i, j, k)),
    ];
    let above = [Some((i + 1, j, k)), Some((i, j + 1, k)), Some((i, j, k + 1))];
    below.into_iter().chain(above).flatten()
}

/// Inclusive bounds of a non-empty cell set
fn bounding_box(cells: &BTreeSet<Cell>) -> (Cell, Cell) {
    let mut lo = (usize::MAX, usize::MAX, usize::MAX);
    let mut hi = (0, 0, 0);
    for &(i, j, k) in cells {
        lo = (lo.0.min(i), lo.1.min(j), lo.2.min(k));
        hi = (hi.0.max(i), hi.1.max(j), hi.2.max(k));
    }
    (lo, hi)
}

fn box_volume(lo: Cell, hi: Cell) -> usize {
    (hi.0 - lo.0 + 1) * (hi.1 - lo.1 + 1) * (hi.2 - lo.2 + 1)
}

/// Greedy maximal-box cover of a cell set.
///
/// Starting from the smallest remaining cell, grow along `k`, then `j`,
/// then `i` while every cell of the next slab is still present.
fn decompose(mut cells: BTreeSet<Cell>) -> Vec<(Cell, Cell)> {
    let mut boxes = Vec::new();

    while let Some((i0, j0, k0)) = cells.first().copied() {
        let mut k1 = k0;
        while cells.contains(&(i0, j0, k1 + 1)) {
            k1 += 1;
        }

        let mut j1 = j0;
        while (k0..=k1).all(|k| cells.contains(&(i0, j1 + 1, k))) {
            j1 += 1;
        }

        let mut i1 = i0;
        while (j0..=j1).all(|j| (k0..=k1).all(|k| cells.contains(&(i1 + 1, j, k)))) {
            i1 += 1;
        }

        for i in i0..=i1 {
            for j in j0..=j1 {
                for k in k0..=k1 {
                    cells.remove(&(i, j, k));
                }
            }
        }
        boxes.push(((i0, j0, k0), (i1, j1, k1)));
    }

    boxes
}

fn to_cuboid(lo: Cell, hi: Cell, label: LabelId) -> Result<Cuboid> {
    Ok(Cuboid {
        head: Span::new(lo.0, hi.0 + 1)?,
        tail: Span::new(lo.1, hi.1 + 1)?,
        value: Span::new(lo.2, hi.2 + 1)?,
        label,
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{s, Array3};

    fn span(start: usize, end: usize) -> Span {
        Span::new(start, end).unwrap()
    }

    fn fill(dense: &mut Array3<LabelId>, c: &Cuboid) {
        dense
            .slice_mut(s![c.head.range(), c.tail.range(), c.value.range()])
            .fill(c.label);
    }

    #[test]
    fn test_single_box() {
        let mut dense = Array3::zeros((5, 5, 5));
        let expected = Cuboid {
            head: span(0, 2),
            tail: span(2, 3),
            value: span(3, 5),
            label: 2,
        };
        fill(&mut dense, &expected);

        let recovery = recover_cuboids(&dense).unwrap();
        assert_eq!(recovery.cuboids, vec![expected]);
        assert!(recovery.warnings.is_empty());
        assert_eq!(expected.volume(), 4);
    }

    #[test]
    fn test_disjoint_same_label() {
        let mut dense = Array3::zeros((6, 6, 6));
        let a = Cuboid {
            head: span(0, 1),
            tail: span(1, 2),
            value: span(2, 3),
            label: 3,
        };
        let b = Cuboid {
            head: span(3, 5),
            tail: span(4, 5),
            value: span(5, 6),
            label: 3,
        };
        fill(&mut dense, &a);
        fill(&mut dense, &b);

        let recovery = recover_cuboids(&dense).unwrap();
        assert_eq!(recovery.cuboids, vec![a, b]);
    }

    #[test]
    fn test_touching_boxes_of_different_labels_stay_apart() {
        let mut dense = Array3::zeros((4, 4, 4));
        let a = Cuboid {
            head: span(0, 1),
            tail: span(1, 2),
            value: span(2, 3),
            label: 2,
        };
        let b = Cuboid {
            head: span(0, 1),
            tail: span(1, 2),
            value: span(3, 4),
            label: 3,
        };
        fill(&mut dense, &a);
        fill(&mut dense, &b);

        let recovery = recover_cuboids(&dense).unwrap();
        assert_eq!(recovery.cuboids, vec![a, b]);
        assert!(recovery.warnings.is_empty());
    }

    #[test]
    fn test_l_shape_is_split_and_reported() {
        let mut dense = Array3::zeros((3, 3, 3));
        dense[[0, 0, 0]] = 2;
        dense[[0, 0, 1]] = 2;
        dense[[0, 1, 0]] = 2;

        let recovery = recover_cuboids(&dense).unwrap();
        assert_eq!(
            recovery.cuboids,
            vec![
                Cuboid {
                    head: span(0, 1),
                    tail: span(0, 1),
                    value: span(0, 2),
                    label: 2,
                },
                Cuboid {
                    head: span(0, 1),
                    tail: span(1, 2),
                    value: span(0, 1),
                    label: 2,
                },
            ]
        );
        assert_eq!(
            recovery.warnings,
            vec![Warning::NonRectangularCluster {
                label: 2,
                cells: 3,
                boxes: 2,
            }]
        );
    }

    #[test]
    fn test_empty_volume() {
        let dense = Array3::<LabelId>::zeros((0, 0, 0));
        let recovery = recover_cuboids(&dense).unwrap();
        assert!(recovery.cuboids.is_empty());
    }
}
