//! Box-fill encoder
//!
//! Builds the two label grids of a sentence:
//!
//! - a joint `L x L` table where entity `e` fills the square
//!   `e.offset x e.offset` and relation `(h, t)` fills `h.offset x t.offset`
//! - a sparse `L x L x L` qualifier cube where qualifier `(h, t, v)` fills
//!   the cuboid `h.offset x t.offset x v.offset`
//!
//! Boxes are written in list order; a later overlapping box overwrites an
//! earlier one. Cells nobody writes keep the `None` id.

use ndarray::{s, Array2};

use quinta_core::vocab::NONE_LABEL;
use quinta_core::{CubeEntry, LabelId, LabelVocab, QuintaError, Result, Sentence, SparseCube, Warning};

use crate::LabelEncoder;

/// Label grids of one sentence
#[derive(Debug, Clone)]
pub struct EncodedGrids {
    pub joint: Array2<LabelId>,
    pub cube: SparseCube,
    pub warnings: Vec<Warning>,
}

/// Encodes entities, relations and qualifiers as filled boxes
#[derive(Debug, Clone)]
pub struct BoxFillEncoder {
    vocab: LabelVocab,
    none: LabelId,
}

impl BoxFillEncoder {
    /// Create an encoder; the vocabulary must define `None`.
    ///
    /// Diagonal span decoding reads `0` as "no label", so when `None` is
    /// not id 0 no other label may take that id.
    pub fn new(vocab: LabelVocab) -> Result<Self> {
        let none = vocab.get(NONE_LABEL)?;
        if none != 0 {
            if let Some(name) = vocab.name_of(0) {
                return Err(QuintaError::ConfigError(format!(
                    "label {name:?} has id 0 but \"None\" is {none}"
                )));
            }
        }
        Ok(Self { vocab, none })
    }

    pub fn vocab(&self) -> &LabelVocab {
        &self.vocab
    }

    /// Build the joint table and the qualifier cube
    pub fn encode_grids(&self, sentence: &Sentence) -> Result<EncodedGrids> {
        sentence.validate()?;
        let seq_len = sentence.seq_len();
        let index = sentence.entity_index();
        let offset_of = |id: &str| {
            index
                .get(id)
                .map(|e| e.offset)
                .ok_or_else(|| QuintaError::UnknownEntity(id.to_string()))
        };

        let joint = sentence.entity_mentions.iter().try_fold(
            Array2::from_elem((seq_len, seq_len), self.none),
            |mut grid, entity| -> Result<_> {
                let label = self.vocab.get(&entity.label)?;
                let rows = entity.offset.range();
                grid.slice_mut(s![rows.clone(), rows]).fill(label);
                Ok(grid)
            },
        )?;

        let joint = sentence.relation_mentions.iter().try_fold(
            joint,
            |mut grid, relation| -> Result<_> {
                let head = offset_of(&relation.head_id)?;
                let tail = offset_of(&relation.tail_id)?;
                let label = self.vocab.get(&relation.label)?;
                grid.slice_mut(s![head.range(), tail.range()]).fill(label);
                Ok(grid)
            },
        )?;

        let mut entries: Vec<CubeEntry> = Vec::new();
        for qualifier in &sentence.qualifier_mentions {
            let head = offset_of(&qualifier.head_id)?;
            let tail = offset_of(&qualifier.tail_id)?;
            let value = offset_of(&qualifier.value_id)?;
            let label = self.vocab.get(&qualifier.label)?;
            if label == 0 {
                return Err(QuintaError::InvalidCubeEntry(format!(
                    "qualifier label {:?} has id 0, which the cube reserves for absent cells",
                    qualifier.label
                )));
            }

            for i in head.range() {
                for j in tail.range() {
                    entries.extend(value.range().map(|k| (i, j, k, label)));
                }
            }
        }

        let shape = (seq_len, seq_len, seq_len);
        let (mut cube, duplicates) = SparseCube::from_entries(shape, entries)?;

        let mut warnings = Vec::new();
        if let Some(duplicates) = duplicates {
            // store the materialized cells so the cube itself is duplicate-free
            let cells = cube
                .materialize()
                .into_iter()
                .map(|((i, j, k), value)| (i, j, k, value))
                .collect();
            cube = SparseCube::from_entries(shape, cells)?.0;

            tracing::debug!(
                article = %sentence.article_id,
                duplicates = duplicates.coordinates.len(),
                conflicting = duplicates.conflicting,
                "Qualifier cuboids overlap"
            );
            warnings.push(duplicates.into());
        }

        Ok(EncodedGrids {
            joint,
            cube,
            warnings,
        })
    }

    /// Return a copy of `sentence` with both grids filled in
    pub fn fill(&self, sentence: &Sentence) -> Result<Sentence> {
        let grids = self.encode_grids(sentence)?;
        for warning in &grids.warnings {
            warning.log();
        }

        let mut filled = sentence.clone();
        filled.joint_label_matrix = grids.joint.outer_iter().map(|row| row.to_vec()).collect();
        filled.quintuplet_matrix = grids.cube;
        Ok(filled)
    }
}

impl LabelEncoder for BoxFillEncoder {
    fn encode(&self, sentence: &Sentence) -> Result<Vec<Sentence>> {
        Ok(vec![self.fill(sentence)?])
    }
}

/// Read a sentence's stored joint table back into a dense grid
pub fn joint_grid(sentence: &Sentence) -> Result<Array2<LabelId>> {
    let rows = sentence.joint_label_matrix.len();
    let cols = sentence.joint_label_matrix.first().map_or(0, Vec::len);
    if sentence.joint_label_matrix.iter().any(|row| row.len() != cols) {
        return Err(QuintaError::ShapeMismatch(format!(
            "ragged joint label matrix in {:?}",
            sentence.article_id
        )));
    }
    let flat = sentence.joint_label_matrix.concat();
    Array2::from_shape_vec((rows, cols), flat).map_err(|e| QuintaError::ShapeMismatch(e.to_string()))
}

// ============================================================================
// Tests
// ============================================================================
