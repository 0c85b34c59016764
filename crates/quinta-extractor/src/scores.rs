//! Score grids
//!
//! A model emits, per sentence, a joint score array of shape `L x L x C2`
//! and a qualifier score array of shape `L x L x L x C3`. Scores are
//! assumed normalized along the channel axis.

use ndarray::{Array3, Array4, ArrayView3, ArrayView4, Axis};
use serde::{Deserialize, Serialize};

use quinta_core::{QuintaError, Result};

/// Borrowed, shape-checked score grids of one sentence
#[derive(Debug, Clone, Copy)]
pub struct SentenceScores<'a> {
    joint: ArrayView3<'a, f32>,
    qualifier: ArrayView4<'a, f32>,
}

impl<'a> SentenceScores<'a> {
    /// Check that both grids agree on the sequence length
    pub fn new(joint: ArrayView3<'a, f32>, qualifier: ArrayView4<'a, f32>) -> Result<Self> {
        let (rows, cols, _) = joint.dim();
        if rows != cols {
            return Err(QuintaError::ShapeMismatch(format!(
                "joint scores are {rows} x {cols}, expected a square grid"
            )));
        }
        let (qi, qj, qk, _) = qualifier.dim();
        if (qi, qj, qk) != (rows, rows, rows) {
            return Err(QuintaError::ShapeMismatch(format!(
                "qualifier scores are {qi} x {qj} x {qk}, expected {rows} x {rows} x {rows}"
            )));
        }
        Ok(Self { joint, qualifier })
    }

    pub fn seq_len(&self) -> usize {
        self.joint.len_of(Axis(0))
    }

    pub fn joint(&self) -> ArrayView3<'a, f32> {
        self.joint
    }

    pub fn qualifier(&self) -> ArrayView4<'a, f32> {
        self.qualifier
    }

    pub fn joint_channels(&self) -> usize {
        self.joint.len_of(Axis(2))
    }

    pub fn qualifier_channels(&self) -> usize {
        self.qualifier.len_of(Axis(3))
    }
}

/// One line of a score file as written by the model runner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub tokens: Vec<String>,
    #[serde(rename = "jointScore")]
    pub joint_score: Vec<Vec<Vec<f32>>>,
    #[serde(rename = "qScore")]
    pub q_score: Vec<Vec<Vec<Vec<f32>>>>,
}

/// Owned dense score grids parsed from a [`ScoreRecord`]
#[derive(Debug, Clone)]
pub struct OwnedScores {
    pub joint: Array3<f32>,
    pub qualifier: Array4<f32>,
}

impl OwnedScores {
    pub fn view(&self) -> Result<SentenceScores<'_>> {
        SentenceScores::new(self.joint.view(), self.qualifier.view())
    }
}

impl ScoreRecord {
    pub fn sent_text(&self) -> String {
        self.tokens.join(" ")
    }

    /// Convert nested lists into dense arrays, rejecting ragged input
    pub fn to_arrays(&self) -> Result<OwnedScores> {
        let (joint_shape, joint_flat) = flatten3(&self.joint_score)?;
        let (q_shape, q_flat) = flatten4(&self.q_score)?;

        let joint = Array3::from_shape_vec(joint_shape, joint_flat)
            .map_err(|e| QuintaError::ShapeMismatch(e.to_string()))?;
        let qualifier = Array4::from_shape_vec(q_shape, q_flat)
            .map_err(|e| QuintaError::ShapeMismatch(e.to_string()))?;

        Ok(OwnedScores { joint, qualifier })
    }
}

fn ragged(what: &str) -> QuintaError {
    QuintaError::ShapeMismatch(format!("ragged {what} score list"))
}

fn flatten3(nested: &[Vec<Vec<f32>>]) -> Result<((usize, usize, usize), Vec<f32>)> {
    let d0 = nested.len();
    let d1 = nested.first().map_or(0, Vec::len);
    let d2 = nested
        .first()
        .and_then(|plane| plane.first())
        .map_or(0, Vec::len);

    let mut flat = Vec::with_capacity(d0 * d1 * d2);
    for plane in nested {
        if plane.len() != d1 {
            return Err(ragged("joint"));
        }
        for row in plane {
            if row.len() != d2 {
                return Err(ragged("joint"));
            }
            flat.extend_from_slice(row);
        }
    }
    Ok(((d0, d1, d2), flat))
}

fn flatten4(nested: &[Vec<Vec<Vec<f32>>>]) -> Result<((usize, usize, usize, usize), Vec<f32>)> {
    let d0 = nested.len();
    let inner = nested.first().map(|cube| flatten3(cube)).transpose()?;
    let (d1, d2, d3) = inner.map_or((0, 0, 0), |(shape, _)| shape);

    let mut flat = Vec::with_capacity(d0 * d1 * d2 * d3);
    for cube in nested {
        let (shape, values) = flatten3(cube).map_err(|_| ragged("qualifier"))?;
        if shape != (d1, d2, d3) {
            return Err(ragged("qualifier"));
        }
        flat.extend(values);
    }
    Ok(((d0, d1, d2, d3), flat))
}

// ============================================================================
// Tests
// ============================================================================
