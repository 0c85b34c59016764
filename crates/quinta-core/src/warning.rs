//! Non-fatal diagnostics
//!
//! Conditions that change semantics without invalidating a result are
//! returned to the caller as values instead of errors. Callers decide
//! whether to log them, count them, or escalate.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::LabelId;

/// Raised when a sparse cube built from raw entries lists the same
/// coordinate more than once
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateCoordinateWarning {
    /// Every coordinate listed more than once
    pub coordinates: Vec<(usize, usize, usize)>,
    /// How many of those coordinates carry differing values
    pub conflicting: usize,
}

/// Raised when cuboid recovery does not give back one box per qualifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LossyEncodingWarning {
    pub sentence: String,
    pub expected: usize,
    pub recovered: usize,
}

/// Any diagnostic surfaced by the encoding and validation stages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    DuplicateCoordinates(DuplicateCoordinateWarning),
    LossyEncoding(LossyEncodingWarning),
    /// A same-label cluster that had to be split into several boxes
    NonRectangularCluster { label: LabelId, cells: usize, boxes: usize },
    /// Diagonal span decoding disagreed with the gold entity spans
    SpanMismatch {
        sentence: String,
        decoded: usize,
        matched: usize,
        gold: usize,
    },
}

impl Warning {
    /// Emit the warning through `tracing`
    pub fn log(&self) {
        tracing::warn!("{}", self);
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateCoordinates(w) => write!(
                f,
                "{} duplicate cube coordinates ({} conflicting)",
                w.coordinates.len(),
                w.conflicting
            ),
            Self::LossyEncoding(w) => write!(
                f,
                "lossy encoding in {:?}: {} qualifiers, {} cuboids recovered",
                w.sentence, w.expected, w.recovered
            ),
            Self::NonRectangularCluster {
                label,
                cells,
                boxes,
            } => write!(
                f,
                "label {} cluster of {} cells split into {} boxes",
                label, cells, boxes
            ),
            Self::SpanMismatch {
                sentence,
                decoded,
                matched,
                gold,
            } => write!(
                f,
                "span mismatch in {:?}: decoded {}, matched {}, gold {}",
                sentence, decoded, matched, gold
            ),
        }
    }
}

impl From<DuplicateCoordinateWarning> for Warning {
    fn from(w: DuplicateCoordinateWarning) -> Self {
        Self::DuplicateCoordinates(w)
    }
}

impl From<LossyEncodingWarning> for Warning {
    fn from(w: LossyEncodingWarning) -> Self {
        Self::LossyEncoding(w)
    }
}
