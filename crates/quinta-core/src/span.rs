//! Token spans
//!
//! A `Span` is a half-open interval `[start, end)` over token indices.
//! Construction is fallible: an empty or inverted interval is rejected
//! with `QuintaError::InvalidSpan`, so every `Span` value in the system
//! covers at least one token.

use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::{QuintaError, Result};

/// Half-open token interval `[start, end)` with `end > start`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "(usize, usize)", into = "(usize, usize)")]
pub struct Span {
    start: usize,
    end: usize,
}

impl Span {
    /// Create a span, rejecting `start >= end`
    pub fn new(start: usize, end: usize) -> Result<Self> {
        if start >= end {
            return Err(QuintaError::InvalidSpan {
                start,
                end,
                length: None,
            });
        }
        Ok(Self { start, end })
    }

    /// Create a span that must also fit inside a sequence of `length` tokens
    pub fn bounded(start: usize, end: usize, length: usize) -> Result<Self> {
        let span = Self::new(start, end).map_err(|_| QuintaError::InvalidSpan {
            start,
            end,
            length: Some(length),
        })?;
        span.check_within(length)?;
        Ok(span)
    }

    /// Single-token span at `index`
    pub fn token(index: usize) -> Self {
        Self {
            start: index,
            end: index + 1,
        }
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    /// Number of tokens covered
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Always `false`; kept for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn contains(&self, index: usize) -> bool {
        self.range().contains(&index)
    }

    /// Whether the two spans share at least one token
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Fail fast if the span reaches past a sequence of `length` tokens
    pub fn check_within(&self, length: usize) -> Result<()> {
        if self.end > length {
            return Err(QuintaError::InvalidSpan {
                start: self.start,
                end: self.end,
                length: Some(length),
            });
        }
        Ok(())
    }
}

impl TryFrom<(usize, usize)> for Span {
    type Error = QuintaError;

    fn try_from((start, end): (usize, usize)) -> Result<Self> {
        Self::new(start, end)
    }
}

impl From<Span> for (usize, usize) {
    fn from(span: Span) -> Self {
        (span.start, span.end)
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}
