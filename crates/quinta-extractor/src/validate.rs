//! Round-trip validation
//!
//! Encodes a sentence, then checks that the encoding can be read back:
//! cuboid recovery finds one box per qualifier, and the joint table's
//! diagonal decodes to the gold entity spans. A cube already stored in the
//! record must survive a dense round trip entry for entry and agree with a
//! fresh encoding.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use quinta_core::{
    CubeEntry, LossyEncodingWarning, NonzeroSpanPolicy, Result, Sentence, Span, SparseCube, Warning,
};

use crate::bio::decode_nonzero_spans;
use crate::cuboid::recover_cuboids;
use crate::encoder::BoxFillEncoder;

/// Outcome of validating one sentence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundTripReport {
    pub article_id: String,
    /// The stored cube's entries equal `from_dense(to_dense(cube))` entries
    pub cube_round_trip: bool,
    /// The stored cube materializes to the freshly encoded one
    pub cube_matches_encoding: bool,
    pub qualifiers: usize,
    pub cuboids: usize,
    pub gold_spans: usize,
    pub decoded_spans: usize,
    pub matched_spans: usize,
    pub warnings: Vec<Warning>,
}

impl RoundTripReport {
    /// Whether the encoding was read back without loss or diagnostics
    pub fn is_clean(&self) -> bool {
        self.cube_round_trip && self.cube_matches_encoding && self.warnings.is_empty()
    }
}

/// Encode `sentence` and check that its grids decode back.
///
/// A record without a stored cube (`(0, 0, 0)` and no entries) passes both
/// stored-cube checks.
pub fn validate_sentence(
    encoder: &BoxFillEncoder,
    sentence: &Sentence,
    policy: NonzeroSpanPolicy,
) -> Result<RoundTripReport> {
    let mut warnings = sentence.validate()?;
    let grids = encoder.encode_grids(sentence)?;
    warnings.extend(grids.warnings);

    let stored = &sentence.quintuplet_matrix;
    let (cube_round_trip, cube_matches_encoding) = if stored.has_volume() || !stored.is_empty() {
        let back = SparseCube::from_dense(&stored.to_dense()?);
        let literal: BTreeSet<CubeEntry> = stored.entries().iter().copied().collect();
        let recovered: BTreeSet<CubeEntry> = back.entries().iter().copied().collect();
        (literal == recovered, *stored == grids.cube)
    } else {
        (true, true)
    };

    let dense = grids.cube.to_dense()?;
    let recovery = recover_cuboids(&dense)?;
    warnings.extend(recovery.warnings);

    let qualifiers = sentence.qualifier_mentions.len();
    if recovery.cuboids.len() != qualifiers {
        warnings.push(
            LossyEncodingWarning {
                sentence: sentence.article_id.clone(),
                expected: qualifiers,
                recovered: recovery.cuboids.len(),
            }
            .into(),
        );
    }

    // the decoder treats 0 as "no label", whatever id the vocabulary gives None
    let none = encoder.vocab().get(quinta_core::vocab::NONE_LABEL)?;
    let diagonal: Vec<_> = grids
        .joint
        .diag()
        .iter()
        .map(|&id| if id == none { 0 } else { id })
        .collect();
    let decoded: BTreeSet<Span> = decode_nonzero_spans(&diagonal, policy).into_iter().collect();
    let gold: BTreeSet<Span> = sentence.entity_mentions.iter().map(|e| e.offset).collect();
    let matched_spans = decoded.intersection(&gold).count();

    if matched_spans != gold.len() || decoded.len() != gold.len() {
        warnings.push(Warning::SpanMismatch {
            sentence: sentence.article_id.clone(),
            decoded: decoded.len(),
            matched: matched_spans,
            gold: gold.len(),
        });
    }

    for warning in &warnings {
        tracing::debug!(article = %sentence.article_id, "{}", warning);
    }
    if !cube_round_trip || !cube_matches_encoding {
        tracing::debug!(
            article = %sentence.article_id,
            cube_round_trip,
            cube_matches_encoding,
            "Stored quintuplet matrix disagrees"
        );
    }

    Ok(RoundTripReport {
        article_id: sentence.article_id.clone(),
        cube_round_trip,
        cube_matches_encoding,
        qualifiers,
        cuboids: recovery.cuboids.len(),
        gold_spans: gold.len(),
        decoded_spans: decoded.len(),
        matched_spans,
        warnings,
    })
}

/// Counts over a set of round-trip reports
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub sentences: usize,
    pub clean: usize,
    pub cube_failures: usize,
    pub cube_mismatches: usize,
    pub lossy: usize,
    pub duplicate_coordinates: usize,
    pub non_rectangular: usize,
    pub span_mismatches: usize,
}

impl ValidationSummary {
    pub fn collect<'a>(reports: impl IntoIterator<Item = &'a RoundTripReport>) -> Self {
        let mut summary = Self::default();
        for report in reports {
            summary.sentences += 1;
            if report.is_clean() {
                summary.clean += 1;
            }
            if !report.cube_round_trip {
                summary.cube_failures += 1;
            }
            if !report.cube_matches_encoding {
                summary.cube_mismatches += 1;
            }
            for warning in &report.warnings {
                match warning {
                    Warning::LossyEncoding(_) => summary.lossy += 1,
                    Warning::DuplicateCoordinates(_) => summary.duplicate_coordinates += 1,
                    Warning::NonRectangularCluster { .. } => summary.non_rectangular += 1,
                    Warning::SpanMismatch { .. } => summary.span_mismatches += 1,
                }
            }
        }
        summary
    }

    /// Human-readable summary
    pub fn report(&self) -> String {
        format!(
            "Round-trip validation\n\
             =====================\n\
             Sentences:              {}\n\
             Clean:                  {}\n\
             Cube round-trip errors: {}\n\
             Stale stored cubes:     {}\n\
             Lossy encodings:        {}\n\
             Duplicate coordinates:  {}\n\
             Non-rectangular:        {}\n\
             Span mismatches:        {}\n",
            self.sentences,
            self.clean,
            self.cube_failures,
            self.cube_mismatches,
            self.lossy,
            self.duplicate_coordinates,
            self.non_rectangular,
            self.span_mismatches,
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
