//! Soft joint decoder
//!
//! Decodes one sentence's score grids in three passes:
//!
//! 1. Boundary detection: adjacent tokens whose row and column score
//!    vectors differ by more than `separate_threshold` (averaged L2
//!    distance) are split. The boundaries cut `[0, L)` into candidate spans.
//! 2. Entities: every candidate span whose square block, averaged over
//!    cells, scores an entity label strictly above `None`.
//! 3. Relations over ordered pairs and qualifiers over ordered triples of
//!    distinct entity spans, by the same block-average rule.
//!
//! The decoder holds no state between sentences. Work per sentence is
//! `O(E^3 * span volume)` in the entity count `E`, which is capped by
//! `max_entities`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ndarray::{s, Array1, ArrayView, ArrayView3, ArrayView4, Axis, Dimension};

use quinta_core::{DecoderConfig, LabelId, LabelPartition, LabelVocab, QuintaError, Result, Span};

use crate::scores::SentenceScores;
use crate::{DecodedSentence, QuintupletDecoder};

// ============================================================================
// Cancellation
// ============================================================================

/// Cooperative cancellation flag shared between a caller and decoders
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(QuintaError::Cancelled)
        } else {
            Ok(())
        }
    }
}

// ============================================================================
// Decoder
// ============================================================================

/// Decodes entities, relations and qualifiers from soft score grids
#[derive(Debug, Clone)]
pub struct SoftJointDecoder {
    partition: LabelPartition,
    config: DecoderConfig,
}

impl SoftJointDecoder {
    /// Create a decoder from a label vocabulary
    pub fn new(vocab: &LabelVocab, config: DecoderConfig) -> Result<Self> {
        Self::from_partition(vocab.partition()?, config)
    }

    /// Create a decoder from an already validated label partition
    pub fn from_partition(partition: LabelPartition, config: DecoderConfig) -> Result<Self> {
        config.validate()?;
        if partition.entity.is_empty() {
            return Err(QuintaError::ConfigError(
                "entity label set is empty".to_string(),
            ));
        }
        Ok(Self { partition, config })
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    pub fn partition(&self) -> &LabelPartition {
        &self.partition
    }

    fn check_channels(&self, scores: &SentenceScores<'_>) -> Result<()> {
        let joint_required = self.partition.joint_channels_required();
        if scores.joint_channels() < joint_required {
            return Err(QuintaError::ShapeMismatch(format!(
                "joint scores have {} channels, labels need {}",
                scores.joint_channels(),
                joint_required
            )));
        }

        // an empty qualifier set never reads the qualifier grid
        if self.partition.qualifier.is_empty() {
            return Ok(());
        }
        let qualifier_required = self.partition.qualifier_channels_required();
        if scores.qualifier_channels() < qualifier_required {
            return Err(QuintaError::ShapeMismatch(format!(
                "qualifier scores have {} channels, labels need {}",
                scores.qualifier_channels(),
                qualifier_required
            )));
        }
        Ok(())
    }

    /// Decode one sentence
    pub fn decode_sentence(
        &self,
        scores: &SentenceScores<'_>,
        cancel: &CancellationToken,
    ) -> Result<DecodedSentence> {
        self.check_channels(scores)?;
        cancel.check()?;

        let seq_len = scores.seq_len();
        let joint = scores.joint();
        let qualifier = scores.qualifier();

        let boundaries = separate_positions(joint, self.config.separate_threshold);
        let candidates = candidate_spans(&boundaries, seq_len);
        let entities = self.decode_entities(joint, &candidates);
        cancel.check()?;

        let spans: Vec<Span> = entities.keys().copied().collect();
        let relations = self.decode_relations(joint, &spans, cancel)?;
        let qualifiers = self.decode_qualifiers(qualifier, &spans, cancel)?;
        let decoded = DecodedSentence {
            boundaries,
            entities,
            relations,
            qualifiers,
        };

        tracing::trace!(
            seq_len,
            boundaries = decoded.boundaries.len(),
            entities = decoded.entities.len(),
            relations = decoded.relations.len(),
            qualifiers = decoded.qualifiers.len(),
            "Decoded sentence"
        );

        Ok(decoded)
    }

    /// Accept candidate spans whose best entity label beats `None`
    fn decode_entities(
        &self,
        joint: ArrayView3<'_, f32>,
        candidates: &[Span],
    ) -> BTreeMap<Span, LabelId> {
        let mut accepted: Vec<(Span, LabelId, f32)> = Vec::new();
        for &span in candidates {
            let block = joint.slice(s![span.range(), span.range(), ..]);
            if let Some((label, margin)) =
                pick_label(&channel_mean(block), &self.partition.entity, self.partition.none)
            {
                accepted.push((span, label, margin));
            }
        }
        self.cap_entities(accepted)
            .into_iter()
            .map(|(span, label, _)| (span, label))
            .collect()
    }

    /// Relations over ordered pairs of distinct spans
    fn decode_relations(
        &self,
        joint: ArrayView3<'_, f32>,
        spans: &[Span],
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<(Span, Span), LabelId>> {
        let mut relations = BTreeMap::new();
        if self.partition.relation.is_empty() {
            return Ok(relations);
        }
        for &head in spans {
            cancel.check()?;
            for &tail in spans.iter().filter(|&&tail| tail != head) {
                let block = joint.slice(s![head.range(), tail.range(), ..]);
                if let Some((label, _)) =
                    pick_label(&channel_mean(block), &self.partition.relation, self.partition.none)
                {
                    relations.insert((head, tail), label);
                }
            }
        }
        Ok(relations)
    }

    /// Qualifiers over ordered triples of pairwise distinct spans
    fn decode_qualifiers(
        &self,
        qualifier: ArrayView4<'_, f32>,
        spans: &[Span],
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<(Span, Span, Span), LabelId>> {
        let mut qualifiers = BTreeMap::new();
        if self.partition.qualifier.is_empty() {
            return Ok(qualifiers);
        }
        for &head in spans {
            cancel.check()?;
            for &tail in spans.iter().filter(|&&tail| tail != head) {
                for &value in spans.iter().filter(|&&value| value != head && value != tail) {
                    let block = qualifier.slice(s![head.range(), tail.range(), value.range(), ..]);
                    if let Some((label, _)) =
                        pick_label(&channel_mean(block), &self.partition.qualifier, self.partition.none)
                    {
                        qualifiers.insert((head, tail, value), label);
                    }
                }
            }
        }
        Ok(qualifiers)
    }

    /// Keep at most `max_entities` spans, preferring the largest margin
    /// over `None` and then the earlier span
    fn cap_entities(&self, mut accepted: Vec<(Span, LabelId, f32)>) -> Vec<(Span, LabelId, f32)> {
        let max = self.config.max_entities;
        if accepted.len() <= max {
            return accepted;
        }

        tracing::warn!(
            accepted = accepted.len(),
            max_entities = max,
            "Entity cap reached; keeping the most confident spans"
        );
        accepted.sort_by(|a, b| b.2.total_cmp(&a.2).then(a.0.cmp(&b.0)));
        accepted.truncate(max);
        accepted.sort_by_key(|&(span, _, _)| span);
        accepted
    }
}

impl QuintupletDecoder for SoftJointDecoder {
    fn decode(
        &self,
        scores: &SentenceScores<'_>,
        cancel: &CancellationToken,
    ) -> Result<DecodedSentence> {
        self.decode_sentence(scores, cancel)
    }
}

// ============================================================================
// Scoring helpers
// ============================================================================

/// Positions `i` after which a new span starts.
///
/// For each `i` in `0..L-1` the distance between tokens `i` and `i + 1` is
/// the mean of the L2 distance between their score rows and between their
/// score columns. Positions whose distance exceeds `threshold` are
/// returned in ascending order.
pub fn separate_positions(joint: ArrayView3<'_, f32>, threshold: f32) -> Vec<usize> {
    let seq_len = joint.len_of(Axis(0));
    let threshold = f64::from(threshold);

    (0..seq_len.saturating_sub(1))
        .filter(|&i| {
            let rows = l2_distance(
                joint.index_axis(Axis(0), i),
                joint.index_axis(Axis(0), i + 1),
            );
            let cols = l2_distance(
                joint.index_axis(Axis(1), i),
                joint.index_axis(Axis(1), i + 1),
            );
            (rows + cols) / 2.0 > threshold
        })
        .collect()
}

fn l2_distance<D: Dimension>(a: ArrayView<'_, f32, D>, b: ArrayView<'_, f32, D>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            let d = f64::from(x) - f64::from(y);
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

/// Cut `[0, seq_len)` after every boundary position.
///
/// No boundaries yield the single span `[0, seq_len)`; an empty sequence
/// yields no spans.
pub fn candidate_spans(boundaries: &[usize], seq_len: usize) -> Vec<Span> {
    let mut cuts: Vec<usize> = boundaries
        .iter()
        .map(|&b| b + 1)
        .filter(|&cut| cut < seq_len)
        .collect();
    cuts.sort_unstable();
    cuts.dedup();

    std::iter::once(0)
        .chain(cuts.iter().copied())
        .zip(cuts.iter().copied().chain(std::iter::once(seq_len)))
        .filter_map(|(start, end)| Span::new(start, end).ok())
        .collect()
}

/// Mean score vector of a block, averaged over every cell
fn channel_mean<D: Dimension>(block: ArrayView<'_, f32, D>) -> Array1<f32> {
    let axis = Axis(block.ndim() - 1);
    let mut sum = Array1::<f32>::zeros(block.len_of(axis));
    let mut cells = 0usize;
    for lane in block.lanes(axis) {
        sum += &lane;
        cells += 1;
    }
    if cells > 0 {
        sum /= cells as f32;
    }
    sum
}

/// Best candidate label and its margin over `None`.
///
/// Ties between candidates go to the earlier one. The label is accepted
/// only if it scores strictly above `None`.
fn pick_label(mean: &Array1<f32>, candidates: &[LabelId], none: LabelId) -> Option<(LabelId, f32)> {
    let none_score = *mean.get(none as usize)?;

    let mut best: Option<(LabelId, f32)> = None;
    for &label in candidates {
        let Some(&score) = mean.get(label as usize) else {
            continue;
        };
        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((label, score)),
        }
    }

    best.filter(|&(_, score)| score > none_score)
        .map(|(label, score)| (label, score - none_score))
}

// ============================================================================
// Tests
// ============================================================================
