//! Batch processing
//!
//! Sentences are independent, so batches fan out over a rayon pool. Results
//! come back in input order with one `Result` per sentence; a failing
//! sentence does not abort the rest of the batch. A cancelled token stops
//! sentences that have not started and interrupts those in flight.

use ndarray::{s, ArrayView4, ArrayView5, Axis};
use rayon::prelude::*;
use rayon::ThreadPool;

use quinta_core::{BatchConfig, NonzeroSpanPolicy, QuintaError, Result, Sentence};

use crate::decoder::CancellationToken;
use crate::encoder::BoxFillEncoder;
use crate::scores::SentenceScores;
use crate::validate::{validate_sentence, RoundTripReport};
use crate::{DecodedSentence, LabelEncoder, QuintupletDecoder};

/// Runs per-sentence work on a dedicated thread pool
pub struct BatchRunner {
    pool: ThreadPool,
}

impl BatchRunner {
    /// Build the pool; `workers == 0` uses one thread per core
    pub fn new(config: &BatchConfig) -> Result<Self> {
        let mut builder = rayon::ThreadPoolBuilder::new()
            .thread_name(|i| format!("quinta-worker-{i}"));
        if config.workers > 0 {
            builder = builder.num_threads(config.workers);
        }
        let pool = builder
            .build()
            .map_err(|e| QuintaError::Other(anyhow::anyhow!("failed to build thread pool: {e}")))?;

        tracing::debug!(workers = pool.current_num_threads(), "Batch pool ready");
        Ok(Self { pool })
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Decode every sentence of a batch
    pub fn decode<D: QuintupletDecoder>(
        &self,
        decoder: &D,
        batch: &[SentenceScores<'_>],
        cancel: &CancellationToken,
    ) -> Vec<Result<DecodedSentence>> {
        self.pool.install(|| {
            batch
                .par_iter()
                .map(|scores| {
                    if cancel.is_cancelled() {
                        return Err(QuintaError::Cancelled);
                    }
                    decoder.decode(scores, cancel)
                })
                .collect()
        })
    }

    /// Decode a padded batch.
    ///
    /// `joint` is `B x Lmax x Lmax x C2`, `qualifier` is
    /// `B x Lmax x Lmax x Lmax x C3`, and `lens[b]` is the true length of
    /// sentence `b`. Padding beyond `lens[b]` is never read.
    pub fn decode_padded<D: QuintupletDecoder>(
        &self,
        decoder: &D,
        joint: ArrayView4<'_, f32>,
        qualifier: ArrayView5<'_, f32>,
        lens: &[usize],
        cancel: &CancellationToken,
    ) -> Result<Vec<Result<DecodedSentence>>> {
        let (batch, max_len, cols, _) = joint.dim();
        let (q_batch, qi, qj, qk, _) = qualifier.dim();
        if max_len != cols || (q_batch, qi, qj, qk) != (batch, max_len, max_len, max_len) {
            return Err(QuintaError::ShapeMismatch(format!(
                "padded joint {:?} and qualifier {:?} scores disagree",
                joint.shape(),
                qualifier.shape()
            )));
        }
        if lens.len() != batch {
            return Err(QuintaError::ShapeMismatch(format!(
                "{} lengths for a batch of {}",
                lens.len(),
                batch
            )));
        }
        if let Some(&len) = lens.iter().find(|&&len| len > max_len) {
            return Err(QuintaError::ShapeMismatch(format!(
                "length {len} exceeds padded length {max_len}"
            )));
        }

        let sentences = lens
            .iter()
            .enumerate()
            .map(|(b, &len)| {
                let joint = joint.index_axis(Axis(0), b);
                let qualifier = qualifier.index_axis(Axis(0), b);
                SentenceScores::new(
                    joint.slice_move(s![..len, ..len, ..]),
                    qualifier.slice_move(s![..len, ..len, ..len, ..]),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(self.decode(decoder, &sentences, cancel))
    }

    /// Encode every sentence of a batch
    pub fn encode<E: LabelEncoder>(
        &self,
        encoder: &E,
        sentences: &[Sentence],
    ) -> Vec<Result<Vec<Sentence>>> {
        self.pool.install(|| {
            sentences
                .par_iter()
                .map(|sentence| encoder.encode(sentence))
                .collect()
        })
    }

    /// Round-trip validate every sentence of a batch
    pub fn validate(
        &self,
        encoder: &BoxFillEncoder,
        sentences: &[Sentence],
        policy: NonzeroSpanPolicy,
    ) -> Vec<Result<RoundTripReport>> {
        self.pool.install(|| {
            sentences
                .par_iter()
                .map(|sentence| validate_sentence(encoder, sentence, policy))
                .collect()
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::SoftJointDecoder;
    use ndarray::{Array4, Array5};
    use quinta_core::{DecoderConfig, LabelPartition, Span};

    fn decoder() -> SoftJointDecoder {
        let partition = LabelPartition {
            none: 0,
            entity: vec![1],
            relation: vec![],
            qualifier: vec![],
            q_num_logits: 2,
        };
        SoftJointDecoder::from_partition(partition, DecoderConfig::default()).unwrap()
    }

    fn runner() -> BatchRunner {
        BatchRunner::new(&BatchConfig { workers: 2 }).unwrap()
    }

    /// Sentence 0 is one two-token entity, sentence 1 one token of None,
    /// padded to three tokens with garbage entity scores
    fn padded() -> (Array4<f32>, Array5<f32>) {
        let mut joint = Array4::zeros((2, 3, 3, 2));
        joint.slice_mut(s![.., .., .., 1]).fill(1.0);
        joint.slice_mut(s![1, ..1, ..1, ..]).assign(&ndarray::arr3(&[[[1.0, 0.0]]]));
        let qualifier = Array5::zeros((2, 3, 3, 3, 2));
        (joint, qualifier)
    }

    #[test]
    fn test_decode_padded() {
        let (joint, qualifier) = padded();
        let results = runner()
            .decode_padded(
                &decoder(),
                joint.view(),
                qualifier.view(),
                &[2, 1],
                &CancellationToken::new(),
            )
            .unwrap();

        assert_eq!(results.len(), 2);
        let first = results[0].as_ref().unwrap();
        assert_eq!(
            first.entities.keys().copied().collect::<Vec<_>>(),
            vec![Span::new(0, 2).unwrap()]
        );
        assert!(results[1].as_ref().unwrap().entities.is_empty());
    }

    #[test]
    fn test_decode_padded_bad_lengths() {
        let (joint, qualifier) = padded();
        let cancel = CancellationToken::new();
        assert!(runner()
            .decode_padded(&decoder(), joint.view(), qualifier.view(), &[2], &cancel)
            .is_err());
        assert!(runner()
            .decode_padded(&decoder(), joint.view(), qualifier.view(), &[2, 4], &cancel)
            .is_err());
    }

    #[test]
    fn test_cancelled_batch() {
        let (joint, qualifier) = padded();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let results = runner()
            .decode_padded(&decoder(), joint.view(), qualifier.view(), &[2, 1], &cancel)
            .unwrap();
        assert!(results
            .iter()
            .all(|r| matches!(r, Err(QuintaError::Cancelled))));
    }

    #[test]
    fn test_default_workers() {
        let runner = BatchRunner::new(&BatchConfig::default()).unwrap();
        assert!(runner.workers() >= 1);
    }
}
