//! Quinta Extractor - Nested fact encoding and decoding
//!
//! Turns annotated sentences into dense label grids for training, and
//! turns a model's soft score grids back into entities, relations and
//! qualifiers.

use std::collections::BTreeMap;

use quinta_core::model::span_id;
use quinta_core::{Entity, LabelId, LabelVocab, Qualifier, QuintaError, Relation, Result, Sentence, Span};

/// Entities, relations and qualifiers decoded from one sentence's scores
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedSentence {
    /// Token positions after which a new span starts
    pub boundaries: Vec<usize>,
    pub entities: BTreeMap<Span, LabelId>,
    pub relations: BTreeMap<(Span, Span), LabelId>,
    pub qualifiers: BTreeMap<(Span, Span, Span), LabelId>,
}

impl DecodedSentence {
    /// Render as a sentence record.
    ///
    /// Entity ids are derived from spans; label names come from `vocab`.
    pub fn to_sentence(&self, sent_text: &str, vocab: &LabelVocab) -> Result<Sentence> {
        let mut sentence = Sentence::new(sent_text, sent_text);
        let tokens = sentence.tokens();
        let label = |id: LabelId| {
            vocab
                .name_of(id)
                .map(str::to_string)
                .ok_or_else(|| QuintaError::UnknownLabel(id.to_string()))
        };

        let mut entities = Vec::with_capacity(self.entities.len());
        for (&span, &id) in &self.entities {
            entities.push(Entity::from_span(span, &tokens, label(id)?));
        }

        let surface = |span: Span| {
            tokens
                .get(span.range())
                .map(|t| t.join(" "))
                .unwrap_or_default()
        };

        let mut relations = Vec::with_capacity(self.relations.len());
        for (&(head, tail), &id) in &self.relations {
            relations.push(Relation {
                head_id: span_id(head),
                head_text: surface(head),
                tail_id: span_id(tail),
                tail_text: surface(tail),
                label: label(id)?,
            });
        }

        let mut qualifiers = Vec::with_capacity(self.qualifiers.len());
        for (&(head, tail, value), &id) in &self.qualifiers {
            qualifiers.push(Qualifier {
                head_id: span_id(head),
                tail_id: span_id(tail),
                value_id: span_id(value),
                label: label(id)?,
            });
        }

        sentence.entity_mentions = entities;
        sentence.relation_mentions = relations;
        sentence.qualifier_mentions = qualifiers;
        Ok(sentence)
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relations.is_empty() && self.qualifiers.is_empty()
    }
}

/// Trait for label grid encoders
pub trait LabelEncoder: Send + Sync {
    /// Encode one annotated sentence into one or more training records
    fn encode(&self, sentence: &Sentence) -> Result<Vec<Sentence>>;
}

/// Trait for score grid decoders
pub trait QuintupletDecoder: Send + Sync {
    fn decode(
        &self,
        scores: &scores::SentenceScores<'_>,
        cancel: &decoder::CancellationToken,
    ) -> Result<DecodedSentence>;
}

pub mod assemble;
pub mod batch;
pub mod bio;
pub mod cuboid;
pub mod decoder;
pub mod encoder;
pub mod metrics;
pub mod scores;
pub mod stats;
pub mod validate;

pub use assemble::assemble_sentences;
pub use batch::BatchRunner;
pub use bio::{decode_bio, decode_nonzero_spans, encode_bio, LabeledSpan, TagEncoder};
pub use cuboid::{recover_cuboids, Cuboid, CuboidRecovery};
pub use decoder::{CancellationToken, SoftJointDecoder};
pub use encoder::{BoxFillEncoder, EncodedGrids};
pub use metrics::{EvaluationReport, Evaluator, ScoreCounts};
pub use scores::{ScoreRecord, SentenceScores};
pub use stats::CorpusStats;
pub use validate::{validate_sentence, RoundTripReport, ValidationSummary};

// ============================================================================
// Tests
// ============================================================================
