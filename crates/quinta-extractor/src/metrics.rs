//! Quality Metrics module
//!
//! Scores predicted sentences against gold sentences at three levels:
//! entities, strict triplets and quintuplets. Matching is exact on spans
//! and labels.

use std::collections::HashSet;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

use quinta_core::{QuintaError, Result, Sentence, Span};

// ============================================================================
// Score Counts
// ============================================================================

/// Counts for one evaluation level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreCounts {
    /// Predictions that exactly match a gold item
    pub num_correct: usize,
    /// Distinct predicted items
    pub num_pred: usize,
    /// Distinct gold items
    pub num_gold: usize,
}

impl ScoreCounts {
    /// Calculate precision (correct / predicted)
    pub fn precision(&self) -> f64 {
        if self.num_pred == 0 {
            0.0
        } else {
            self.num_correct as f64 / self.num_pred as f64
        }
    }

    /// Calculate recall (correct / gold)
    pub fn recall(&self) -> f64 {
        if self.num_gold == 0 {
            0.0
        } else {
            self.num_correct as f64 / self.num_gold as f64
        }
    }

    /// Calculate F1 score (2 * P * R / (P + R))
    pub fn f1_score(&self) -> f64 {
        let p = self.precision();
        let r = self.recall();
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }

    pub fn add(&mut self, other: &ScoreCounts) {
        self.num_correct += other.num_correct;
        self.num_pred += other.num_pred;
        self.num_gold += other.num_gold;
    }

    fn compare<T: Eq + Hash>(predicted: HashSet<T>, gold: HashSet<T>) -> Self {
        Self {
            num_correct: predicted.intersection(&gold).count(),
            num_pred: predicted.len(),
            num_gold: gold.len(),
        }
    }

    fn section(&self, title: &str) -> String {
        format!(
            "{title}:\n  \
               Precision: {:.1}%\n  \
               Recall:    {:.1}%\n  \
               F1 Score:  {:.1}%\n  \
               Gold: {} | Predicted: {} | Correct: {}\n",
            self.precision() * 100.0,
            self.recall() * 100.0,
            self.f1_score() * 100.0,
            self.num_gold,
            self.num_pred,
            self.num_correct,
        )
    }
}

// ============================================================================
// Evaluation Items
// ============================================================================

type EntityItem = (Span, String);
type TripletItem = (Span, String, String, Span, String);
type QuintupletItem = (Span, String, Span, String, Span);

fn entity_items(sentence: &Sentence) -> HashSet<EntityItem> {
    sentence
        .entity_mentions
        .iter()
        .map(|e| (e.offset, e.label.clone()))
        .collect()
}

fn triplet_items(sentence: &Sentence) -> Result<HashSet<TripletItem>> {
    let mut items = HashSet::new();
    for relation in &sentence.relation_mentions {
        let head = sentence.resolve(&relation.head_id)?;
        let tail = sentence.resolve(&relation.tail_id)?;
        items.insert((
            head.offset,
            head.label.clone(),
            relation.label.clone(),
            tail.offset,
            tail.label.clone(),
        ));
    }
    Ok(items)
}

/// `(head, relation, tail, qualifier, value)`, where the relation label is
/// taken from a relation over the same head and tail spans, if any
fn quintuplet_items(sentence: &Sentence) -> Result<HashSet<QuintupletItem>> {
    let mut relation_of = std::collections::HashMap::new();
    for relation in &sentence.relation_mentions {
        let head = sentence.resolve(&relation.head_id)?;
        let tail = sentence.resolve(&relation.tail_id)?;
        relation_of.insert((head.offset, tail.offset), relation.label.clone());
    }

    let mut items = HashSet::new();
    for qualifier in &sentence.qualifier_mentions {
        let head = sentence.resolve(&qualifier.head_id)?.offset;
        let tail = sentence.resolve(&qualifier.tail_id)?.offset;
        let value = sentence.resolve(&qualifier.value_id)?.offset;
        let relation = relation_of.get(&(head, tail)).cloned().unwrap_or_default();
        items.insert((head, relation, tail, qualifier.label.clone(), value));
    }
    Ok(items)
}

// ============================================================================
// Evaluator
// ============================================================================

/// Scores for a corpus of sentence pairs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub num_sentences: usize,
    pub entity: ScoreCounts,
    pub strict_triplet: ScoreCounts,
    pub quintuplet: ScoreCounts,
}

impl EvaluationReport {
    /// Print a summary report
    pub fn report(&self) -> String {
        format!(
            "=== Extraction Quality Report ===\n\n\
             Sentences evaluated: {}\n\n\
             {}\n{}\n{}",
            self.num_sentences,
            self.entity.section("Entity"),
            self.strict_triplet.section("Strict Triplet"),
            self.quintuplet.section("Quintuplet"),
        )
    }
}

/// Evaluator for extraction quality
#[derive(Debug, Clone, Copy, Default)]
pub struct Evaluator;

impl Evaluator {
    pub fn new() -> Self {
        Self
    }

    /// Score one predicted sentence against its gold sentence
    pub fn evaluate_sentence(&self, predicted: &Sentence, gold: &Sentence) -> Result<EvaluationReport> {
        Ok(EvaluationReport {
            num_sentences: 1,
            entity: ScoreCounts::compare(entity_items(predicted), entity_items(gold)),
            strict_triplet: ScoreCounts::compare(triplet_items(predicted)?, triplet_items(gold)?),
            quintuplet: ScoreCounts::compare(quintuplet_items(predicted)?, quintuplet_items(gold)?),
        })
    }

    /// Score aligned lists of predicted and gold sentences
    pub fn evaluate(&self, predicted: &[Sentence], gold: &[Sentence]) -> Result<EvaluationReport> {
        if predicted.len() != gold.len() {
            return Err(QuintaError::ShapeMismatch(format!(
                "{} predicted sentences for {} gold sentences",
                predicted.len(),
                gold.len()
            )));
        }

        let mut total = EvaluationReport::default();
        for (pred, gold) in predicted.iter().zip(gold) {
            if pred.sent_text != gold.sent_text {
                tracing::warn!(
                    predicted = %pred.sent_text,
                    gold = %gold.sent_text,
                    "Evaluating sentences with different text"
                );
            }
            let report = self.evaluate_sentence(pred, gold)?;
            total.num_sentences += 1;
            total.entity.add(&report.entity);
            total.strict_triplet.add(&report.strict_triplet);
            total.quintuplet.add(&report.quintuplet);
        }

        tracing::info!(
            sentences = total.num_sentences,
            entity_f1 = total.entity.f1_score(),
            quintuplet_f1 = total.quintuplet.f1_score(),
            "Evaluation complete"
        );
        Ok(total)
    }
}

// ============================================================================
// Tests
// ============================================================================
