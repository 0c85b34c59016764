//! Corpus statistics

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use quinta_core::{QuintaError, Result, Sentence};

/// Summary figures for a set of sentence records
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorpusStats {
    pub sentences: usize,
    pub mean_entities: f64,
    pub mean_qualifiers: f64,
    /// `1 - stored / volume` over sentences with a qualifier cube
    pub cube_sparsity: f64,
    /// Fraction of `None` cells over sentences with a joint table
    pub table_sparsity: f64,
    /// Fraction of sentences with two entities sharing a token
    pub overlap_fraction: f64,
    pub relation_labels: usize,
    pub qualifier_labels: usize,
}

impl CorpusStats {
    /// `none` is the id of the `None` label in the joint tables.
    ///
    /// Fails with `ShapeMismatch` on a cube shape too large to count.
    pub fn collect(sentences: &[Sentence], none: quinta_core::LabelId) -> Result<Self> {
        if sentences.is_empty() {
            return Ok(Self::default());
        }
        let n = sentences.len() as f64;

        let entities: usize = sentences.iter().map(|s| s.entity_mentions.len()).sum();
        let qualifiers: usize = sentences.iter().map(|s| s.qualifier_mentions.len()).sum();
        let overlapping = sentences.iter().filter(|s| s.has_span_overlap()).count();

        let (stored, volume) = sentences
            .iter()
            .filter(|s| s.quintuplet_matrix.has_volume())
            .try_fold((0usize, 0usize), |(stored, volume), s| -> Result<_> {
                let cube = &s.quintuplet_matrix;
                let volume = volume.checked_add(cube.numel()?).ok_or_else(|| {
                    QuintaError::ShapeMismatch("total cube volume overflows".to_string())
                })?;
                Ok((stored + cube.materialize().len(), volume))
            })?;

        let (labelled, cells) = sentences
            .iter()
            .flat_map(|s| &s.joint_label_matrix)
            .fold((0usize, 0usize), |(labelled, cells), row| {
                (
                    labelled + row.iter().filter(|&&id| id != none).count(),
                    cells + row.len(),
                )
            });

        let relation_labels: BTreeSet<&str> = sentences
            .iter()
            .flat_map(|s| &s.relation_mentions)
            .map(|r| r.label.as_str())
            .collect();
        let qualifier_labels: BTreeSet<&str> = sentences
            .iter()
            .flat_map(|s| &s.qualifier_mentions)
            .map(|q| q.label.as_str())
            .collect();

        Ok(Self {
            sentences: sentences.len(),
            mean_entities: entities as f64 / n,
            mean_qualifiers: qualifiers as f64 / n,
            cube_sparsity: sparsity(stored, volume),
            table_sparsity: sparsity(labelled, cells),
            overlap_fraction: overlapping as f64 / n,
            relation_labels: relation_labels.len(),
            qualifier_labels: qualifier_labels.len(),
        })
    }

    /// Human-readable summary
    pub fn report(&self) -> String {
        format!(
            "Sentences:          {}\n\
             Entities/sentence:  {:.2}\n\
             Qualifiers/sentence: {:.2}\n\
             Cube sparsity:      {:.4}\n\
             Table sparsity:     {:.4}\n\
             Overlap fraction:   {:.4}\n\
             Relation labels:    {}\n\
             Qualifier labels:   {}\n",
            self.sentences,
            self.mean_entities,
            self.mean_qualifiers,
            self.cube_sparsity,
            self.table_sparsity,
            self.overlap_fraction,
            self.relation_labels,
            self.qualifier_labels,
        )
    }
}

fn sparsity(filled: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        1.0 - filled as f64 / total as f64
    }
}
