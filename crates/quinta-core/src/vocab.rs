//! Label vocabulary
//!
//! The vocabulary is produced once per dataset and treated as read-only
//! configuration afterwards. It maps label names to ids and partitions
//! the id space into `None`, entity, relation and qualifier labels.
//! `q_num_logits` is the channel count of the 3-D qualifier grid.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::model::Sentence;
use crate::{LabelId, QuintaError, Result};

/// Name of the "no label" entry
pub const NONE_LABEL: &str = "None";
/// Name of the generic entity label
pub const ENTITY_LABEL: &str = "Entity";
/// Name of the outside tag in tag vocabularies
pub const OUTSIDE_TAG: &str = "O";

/// Label vocabulary record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelVocab {
    pub id: BTreeMap<String, LabelId>,
    #[serde(default)]
    pub entity: Vec<LabelId>,
    #[serde(default)]
    pub relation: Vec<LabelId>,
    #[serde(default)]
    pub qualifier: Vec<LabelId>,
    #[serde(default)]
    pub symmetric: Vec<LabelId>,
    #[serde(default)]
    pub asymmetric: Vec<LabelId>,
    #[serde(default)]
    pub q_num_logits: usize,
}

/// Validated partition of the label id space, as used by the decoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelPartition {
    pub none: LabelId,
    pub entity: Vec<LabelId>,
    pub relation: Vec<LabelId>,
    pub qualifier: Vec<LabelId>,
    pub q_num_logits: usize,
}

impl LabelPartition {
    /// Smallest channel count a joint score array must have
    pub fn joint_channels_required(&self) -> usize {
        std::iter::once(self.none)
            .chain(self.entity.iter().copied())
            .chain(self.relation.iter().copied())
            .max()
            .map(|id| id as usize + 1)
            .unwrap_or(0)
    }

    /// Smallest channel count a qualifier score array must have
    pub fn qualifier_channels_required(&self) -> usize {
        std::iter::once(self.none)
            .chain(self.qualifier.iter().copied())
            .max()
            .map(|id| id as usize + 1)
            .unwrap_or(0)
    }
}

impl LabelVocab {
    /// Build the joint vocabulary from annotated sentences.
    ///
    /// Order: `None`, `Entity`, sorted qualifier names, then sorted
    /// relation names that are not also qualifier names.
    pub fn from_sentences(sentences: &[Sentence]) -> Self {
        let relations: BTreeSet<&str> = sentences
            .iter()
            .flat_map(|s| &s.relation_mentions)
            .map(|r| r.label.as_str())
            .collect();
        let qualifiers: BTreeSet<&str> = sentences
            .iter()
            .flat_map(|s| &s.qualifier_mentions)
            .map(|q| q.label.as_str())
            .collect();

        let labels: Vec<&str> = [NONE_LABEL, ENTITY_LABEL]
            .into_iter()
            .chain(qualifiers.iter().copied())
            .chain(relations.difference(&qualifiers).copied())
            .collect();
        let id: BTreeMap<String, LabelId> = labels
            .iter()
            .enumerate()
            .map(|(i, name)| (name.to_string(), i as LabelId))
            .collect();

        let ids_of = |names: &BTreeSet<&str>| -> Vec<LabelId> {
            names.iter().filter_map(|n| id.get(*n).copied()).collect()
        };

        tracing::info!(
            relations = relations.len(),
            qualifiers = qualifiers.len(),
            "Built label vocabulary"
        );

        Self {
            entity: vec![id[ENTITY_LABEL]],
            relation: ids_of(&relations),
            qualifier: ids_of(&qualifiers),
            symmetric: Vec::new(),
            asymmetric: Vec::new(),
            q_num_logits: qualifiers.len() + 2,
            id,
        }
    }

    /// Build a BIO tag vocabulary over qualifier labels.
    ///
    /// Order: `O`, sorted `B-`/`I-` tags, then sorted qualifier names.
    pub fn for_tags(sentences: &[Sentence]) -> Self {
        let qualifiers: BTreeSet<&str> = sentences
            .iter()
            .flat_map(|s| &s.qualifier_mentions)
            .map(|q| q.label.as_str())
            .collect();
        let tags: BTreeSet<String> = qualifiers
            .iter()
            .flat_map(|q| [format!("B-{q}"), format!("I-{q}")])
            .collect();

        let labels: Vec<String> = std::iter::once(OUTSIDE_TAG.to_string())
            .chain(tags.iter().cloned())
            .chain(qualifiers.iter().map(|q| q.to_string()))
            .collect();

        tracing::info!(
            labels = labels.len(),
            tags = tags.len(),
            qualifiers = qualifiers.len(),
            "Built tag vocabulary"
        );

        Self {
            id: labels
                .into_iter()
                .enumerate()
                .map(|(i, name)| (name, i as LabelId))
                .collect(),
            q_num_logits: tags.len() + 1,
            ..Self::default()
        }
    }

    /// Id of a label name
    pub fn get(&self, name: &str) -> Result<LabelId> {
        self.id
            .get(name)
            .copied()
            .ok_or_else(|| QuintaError::UnknownLabel(name.to_string()))
    }

    /// Name of a label id
    pub fn name_of(&self, id: LabelId) -> Option<&str> {
        self.id
            .iter()
            .find(|(_, v)| **v == id)
            .map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_empty()
    }

    /// Validate the joint vocabulary and return its id partition.
    ///
    /// Fails with `ConfigError` when the decoder could not define a
    /// `None` comparison: missing `None`/`Entity`, an empty entity set,
    /// ids outside the vocabulary, `None` inside a label class, or
    /// qualifier ids beyond `q_num_logits`.
    pub fn partition(&self) -> Result<LabelPartition> {
        let none = self
            .id
            .get(NONE_LABEL)
            .copied()
            .ok_or_else(|| config_error("vocabulary has no \"None\" label"))?;
        if !self.id.contains_key(ENTITY_LABEL) {
            return Err(config_error("vocabulary has no \"Entity\" label"));
        }
        if self.entity.is_empty() {
            return Err(config_error("entity label set is empty"));
        }

        let known: HashSet<LabelId> = self.id.values().copied().collect();
        for (class, ids) in [
            ("entity", &self.entity),
            ("relation", &self.relation),
            ("qualifier", &self.qualifier),
        ] {
            if let Some(id) = ids.iter().find(|id| !known.contains(*id)) {
                return Err(config_error(&format!(
                    "{class} label id {id} is not in the vocabulary"
                )));
            }
            if ids.contains(&none) {
                return Err(config_error(&format!(
                    "{class} label set contains the None id {none}"
                )));
            }
        }

        if !self.qualifier.is_empty() {
            let required = self
                .qualifier
                .iter()
                .copied()
                .chain(std::iter::once(none))
                .max()
                .map(|id| id as usize + 1)
                .unwrap_or(0);
            if self.q_num_logits < required {
                return Err(config_error(&format!(
                    "q_num_logits {} cannot hold qualifier ids up to {}",
                    self.q_num_logits,
                    required - 1
                )));
            }
        }

        if self.relation.is_empty() {
            tracing::debug!("Relation label set is empty; relation decoding disabled");
        }

        Ok(LabelPartition {
            none,
            entity: self.entity.clone(),
            relation: self.relation.clone(),
            qualifier: self.qualifier.clone(),
            q_num_logits: self.q_num_logits,
        })
    }
}

fn config_error(message: &str) -> QuintaError {
    QuintaError::ConfigError(message.to_string())
}

// ============================================================================
// Tests
// ============================================================================
