//! Sentence records
//!
//! Field names follow the line-delimited wire format consumed and
//! produced by the surrounding training pipeline, so they are renamed to
//! camelCase on the wire. Relations and qualifiers refer to entities by
//! id only; lookups go through the owning sentence's entity index.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::cube::SparseCube;
use crate::span::Span;
use crate::warning::Warning;
use crate::{LabelId, QuintaError, Result};

// ============================================================================
// Mentions
// ============================================================================

/// An entity mention owned by a sentence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(rename = "emId")]
    pub id: String,
    pub text: String,
    /// Token span, start inclusive, end exclusive
    pub offset: Span,
    pub label: String,
}

impl Entity {
    /// Create an entity whose id is derived from its span
    pub fn from_span(span: Span, tokens: &[&str], label: impl Into<String>) -> Self {
        Self {
            id: span_id(span),
            text: tokens
                .get(span.range())
                .map(|t| t.join(" "))
                .unwrap_or_default(),
            offset: span,
            label: label.into(),
        }
    }
}

/// Binary relation between two entities of the same sentence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    #[serde(rename = "em1Id")]
    pub head_id: String,
    #[serde(rename = "em1Text")]
    pub head_text: String,
    #[serde(rename = "em2Id")]
    pub tail_id: String,
    #[serde(rename = "em2Text")]
    pub tail_text: String,
    pub label: String,
}

/// Ternary qualifier fact: (head, tail) relation qualified by a value entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Qualifier {
    #[serde(rename = "em1Id")]
    pub head_id: String,
    #[serde(rename = "em2Id")]
    pub tail_id: String,
    #[serde(rename = "em3Id")]
    pub value_id: String,
    pub label: String,
}

/// Surface form of one quintuplet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuintupletText {
    pub head: String,
    pub relation: String,
    pub tail: String,
    pub qualifier: String,
    pub value: String,
}

/// One flat quintuplet annotation, as produced by upstream dataset builders
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatQuintuplet {
    pub tokens: Vec<String>,
    pub head: Span,
    pub tail: Span,
    pub value: Span,
    pub relation: String,
    pub qualifier: String,
}

impl FlatQuintuplet {
    pub fn text(&self) -> String {
        self.tokens.join(" ")
    }
}

// ============================================================================
// Sentence
// ============================================================================

/// A tokenized sentence with its annotations and label grids
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sentence {
    #[serde(rename = "articleId")]
    pub article_id: String,
    #[serde(rename = "sentId")]
    pub sent_id: i64,
    #[serde(rename = "sentText")]
    pub sent_text: String,
    #[serde(rename = "entityMentions")]
    pub entity_mentions: Vec<Entity>,
    #[serde(rename = "relationMentions")]
    pub relation_mentions: Vec<Relation>,
    #[serde(rename = "qualifierMentions", default)]
    pub qualifier_mentions: Vec<Qualifier>,
    #[serde(rename = "wordpieceSentText", default)]
    pub wordpiece_sent_text: String,
    #[serde(rename = "wordpieceTokensIndex", default)]
    pub wordpiece_tokens_index: Vec<(usize, usize)>,
    #[serde(rename = "wordpieceSegmentIds", default)]
    pub wordpiece_segment_ids: Vec<i64>,
    #[serde(rename = "jointLabelMatrix", default)]
    pub joint_label_matrix: Vec<Vec<LabelId>>,
    #[serde(rename = "quintupletMatrix", default)]
    pub quintuplet_matrix: SparseCube,
}

impl Sentence {
    /// Create a sentence with no annotations and no grids
    pub fn new(article_id: impl Into<String>, sent_text: impl Into<String>) -> Self {
        Self {
            article_id: article_id.into(),
            sent_id: 0,
            sent_text: sent_text.into(),
            entity_mentions: Vec::new(),
            relation_mentions: Vec::new(),
            qualifier_mentions: Vec::new(),
            wordpiece_sent_text: String::new(),
            wordpiece_tokens_index: Vec::new(),
            wordpiece_segment_ids: Vec::new(),
            joint_label_matrix: Vec::new(),
            quintuplet_matrix: SparseCube::empty(),
        }
    }

    /// Tokens of `sentText` (single-space separated)
    pub fn tokens(&self) -> Vec<&str> {
        if self.sent_text.is_empty() {
            return Vec::new();
        }
        self.sent_text.split(' ').collect()
    }

    pub fn seq_len(&self) -> usize {
        self.tokens().len()
    }

    /// Entity arena keyed by id
    pub fn entity_index(&self) -> HashMap<&str, &Entity> {
        self.entity_mentions
            .iter()
            .map(|e| (e.id.as_str(), e))
            .collect()
    }

    /// Look up a referenced entity
    pub fn resolve(&self, id: &str) -> Result<&Entity> {
        self.entity_mentions
            .iter()
            .find(|e| e.id == id)
            .ok_or_else(|| QuintaError::UnknownEntity(id.to_string()))
    }

    /// Check spans, references, qualifier distinctness, and the cube.
    ///
    /// Repeated coordinates in the stored cube are not an error; they come
    /// back as a warning for the caller to surface.
    pub fn validate(&self) -> Result<Vec<Warning>> {
        let seq_len = self.seq_len();
        for entity in &self.entity_mentions {
            entity.offset.check_within(seq_len)?;
        }

        let index = self.entity_index();
        let lookup = |id: &str| {
            index
                .get(id)
                .copied()
                .ok_or_else(|| QuintaError::UnknownEntity(id.to_string()))
        };

        for relation in &self.relation_mentions {
            lookup(&relation.head_id)?;
            lookup(&relation.tail_id)?;
        }

        for qualifier in &self.qualifier_mentions {
            let head = lookup(&qualifier.head_id)?;
            let tail = lookup(&qualifier.tail_id)?;
            let value = lookup(&qualifier.value_id)?;

            let ids: HashSet<&str> = [&head.id, &tail.id, &value.id]
                .into_iter()
                .map(String::as_str)
                .collect();
            let spans: HashSet<Span> = [head.offset, tail.offset, value.offset].into();
            if ids.len() < 3 || spans.len() < 3 {
                return Err(QuintaError::DegenerateQualifier {
                    head: qualifier.head_id.clone(),
                    tail: qualifier.tail_id.clone(),
                    value: qualifier.value_id.clone(),
                    label: qualifier.label.clone(),
                });
            }
        }

        let mut warnings = Vec::new();
        if let Some(duplicates) = self.quintuplet_matrix.validate()? {
            tracing::debug!(
                article = %self.article_id,
                duplicates = duplicates.coordinates.len(),
                "Stored quintuplet matrix repeats coordinates"
            );
            warnings.push(duplicates.into());
        }
        Ok(warnings)
    }

    /// Whether any two entity spans share a token
    pub fn has_span_overlap(&self) -> bool {
        let mut covered = HashSet::new();
        self.entity_mentions
            .iter()
            .flat_map(|e| e.offset.range())
            .any(|i| !covered.insert(i))
    }

    /// Surface strings for every qualifier.
    ///
    /// The relation label comes from a relation with the same head and
    /// tail spans, or is empty if none exists.
    pub fn quintuplet_texts(&self) -> Result<Vec<QuintupletText>> {
        let tokens = self.tokens();
        let surface = |entity: &Entity| {
            tokens
                .get(entity.offset.range())
                .map(|t| t.join(" "))
                .unwrap_or_default()
        };

        let mut texts = Vec::with_capacity(self.qualifier_mentions.len());
        for qualifier in &self.qualifier_mentions {
            let head = self.resolve(&qualifier.head_id)?;
            let tail = self.resolve(&qualifier.tail_id)?;
            let value = self.resolve(&qualifier.value_id)?;

            let mut relation = String::new();
            for r in &self.relation_mentions {
                let (Ok(h), Ok(t)) = (self.resolve(&r.head_id), self.resolve(&r.tail_id)) else {
                    continue;
                };
                if h.offset == head.offset && t.offset == tail.offset {
                    relation = r.label.clone();
                }
            }

            texts.push(QuintupletText {
                head: surface(head),
                relation,
                tail: surface(tail),
                qualifier: qualifier.label.clone(),
                value: surface(value),
            });
        }
        Ok(texts)
    }
}

/// Stable entity id for a span
pub fn span_id(span: Span) -> String {
    format!("({}, {})", span.start(), span.end())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn span(start: usize, end: usize) -> Span {
        Span::new(start, end).unwrap()
    }

    fn sample() -> Sentence {
        let mut sent = Sentence::new("doc-1", "Marie Curie won the Nobel Prize in 1903");
        let tokens = sent.tokens();
        let head = Entity::from_span(span(0, 2), &tokens, "Entity");
        let tail = Entity::from_span(span(4, 6), &tokens, "Entity");
        let value = Entity::from_span(span(7, 8), &tokens, "Entity");

        sent.relation_mentions.push(Relation {
            head_id: head.id.clone(),
            head_text: head.text.clone(),
            tail_id: tail.id.clone(),
            tail_text: tail.text.clone(),
            label: "award received".to_string(),
        });
        sent.qualifier_mentions.push(Qualifier {
            head_id: head.id.clone(),
            tail_id: tail.id.clone(),
            value_id: value.id.clone(),
            label: "point in time".to_string(),
        });
        sent.entity_mentions = vec![head, tail, value];
        sent
    }

    #[test]
    fn test_entity_from_span() {
        let sent = sample();
        assert_eq!(sent.entity_mentions[0].text, "Marie Curie");
        assert_eq!(sent.entity_mentions[0].id, "(0, 2)");
    }

    #[test]
    fn test_validate_ok() {
        assert!(sample().validate().unwrap().is_empty());
    }

    #[test]
    fn test_validate_reports_stored_duplicates() {
        let mut sent = sample();
        sent.quintuplet_matrix = serde_json::from_str(
            r#"{"shape":[8,8,8],"entries":[[0,4,7,3],[0,4,7,4],[1,5,7,3]]}"#,
        )
        .unwrap();

        let warnings = sent.validate().unwrap();
        assert_eq!(warnings.len(), 1);
        match &warnings[0] {
            Warning::DuplicateCoordinates(w) => {
                assert_eq!(w.coordinates, vec![(0, 4, 7)]);
                assert_eq!(w.conflicting, 1);
            }
            other => panic!("unexpected warning {other:?}"),
        }
    }

    #[test]
    fn test_validate_unknown_reference() {
        let mut sent = sample();
        sent.qualifier_mentions[0].value_id = "(9, 10)".to_string();
        assert!(matches!(
            sent.validate(),
            Err(QuintaError::UnknownEntity(id)) if id == "(9, 10)"
        ));
    }

    #[test]
    fn test_validate_degenerate_qualifier() {
        let mut sent = sample();
        sent.qualifier_mentions[0].value_id = sent.qualifier_mentions[0].head_id.clone();
        assert!(matches!(
            sent.validate(),
            Err(QuintaError::DegenerateQualifier { .. })
        ));
    }

    #[test]
    fn test_validate_span_out_of_range() {
        let mut sent = sample();
        sent.entity_mentions[2].offset = span(7, 9);
        assert!(matches!(
            sent.validate(),
            Err(QuintaError::InvalidSpan { .. })
        ));
    }

    #[test]
    fn test_quintuplet_texts() {
        let texts = sample().quintuplet_texts().unwrap();
        assert_eq!(
            texts,
            vec![QuintupletText {
                head: "Marie Curie".to_string(),
                relation: "award received".to_string(),
                tail: "Nobel Prize".to_string(),
                qualifier: "point in time".to_string(),
                value: "1903".to_string(),
            }]
        );
    }

    #[test]
    fn test_span_overlap() {
        let mut sent = sample();
        assert!(!sent.has_span_overlap());

        let tokens: Vec<String> = sent.tokens().iter().map(|t| t.to_string()).collect();
        let tokens: Vec<&str> = tokens.iter().map(String::as_str).collect();
        let overlapping = Entity::from_span(span(1, 3), &tokens, "Entity");
        sent.entity_mentions.push(overlapping);
        assert!(sent.has_span_overlap());
    }

    #[test]
    fn test_wire_names() {
        let json = serde_json::to_value(sample()).unwrap();
        assert!(json.get("entityMentions").is_some());
        assert_eq!(json["entityMentions"][0]["emId"], "(0, 2)");
        assert_eq!(json["entityMentions"][0]["offset"], serde_json::json!([0, 2]));
        assert_eq!(json["relationMentions"][0]["em2Text"], "Nobel Prize");
        assert_eq!(json["qualifierMentions"][0]["em3Id"], "(7, 8)");
        assert_eq!(
            json["quintupletMatrix"],
            serde_json::json!({"shape": [0, 0, 0], "entries": []})
        );
    }

    #[test]
    fn test_missing_optional_fields_default() {
        let raw = r#"{"articleId":"a","sentId":3,"sentText":"x y","entityMentions":[],"relationMentions":[]}"#;
        let sent: Sentence = serde_json::from_str(raw).unwrap();
        assert_eq!(sent.sent_id, 3);
        assert!(sent.qualifier_mentions.is_empty());
        assert!(!sent.quintuplet_matrix.has_volume());
    }
}
