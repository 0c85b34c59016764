//! Corpus assembly
//!
//! Groups flat quintuplet annotations into sentence records. Each distinct
//! span becomes one `Entity` entity, each distinct (head, tail) pair one
//! relation, and each distinct (head, tail, value) triple one qualifier.

use std::collections::HashMap;
use std::hash::Hash;

use quinta_core::model::span_id;
use quinta_core::vocab::ENTITY_LABEL;
use quinta_core::{Entity, FlatQuintuplet, Qualifier, QuintaError, Relation, Result, Sentence, Span};

/// Insertion-ordered map where a repeated key replaces the value in place
struct OrderedMap<K, V> {
    index: HashMap<K, usize>,
    values: Vec<V>,
}

impl<K: Eq + Hash, V> OrderedMap<K, V> {
    fn new() -> Self {
        Self {
            index: HashMap::new(),
            values: Vec::new(),
        }
    }

    fn insert(&mut self, key: K, value: V) {
        match self.index.get(&key) {
            Some(&slot) => self.values[slot] = value,
            None => {
                self.index.insert(key, self.values.len());
                self.values.push(value);
            }
        }
    }

    fn into_values(self) -> Vec<V> {
        self.values
    }
}

/// Group flat quintuplets into sentences, in first-seen sentence order.
///
/// Later annotations of the same span, pair or triple replace earlier ones.
pub fn assemble_sentences(quintuplets: &[FlatQuintuplet]) -> Result<Vec<Sentence>> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<&FlatQuintuplet>> = HashMap::new();
    for q in quintuplets {
        let text = q.text();
        groups
            .entry(text.clone())
            .or_insert_with(|| {
                order.push(text);
                Vec::new()
            })
            .push(q);
    }

    let mut sentences = Vec::with_capacity(order.len());
    for text in &order {
        let members = groups.remove(text).unwrap_or_default();
        sentences.push(assemble_one(text, &members)?);
    }

    tracing::info!(
        quintuplets = quintuplets.len(),
        sentences = sentences.len(),
        "Assembled sentences"
    );
    Ok(sentences)
}

fn assemble_one(text: &str, members: &[&FlatQuintuplet]) -> Result<Sentence> {
    let mut sentence = Sentence::new(text, text);
    let tokens = sentence.tokens();
    let seq_len = tokens.len();

    let mut entities: OrderedMap<Span, Entity> = OrderedMap::new();
    let mut relations: OrderedMap<(Span, Span), Relation> = OrderedMap::new();
    let mut qualifiers: OrderedMap<(Span, Span, Span), Qualifier> = OrderedMap::new();

    for q in members {
        for span in [q.head, q.tail, q.value] {
            span.check_within(seq_len)?;
            entities.insert(span, Entity::from_span(span, &tokens, ENTITY_LABEL));
        }
        if q.head == q.tail || q.head == q.value || q.tail == q.value {
            return Err(QuintaError::DegenerateQualifier {
                head: span_id(q.head),
                tail: span_id(q.tail),
                value: span_id(q.value),
                label: q.qualifier.clone(),
            });
        }

        let surface = |span: Span| tokens[span.range()].join(" ");
        relations.insert(
            (q.head, q.tail),
            Relation {
                head_id: span_id(q.head),
                head_text: surface(q.head),
                tail_id: span_id(q.tail),
                tail_text: surface(q.tail),
                label: q.relation.clone(),
            },
        );
        qualifiers.insert(
            (q.head, q.tail, q.value),
            Qualifier {
                head_id: span_id(q.head),
                tail_id: span_id(q.tail),
                value_id: span_id(q.value),
                label: q.qualifier.clone(),
            },
        );
    }

    sentence.entity_mentions = entities.into_values();
    sentence.relation_mentions = relations.into_values();
    sentence.qualifier_mentions = qualifiers.into_values();
    Ok(sentence)
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

    fn flat(text: &str, spans: [Span; 3], relation: &str, qualifier: &str) -> FlatQuintuplet {
        let [head, tail, value] = spans;
        FlatQuintuplet {
            tokens: text.split(' ').map(str::to_string).collect(),
            head,
            tail,
            value,
            relation: relation.to_string(),
            qualifier: qualifier.to_string(),
        }
    }

    #[test]
    fn test_groups_by_sentence_in_order() {
        let curie = "Marie Curie won the Nobel Prize in 1903";
        let other = "Bob joined Acme in 2001";
        let input = vec![
            flat(curie, [span(0, 2), span(4, 6), span(7, 8)], "award received", "point in time"),
            flat(other, [span(0, 1), span(2, 3), span(4, 5)], "employer", "start time"),
            flat(curie, [span(0, 2), span(4, 6), span(3, 4)], "award received", "statement is subject of"),
        ];

        let sentences = assemble_sentences(&input).unwrap();
        assert_eq!(sentences.len(), 2);
        assert_eq!(sentences[0].sent_text, curie);
        assert_eq!(sentences[1].sent_text, other);

        let first = &sentences[0];
        assert_eq!(first.entity_mentions.len(), 4);
        assert_eq!(first.relation_mentions.len(), 1);
        assert_eq!(first.qualifier_mentions.len(), 2);
        assert!(first.entity_mentions.iter().all(|e| e.label == "Entity"));
        assert_eq!(first.relation_mentions[0].head_text, "Marie Curie");
        assert!(first.validate().is_ok());
    }

    #[test]
    fn test_later_duplicate_replaces_label() {
        let text = "a b c d";
        let input = vec![
            flat(text, [span(0, 1), span(1, 2), span(2, 3)], "r1", "q1"),
            flat(text, [span(0, 1), span(1, 2), span(2, 3)], "r2", "q2"),
        ];
        let sentences = assemble_sentences(&input).unwrap();
        assert_eq!(sentences[0].relation_mentions.len(), 1);
        assert_eq!(sentences[0].relation_mentions[0].label, "r2");
        assert_eq!(sentences[0].qualifier_mentions[0].label, "q2");
    }

    #[test]
    fn test_rejects_out_of_range_span() {
        let input = vec![flat("a b", [span(0, 1), span(1, 2), span(2, 3)], "r", "q")];
        assert!(matches!(
            assemble_sentences(&input),
            Err(QuintaError::InvalidSpan { .. })
        ));
    }

    #[test]
    fn test_rejects_degenerate_qualifier() {
        let input = vec![flat("a b c", [span(0, 1), span(1, 2), span(0, 1)], "r", "q")];
        assert!(matches!(
            assemble_sentences(&input),
            Err(QuintaError::DegenerateQualifier { .. })
        ));
    }
}
