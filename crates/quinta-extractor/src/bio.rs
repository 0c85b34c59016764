//! BIO span codec and tag-mode encoding
//!
//! Labelled spans become one tag per token: `B-label` on the first token,
//! `I-label` on the rest, `O` elsewhere. Decoding reads tags back into
//! spans. Tag mode turns every relation of a sentence into a derived
//! sentence whose qualifier values are tagged on the joint grid's diagonal.

use std::collections::BTreeSet;

use ndarray::Array2;

use quinta_core::vocab::OUTSIDE_TAG;
use quinta_core::{
    LabelId, LabelVocab, NonzeroSpanPolicy, Result, Sentence, SparseCube, Span,
};

use crate::LabelEncoder;

/// A span with a string label
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LabeledSpan {
    pub span: Span,
    pub label: String,
}

impl LabeledSpan {
    pub fn new(start: usize, end: usize, label: impl Into<String>) -> Result<Self> {
        Ok(Self {
            span: Span::new(start, end)?,
            label: label.into(),
        })
    }
}

/// Write BIO tags for `spans` over `length` tokens.
///
/// Spans are applied in order, so a later overlapping span overwrites the
/// tags of an earlier one.
pub fn encode_bio(spans: &[LabeledSpan], length: usize) -> Result<Vec<String>> {
    let mut tags = vec![OUTSIDE_TAG.to_string(); length];
    for labeled in spans {
        labeled.span.check_within(length)?;
        let start = labeled.span.start();
        tags[start] = format!("B-{}", labeled.label);
        for tag in &mut tags[start + 1..labeled.span.end()] {
            *tag = format!("I-{}", labeled.label);
        }
    }
    Ok(tags)
}

/// Read spans back from BIO tags.
///
/// `B` opens a span, `I` extends the open span, and any other tag closes
/// it. An `I` with no open span is ignored. The label is taken from the
/// opening `B` tag.
pub fn decode_bio<S: AsRef<str>>(tags: &[S]) -> Vec<LabeledSpan> {
    let mut spans = Vec::new();
    let mut open: Option<(usize, usize, String)> = None;

    let mut close = |open: &mut Option<(usize, usize, String)>| {
        if let Some((start, end, label)) = open.take() {
            spans.extend(Span::new(start, end).ok().map(|span| LabeledSpan { span, label }));
        }
    };

    for (i, tag) in tags.iter().enumerate() {
        let tag = tag.as_ref();
        if tag.starts_with('B') {
            close(&mut open);
            let label = tag.split_once('-').map_or("", |(_, label)| label);
            open = Some((i, i + 1, label.to_string()));
        } else if tag.starts_with('I') {
            if let Some((_, end, _)) = open.as_mut() {
                *end = i + 1;
            }
        } else {
            close(&mut open);
        }
    }
    close(&mut open);

    spans
}

/// Maximal runs of non-zero labels in a label sequence.
///
/// With [`NonzeroSpanPolicy::SplitOnLabelChange`] a run also ends where the
/// label changes; with [`NonzeroSpanPolicy::MergeNonzero`] any contiguous
/// non-zero run is one span.
pub fn decode_nonzero_spans(labels: &[LabelId], policy: NonzeroSpanPolicy) -> Vec<Span> {
    let mut runs = Vec::new();
    let mut start: Option<usize> = None;

    for i in 0..=labels.len() {
        let current = labels.get(i).copied().unwrap_or(0);
        match start {
            Some(s) => {
                let label_changed = policy == NonzeroSpanPolicy::SplitOnLabelChange
                    && current != labels[i - 1];
                if current == 0 || label_changed {
                    runs.push((s, i));
                    start = (current != 0).then_some(i);
                }
            }
            None if current != 0 => start = Some(i),
            None => {}
        }
    }

    runs.into_iter()
        .filter_map(|(s, e)| Span::new(s, e).ok())
        .collect()
}

/// Turn each relation into a derived sentence for tag-mode training.
///
/// The derived text is `sentText | head | relation | tail`. Its entities
/// are the qualifier values of that (head, tail) pair, each labelled with
/// the qualifier name. Value spans keep indexing the original tokens.
pub fn relation_conditioned_views(sentence: &Sentence) -> Result<Vec<Sentence>> {
    let mut views = Vec::with_capacity(sentence.relation_mentions.len());

    for relation in &sentence.relation_mentions {
        let head = sentence.resolve(&relation.head_id)?;
        let tail = sentence.resolve(&relation.tail_id)?;
        let text = [
            sentence.sent_text.as_str(),
            head.text.as_str(),
            relation.label.as_str(),
            tail.text.as_str(),
        ]
        .join(" | ");

        let mut entities = Vec::new();
        for qualifier in &sentence.qualifier_mentions {
            if qualifier.head_id != relation.head_id || qualifier.tail_id != relation.tail_id {
                continue;
            }
            let mut value = sentence.resolve(&qualifier.value_id)?.clone();
            value.label = qualifier.label.clone();
            entities.push(value);
        }

        let mut view = sentence.clone();
        view.article_id = text.clone();
        view.sent_text = text;
        view.entity_mentions = entities;
        view.relation_mentions = Vec::new();
        view.qualifier_mentions = Vec::new();
        views.push(view);
    }

    Ok(views)
}

/// Write BIO tag ids on the diagonal of an `O`-filled grid.
///
/// The qualifier cube is left empty. A tag sequence that does not decode
/// back to the entity spans is logged, not rejected.
pub fn tag_label_matrix(sentence: &Sentence, vocab: &LabelVocab) -> Result<Sentence> {
    let outside = vocab.get(OUTSIDE_TAG)?;
    let seq_len = sentence.seq_len();

    let spans: Vec<LabeledSpan> = sentence
        .entity_mentions
        .iter()
        .map(|e| LabeledSpan {
            span: e.offset,
            label: e.label.clone(),
        })
        .collect();
    let tags = encode_bio(&spans, seq_len)?;

    let expected: BTreeSet<&LabeledSpan> = spans.iter().collect();
    let decoded = decode_bio(&tags);
    if decoded.iter().collect::<BTreeSet<_>>() != expected {
        tracing::warn!(
            sentence = %sentence.sent_text,
            expected = expected.len(),
            decoded = decoded.len(),
            "BIO tags do not decode back to the entity spans"
        );
    }

    let mut grid = Array2::from_elem((seq_len, seq_len), outside);
    for (i, tag) in tags.iter().enumerate() {
        grid[[i, i]] = vocab.get(tag)?;
    }

    let mut tagged = sentence.clone();
    tagged.joint_label_matrix = grid.outer_iter().map(|row| row.to_vec()).collect();
    tagged.quintuplet_matrix = SparseCube::empty();
    Ok(tagged)
}

/// Tag-mode encoder over a BIO tag vocabulary
#[derive(Debug, Clone)]
pub struct TagEncoder {
    vocab: LabelVocab,
}

impl TagEncoder {
    pub fn new(vocab: LabelVocab) -> Result<Self> {
        vocab.get(OUTSIDE_TAG)?;
        Ok(Self { vocab })
    }
}

impl LabelEncoder for TagEncoder {
    fn encode(&self, sentence: &Sentence) -> Result<Vec<Sentence>> {
        relation_conditioned_views(sentence)?
            .iter()
            .map(|view| tag_label_matrix(view, &self.vocab))
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================
