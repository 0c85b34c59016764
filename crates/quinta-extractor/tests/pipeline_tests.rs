//! End-to-end pipeline tests
//!
//! Assemble a small corpus, encode it, feed the encoded grids back as
//! one-hot scores and check that decoding recovers every annotation.

use ndarray::{Array2, Array3, Array4};

use quinta_core::{
    read_jsonl, write_jsonl, AppConfig, FlatQuintuplet, LabelId, LabelVocab, NonzeroSpanPolicy,
    Sentence, Span,
};
use quinta_extractor::batch::BatchRunner;
use quinta_extractor::bio::TagEncoder;
use quinta_extractor::encoder::joint_grid;
use quinta_extractor::{
    assemble_sentences, BoxFillEncoder, CancellationToken, CorpusStats, Evaluator, LabelEncoder,
    SentenceScores, SoftJointDecoder, ValidationSummary,
};

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

fn corpus() -> Vec<Sentence> {
    let curie = "Marie Curie won the Nobel Prize in 1903";
    let bob = "Bob joined Acme in 2001";
    assemble_sentences(&[
        flat(curie, [span(0, 2), span(4, 6), span(7, 8)], "award received", "point in time"),
        flat(bob, [span(0, 1), span(2, 3), span(4, 5)], "employer", "start time"),
    ])
    .unwrap()
}

fn one_hot_joint(grid: &Array2<LabelId>, channels: usize) -> Array3<f32> {
    let (rows, cols) = grid.dim();
    let mut scores = Array3::zeros((rows, cols, channels));
    for ((i, j), &id) in grid.indexed_iter() {
        scores[[i, j, id as usize]] = 1.0;
    }
    scores
}

fn one_hot_cube(dense: &Array3<LabelId>, channels: usize) -> Array4<f32> {
    let (ni, nj, nk) = dense.dim();
    let mut scores = Array4::zeros((ni, nj, nk, channels));
    for ((i, j, k), &id) in dense.indexed_iter() {
        scores[[i, j, k, id as usize]] = 1.0;
    }
    scores
}

#[test]
fn test_encoded_grids_decode_back_to_gold() {
    let gold = corpus();
    let vocab = LabelVocab::from_sentences(&gold);
    let encoder = BoxFillEncoder::new(vocab.clone()).unwrap();
    let decoder = SoftJointDecoder::new(&vocab, AppConfig::default().decoder).unwrap();

    let mut predicted = Vec::new();
    for sentence in &gold {
        let filled = encoder.fill(sentence).unwrap();
        let joint = one_hot_joint(&joint_grid(&filled).unwrap(), vocab.len());
        let cube = one_hot_cube(&filled.quintuplet_matrix.to_dense().unwrap(), vocab.q_num_logits);

        let scores = SentenceScores::new(joint.view(), cube.view()).unwrap();
        let decoded = decoder
            .decode_sentence(&scores, &CancellationToken::new())
            .unwrap();
        predicted.push(decoded.to_sentence(&sentence.sent_text, &vocab).unwrap());
    }

    let report = Evaluator::new().evaluate(&predicted, &gold).unwrap();
    assert_eq!(report.num_sentences, 2);
    assert_eq!(report.entity.num_correct, 6);
    assert_eq!(report.entity.num_pred, 6);
    assert_eq!(report.strict_triplet.num_correct, 2);
    assert_eq!(report.quintuplet.num_correct, 2);
    assert!((report.quintuplet.f1_score() - 1.0).abs() < 1e-9);
}

#[test]
fn test_batch_decode_matches_sequential() {
    let gold = corpus();
    let vocab = LabelVocab::from_sentences(&gold);
    let encoder = BoxFillEncoder::new(vocab.clone()).unwrap();
    let decoder = SoftJointDecoder::new(&vocab, Default::default()).unwrap();
    let runner = BatchRunner::new(&AppConfig::default().batch).unwrap();

    let grids: Vec<(Array3<f32>, Array4<f32>)> = gold
        .iter()
        .map(|s| {
            let filled = encoder.fill(s).unwrap();
            (
                one_hot_joint(&joint_grid(&filled).unwrap(), vocab.len()),
                one_hot_cube(&filled.quintuplet_matrix.to_dense().unwrap(), vocab.q_num_logits),
            )
        })
        .collect();
    let batch: Vec<SentenceScores<'_>> = grids
        .iter()
        .map(|(joint, cube)| SentenceScores::new(joint.view(), cube.view()).unwrap())
        .collect();

    let cancel = CancellationToken::new();
    let parallel = runner.decode(&decoder, &batch, &cancel);
    assert_eq!(parallel.len(), batch.len());
    for (result, scores) in parallel.iter().zip(&batch) {
        let sequential = decoder.decode_sentence(scores, &cancel).unwrap();
        assert_eq!(result.as_ref().unwrap(), &sequential);
    }
}

#[test]
fn test_corpus_round_trips_cleanly() {
    let gold = corpus();
    let vocab = LabelVocab::from_sentences(&gold);
    let encoder = BoxFillEncoder::new(vocab).unwrap();
    let runner = BatchRunner::new(&Default::default()).unwrap();

    let reports: Vec<_> = runner
        .validate(&encoder, &gold, NonzeroSpanPolicy::default())
        .into_iter()
        .collect::<Result<_, _>>()
        .unwrap();
    let summary = ValidationSummary::collect(&reports);
    assert_eq!(summary.sentences, 2);
    assert_eq!(summary.clean, 2, "{}", summary.report());
}

#[test]
fn test_encoded_records_survive_jsonl() {
    let gold = corpus();
    let vocab = LabelVocab::from_sentences(&gold);
    let encoder = BoxFillEncoder::new(vocab.clone()).unwrap();
    let encoded: Vec<Sentence> = gold
        .iter()
        .flat_map(|s| encoder.encode(s).unwrap())
        .collect();

    let dir = std::env::temp_dir().join(format!("quinta-pipeline-{}", std::process::id()));
    let path = dir.join("train.jsonl");
    write_jsonl(&path, &encoded).unwrap();
    let back: Vec<Sentence> = read_jsonl(&path).unwrap();
    assert_eq!(back, encoded);

    let stats = CorpusStats::collect(&back, vocab.get("None").unwrap()).unwrap();
    assert_eq!(stats.sentences, 2);
    assert!((stats.mean_entities - 3.0).abs() < 1e-9);
    assert!(stats.cube_sparsity > 0.9);

    std::fs::remove_dir_all(dir).ok();
}

#[test]
fn test_tag_mode_corpus() {
    let gold = corpus();
    let vocab = LabelVocab::for_tags(&gold);
    let encoder = TagEncoder::new(vocab.clone()).unwrap();

    let views: Vec<Sentence> = gold
        .iter()
        .flat_map(|s| encoder.encode(s).unwrap())
        .collect();
    assert_eq!(views.len(), 2);
    assert!(views[0].sent_text.ends_with("| Marie Curie | award received | Nobel Prize"));

    let begin = vocab.get("B-point in time").unwrap();
    assert_eq!(views[0].joint_label_matrix[7][7], begin);
    let begin = vocab.get("B-start time").unwrap();
    assert_eq!(views[1].joint_label_matrix[4][4], begin);
}
