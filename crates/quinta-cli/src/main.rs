//! Quinta CLI - Command-line interface
//!
//! Usage:
//!   quinta assemble <input> <output>
//!   quinta label-file <output> <inputs...> [--tags]
//!   quinta encode <input> <output> --labels <file> [--mode joint|tags]
//!   quinta validate <input> --labels <file>
//!   quinta decode <scores> <output> --labels <file>
//!   quinta evaluate <predicted> <gold>
//!   quinta stats <input>

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use serde::de::DeserializeOwned;

use quinta_core::vocab::NONE_LABEL;
use quinta_core::{read_jsonl, write_jsonl, AppConfig, FlatQuintuplet, LabelVocab, LoggingConfig, Sentence};
use quinta_extractor::scores::OwnedScores;
use quinta_extractor::{
    assemble_sentences, BatchRunner, BoxFillEncoder, CancellationToken, CorpusStats, Evaluator,
    ScoreRecord, SentenceScores, SoftJointDecoder, TagEncoder, ValidationSummary,
};

#[derive(Parser)]
#[command(name = "quinta")]
#[command(about = "Quintuplet extraction grids: encode, validate, decode, evaluate")]
#[command(version)]
struct Cli {
    /// TOML configuration file (environment variables override it)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Group flat quintuplet records into sentence records
    Assemble { input: PathBuf, output: PathBuf },
    /// Build a label vocabulary from sentence files
    LabelFile {
        output: PathBuf,
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Build a BIO tag vocabulary instead of the joint one
        #[arg(long)]
        tags: bool,
    },
    /// Write label grids into sentence records
    Encode {
        input: PathBuf,
        output: PathBuf,
        #[arg(long)]
        labels: PathBuf,
        #[arg(long, value_enum, default_value_t = EncodeMode::Joint)]
        mode: EncodeMode,
    },
    /// Check that every sentence's encoding decodes back
    Validate {
        input: PathBuf,
        #[arg(long)]
        labels: PathBuf,
    },
    /// Decode model score records into sentence records
    Decode {
        scores: PathBuf,
        output: PathBuf,
        #[arg(long)]
        labels: PathBuf,
        /// Override the boundary threshold
        #[arg(long)]
        threshold: Option<f32>,
    },
    /// Score predicted sentences against gold sentences
    Evaluate {
        predicted: PathBuf,
        gold: PathBuf,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print corpus statistics
    Stats {
        input: PathBuf,
        /// Vocabulary used to find the None id (defaults to 0)
        #[arg(long)]
        labels: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum EncodeMode {
    /// Box-filled joint table and qualifier cube
    Joint,
    /// Relation-conditioned BIO tags on the diagonal
    Tags,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::from_file(path)?.with_env_override()?,
        None => AppConfig::from_env()?,
    };
    config.validate()?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Assemble { input, output } => {
            let flat: Vec<FlatQuintuplet> = read_jsonl(&input)?;
            let sentences = assemble_sentences(&flat)?;
            write_jsonl(&output, &sentences)?;
            println!("Assembled {} sentences from {} quintuplets", sentences.len(), flat.len());
        }
        Commands::LabelFile {
            output,
            inputs,
            tags,
        } => {
            let mut sentences: Vec<Sentence> = Vec::new();
            for input in &inputs {
                sentences.extend(read_jsonl::<Sentence>(input)?);
            }
            let vocab = if tags {
                LabelVocab::for_tags(&sentences)
            } else {
                LabelVocab::from_sentences(&sentences)
            };
            std::fs::write(&output, serde_json::to_string_pretty(&vocab)?)
                .with_context(|| format!("writing {}", output.display()))?;
            println!("Wrote {} labels to {}", vocab.len(), output.display());
        }
        Commands::Encode {
            input,
            output,
            labels,
            mode,
        } => {
            let vocab: LabelVocab = read_json(&labels)?;
            let sentences: Vec<Sentence> = read_jsonl(&input)?;
            let runner = BatchRunner::new(&config.batch)?;

            let results = match mode {
                EncodeMode::Joint => runner.encode(&BoxFillEncoder::new(vocab)?, &sentences),
                EncodeMode::Tags => runner.encode(&TagEncoder::new(vocab)?, &sentences),
            };

            let mut encoded = Vec::new();
            for (sentence, result) in sentences.iter().zip(results) {
                encoded.extend(
                    result.with_context(|| format!("encoding {:?}", sentence.article_id))?,
                );
            }
            write_jsonl(&output, &encoded)?;
            println!("Encoded {} records", encoded.len());
        }
        Commands::Validate { input, labels } => {
            let vocab: LabelVocab = read_json(&labels)?;
            let sentences: Vec<Sentence> = read_jsonl(&input)?;
            let encoder = BoxFillEncoder::new(vocab)?;
            let runner = BatchRunner::new(&config.batch)?;

            let mut reports = Vec::with_capacity(sentences.len());
            for (sentence, result) in sentences
                .iter()
                .zip(runner.validate(&encoder, &sentences, config.decoder.span_policy))
            {
                match result {
                    Ok(report) => {
                        for warning in &report.warnings {
                            warning.log();
                        }
                        reports.push(report);
                    }
                    Err(e) => tracing::error!(article = %sentence.article_id, "Validation failed: {}", e),
                }
            }

            let summary = ValidationSummary::collect(&reports);
            print!("{}", summary.report());
            let failed = sentences.len() - reports.len();
            if failed > 0 {
                anyhow::bail!("{failed} sentences could not be encoded");
            }
        }
        Commands::Decode {
            scores,
            output,
            labels,
            threshold,
        } => {
            let vocab: LabelVocab = read_json(&labels)?;
            let mut decoder_config = config.decoder.clone();
            if let Some(threshold) = threshold {
                decoder_config = decoder_config.with_threshold(threshold);
            }
            let decoder = SoftJointDecoder::new(&vocab, decoder_config)?;
            let runner = BatchRunner::new(&config.batch)?;

            let records: Vec<ScoreRecord> = read_jsonl(&scores)?;
            let arrays = records
                .iter()
                .enumerate()
                .map(|(i, r)| r.to_arrays().with_context(|| format!("score record {}", i + 1)))
                .collect::<anyhow::Result<Vec<OwnedScores>>>()?;
            let views = arrays
                .iter()
                .map(OwnedScores::view)
                .collect::<quinta_core::Result<Vec<SentenceScores<'_>>>>()?;

            let cancel = CancellationToken::new();
            let mut decoded = Vec::with_capacity(records.len());
            let mut failed = 0usize;
            for (i, (record, result)) in records
                .iter()
                .zip(runner.decode(&decoder, &views, &cancel))
                .enumerate()
            {
                match result.and_then(|d| d.to_sentence(&record.sent_text(), &vocab)) {
                    Ok(sentence) => decoded.push(sentence),
                    Err(e) => {
                        failed += 1;
                        tracing::error!(record = i + 1, "Decoding failed: {}", e);
                    }
                }
            }

            write_jsonl(&output, &decoded)?;
            println!("Decoded {} sentences ({} failed)", decoded.len(), failed);
        }
        Commands::Evaluate {
            predicted,
            gold,
            json,
        } => {
            let predicted: Vec<Sentence> = read_jsonl(&predicted)?;
            let gold: Vec<Sentence> = read_jsonl(&gold)?;
            let report = Evaluator::new().evaluate(&predicted, &gold)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report.report());
            }
        }
        Commands::Stats { input, labels } => {
            let none = match labels {
                Some(path) => read_json::<LabelVocab>(&path)?.get(NONE_LABEL)?,
                None => 0,
            };
            let sentences: Vec<Sentence> = read_jsonl(&input)?;
            print!("{}", CorpusStats::collect(&sentences, none)?.report());
        }
    }

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("quinta={0},quinta_core={0},quinta_extractor={0}", logging.level).into());

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_file(logging.include_location)
        .with_line_number(logging.include_location);

    if logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}
