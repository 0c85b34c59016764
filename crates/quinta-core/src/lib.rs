//! Quinta Core - Data model, label vocabulary, and sparse cube codec
//!
//! This crate defines the shared representation used by every stage of
//! the quintuplet extraction pipeline:
//! - Token spans and sentence records (entities, relations, qualifiers)
//! - The label vocabulary and its validated id partition
//! - `SparseCube`, the compact form of a 3-D qualifier label volume
//! - Line-delimited record I/O
//! - Common error and warning types
//! - Configuration management

pub mod config;
pub mod cube;
pub mod io;
pub mod model;
pub mod span;
pub mod vocab;
pub mod warning;

pub use config::{AppConfig, BatchConfig, ConfigError, DecoderConfig, LoggingConfig};
pub use cube::{CubeEntry, SparseCube};
pub use io::{read_jsonl, write_jsonl};
pub use model::{Entity, FlatQuintuplet, Qualifier, QuintupletText, Relation, Sentence};
pub use span::Span;
pub use vocab::{LabelPartition, LabelVocab};
pub use warning::{DuplicateCoordinateWarning, LossyEncodingWarning, Warning};

use thiserror::Error;

/// Integer id of a label in the vocabulary. `0` is conventionally `None`.
pub type LabelId = u32;

/// Strategy for splitting runs of non-zero labels into spans.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NonzeroSpanPolicy {
    /// A change of label inside a non-zero run starts a new span
    #[default]
    SplitOnLabelChange,
    /// Any contiguous non-zero run is one span, whatever its labels
    MergeNonzero,
}

impl std::str::FromStr for NonzeroSpanPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "split_on_label_change" | "split" => Ok(Self::SplitOnLabelChange),
            "merge_nonzero" | "merge" => Ok(Self::MergeNonzero),
            _ => Err(ConfigError::InvalidValue {
                key: "QUINTA_SPAN_POLICY".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for Quinta operations
#[derive(Error, Debug)]
pub enum QuintaError {
    #[error("Invalid span [{start}, {end}){}", describe_length(.length))]
    InvalidSpan {
        start: usize,
        end: usize,
        length: Option<usize>,
    },

    #[error("Unknown entity id: {0}")]
    UnknownEntity(String),

    #[error("Unknown label: {0}")]
    UnknownLabel(String),

    #[error("Qualifier {label} does not reference three distinct entities: {head}, {tail}, {value}")]
    DegenerateQualifier {
        head: String,
        tail: String,
        value: String,
        label: String,
    },

    #[error("Invalid cube entry: {0}")]
    InvalidCubeEntry(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Decoding cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<ConfigError> for QuintaError {
    fn from(err: ConfigError) -> Self {
        Self::ConfigError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, QuintaError>;

fn describe_length(length: &Option<usize>) -> String {
    match length {
        Some(length) => format!(" for sequence length {length}"),
        None => String::new(),
    }
}

// ============================================================================
// Tests
// ============================================================================
