//! Run-length encoding of text.

use crate::{Error, Result, TaskKind, protocol::round_to};
use serde::{Deserialize, Serialize};

/// Compression scheme requested by a task. Only `simple` (RLE) exists; any
/// other name decodes into [`CompressAlgorithm::Other`] and fails at run time.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CompressAlgorithm {
    #[default]
    Simple,
    Other(String),
}

impl CompressAlgorithm {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Simple => "simple",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for CompressAlgorithm {
    fn from(name: String) -> Self {
        if name == "simple" {
            Self::Simple
        } else {
            Self::Other(name)
        }
    }
}

impl From<CompressAlgorithm> for String {
    fn from(value: CompressAlgorithm) -> Self {
        match value {
            CompressAlgorithm::Simple => "simple".to_owned(),
            CompressAlgorithm::Other(name) => name,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressPayload {
    pub text: String,
    #[serde(default)]
    pub algorithm: CompressAlgorithm,
}

impl CompressPayload {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            algorithm: CompressAlgorithm::Simple,
        }
    }

    #[must_use]
    pub fn with_algorithm(mut self, algorithm: impl Into<String>) -> Self {
        self.algorithm = CompressAlgorithm::from(algorithm.into());
        self
    }

    #[allow(clippy::unnecessary_wraps)]
    pub(crate) fn check(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressOutput {
    pub compressed: String,
    pub algorithm: String,
    pub original_size: usize,
    pub compressed_size: usize,
    pub compression_ratio: f64,
}

pub(crate) fn run(payload: &CompressPayload) -> Result<CompressOutput> {
    if let CompressAlgorithm::Other(name) = &payload.algorithm {
        return Err(Error::unsupported(TaskKind::Compress, name));
    }

    let compressed = run_length_encode(&payload.text);
    let original_size = payload.text.chars().count();
    let compressed_size = compressed.chars().count();
    let compression_ratio = if original_size == 0 {
        1.0
    } else {
        round_to(compressed_size as f64 / original_size as f64, 2)
    };

    Ok(CompressOutput {
        compressed,
        algorithm: payload.algorithm.as_str().to_owned(),
        original_size,
        compressed_size,
        compression_ratio,
    })
}

/// Emits `<count><char>` for every maximal run of a repeated character.
pub fn run_length_encode(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        let mut run = 1;
        while chars.next_if_eq(&c).is_some() {
            run += 1;
        }
        out.push_str(&run.to_string());
        out.push(c);
    }
    out
}
