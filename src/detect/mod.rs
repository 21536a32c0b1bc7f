//! Anomaly detection over batches of security log text.
//!
//! Pipeline per call: entity extraction and the rule catalog run over the
//! raw text, the optional AI adapter runs over the compressed (or raw) text,
//! the aggregator merges both finding sets, and the reducer turns the result
//! into one overall [`ThreatLevel`].

pub mod aggregate;
pub mod engine;
pub mod entities;
pub mod reduce;
pub mod rules;
pub mod types;

pub use aggregate::aggregate;
pub use engine::Detector;
pub use entities::{extract, Entities};
pub use reduce::{reduce_threat_level, reduce_with_threshold, summarize};
pub use types::{
    clamp_confidence, AiStatus, AnomalyType, DetectionResult, Finding, Provenance, ThreatLevel,
    ThreatSummary,
};

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced to the caller of a detection pass. Upstream AI failures
/// are not here: they degrade to rule-only results.
#[derive(Debug, Error)]
pub enum DetectError {
    /// Caller asked for something the deployment cannot provide.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Input that cannot be treated as text at all.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("detection did not finish within {0:?}")]
    DeadlineExceeded(Duration),

    #[error("internal error: {0}")]
    Internal(String),
}

/// One self-contained batch of log text, read-only for the whole call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogBatch(String);

impl LogBatch {
    /// Decode raw bytes. Non-UTF-8 input is rejected.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, DetectError> {
        String::from_utf8(bytes).map(Self).map_err(|e| {
            DetectError::MalformedInput(format!(
                "log batch is not valid UTF-8 (first bad byte at offset {})",
                e.utf8_error().valid_up_to()
            ))
        })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for empty or whitespace-only batches.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }

    pub fn line_count(&self) -> usize {
        self.0.lines().filter(|l| !l.trim().is_empty()).count()
    }
}

impl From<String> for LogBatch {
    fn from(text: String) -> Self {
        Self(text)
    }
}

impl From<&str> for LogBatch {
    fn from(text: &str) -> Self {
        Self(text.to_string())
    }
}

impl AsRef<str> for LogBatch {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_from_utf8() {
        let batch = LogBatch::from_bytes(b"line one\n\nline two\n".to_vec()).unwrap();
        assert_eq!(batch.line_count(), 2);
        assert!(!batch.is_blank());
    }

    #[test]
    fn test_batch_rejects_invalid_utf8() {
        let err = LogBatch::from_bytes(vec![b'o', b'k', 0xff, 0xfe]).unwrap_err();
        match err {
            DetectError::MalformedInput(msg) => assert!(msg.contains("offset 2")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_blank_batch() {
        assert!(LogBatch::from(" \n\t\n").is_blank());
        assert!(LogBatch::default().is_blank());
    }
}
