//! AI augmentation: supplementary findings from an external language model.
//!
//! The engine only sees the [`Augmenter`] trait. A failed or slow call is
//! reported as a [`ServiceError`] and the engine falls back to rule-only
//! findings.

pub mod openai;
pub mod parse;

pub use openai::OpenAiAugmenter;

use crate::detect::Finding;
use thiserror::Error;

/// Failure talking to the upstream augmentation service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("upstream call timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("upstream returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed upstream payload: {0}")]
    MalformedPayload(String),

    #[error("augmentation backend not configured: {0}")]
    Unconfigured(String),
}

impl From<reqwest::Error> for ServiceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ServiceError::Timeout
        } else {
            ServiceError::Transport(e.to_string())
        }
    }
}

/// Source of AI-generated candidate findings.
///
/// Implementations return findings tagged [`crate::detect::Provenance::Ai`].
/// Malformed entries in an upstream payload are dropped individually; only a
/// payload with no recognizable structure at all is an error.
#[async_trait::async_trait]
pub trait Augmenter: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    async fn augment(&self, text: &str) -> Result<Vec<Finding>, ServiceError>;
}
