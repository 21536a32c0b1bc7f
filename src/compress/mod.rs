//! Log compression ahead of AI analysis.
//!
//! A [`Compressor`] shrinks log text before it is handed to a language
//! model and reports token statistics. Two backends: a local mock that keeps
//! the head of the batch, and the ScaleDown HTTP service, which falls back to
//! the mock whenever the upstream call fails.

pub mod mock;
pub mod scaledown;

pub use mock::MockCompressor;
pub use scaledown::ScaleDownCompressor;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::config::{CompressionBackend, CompressionConfig};

/// USD per one million input tokens (gpt-4o-mini pricing).
const COST_PER_MILLION_TOKENS: f64 = 0.15;

pub const DEFAULT_ANALYSIS_PROMPT: &str = "Analyze these security logs for threats and anomalies";

#[derive(Debug, Error)]
pub enum CompressError {
    #[error("log text is empty")]
    EmptyInput,

    #[error("invalid compression rate {0:?}: expected \"auto\" or a number between 0 and 1")]
    InvalidRate(String),

    #[error("compression backend not configured: {0}")]
    Unconfigured(String),

    #[error("compression upstream failed: {0}")]
    Upstream(String),
}

// ---------------------------------------------------------------------------
// Request / result
// ---------------------------------------------------------------------------

/// Target compression rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rate {
    Auto,
    Fixed(f64),
}

impl Rate {
    pub fn parse(raw: &str) -> Result<Self, CompressError> {
        let raw = raw.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case("auto") {
            return Ok(Rate::Auto);
        }
        match raw.parse::<f64>() {
            Ok(v) if (0.0..=1.0).contains(&v) => Ok(Rate::Fixed(v)),
            _ => Err(CompressError::InvalidRate(raw.to_string())),
        }
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rate::Auto => write!(f, "auto"),
            Rate::Fixed(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompressionRequest<'a> {
    pub logs: &'a str,
    pub prompt: &'a str,
    pub target_model: &'a str,
    pub rate: Rate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionResult {
    pub content: String,
    pub original_tokens: usize,
    pub compressed_tokens: usize,
    pub latency_ms: u64,
    /// True when the local mock produced `content`.
    pub mock: bool,
}

/// Presentation-ready statistics for one compression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionStats {
    pub original_tokens: usize,
    pub compressed_tokens: usize,
    pub tokens_saved: i64,
    pub savings_percent: f64,
    pub compression_ratio: f64,
    pub latency_ms: u64,
    pub target_model: String,
    pub estimated_cost_saved: f64,
    pub mock: bool,
}

impl CompressionStats {
    pub fn from_result(result: &CompressionResult, target_model: &str) -> Self {
        let original = result.original_tokens as f64;
        let compressed = result.compressed_tokens as f64;
        let tokens_saved = result.original_tokens as i64 - result.compressed_tokens as i64;

        let savings_percent = if result.original_tokens > 0 {
            tokens_saved as f64 / original * 100.0
        } else {
            0.0
        };
        let compression_ratio = if result.compressed_tokens > 0 {
            original / compressed
        } else {
            0.0
        };
        let cost = tokens_saved as f64 / 1_000_000.0 * COST_PER_MILLION_TOKENS;

        Self {
            original_tokens: result.original_tokens,
            compressed_tokens: result.compressed_tokens,
            tokens_saved,
            savings_percent: round_to(savings_percent, 2),
            compression_ratio: round_to(compression_ratio, 2),
            latency_ms: result.latency_ms,
            target_model: target_model.to_string(),
            estimated_cost_saved: round_to(cost, 6),
            mock: result.mock,
        }
    }
}

/// Whitespace-separated words, the token estimate used throughout.
pub fn count_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
pub trait Compressor: Send + Sync {
    fn name(&self) -> &str;

    async fn compress(&self, request: &CompressionRequest<'_>)
        -> Result<CompressionResult, CompressError>;
}

/// Pick the backend named in `[compression]`. ScaleDown without an API key
/// runs the mock instead.
pub fn from_config(cfg: &CompressionConfig) -> Arc<dyn Compressor> {
    match cfg.backend {
        CompressionBackend::Mock => Arc::new(MockCompressor),
        CompressionBackend::Scaledown => match ScaleDownCompressor::from_config(cfg) {
            Ok(backend) => Arc::new(backend),
            Err(e) => {
                warn!(error = %e, "ScaleDown unavailable, using mock compression");
                Arc::new(MockCompressor)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_from_result() {
        let result = CompressionResult {
            content: String::new(),
            original_tokens: 1000,
            compressed_tokens: 400,
            latency_ms: 12,
            mock: false,
        };
        let stats = CompressionStats::from_result(&result, "gpt-4o-mini");
        assert_eq!(stats.tokens_saved, 600);
        assert_eq!(stats.savings_percent, 60.0);
        assert_eq!(stats.compression_ratio, 2.5);
        assert_eq!(stats.estimated_cost_saved, 0.00009);
        assert_eq!(stats.target_model, "gpt-4o-mini");
    }

    #[test]
    fn test_stats_zero_tokens() {
        let result = CompressionResult {
            content: String::new(),
            original_tokens: 0,
            compressed_tokens: 0,
            latency_ms: 0,
            mock: true,
        };
        let stats = CompressionStats::from_result(&result, "m");
        assert_eq!(stats.savings_percent, 0.0);
        assert_eq!(stats.compression_ratio, 0.0);
        assert!(stats.mock);
    }

    #[test]
    fn test_rate_parsing() {
        assert_eq!(Rate::parse("auto").unwrap(), Rate::Auto);
        assert_eq!(Rate::parse("").unwrap(), Rate::Auto);
        assert_eq!(Rate::parse("0.4").unwrap(), Rate::Fixed(0.4));
        assert!(Rate::parse("1.5").is_err());
        assert!(Rate::parse("fast").is_err());
        assert_eq!(Rate::Fixed(0.4).to_string(), "0.4");
    }

    #[test]
    fn test_scaledown_without_key_falls_back_to_mock() {
        let cfg = CompressionConfig {
            backend: CompressionBackend::Scaledown,
            ..CompressionConfig::default()
        };
        assert_eq!(from_config(&cfg).name(), "mock");
    }

    #[test]
    fn test_token_count() {
        assert_eq!(count_tokens("  a b\tc\n d "), 4);
        assert_eq!(count_tokens(""), 0);
    }
}
