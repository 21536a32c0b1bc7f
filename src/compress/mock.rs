use super::{count_tokens, CompressError, CompressionRequest, CompressionResult, Compressor};

/// Fraction of lines the mock keeps.
const KEEP_FRACTION: f64 = 0.6;

/// Offline stand-in: keeps the first 60% of lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockCompressor;

impl MockCompressor {
    pub fn compress_text(logs: &str) -> CompressionResult {
        let lines: Vec<&str> = logs.split('\n').collect();
        let keep = (lines.len() as f64 * KEEP_FRACTION).floor() as usize;
        let content = lines[..keep].join("\n");
        CompressionResult {
            original_tokens: count_tokens(logs),
            compressed_tokens: count_tokens(&content),
            content,
            latency_ms: 0,
            mock: true,
        }
    }
}

#[async_trait::async_trait]
impl Compressor for MockCompressor {
    fn name(&self) -> &str {
        "mock"
    }

    async fn compress(
        &self,
        request: &CompressionRequest<'_>,
    ) -> Result<CompressionResult, CompressError> {
        if request.logs.trim().is_empty() {
            return Err(CompressError::EmptyInput);
        }
        Ok(Self::compress_text(request.logs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::Rate;

    #[test]
    fn test_keeps_first_sixty_percent() {
        let logs = (1..=10).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let result = MockCompressor::compress_text(&logs);
        assert_eq!(result.content.lines().count(), 6);
        assert!(result.content.ends_with("line 6"));
        assert_eq!(result.original_tokens, 20);
        assert_eq!(result.compressed_tokens, 12);
        assert!(result.mock);
    }

    #[test]
    fn test_single_line_compresses_to_nothing() {
        let result = MockCompressor::compress_text("only one line");
        assert_eq!(result.content, "");
        assert_eq!(result.compressed_tokens, 0);
    }

    #[tokio::test]
    async fn test_empty_input_rejected() {
        let req = CompressionRequest {
            logs: "   ",
            prompt: "p",
            target_model: "m",
            rate: Rate::Auto,
        };
        assert!(matches!(
            MockCompressor.compress(&req).await,
            Err(CompressError::EmptyInput)
        ));
    }
}
