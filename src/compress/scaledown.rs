//! ScaleDown HTTP compression backend.

use std::time::{Duration, Instant};

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{
    count_tokens, CompressError, CompressionRequest, CompressionResult, Compressor, MockCompressor,
};
use crate::config::CompressionConfig;

pub struct ScaleDownCompressor {
    client: Client,
    endpoint: String,
    api_key: String,
}

#[derive(Serialize)]
struct CompressBody<'a> {
    context: &'a str,
    prompt: &'a str,
    model: &'a str,
    scaledown: RateBody,
}

#[derive(Serialize)]
struct RateBody {
    rate: String,
}

#[derive(Deserialize)]
struct CompressReply {
    #[serde(alias = "optimized_prompt", alias = "compressed_prompt")]
    content: Option<String>,
    latency_ms: Option<u64>,
}

impl ScaleDownCompressor {
    pub fn from_config(cfg: &CompressionConfig) -> Result<Self, CompressError> {
        let api_key = cfg
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                CompressError::Unconfigured("compression.api_key (or SCALEDOWN_API_KEY) is not set".into())
            })?;
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
            .build()
            .map_err(|e| CompressError::Upstream(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: cfg.endpoint.clone(),
            api_key,
        })
    }

    async fn call(&self, request: &CompressionRequest<'_>) -> Result<CompressionResult, CompressError> {
        let body = CompressBody {
            context: request.logs,
            prompt: request.prompt,
            model: request.target_model,
            scaledown: RateBody {
                rate: request.rate.to_string(),
            },
        };

        let start = Instant::now();
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CompressError::Upstream(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CompressError::Upstream(format!("HTTP {}", status.as_u16())));
        }

        let reply: CompressReply = response
            .json()
            .await
            .map_err(|e| CompressError::Upstream(format!("bad reply: {e}")))?;
        let content = reply
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| CompressError::Upstream("reply carried no compressed text".into()))?;

        Ok(CompressionResult {
            original_tokens: count_tokens(request.logs),
            compressed_tokens: count_tokens(&content),
            content,
            latency_ms: reply
                .latency_ms
                .unwrap_or_else(|| start.elapsed().as_millis() as u64),
            mock: false,
        })
    }
}

#[async_trait::async_trait]
impl Compressor for ScaleDownCompressor {
    fn name(&self) -> &str {
        "scaledown"
    }

    async fn compress(
        &self,
        request: &CompressionRequest<'_>,
    ) -> Result<CompressionResult, CompressError> {
        if request.logs.trim().is_empty() {
            return Err(CompressError::EmptyInput);
        }
        match self.call(request).await {
            Ok(result) => {
                debug!(
                    original = result.original_tokens,
                    compressed = result.compressed_tokens,
                    "ScaleDown compression complete"
                );
                Ok(result)
            }
            Err(e) => {
                warn!(error = %e, "ScaleDown compression failed, using mock compression");
                Ok(MockCompressor::compress_text(request.logs))
            }
        }
    }
}
