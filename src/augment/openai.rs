//! OpenAI-compatible chat-completions backend.

use std::time::{Duration, Instant};

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{parse::parse_findings, Augmenter, ServiceError};
use crate::config::AiConfig;
use crate::detect::{AnomalyType, Finding};

/// Upper bound on log text forwarded upstream, in bytes.
const MAX_PROMPT_BYTES: usize = 48 * 1024;

pub struct OpenAiAugmenter {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    response_format: ResponseFormat,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl OpenAiAugmenter {
    /// Build from `[ai]`. Fails with [`ServiceError::Unconfigured`] when no
    /// API key is set.
    pub fn from_config(cfg: &AiConfig) -> Result<Self, ServiceError> {
        let api_key = cfg
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ServiceError::Unconfigured("ai.api_key (or OPENAI_API_KEY) is not set".into()))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
            .build()
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: cfg.endpoint.clone(),
            model: cfg.model.clone(),
            api_key,
        })
    }
}

#[async_trait::async_trait]
impl Augmenter for OpenAiAugmenter {
    fn name(&self) -> &str {
        "openai"
    }

    async fn augment(&self, text: &str) -> Result<Vec<Finding>, ServiceError> {
        let system = system_prompt();
        let user = truncate_on_char_boundary(text, MAX_PROMPT_BYTES);
        let request = ChatRequest {
            model: &self.model,
            temperature: 0.0,
            response_format: ResponseFormat { kind: "json_object" },
            messages: [
                ChatMessage { role: "system", content: &system },
                ChatMessage { role: "user", content: user },
            ],
        };

        let start = Instant::now();
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::MalformedPayload(e.to_string()))?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ServiceError::MalformedPayload("empty completion".into()))?;

        let findings = parse_findings(&content)?;
        debug!(
            model = %self.model,
            findings = findings.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "AI augmentation returned"
        );
        Ok(findings)
    }
}

fn system_prompt() -> String {
    let categories: Vec<&str> = AnomalyType::ALL.iter().map(AnomalyType::as_str).collect();
    format!(
        "You are a security analyst. Identify security threats in the log text the user sends. \
         Reply with a JSON object {{\"anomalies\": [...]}} where each entry has: \
         \"type\" (one of: {}), \"severity\" (CRITICAL, HIGH, MEDIUM, LOW or INFO), \
         \"description\", \"recommendation\", \"confidence\" (0.0 to 1.0) and \
         \"affected_resources\" (IP addresses, usernames or hosts taken from the logs). \
         Reply with an empty list when nothing is suspicious.",
        categories.join(", ")
    )
}

fn truncate_on_char_boundary(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
