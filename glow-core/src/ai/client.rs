use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::AiError;

/// Request body for the messages endpoint.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AiRequest {
    pub model: String,
    pub messages: Vec<AiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AiMessage {
    pub role: String,
    pub content: Vec<ContentBlock>,
}

impl AiMessage {
    pub fn user(content: Vec<ContentBlock>) -> Self {
        Self {
            role: "user".to_string(),
            content,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    Image { source: ImageSource },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    /// Inline JPEG bytes as a base64 image block.
    pub fn jpeg(bytes: &[u8]) -> Self {
        ContentBlock::Image {
            source: ImageSource {
                kind: "base64".to_string(),
                media_type: "image/jpeg".to_string(),
                data: base64::engine::general_purpose::STANDARD.encode(bytes),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ImageSource {
    #[serde(rename = "type")]
    pub kind: String,
    pub media_type: String,
    pub data: String,
}

/// One round trip to the external model. Returns the response text.
#[async_trait]
pub trait AiClient: Send + Sync {
    async fn complete(&self, request: AiRequest) -> Result<String, AiError>;
}

#[derive(Deserialize)]
struct ResponseBody {
    #[serde(default)]
    content: Vec<ResponseBlock>,
}

#[derive(Deserialize)]
struct ResponseBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

const API_VERSION: &str = "2023-06-01";

/// `AiClient` over HTTP.
#[derive(Clone)]
pub struct HttpAiClient {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl HttpAiClient {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl AiClient for HttpAiClient {
    async fn complete(&self, request: AiRequest) -> Result<String, AiError> {
        debug!(model = %request.model, "AI request");
        let resp = self
            .client
            .post(&self.url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!("AI service returned {}: {}", status, body);
            return Err(AiError::from_status(status.as_u16(), body));
        }

        let body: ResponseBody = resp
            .json()
            .await
            .map_err(|e| AiError::Parse(e.to_string()))?;
        let text: String = body
            .content
            .into_iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text)
            .collect::<Vec<_>>()
            .join("\n");

        if text.trim().is_empty() {
            return Err(AiError::Parse("response has no text content".into()));
        }
        Ok(text)
    }
}
