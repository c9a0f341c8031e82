//! Anthropic Messages API backend

use crate::error::GatewayError;
use crate::generator::TextGenerator;
use crate::types::{GenerationRequest, GenerationResponse, TokenUsage};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

const API_VERSION: &str = "2023-06-01";

/// Environment variable holding the API key
pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Backend settings (never holds the key)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Model name
    pub model: String,
    /// Completion token cap
    pub max_tokens: u32,
    /// API base URL
    pub api_base: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 8_192,
            api_base: "https://api.anthropic.com/v1".to_string(),
        }
    }
}

/// Messages API client
#[derive(Debug, Clone)]
pub struct AnthropicBackend {
    client: reqwest::Client,
    api_key: String,
    config: BackendConfig,
}

impl AnthropicBackend {
    /// Create client with an explicit key
    ///
    /// No client-level timeout is set; [`crate::RetryingGateway`] owns the
    /// per-call deadline.
    ///
    /// # Errors
    /// Returns error if the key is empty or the HTTP client cannot be built
    pub fn new(api_key: impl Into<String>, config: BackendConfig) -> Result<Self, GatewayError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(GatewayError::Config("API key is empty".into()));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| GatewayError::Config(e.to_string()))?;
        Ok(Self {
            client,
            api_key,
            config,
        })
    }

    /// Create client from `ANTHROPIC_API_KEY`
    ///
    /// # Errors
    /// Returns error if the variable is unset
    pub fn from_env(config: BackendConfig) -> Result<Self, GatewayError> {
        let key = std::env::var(API_KEY_ENV)
            .map_err(|_| GatewayError::Config(format!("{API_KEY_ENV} is not set")))?;
        Self::new(key, config)
    }

    fn headers(&self) -> Result<HeaderMap, GatewayError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.api_key).map_err(|e| GatewayError::Config(e.to_string()))?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));
        Ok(headers)
    }

    fn body(&self, request: &GenerationRequest) -> ApiRequest {
        let mut content: Vec<ApiContent> = request
            .images
            .iter()
            .map(|image| ApiContent::Image {
                source: ImageSource {
                    kind: "base64",
                    media_type: image.media_type.clone(),
                    data: image.data_base64.clone(),
                },
            })
            .collect();
        content.push(ApiContent::Text {
            text: request.content.clone(),
        });

        ApiRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            system: (!request.instructions.is_empty()).then(|| request.instructions.clone()),
            messages: vec![ApiMessage {
                role: "user",
                content,
            }],
        }
    }
}

fn classify_status(status: u16, message: String) -> GatewayError {
    match status {
        429 => GatewayError::RateLimited(message),
        _ => GatewayError::Api { status, message },
    }
}

#[async_trait]
impl TextGenerator for AnthropicBackend {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, GatewayError> {
        let response = self
            .client
            .post(format!("{}/messages", self.config.api_base.trim_end_matches('/')))
            .headers(self.headers()?)
            .json(&self.body(request))
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), body));
        }

        let api: ApiResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Parse(e.to_string()))?;
        let text = api
            .content
            .into_iter()
            .filter_map(|block| match block {
                ApiResponseBlock::Text { text } => Some(text),
                ApiResponseBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("");

        tracing::debug!(
            label = %request.label,
            input_tokens = api.usage.input_tokens,
            output_tokens = api.usage.output_tokens,
            "generation call completed"
        );
        Ok(GenerationResponse {
            text,
            usage: TokenUsage::new(api.usage.input_tokens, api.usage.output_tokens),
        })
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ApiMessage>,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: Vec<ApiContent>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContent {
    Text { text: String },
    Image { source: ImageSource },
}

#[derive(Debug, Serialize)]
struct ImageSource {
    #[serde(rename = "type")]
    kind: &'static str,
    media_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    content: Vec<ApiResponseBlock>,
    #[serde(default)]
    usage: ApiUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiResponseBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ImageAttachment;

    #[test]
    fn request_body_puts_images_before_text() {
        let backend = AnthropicBackend::new("test-key", BackendConfig::default()).unwrap();
        let request = GenerationRequest::new("discovery", "find entities", "login page").with_images(vec![
            ImageAttachment {
                media_type: "image/png".into(),
                data_base64: "AAAA".into(),
            },
        ]);

        let body = serde_json::to_value(backend.body(&request)).unwrap();
        assert_eq!(body["system"], "find entities");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"][0]["type"], "image");
        assert_eq!(body["messages"][0]["content"][0]["source"]["type"], "base64");
        assert_eq!(body["messages"][0]["content"][1]["text"], "login page");
    }

    #[test]
    fn response_text_blocks_are_joined() {
        let api: ApiResponse = serde_json::from_str(
            r#"{"content":[{"type":"text","text":"{\"a\":"},{"type":"tool_use","id":"x"},{"type":"text","text":"1}"}],
                "usage":{"input_tokens":12,"output_tokens":3}}"#,
        )
        .unwrap();
        assert_eq!(api.content.len(), 3);
        assert_eq!(api.usage.input_tokens, 12);
    }

    #[test]
    fn empty_key_is_rejected() {
        assert!(matches!(
            AnthropicBackend::new("  ", BackendConfig::default()),
            Err(GatewayError::Config(_))
        ));
    }

    #[test]
    fn rate_limit_status_is_classified() {
        assert!(matches!(classify_status(429, "slow".into()), GatewayError::RateLimited(_)));
        assert!(matches!(classify_status(503, "down".into()), GatewayError::Api { status: 503, .. }));
    }
}
