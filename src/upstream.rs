use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::GatewayError;
use crate::config::UpstreamConfig;

/// The opaque generative backend. One fallible external call; its failure
/// must propagate before any debit happens.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatOutput, GatewayError>;
    async fn image(&self, request: &ImageRequest) -> Result<ImageOutput, GatewayError>;
}

#[derive(Clone, Debug)]
pub struct ChatRequest {
    pub model: String,
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Clone, Debug)]
pub struct ChatOutput {
    pub text: String,
    pub total_tokens: u32,
}

#[derive(Clone, Debug)]
pub struct ImageRequest {
    pub model: String,
    pub prompt: String,
    pub size: String,
    pub style: String,
}

#[derive(Clone, Debug)]
pub struct ImageOutput {
    pub url: String,
}

/// OpenAI-compatible HTTP client (chat completions + image generations).
pub struct OpenAiCompatibleUpstream {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiCompatibleUpstream {
    pub fn new(config: &UpstreamConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }

    fn request(&self, path: &str, body: serde_json::Value) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(format!("{}{path}", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }

    async fn send(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, GatewayError> {
        let response = self
            .request(path, body)
            .send()
            .await
            .map_err(|err| GatewayError::UpstreamFailure {
                message: format!("request to {path} failed: {err}"),
            })?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| GatewayError::UpstreamFailure {
                message: format!("reading {path} response failed: {err}"),
            })?;
        if !status.is_success() {
            return Err(GatewayError::UpstreamFailure {
                message: format!(
                    "{path} returned status={} body={}",
                    status.as_u16(),
                    String::from_utf8_lossy(&bytes)
                ),
            });
        }
        serde_json::from_slice(&bytes).map_err(|err| GatewayError::UpstreamFailure {
            message: format!("{path} response is not valid JSON: {err}"),
        })
    }
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    total_tokens: u32,
}

#[derive(Deserialize)]
struct ImageGenerationResponse {
    data: Vec<ImageDatum>,
}

#[derive(Deserialize)]
struct ImageDatum {
    #[serde(default)]
    url: Option<String>,
}

#[async_trait]
impl Upstream for OpenAiCompatibleUpstream {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatOutput, GatewayError> {
        let body = json!({
            "model": request.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user },
            ],
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });
        let raw = self.send("/chat/completions", body).await?;
        let parsed: ChatCompletionResponse =
            serde_json::from_value(raw).map_err(|err| GatewayError::UpstreamFailure {
                message: format!("unexpected chat completion shape: {err}"),
            })?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        Ok(ChatOutput {
            text,
            total_tokens: parsed.usage.map(|usage| usage.total_tokens).unwrap_or(0),
        })
    }

    async fn image(&self, request: &ImageRequest) -> Result<ImageOutput, GatewayError> {
        let body = json!({
            "model": request.model,
            "prompt": request.prompt,
            "size": request.size,
            "style": request.style,
            "n": 1,
        });
        let raw = self.send("/images/generations", body).await?;
        let parsed: ImageGenerationResponse =
            serde_json::from_value(raw).map_err(|err| GatewayError::UpstreamFailure {
                message: format!("unexpected image generation shape: {err}"),
            })?;
        let url = parsed
            .data
            .into_iter()
            .next()
            .and_then(|datum| datum.url)
            .ok_or_else(|| GatewayError::UpstreamFailure {
                message: "image generation returned no url".to_string(),
            })?;
        Ok(ImageOutput { url })
    }
}
