//! Outbound chat-completion client.

use async_trait::async_trait;
use shared_types::{ChatCompletionRequest, ChatCompletionResponse};
use tokio_util::sync::CancellationToken;

const ERROR_BODY_EXCERPT_CHARS: usize = 500;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("HTTP client setup failed: {0}")]
    Client(String),

    #[error("request to {endpoint} failed: {message}")]
    Transport { endpoint: String, message: String },

    #[error("provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("failed to decode provider response: {0}")]
    Decode(String),

    #[error("provider response contained no content")]
    EmptyResponse,

    #[error("request cancelled")]
    Cancelled,
}

/// Anything that can answer a chat-completion request.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Return the text of the first choice. Implementations should stop work
    /// promptly once `cancel` fires.
    async fn complete(
        &self,
        request: &ChatCompletionRequest,
        cancel: CancellationToken,
    ) -> Result<String, GenerationError>;
}

/// OpenAI-compatible `/chat/completions` client.
#[derive(Debug, Clone)]
pub struct ChatCompletionClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl ChatCompletionClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, GenerationError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("inkwell/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GenerationError::Client(e.to_string()))?;
        Ok(Self::with_http_client(http, endpoint, api_key))
    }

    pub fn with_http_client(
        http: reqwest::Client,
        endpoint: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send(&self, request: &ChatCompletionRequest) -> Result<String, GenerationError> {
        let mut builder = self.http.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| GenerationError::Transport {
                endpoint: self.endpoint.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Http {
                status: status.as_u16(),
                body: body.chars().take(ERROR_BODY_EXCERPT_CHARS).collect(),
            });
        }

        let body: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Decode(e.to_string()))?;

        body.first_content()
            .map(str::trim)
            .filter(|content| !content.is_empty())
            .map(ToString::to_string)
            .ok_or(GenerationError::EmptyResponse)
    }
}

#[async_trait]
impl ChatBackend for ChatCompletionClient {
    async fn complete(
        &self,
        request: &ChatCompletionRequest,
        cancel: CancellationToken,
    ) -> Result<String, GenerationError> {
        tracing::debug!(
            endpoint = %self.endpoint,
            model = %request.model,
            messages = request.messages.len(),
            "Sending chat completion request"
        );
        tokio::select! {
            _ = cancel.cancelled() => Err(GenerationError::Cancelled),
            result = self.send(request) => result,
        }
    }
}
