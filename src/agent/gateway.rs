use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::agent::openai::{self, CompletionRequest, CompletionResponse};
use crate::chat::{ChatMessage, MessageView, Role};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};

/// The part of a message the model actually sees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

impl PromptMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

impl From<&ChatMessage> for PromptMessage {
    fn from(msg: &ChatMessage) -> Self {
        Self::new(msg.role, msg.content.clone())
    }
}

impl From<&MessageView> for PromptMessage {
    fn from(msg: &MessageView) -> Self {
        Self::new(msg.role, msg.content.clone())
    }
}

/// One request/response exchange with a completion service.
#[async_trait]
pub trait CompletionGateway: Send + Sync {
    fn name(&self) -> &str;

    /// Returns the text of the top choice. No retries.
    async fn complete(&self, messages: &[PromptMessage]) -> GatewayResult<String>;
}

/// Hosted OpenAI-compatible chat completions.
pub struct OpenAiGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiGateway {
    pub fn new(config: &GatewayConfig) -> GatewayResult<Self> {
        if config.api_key.is_none() {
            warn!("OPENAI_API_KEY is not set, completions will fail");
        }
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl CompletionGateway for OpenAiGateway {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, messages: &[PromptMessage]) -> GatewayResult<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| GatewayError::Config("OPENAI_API_KEY is not set".into()))?;

        let url = format!("{}/chat/completions", self.base_url);
        debug!(
            "-> Requesting completion from {} ({} messages, model {})",
            url,
            messages.len(),
            self.model
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&CompletionRequest {
                model: &self.model,
                messages,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Upstream {
                status: status.as_u16(),
                body: openai::error_message(&body),
            });
        }

        let completion: CompletionResponse = response.json().await?;
        completion
            .into_content()
            .ok_or_else(|| GatewayError::MalformedResponse("no choice content".into()))
    }
}

#[derive(Serialize)]
struct RemoteChatRequest {
    messages: Vec<MessageView>,
}

/// Talks to a running `POST /api/chat` endpoint, the way the browser client does.
pub struct RemoteGateway {
    client: reqwest::Client,
    endpoint: String,
}

impl RemoteGateway {
    /// `base_url` is the server root, e.g. `http://127.0.0.1:3000`.
    pub fn new(base_url: &str) -> GatewayResult<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/chat", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl CompletionGateway for RemoteGateway {
    fn name(&self) -> &str {
        "remote"
    }

    async fn complete(&self, messages: &[PromptMessage]) -> GatewayResult<String> {
        // The endpoint validates the full message shape; ids and timestamps are filler.
        let now = Utc::now().to_rfc3339();
        let body = RemoteChatRequest {
            messages: messages
                .iter()
                .map(|m| MessageView {
                    id: Uuid::new_v4().to_string(),
                    role: m.role,
                    content: m.content.clone(),
                    is_user: m.role == Role::User,
                    timestamp: now.clone(),
                })
                .collect(),
        };

        debug!("-> Posting {} messages to {}", messages.len(), self.endpoint);
        let response = self.client.post(&self.endpoint).json(&body).send().await?;

        match response.status() {
            StatusCode::OK => Ok(response.json::<String>().await?),
            StatusCode::BAD_REQUEST => Err(GatewayError::Validation(
                response.text().await.unwrap_or_default(),
            )),
            status => Err(GatewayError::Upstream {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }
}
