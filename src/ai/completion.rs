use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::AiConfig;

const TEMPERATURE: f32 = 0.7;

/// Which configured model serves a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    /// Code analysis, evaluation and correction.
    Coder,
    /// Conversation, explanations and generated content.
    Chat,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AiError {
    #[error("request to the AI endpoint failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("AI endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("AI endpoint returned no content")]
    EmptyResponse,
    #[error("failed to render prompt: {0}")]
    Template(#[from] tera::Error),
}

/// Client for an OpenAI-compatible chat completions endpoint.
#[derive(Clone)]
pub struct CompletionClient {
    http: reqwest::Client,
    url: String,
    api_key: String,
    coder_model: String,
    chat_model: String,
}

impl CompletionClient {
    pub fn new(config: &AiConfig) -> Result<Self, AiError> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(CompletionClient {
            http,
            url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            coder_model: config.coder_model.clone(),
            chat_model: config.chat_model.clone(),
        })
    }

    pub fn model(&self, kind: ModelKind) -> &str {
        match kind {
            ModelKind::Coder => &self.coder_model,
            ModelKind::Chat => &self.chat_model,
        }
    }

    /// Sends one completion request and returns the first choice's text.
    pub async fn complete(
        &self,
        messages: &[Message],
        max_tokens: u32,
        kind: ModelKind,
    ) -> Result<String, AiError> {
        let model = self.model(kind);
        let body = json!({
            "model": model,
            "messages": messages,
            "max_tokens": max_tokens,
            "temperature": TEMPERATURE,
        });

        let res = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            tracing::error!("AI endpoint returned {}: {}", status, body);
            return Err(AiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let reply: Value = res.json().await?;
        tracing::debug!("completion served by {}", model);

        reply["choices"][0]["message"]["content"]
            .as_str()
            .filter(|text| !text.trim().is_empty())
            .map(str::to_string)
            .ok_or(AiError::EmptyResponse)
    }
}
