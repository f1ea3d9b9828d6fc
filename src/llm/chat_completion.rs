//! Chat Completions backend.
//!
//! Answers in a single request: the recent history window, the game-master
//! instruction and the question go out together, and the first choice's
//! content comes back.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::config::ChatCompletionConfig;
use crate::error::BackendError;
use crate::history::{ConversationHistory, ConversationTurn};
use crate::llm::provider::{Backend, BackendKind};
use crate::llm::retry::RequestExecutor;
use crate::llm::transport::{RequestContext, api_url, auth_headers};

/// Label used in logs and error messages.
pub const REQUEST_LABEL: &str = "Chat Completions API";

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ConversationTurn>,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Immediate-completion backend on the user's own key.
pub struct ChatCompletionBackend {
    config: ChatCompletionConfig,
    executor: RequestExecutor,
    history: Arc<dyn ConversationHistory>,
}

impl ChatCompletionBackend {
    pub fn new(
        config: ChatCompletionConfig,
        executor: RequestExecutor,
        history: Arc<dyn ConversationHistory>,
    ) -> Self {
        Self {
            config,
            executor,
            history,
        }
    }

    fn api_key(&self) -> Option<&str> {
        self.config.api_key.as_ref().map(|k| k.expose_secret())
    }
}

#[async_trait]
impl Backend for ChatCompletionBackend {
    fn id(&self) -> &str {
        BackendKind::ChatCompletion.as_str()
    }

    fn kind(&self) -> BackendKind {
        BackendKind::ChatCompletion
    }

    fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    async fn ask(&self, conversation_key: &str, question: &str) -> Result<String, BackendError> {
        let api_key = self.api_key().ok_or_else(|| BackendError::NotConfigured {
            backend: self.id().to_string(),
        })?;

        let mut messages = self.history.append_and_get_window(conversation_key, &[]);
        messages.push(ConversationTurn::user(self.config.prompt.as_str()));
        messages.push(ConversationTurn::user(question));

        let request = ChatCompletionRequest {
            model: &self.config.model,
            messages,
            temperature: self.config.temperature,
        };
        let body = serde_json::to_value(&request).map_err(|e| BackendError::InvalidResponse {
            backend: self.id().to_string(),
            reason: format!("failed to encode request: {e}"),
        })?;

        tracing::debug!(
            model = %self.config.model,
            messages = request.messages.len(),
            "Sending chat completion request"
        );

        let context = RequestContext::post(
            api_url(&self.config.base_url, "chat/completions"),
            REQUEST_LABEL,
            body,
        )
        .with_headers(auth_headers(api_key));
        let value = self.executor.execute(&context).await?;

        let response: ChatCompletionResponse =
            serde_json::from_value(value).map_err(|e| BackendError::InvalidResponse {
                backend: self.id().to_string(),
                reason: format!("unexpected response shape: {e}"),
            })?;
        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| BackendError::InvalidResponse {
                backend: self.id().to_string(),
                reason: "response contained no message content".to_string(),
            })?;
        let reply = content.trim().to_string();

        self.history.append_and_get_window(
            conversation_key,
            &[
                ConversationTurn::user(question),
                ConversationTurn::assistant(reply.as_str()),
            ],
        );

        Ok(reply)
    }
}
