//! Assistants API backend (thread + run + poll).
//!
//! One question walks through these steps:
//!
//! ```text
//!   ensure thread ──► post message ──► start run ──► poll run ──► list messages
//!   (session store)   addMessage      runAssistant   JobPoller    getMessages
//! ```
//!
//! The same type serves the managed (premium) assistant and the user's own
//! assistant; only the configuration and backend kind differ.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::config::AssistantBackendConfig;
use crate::error::{BackendError, RequestError};
use crate::history::{ConversationHistory, ConversationTurn};
use crate::llm::poller::{JobHandle, JobPoller, JobStatus, RunStatusSource, StatusReport};
use crate::llm::provider::{Backend, BackendKind};
use crate::llm::retry::{RequestExecutor, RetryPolicy};
use crate::llm::session::ThreadSessionStore;
use crate::llm::transport::{RequestContext, api_url, assistants_beta_header, auth_headers};

/// Messages fetched when looking for the reply, newest first.
const MESSAGE_PAGE_SIZE: u32 = 20;

#[derive(Debug, Deserialize)]
struct IdObject {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RunObject {
    status: String,
    #[serde(default)]
    last_error: Option<RunError>,
}

#[derive(Debug, Deserialize)]
struct RunError {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    #[serde(default)]
    data: Vec<ThreadMessage>,
}

#[derive(Debug, Deserialize)]
struct ThreadMessage {
    role: String,
    /// Run that produced the message; absent on user messages.
    #[serde(default)]
    run_id: Option<String>,
    #[serde(default)]
    content: Vec<MessageContent>,
}

#[derive(Debug, Deserialize)]
struct MessageContent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<MessageText>,
}

#[derive(Debug, Deserialize)]
struct MessageText {
    value: String,
}

/// Create-run-then-poll backend.
pub struct AssistantBackend {
    kind: BackendKind,
    config: AssistantBackendConfig,
    executor: RequestExecutor,
    poller: JobPoller,
    sessions: Arc<ThreadSessionStore>,
    history: Arc<dyn ConversationHistory>,
    run_deadline: Duration,
}

impl AssistantBackend {
    pub fn new(
        kind: BackendKind,
        config: AssistantBackendConfig,
        executor: RequestExecutor,
        sessions: Arc<ThreadSessionStore>,
        history: Arc<dyn ConversationHistory>,
    ) -> Self {
        Self {
            kind,
            config,
            executor,
            poller: JobPoller::default(),
            sessions,
            history,
            run_deadline: Duration::from_secs(30),
        }
    }

    pub fn with_run_deadline(mut self, deadline: Duration) -> Self {
        self.run_deadline = deadline;
        self
    }

    fn credentials(&self) -> Result<(&str, &str), BackendError> {
        let api_key = self.config.api_key.as_ref().map(|k| k.expose_secret());
        let assistant_id = self.config.assistant_id.as_deref();
        match (api_key, assistant_id) {
            (Some(key), Some(id)) if !key.trim().is_empty() && !id.trim().is_empty() => {
                Ok((key, id))
            }
            _ => Err(BackendError::NotConfigured {
                backend: self.id().to_string(),
            }),
        }
    }

    fn request(&self, context: RequestContext, api_key: &str) -> RequestContext {
        context
            .with_headers(auth_headers(api_key))
            .with_headers([assistants_beta_header()])
    }

    fn decode<T: DeserializeOwned>(&self, value: Value, what: &str) -> Result<T, BackendError> {
        serde_json::from_value(value).map_err(|e| BackendError::InvalidResponse {
            backend: self.id().to_string(),
            reason: format!("unexpected {what} shape: {e}"),
        })
    }

    async fn create_thread(&self, api_key: &str) -> Result<String, BackendError> {
        let context = self.request(
            RequestContext::post(
                api_url(&self.config.base_url, "threads"),
                "createThread",
                json!({}),
            ),
            api_key,
        );
        let value = self.executor.execute(&context).await?;
        let thread: IdObject = self.decode(value, "thread")?;
        Ok(thread.id)
    }

    async fn add_message(
        &self,
        api_key: &str,
        thread_id: &str,
        question: &str,
    ) -> Result<(), RequestError> {
        let context = self.request(
            RequestContext::post(
                api_url(&self.config.base_url, &format!("threads/{thread_id}/messages")),
                format!("addMessage({thread_id})"),
                json!({"role": "user", "content": question}),
            ),
            api_key,
        );
        self.executor.execute(&context).await.map(|_| ())
    }

    async fn start_run(
        &self,
        api_key: &str,
        thread_id: &str,
        assistant_id: &str,
    ) -> Result<JobHandle, BackendError> {
        let context = self.request(
            RequestContext::post(
                api_url(&self.config.base_url, &format!("threads/{thread_id}/runs")),
                format!("runAssistant({assistant_id})"),
                json!({"assistant_id": assistant_id}),
            ),
            api_key,
        );
        let value = self.executor.execute(&context).await?;
        let run: IdObject = self.decode(value, "run")?;
        Ok(JobHandle::new(run.id, thread_id))
    }

    /// Text of the newest assistant message written by the run behind `handle`.
    async fn latest_reply(
        &self,
        api_key: &str,
        handle: &JobHandle,
    ) -> Result<String, BackendError> {
        let thread_id = handle.thread_id();
        let context = self.request(
            RequestContext::get(
                api_url(
                    &self.config.base_url,
                    &format!("threads/{thread_id}/messages?order=desc&limit={MESSAGE_PAGE_SIZE}"),
                ),
                format!("getMessages({thread_id})"),
            ),
            api_key,
        );
        let value = self.executor.execute(&context).await?;
        let messages: MessageList = self.decode(value, "message list")?;

        let no_reply = |reason: &str| BackendError::NoAssistantReply {
            thread_id: thread_id.to_string(),
            reason: reason.to_string(),
        };
        let message = messages
            .data
            .into_iter()
            .find(|m| {
                m.role == "assistant"
                    && m.run_id.as_deref().is_none_or(|id| id == handle.job_id())
            })
            .ok_or_else(|| no_reply("no assistant message from this run"))?;
        let text = message
            .content
            .into_iter()
            .find(|c| c.kind == "text")
            .and_then(|c| c.text)
            .ok_or_else(|| no_reply("assistant message has no text content"))?;

        Ok(text.value.trim().to_string())
    }
}

#[async_trait]
impl RunStatusSource for AssistantBackend {
    async fn fetch_status(&self, handle: &JobHandle) -> Result<StatusReport, RequestError> {
        let (api_key, _) = self.credentials().map_err(|e| RequestError::Client {
            label: format!("getRunStatus({})", handle.job_id()),
            status: 401,
            message: e.to_string(),
        })?;
        let context = self.request(
            RequestContext::get(
                api_url(
                    &self.config.base_url,
                    &format!("threads/{}/runs/{}", handle.thread_id(), handle.job_id()),
                ),
                format!("getRunStatus({})", handle.job_id()),
            ),
            api_key,
        );
        // The poller already repeats; one attempt per poll.
        let value = self
            .executor
            .execute_with(&context, &RetryPolicy::single_attempt())
            .await?;

        let run: RunObject = match serde_json::from_value(value) {
            Ok(run) => run,
            Err(e) => {
                tracing::debug!(run_id = handle.job_id(), error = %e, "Unreadable run status");
                return Ok(StatusReport::new(JobStatus::Running));
            }
        };
        let (status, fallback_reason) = JobStatus::from_wire(&run.status);
        let reason = run
            .last_error
            .and_then(|e| e.message)
            .filter(|m| !m.trim().is_empty())
            .or_else(|| fallback_reason.map(str::to_string));

        Ok(StatusReport {
            status,
            failure_reason: reason,
        })
    }
}

#[async_trait]
impl Backend for AssistantBackend {
    fn id(&self) -> &str {
        self.kind.as_str()
    }

    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    async fn ask(&self, conversation_key: &str, question: &str) -> Result<String, BackendError> {
        let (api_key, assistant_id) = self.credentials()?;

        let thread_id = self
            .sessions
            .get_or_create_thread(conversation_key, self.id(), || self.create_thread(api_key))
            .await?;

        if let Err(err) = self.add_message(api_key, &thread_id, question).await {
            if matches!(err, RequestError::Client { status: 404, .. }) {
                tracing::warn!(
                    backend = %self.id(),
                    thread_id = %thread_id,
                    "Thread no longer exists, dropping session"
                );
                self.sessions.invalidate(conversation_key, self.id());
            }
            return Err(err.into());
        }

        let handle = self.start_run(api_key, &thread_id, assistant_id).await?;
        tracing::debug!(
            backend = %self.id(),
            thread_id = %thread_id,
            run_id = handle.job_id(),
            "Run started"
        );

        let run = self
            .poller
            .await_completion(self, &handle, self.run_deadline)
            .await?;
        tracing::debug!(
            backend = %self.id(),
            run_id = run.handle.job_id(),
            polls = run.polls,
            elapsed_ms = run.elapsed.as_millis() as u64,
            "Run finished"
        );

        let reply = self.latest_reply(api_key, &run.handle).await?;

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
