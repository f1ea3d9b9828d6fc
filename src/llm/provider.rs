//! Backend trait and reply types.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;

use crate::error::{BackendError, BackendFailure};

/// The three backend flavors, in fixed priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BackendKind {
    /// Managed assistant with operator-supplied credentials.
    Premium,
    /// Assistant on the user's own credentials.
    AssistantThread,
    /// Plain chat completions on the user's own credentials.
    ChatCompletion,
}

impl BackendKind {
    /// All kinds, highest priority first.
    pub const ALL: [BackendKind; 3] = [
        BackendKind::Premium,
        BackendKind::AssistantThread,
        BackendKind::ChatCompletion,
    ];

    /// Lower runs first.
    pub fn priority(self) -> u8 {
        match self {
            Self::Premium => 0,
            Self::AssistantThread => 1,
            Self::ChatCompletion => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Premium => "premium",
            Self::AssistantThread => "assistant",
            Self::ChatCompletion => "chat_completion",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "premium" => Ok(Self::Premium),
            "assistant" | "assistant_thread" => Ok(Self::AssistantThread),
            "chat" | "chat_completion" | "chat_completions" => Ok(Self::ChatCompletion),
            _ => Err(format!(
                "invalid backend '{}', expected one of: premium, assistant, chat_completion",
                s
            )),
        }
    }
}

/// A text-generation backend the orchestrator can ask.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Stable identifier, used as the session key and in logs.
    fn id(&self) -> &str;

    fn kind(&self) -> BackendKind;

    /// Whether the required credentials are present. Unconfigured backends
    /// are skipped without any network call.
    fn is_configured(&self) -> bool;

    /// Answer `question` within the conversation identified by
    /// `conversation_key`, returning plain (trimmed) response text.
    async fn ask(&self, conversation_key: &str, question: &str) -> Result<String, BackendError>;
}

/// A successful answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    /// Id of the backend that produced `text`.
    pub backend: String,
    /// Failures of higher-priority backends tried first.
    pub degraded: Vec<BackendFailure>,
}

impl Reply {
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }

    /// Short user-facing notice when a fallback backend answered.
    pub fn notice(&self) -> Option<String> {
        if self.degraded.is_empty() {
            return None;
        }
        let failed: Vec<&str> = self.degraded.iter().map(|f| f.backend.as_str()).collect();
        Some(format!(
            "{} unavailable, answered with {} instead",
            failed.join(", "),
            self.backend
        ))
    }
}
