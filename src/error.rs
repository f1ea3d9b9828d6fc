//! Error types for smartchat.

use std::time::Duration;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// A failure the executor is allowed to retry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransientCause {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("HTTP {status}: {message}")]
    Server { status: u16, message: String },

    #[error("invalid response body: {0}")]
    InvalidBody(String),
}

/// Failure of one logical request issued through the executor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    /// 4xx response. Never retried.
    #[error("{label} failed: {message}")]
    Client {
        label: String,
        status: u16,
        message: String,
    },

    /// Every attempt ended in a transient failure.
    #[error("{label} failed after {attempts} attempts: {cause}")]
    Exhausted {
        label: String,
        attempts: u32,
        cause: TransientCause,
    },
}

impl RequestError {
    /// Label of the request that failed.
    pub fn label(&self) -> &str {
        match self {
            Self::Client { label, .. } | Self::Exhausted { label, .. } => label,
        }
    }

    /// Number of attempts made before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Client { .. } => 1,
            Self::Exhausted { attempts, .. } => *attempts,
        }
    }

    /// Whether this came from a 4xx response.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Client { .. })
    }
}

/// Terminal outcomes of waiting on a server-side run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PollError {
    #[error("Run {job_id} timed out after {deadline:?}")]
    Timeout { job_id: String, deadline: Duration },

    #[error("Run {status}: {reason}")]
    Failed {
        job_id: String,
        status: String,
        reason: String,
    },
}

/// Errors surfaced by a backend adapter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Poll(#[from] PollError),

    #[error("No assistant reply in thread {thread_id}: {reason}")]
    NoAssistantReply { thread_id: String, reason: String },

    #[error("Invalid response from {backend}: {reason}")]
    InvalidResponse { backend: String, reason: String },

    #[error("Backend {backend} is not configured")]
    NotConfigured { backend: String },
}

/// One backend's failure recorded during a fallback chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendFailure {
    pub backend: String,
    pub error: BackendError,
}

impl std::fmt::Display for BackendFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.backend, self.error)
    }
}

/// Terminal errors from the fallback orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrchestratorError {
    #[error(
        "No backend is configured. Set OPENAI_API_KEY (and optionally OPENAI_ASSISTANT_ID) to enable one"
    )]
    Misconfigured,

    #[error("{}", describe_failures(.failures))]
    AllBackendsExhausted { failures: Vec<BackendFailure> },
}

impl OrchestratorError {
    /// The failure of the last backend attempted, if any.
    pub fn last_failure(&self) -> Option<&BackendFailure> {
        match self {
            Self::Misconfigured => None,
            Self::AllBackendsExhausted { failures } => failures.last(),
        }
    }
}

fn describe_failures(failures: &[BackendFailure]) -> String {
    match failures {
        [] => "All backends failed".to_string(),
        [only] => only.error.to_string(),
        many => {
            let parts: Vec<String> = many.iter().map(ToString::to_string).collect();
            format!("All {} backends failed: {}", many.len(), parts.join("; "))
        }
    }
}
