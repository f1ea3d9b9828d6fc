//! Text-generation backends and the machinery around them.
//!
//! Supports three backends, tried in this order:
//! - **Premium**: managed Assistants API assistant (operator credentials)
//! - **Assistant thread**: the user's own Assistants API assistant
//! - **Chat completion**: plain Chat Completions on the user's key

pub mod assistant;
pub mod chat_completion;
pub mod failover;
pub mod poller;
mod provider;
pub mod retry;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use assistant::AssistantBackend;
pub use chat_completion::ChatCompletionBackend;
pub use failover::Orchestrator;
pub use poller::{JobHandle, JobPoller, JobStatus, PollSchedule, RunStatusSource, StatusReport};
pub use provider::{Backend, BackendKind, Reply};
pub use retry::{RequestExecutor, RetryPolicy};
pub use session::{Clock, SystemClock, ThreadSession, ThreadSessionStore};
pub use transport::{HttpReply, HttpTransport, ReqwestTransport, RequestContext, TransportError};

use std::sync::Arc;

use crate::config::{BackendConfig, Config};
use crate::error::ConfigError;
use crate::history::{ConversationHistory, InMemoryHistory};

/// Build the orchestrator with a real HTTP client.
pub fn create_orchestrator(config: &Config) -> Result<Orchestrator, ConfigError> {
    let transport = Arc::new(ReqwestTransport::new(config.http_timeout)?);
    Ok(create_orchestrator_with_transport(config, transport))
}

/// Build the orchestrator on top of an arbitrary transport.
///
/// All backends share one executor, one session store and one history.
pub fn create_orchestrator_with_transport(
    config: &Config,
    transport: Arc<dyn HttpTransport>,
) -> Orchestrator {
    let executor = RequestExecutor::new(transport, config.retry.clone());
    let sessions = Arc::new(ThreadSessionStore::with_clock(
        Arc::new(SystemClock),
        config.session_max_age,
    ));
    let history: Arc<dyn ConversationHistory> =
        Arc::new(InMemoryHistory::new(config.context_length));

    let backends: Vec<Arc<dyn Backend>> = config
        .backends()
        .into_iter()
        .map(|backend| -> Arc<dyn Backend> {
            match backend {
                BackendConfig::Premium(c) => Arc::new(
                    AssistantBackend::new(
                        BackendKind::Premium,
                        c,
                        executor.clone(),
                        Arc::clone(&sessions),
                        Arc::clone(&history),
                    )
                    .with_run_deadline(config.run_deadline),
                ),
                BackendConfig::AssistantThread(c) => Arc::new(
                    AssistantBackend::new(
                        BackendKind::AssistantThread,
                        c,
                        executor.clone(),
                        Arc::clone(&sessions),
                        Arc::clone(&history),
                    )
                    .with_run_deadline(config.run_deadline),
                ),
                BackendConfig::ChatCompletion(c) => Arc::new(ChatCompletionBackend::new(
                    c,
                    executor.clone(),
                    Arc::clone(&history),
                )),
            }
        })
        .collect();

    let configured: Vec<&str> = backends
        .iter()
        .filter(|b| b.is_configured())
        .map(|b| b.id())
        .collect();
    tracing::info!(backends = ?configured, "Configured backends");

    Orchestrator::new(backends)
}
