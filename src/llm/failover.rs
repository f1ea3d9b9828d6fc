//! Multi-backend fallback.
//!
//! Tries configured backends in fixed priority order (premium, assistant,
//! chat completion) until one answers. Unconfigured backends are skipped
//! without any network call; every configured backend gets exactly one
//! attempt per question.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{BackendFailure, OrchestratorError};
use crate::llm::provider::{Backend, Reply};

/// Routes a question to the first backend that can answer it.
pub struct Orchestrator {
    backends: Vec<Arc<dyn Backend>>,
}

impl Orchestrator {
    /// Backends are ordered by priority regardless of the order given.
    /// A backend whose id was already seen is dropped.
    pub fn new(mut backends: Vec<Arc<dyn Backend>>) -> Self {
        backends.sort_by_key(|b| b.kind().priority());

        let mut seen = HashSet::new();
        backends.retain(|b| {
            let fresh = seen.insert(b.id().to_string());
            if !fresh {
                tracing::warn!(backend = %b.id(), "Duplicate backend ignored");
            }
            fresh
        });

        Self { backends }
    }

    /// Ids of all backends, highest priority first.
    pub fn backend_ids(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.id()).collect()
    }

    pub fn has_configured_backend(&self) -> bool {
        self.backends.iter().any(|b| b.is_configured())
    }

    /// Answer `question` in the conversation `conversation_key`.
    pub async fn respond(
        &self,
        conversation_key: &str,
        question: &str,
    ) -> Result<Reply, OrchestratorError> {
        let mut failures: Vec<BackendFailure> = Vec::new();

        for (i, backend) in self.backends.iter().enumerate() {
            if !backend.is_configured() {
                tracing::debug!(backend = %backend.id(), "Backend not configured, skipping");
                continue;
            }

            match backend.ask(conversation_key, question).await {
                Ok(text) => {
                    if !failures.is_empty() {
                        tracing::info!(
                            backend = %backend.id(),
                            failed = failures.len(),
                            "Answered by fallback backend"
                        );
                    }
                    return Ok(Reply {
                        text,
                        backend: backend.id().to_string(),
                        degraded: failures,
                    });
                }
                Err(err) => {
                    let next = self.backends[i + 1..]
                        .iter()
                        .find(|b| b.is_configured())
                        .map(|b| b.id().to_string());
                    tracing::warn!(
                        backend = %backend.id(),
                        error = %err,
                        next_backend = next.as_deref().unwrap_or("none"),
                        "Backend failed, trying next backend"
                    );
                    failures.push(BackendFailure {
                        backend: backend.id().to_string(),
                        error: err,
                    });
                }
            }
        }

        if failures.is_empty() {
            tracing::warn!("No backend configured");
            return Err(OrchestratorError::Misconfigured);
        }
        Err(OrchestratorError::AllBackendsExhausted { failures })
    }
}
