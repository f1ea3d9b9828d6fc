//! Request-level retry with exponential backoff for transient failures.
//!
//! Client errors (4xx) fail immediately; transport failures, unparseable
//! bodies and every other non-success status are retried until the policy's
//! attempt budget is spent.
//!
//! ```text
//!   attempt 1 ──► transient ──► sleep(d0) ──► attempt 2 ──► ... ──► Exhausted
//!        │                                        │
//!        ├──► 2xx + JSON ──► Ok(value)            └──► 4xx ──► Client (no retry)
//!        └──► 4xx ──► Client (no retry)
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{ConfigError, RequestError, TransientCause};
use crate::llm::transport::{HttpReply, HttpTransport, RequestContext};

/// Bounded-retry policy. Delays grow by `backoff_multiplier` and are capped
/// at `max_delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 1.5,
        }
    }
}

impl RetryPolicy {
    /// Build a validated policy.
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Result<Self, ConfigError> {
        if max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_attempts".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if !backoff_multiplier.is_finite() || backoff_multiplier <= 1.0 {
            return Err(ConfigError::InvalidValue {
                key: "backoff_multiplier".to_string(),
                message: format!(
                    "must be a finite number greater than 1, got {backoff_multiplier}"
                ),
            });
        }
        Ok(Self {
            max_attempts,
            initial_delay,
            max_delay,
            backoff_multiplier,
        })
    }

    /// A policy that issues the request once and never sleeps.
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    fn first_delay(&self) -> Duration {
        self.initial_delay.min(self.max_delay)
    }

    fn next_delay(&self, current: Duration) -> Duration {
        let grown = current.as_secs_f64() * self.backoff_multiplier.max(1.0);
        let capped = grown.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped > 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            Duration::ZERO
        }
    }

    /// The sleeps taken between attempts when every attempt fails
    /// transiently: `max_attempts - 1` non-decreasing delays.
    pub fn delays(&self) -> Vec<Duration> {
        let sleeps = self.max_attempts.max(1) - 1;
        let mut delay = self.first_delay();
        let mut out = Vec::with_capacity(sleeps as usize);
        for _ in 0..sleeps {
            out.push(delay);
            delay = self.next_delay(delay);
        }
        out
    }
}

/// Result of classifying a single reply.
enum Outcome {
    Success(Value),
    Client { status: u16, message: String },
    Transient(TransientCause),
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorDetail {
    Object { message: String },
    Text(String),
}

/// Extract `error.message` from an API error body.
fn error_message(body: &str) -> Option<String> {
    let envelope: ErrorEnvelope = serde_json::from_str(body).ok()?;
    let message = match envelope.error {
        ErrorDetail::Object { message } | ErrorDetail::Text(message) => message,
    };
    if message.trim().is_empty() {
        None
    } else {
        Some(message)
    }
}

fn classify(reply: HttpReply) -> Outcome {
    if reply.is_success() {
        return match serde_json::from_str::<Value>(&reply.body) {
            Ok(value) => Outcome::Success(value),
            Err(e) => Outcome::Transient(TransientCause::InvalidBody(e.to_string())),
        };
    }

    let message = error_message(&reply.body).unwrap_or_else(|| format!("HTTP {}", reply.status));
    if (400..500).contains(&reply.status) {
        Outcome::Client {
            status: reply.status,
            message,
        }
    } else {
        Outcome::Transient(TransientCause::Server {
            status: reply.status,
            message,
        })
    }
}

/// Issues requests through a transport, retrying transient failures.
#[derive(Clone)]
pub struct RequestExecutor {
    transport: Arc<dyn HttpTransport>,
    policy: RetryPolicy,
}

impl RequestExecutor {
    pub fn new(transport: Arc<dyn HttpTransport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub async fn execute(&self, context: &RequestContext) -> Result<Value, RequestError> {
        self.execute_with(context, &self.policy).await
    }

    /// Execute with a per-call policy override.
    pub async fn execute_with(
        &self,
        context: &RequestContext,
        policy: &RetryPolicy,
    ) -> Result<Value, RequestError> {
        let max_attempts = policy.max_attempts.max(1);
        let mut delay = policy.first_delay();
        let mut attempt = 0;

        loop {
            attempt += 1;
            tracing::debug!(
                label = %context.label,
                attempt,
                max_attempts,
                "Sending request"
            );

            let cause = match self.transport.send(context).await {
                Ok(reply) => match classify(reply) {
                    Outcome::Success(value) => {
                        tracing::debug!(label = %context.label, attempt, "Request succeeded");
                        return Ok(value);
                    }
                    Outcome::Client { status, message } => {
                        tracing::warn!(
                            label = %context.label,
                            status,
                            error = %message,
                            "Request rejected, not retrying"
                        );
                        return Err(RequestError::Client {
                            label: context.label.clone(),
                            status,
                            message,
                        });
                    }
                    Outcome::Transient(cause) => cause,
                },
                Err(e) => TransientCause::Transport(e.0),
            };

            if attempt >= max_attempts {
                tracing::warn!(
                    label = %context.label,
                    attempts = attempt,
                    error = %cause,
                    "Request failed, retries exhausted"
                );
                return Err(RequestError::Exhausted {
                    label: context.label.clone(),
                    attempts: attempt,
                    cause,
                });
            }

            tracing::warn!(
                label = %context.label,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %cause,
                "Retrying request after transient failure"
            );
            tokio::time::sleep(delay).await;
            delay = policy.next_delay(delay);
        }
    }
}
