//! Adaptive polling of server-side runs.
//!
//! Polls a run's status on a front-loaded schedule (short waits first,
//! widening to several seconds) until it reaches a terminal state or the
//! deadline passes. A single failed status check counts as "still pending";
//! a run that ends `failed`/`cancelled` is surfaced immediately.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::{ConfigError, PollError, RequestError};

/// Identifies one run inside one thread. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    job_id: String,
    thread_id: String,
}

impl JobHandle {
    pub fn new(job_id: impl Into<String>, thread_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            thread_id: thread_id.into(),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }
}

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Map an Assistants API run status onto the lifecycle.
    ///
    /// Returns a fallback failure reason for statuses that are folded into
    /// `Failed`. Unknown statuses keep the run polling.
    pub fn from_wire(status: &str) -> (Self, Option<&'static str>) {
        match status {
            "queued" => (Self::Pending, None),
            "in_progress" | "cancelling" | "requires_action" => (Self::Running, None),
            "completed" => (Self::Completed, None),
            "failed" => (Self::Failed, None),
            "cancelled" => (Self::Cancelled, None),
            "expired" => (Self::Failed, Some("run expired")),
            "incomplete" => (Self::Failed, Some("run incomplete")),
            other => {
                tracing::debug!(status = other, "Unknown run status, continuing to poll");
                (Self::Running, None)
            }
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One status observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub status: JobStatus,
    pub failure_reason: Option<String>,
}

impl StatusReport {
    pub fn new(status: JobStatus) -> Self {
        Self {
            status,
            failure_reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.failure_reason = Some(reason.into());
        self
    }
}

/// A run that reached `completed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedRun {
    pub handle: JobHandle,
    /// Status queries issued, including ones that failed in transit.
    pub polls: u32,
    pub elapsed: Duration,
}

/// Monotonically non-decreasing waits between polls. The last entry repeats
/// once the list is exhausted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSchedule {
    delays: Vec<Duration>,
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self {
            delays: vec![
                Duration::from_millis(250),
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(2),
                Duration::from_secs(3),
                Duration::from_secs(5),
            ],
        }
    }
}

impl PollSchedule {
    pub fn new(delays: Vec<Duration>) -> Result<Self, ConfigError> {
        if delays.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "poll_schedule".to_string(),
                message: "must contain at least one delay".to_string(),
            });
        }
        if delays.windows(2).any(|w| w[0] > w[1]) {
            return Err(ConfigError::InvalidValue {
                key: "poll_schedule".to_string(),
                message: "delays must be non-decreasing".to_string(),
            });
        }
        Ok(Self { delays })
    }

    /// Wait after the `iteration`-th non-terminal poll (0-based).
    pub fn delay(&self, iteration: usize) -> Duration {
        self.delays
            .get(iteration)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or_default()
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }
}

/// Where the poller reads run status from.
#[async_trait]
pub trait RunStatusSource: Send + Sync {
    async fn fetch_status(&self, handle: &JobHandle) -> Result<StatusReport, RequestError>;
}

/// Waits for runs to finish.
#[derive(Debug, Clone, Default)]
pub struct JobPoller {
    schedule: PollSchedule,
}

impl JobPoller {
    pub fn new(schedule: PollSchedule) -> Self {
        Self { schedule }
    }

    pub fn schedule(&self) -> &PollSchedule {
        &self.schedule
    }

    /// Poll `handle` until it completes, fails, or `deadline` elapses.
    ///
    /// The deadline is checked once per iteration, before each status query.
    /// It stops the local wait only; the remote run is not cancelled.
    pub async fn await_completion(
        &self,
        source: &dyn RunStatusSource,
        handle: &JobHandle,
        deadline: Duration,
    ) -> Result<CompletedRun, PollError> {
        let start = Instant::now();
        let mut polls: u32 = 0;
        let mut iteration = 0usize;

        loop {
            let elapsed = start.elapsed();
            if elapsed > deadline {
                tracing::warn!(
                    run_id = handle.job_id(),
                    thread_id = handle.thread_id(),
                    polls,
                    "Run did not finish before the deadline"
                );
                return Err(PollError::Timeout {
                    job_id: handle.job_id().to_string(),
                    deadline,
                });
            }

            polls += 1;
            let report = match source.fetch_status(handle).await {
                Ok(report) => report,
                Err(err) => {
                    tracing::warn!(
                        run_id = handle.job_id(),
                        poll = polls,
                        error = %err,
                        "Poll attempt failed, treating run as pending"
                    );
                    StatusReport::new(JobStatus::Pending)
                }
            };

            match report.status {
                JobStatus::Completed => {
                    tracing::debug!(run_id = handle.job_id(), polls, "Run completed");
                    return Ok(CompletedRun {
                        handle: handle.clone(),
                        polls,
                        elapsed: start.elapsed(),
                    });
                }
                JobStatus::Failed | JobStatus::Cancelled => {
                    return Err(PollError::Failed {
                        job_id: handle.job_id().to_string(),
                        status: report.status.to_string(),
                        reason: report
                            .failure_reason
                            .unwrap_or_else(|| "No error details".to_string()),
                    });
                }
                JobStatus::Pending | JobStatus::Running => {
                    let delay = self.schedule.delay(iteration);
                    iteration += 1;
                    tracing::debug!(
                        run_id = handle.job_id(),
                        status = %report.status,
                        delay_ms = delay.as_millis() as u64,
                        "Run not finished, waiting"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::error::TransientCause;

    /// Status source that replays a fixed script, repeating the last entry.
    struct ScriptedStatus {
        script: Mutex<VecDeque<Result<StatusReport, RequestError>>>,
        calls: AtomicU32,
    }

    impl ScriptedStatus {
        fn new(script: Vec<Result<StatusReport, RequestError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
            }
        }

        fn statuses(statuses: &[JobStatus]) -> Self {
            Self::new(statuses.iter().map(|s| Ok(StatusReport::new(*s))).collect())
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RunStatusSource for ScriptedStatus {
        async fn fetch_status(&self, _handle: &JobHandle) -> Result<StatusReport, RequestError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script.front().cloned().expect("empty status script")
            }
        }
    }

    fn handle() -> JobHandle {
        JobHandle::new("run_1", "thread_1")
    }

    fn dropped_poll() -> Result<StatusReport, RequestError> {
        Err(RequestError::Exhausted {
            label: "getRunStatus".to_string(),
            attempts: 1,
            cause: TransientCause::Transport("connection reset".to_string()),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn completes_after_two_sleeps_from_schedule_head() {
        let source = ScriptedStatus::statuses(&[
            JobStatus::Pending,
            JobStatus::Pending,
            JobStatus::Completed,
        ]);
        let poller = JobPoller::default();

        let run = poller
            .await_completion(&source, &handle(), Duration::from_secs(30))
            .await
            .unwrap();

        assert_eq!(source.calls(), 3);
        assert_eq!(run.polls, 3);
        // 250 ms + 500 ms: the first two schedule entries.
        assert_eq!(run.elapsed, Duration::from_millis(750));
        assert_eq!(run.handle, handle());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_run_surfaces_immediately() {
        let source = ScriptedStatus::new(vec![
            Ok(StatusReport::new(JobStatus::Running)),
            Ok(StatusReport::new(JobStatus::Failed).with_reason("Rate limit reached")),
            Ok(StatusReport::new(JobStatus::Completed)),
        ]);
        let poller = JobPoller::default();

        let err = poller
            .await_completion(&source, &handle(), Duration::from_secs(30))
            .await
            .unwrap_err();

        assert_eq!(source.calls(), 2);
        assert_eq!(
            err,
            PollError::Failed {
                job_id: "run_1".to_string(),
                status: "failed".to_string(),
                reason: "Rate limit reached".to_string(),
            }
        );
        assert_eq!(err.to_string(), "Run failed: Rate limit reached");
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_without_reason_uses_generic_message() {
        let source = ScriptedStatus::statuses(&[JobStatus::Cancelled]);
        let err = JobPoller::default()
            .await_completion(&source, &handle(), Duration::from_secs(30))
            .await
            .unwrap_err();

        assert_eq!(source.calls(), 1);
        assert_eq!(err.to_string(), "Run cancelled: No error details");
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_and_keeps_final_delay() {
        let source = ScriptedStatus::statuses(&[JobStatus::Running]);
        let schedule = PollSchedule::new(vec![
            Duration::from_millis(100),
            Duration::from_millis(400),
        ])
        .unwrap();
        let poller = JobPoller::new(schedule);

        let start = Instant::now();
        let err = poller
            .await_completion(&source, &handle(), Duration::from_secs(1))
            .await
            .unwrap_err();

        // Polls at 0, 100, 500, 900 ms; the check at 1300 ms exceeds the deadline.
        assert_eq!(source.calls(), 4);
        assert_eq!(start.elapsed(), Duration::from_millis(1300));
        assert!(matches!(err, PollError::Timeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_poll_counts_as_pending_without_resetting_deadline() {
        let source = ScriptedStatus::new(vec![
            Ok(StatusReport::new(JobStatus::Running)),
            dropped_poll(),
            Ok(StatusReport::new(JobStatus::Completed)),
        ]);
        let run = JobPoller::default()
            .await_completion(&source, &handle(), Duration::from_secs(30))
            .await
            .unwrap();

        assert_eq!(run.polls, 3);
        assert_eq!(run.elapsed, Duration::from_millis(750));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_polls_alone_end_in_timeout() {
        let source = ScriptedStatus::new(vec![dropped_poll()]);
        let err = JobPoller::default()
            .await_completion(&source, &handle(), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, PollError::Timeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_status_query_keeps_polling() {
        let source = ScriptedStatus::new(vec![
            Err(RequestError::Client {
                label: "getRunStatus(run_1)".to_string(),
                status: 429,
                message: "Rate limit reached".to_string(),
            }),
            Ok(StatusReport::new(JobStatus::Completed)),
        ]);
        let run = JobPoller::default()
            .await_completion(&source, &handle(), Duration::from_secs(30))
            .await
            .unwrap();

        assert_eq!(source.calls(), 2);
        assert_eq!(run.polls, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_status_queries_end_at_deadline() {
        let source = ScriptedStatus::new(vec![Err(RequestError::Client {
            label: "getRunStatus(run_1)".to_string(),
            status: 404,
            message: "No run found".to_string(),
        })]);
        let err = JobPoller::default()
            .await_completion(&source, &handle(), Duration::from_secs(2))
            .await
            .unwrap_err();

        assert!(matches!(err, PollError::Timeout { .. }));
        assert!(source.calls() > 1);
    }

    #[test]
    fn schedule_repeats_last_entry() {
        let schedule = PollSchedule::default();
        assert_eq!(schedule.delay(0), Duration::from_millis(250));
        assert_eq!(schedule.delay(1), Duration::from_millis(500));
        assert_eq!(schedule.delay(7), Duration::from_secs(5));
        assert_eq!(schedule.delay(500), Duration::from_secs(5));
        assert!(schedule.delays().windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn schedule_validation() {
        assert!(PollSchedule::new(vec![]).is_err());
        assert!(
            PollSchedule::new(vec![Duration::from_secs(2), Duration::from_secs(1)]).is_err()
        );
        assert!(PollSchedule::new(vec![Duration::from_secs(1)]).is_ok());
    }

    #[test]
    fn wire_status_mapping() {
        assert_eq!(JobStatus::from_wire("queued"), (JobStatus::Pending, None));
        assert_eq!(JobStatus::from_wire("in_progress"), (JobStatus::Running, None));
        assert_eq!(JobStatus::from_wire("completed"), (JobStatus::Completed, None));
        assert_eq!(JobStatus::from_wire("cancelled"), (JobStatus::Cancelled, None));
        assert_eq!(
            JobStatus::from_wire("expired"),
            (JobStatus::Failed, Some("run expired"))
        );
        assert_eq!(JobStatus::from_wire("something_new"), (JobStatus::Running, None));
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }
}
