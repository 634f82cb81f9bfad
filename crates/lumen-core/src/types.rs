//! Core data types: the per-image job state machine, progress snapshots and
//! the serialized output record.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::TransitionError;

/// Lifecycle state of a single image job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Generating,
    Retrying,
    Completed,
    Failed,
}

impl JobState {
    /// Whether the job has finished (successfully or not).
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Pending => "pending",
            JobState::Generating => "generating",
            JobState::Retrying => "retrying",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Discrete events that drive a job through its lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    /// The job's first attempt was submitted to the queue.
    Dispatched,
    /// A rate-limited attempt will be retried after `backoff`.
    Retrying { attempt: u32, backoff: Duration },
    /// The provider returned a prompt.
    Succeeded(String),
    /// The job gave up; carries the error message.
    Failed(String),
}

impl JobEvent {
    fn name(&self) -> &'static str {
        match self {
            JobEvent::Dispatched => "dispatched",
            JobEvent::Retrying { .. } => "retrying",
            JobEvent::Succeeded(_) => "succeeded",
            JobEvent::Failed(_) => "failed",
        }
    }
}

/// One image's request/response lifecycle within a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Image URL or path; unique within a batch
    pub reference: String,

    pub state: JobState,

    /// Generated prompt, set only when `Completed`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,

    /// Error message when `Failed`, or the retry notice while `Retrying`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl Job {
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            state: JobState::Pending,
            result: None,
            failure_reason: None,
        }
    }

    /// A job that already finished in an earlier run.
    pub fn completed(reference: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            state: JobState::Completed,
            result: Some(prompt.into()),
            failure_reason: None,
        }
    }

    /// Apply an event, enforcing the valid transition set:
    ///
    /// ```text
    /// Pending    --Dispatched--> Generating
    /// Generating --Retrying----> Retrying
    /// Retrying   --Retrying----> Retrying
    /// Generating | Retrying --Succeeded--> Completed
    /// Pending | Generating | Retrying --Failed--> Failed
    /// ```
    pub fn apply(&mut self, event: JobEvent) -> Result<(), TransitionError> {
        use JobState::*;

        let next = match (&self.state, &event) {
            (Pending, JobEvent::Dispatched) => Generating,
            (Generating | Retrying, JobEvent::Retrying { .. }) => Retrying,
            (Generating | Retrying, JobEvent::Succeeded(_)) => Completed,
            (Pending | Generating | Retrying, JobEvent::Failed(_)) => Failed,
            (from, event) => {
                return Err(TransitionError {
                    reference: self.reference.clone(),
                    from: *from,
                    event: event.name(),
                })
            }
        };

        match event {
            JobEvent::Dispatched => {
                self.failure_reason = None;
            }
            JobEvent::Retrying { backoff, .. } => {
                self.failure_reason = Some(format!(
                    "rate limit hit, retrying in {}s",
                    backoff.as_millis().div_ceil(1000)
                ));
            }
            JobEvent::Succeeded(text) => {
                self.result = Some(text);
                self.failure_reason = None;
            }
            JobEvent::Failed(message) => {
                self.result = None;
                self.failure_reason = Some(message);
            }
        }
        self.state = next;
        Ok(())
    }
}

/// Aggregate batch progress, recomputed after every terminal transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub completed: usize,
    pub total: usize,
    pub percentage: u8,
}

impl ProgressSnapshot {
    pub fn new(completed: usize, total: usize) -> Self {
        let percentage = if total == 0 {
            0
        } else {
            ((completed as f64 / total as f64) * 100.0).round() as u8
        };
        Self {
            completed,
            total,
            percentage,
        }
    }
}

/// One line of generator output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub reference: String,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub provider: String,
    pub model: String,
}

impl JobRecord {
    pub fn from_job(job: &Job, provider: &str, model: &str) -> Self {
        Self {
            reference: job.reference.clone(),
            state: job.state,
            prompt: job.result.clone(),
            error: job.failure_reason.clone(),
            provider: provider.to_string(),
            model: model.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retrying(secs: u64) -> JobEvent {
        JobEvent::Retrying {
            attempt: 1,
            backoff: Duration::from_secs(secs),
        }
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut job = Job::new("https://example.com/a.jpg");
        job.apply(JobEvent::Dispatched).unwrap();
        assert_eq!(job.state, JobState::Generating);
        job.apply(JobEvent::Succeeded("a prompt".into())).unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.result.as_deref(), Some("a prompt"));
        assert!(job.failure_reason.is_none());
    }

    #[test]
    fn test_retrying_records_reason_then_clears_on_success() {
        let mut job = Job::new("a");
        job.apply(JobEvent::Dispatched).unwrap();
        job.apply(retrying(2)).unwrap();
        assert_eq!(job.state, JobState::Retrying);
        assert_eq!(
            job.failure_reason.as_deref(),
            Some("rate limit hit, retrying in 2s")
        );
        job.apply(retrying(4)).unwrap();
        assert_eq!(
            job.failure_reason.as_deref(),
            Some("rate limit hit, retrying in 4s")
        );
        job.apply(JobEvent::Succeeded("ok".into())).unwrap();
        assert!(job.failure_reason.is_none());
    }

    #[test]
    fn test_failed_keeps_message() {
        let mut job = Job::new("a");
        job.apply(JobEvent::Dispatched).unwrap();
        job.apply(JobEvent::Failed("gemini error: bad image".into()))
            .unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(
            job.failure_reason.as_deref(),
            Some("gemini error: bad image")
        );
        assert!(job.result.is_none());
    }

    #[test]
    fn test_completed_is_terminal() {
        let mut job = Job::completed("a", "done");
        let err = job.apply(JobEvent::Dispatched).unwrap_err();
        assert_eq!(err.from, JobState::Completed);
        assert_eq!(err.event, "dispatched");
        assert!(job.apply(JobEvent::Failed("x".into())).is_err());
        assert_eq!(job.result.as_deref(), Some("done"));
    }

    #[test]
    fn test_cannot_succeed_before_dispatch() {
        let mut job = Job::new("a");
        assert!(job.apply(JobEvent::Succeeded("x".into())).is_err());
        assert!(job.apply(retrying(1)).is_err());
        assert_eq!(job.state, JobState::Pending);
    }

    #[test]
    fn test_retry_notice_rounds_up_to_whole_seconds() {
        let mut job = Job::new("a");
        job.apply(JobEvent::Dispatched).unwrap();
        job.apply(JobEvent::Retrying {
            attempt: 1,
            backoff: Duration::from_millis(1500),
        })
        .unwrap();
        assert_eq!(
            job.failure_reason.as_deref(),
            Some("rate limit hit, retrying in 2s")
        );
    }

    #[test]
    fn test_progress_snapshot() {
        assert_eq!(
            ProgressSnapshot::new(3, 3),
            ProgressSnapshot {
                completed: 3,
                total: 3,
                percentage: 100
            }
        );
        assert_eq!(ProgressSnapshot::new(1, 3).percentage, 33);
        assert_eq!(ProgressSnapshot::new(2, 3).percentage, 67);
        assert_eq!(ProgressSnapshot::new(0, 0).percentage, 0);
    }

    #[test]
    fn test_job_record_serialization_skips_empty_fields() {
        let job = Job::completed("https://x/y.png", "A cat");
        let record = JobRecord::from_job(&job, "gemini", "gemini-2.0-flash");
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"state\":\"completed\""));
        assert!(json.contains("\"prompt\":\"A cat\""));
        assert!(!json.contains("\"error\""));
    }
}
