use crate::core::BoxError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What to run on the external job runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl JobSpec {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Succeeded,
    Failed,
    /// The runner has no record of the job, e.g. it was deleted externally.
    NotFound,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Runner for long external jobs. The core only dispatches, polls and harvests.
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Starts a job and returns its id.
    async fn dispatch(&self, spec: &JobSpec) -> Result<String, BoxError>;

    async fn status(&self, job_id: &str) -> Result<JobStatus, BoxError>;

    /// Output of a finished job.
    async fn result(&self, job_id: &str) -> Result<Value, BoxError>;
}

/// A job the watcher is polling on behalf of a suspended run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchedJob {
    pub job_id: String,
    pub thread_id: String,
    pub suspension_token: String,
    #[serde(default)]
    pub metadata: Value,
    pub registered_at: DateTime<Utc>,
    /// After this the run is resumed with a failure even if the job still runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub polls: u64,
}

impl WatchedJob {
    pub fn new(
        job_id: impl Into<String>,
        thread_id: impl Into<String>,
        suspension_token: impl Into<String>,
        metadata: Value,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            thread_id: thread_id.into(),
            suspension_token: suspension_token.into(),
            metadata,
            registered_at: Utc::now(),
            expires_at: None,
            polls: 0,
        }
    }

    pub fn with_expiry(mut self, expires_at: Option<DateTime<Utc>>) -> Self {
        self.expires_at = expires_at;
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

pub const SUSPENSION_EXPIRED: &str = "suspension expired";

/// Value a run suspended on an external job is resumed with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: String,
    pub status: JobStatus,
    pub success: bool,
    #[serde(default)]
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobResult {
    pub fn succeeded(job_id: impl Into<String>, output: Value) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Succeeded,
            success: true,
            output,
            error: None,
        }
    }

    pub fn failed(job_id: impl Into<String>, output: Value, error: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Failed,
            success: false,
            output,
            error: Some(error.into()),
        }
    }

    pub fn not_found(job_id: impl Into<String>) -> Self {
        let job_id = job_id.into();
        Self {
            error: Some(format!("job {} not found", job_id)),
            job_id,
            status: JobStatus::NotFound,
            success: false,
            output: Value::Null,
        }
    }

    /// The watch window closed before the job finished.
    pub fn expired(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Failed,
            success: false,
            output: Value::Null,
            error: Some(SUSPENSION_EXPIRED.to_string()),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_results_as_resume_values() {
        let ok = JobResult::succeeded("job-1", json!({"rows": 10}));
        assert_eq!(
            ok.to_value(),
            json!({"job_id": "job-1", "status": "succeeded", "success": true, "output": {"rows": 10}})
        );

        let gone = JobResult::not_found("job-2").to_value();
        assert_eq!(gone["success"], false);
        assert_eq!(gone["status"], "not_found");

        assert_eq!(
            JobResult::expired("job-3").error.as_deref(),
            Some(SUSPENSION_EXPIRED)
        );
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::NotFound.is_terminal());
    }
}
