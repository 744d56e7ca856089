use super::{Interrupt, Result, StateBlob, WorkflowError};
use crate::core::{deserialize_value, serialize_value};
use crate::storage::StateStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const RUNS_COLLECTION: &str = "workflow_runs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Suspended,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where and why a run stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suspension {
    pub node: String,
    /// The job id for external jobs; a generated id otherwise.
    pub token: String,
    pub interrupt: Interrupt,
    pub suspended_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Suspension {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// The persisted record of one workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub thread_id: String,
    /// Node to run next, or the suspended node.
    pub current_node: String,
    pub state_blob: StateBlob,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspension: Option<Suspension>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Completed node executions.
    #[serde(default)]
    pub transitions: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRun {
    pub fn new(thread_id: impl Into<String>, entry: impl Into<String>, state_blob: StateBlob) -> Self {
        let now = Utc::now();
        Self {
            thread_id: thread_id.into(),
            current_node: entry.into(),
            state_blob,
            status: RunStatus::Running,
            suspension: None,
            error: None,
            transitions: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Persists [`WorkflowRun`]s keyed by thread id.
///
/// Every write is a compare-and-swap on the version returned by the
/// previous read or write. Records expire after the retention window and
/// are never deleted on completion.
#[derive(Clone)]
pub struct Checkpointer {
    store: Arc<dyn StateStore>,
    retention: Duration,
}

impl Checkpointer {
    pub fn new(store: Arc<dyn StateStore>, retention: Duration) -> Self {
        Self { store, retention }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Stores a new run. Fails with `ThreadExists` if the thread id is taken.
    pub async fn create(&self, run: &WorkflowRun) -> Result<u64> {
        let bytes = serialize_value(run)?;
        match self
            .store
            .compare_and_swap(RUNS_COLLECTION, &run.thread_id, None, &bytes, Some(self.retention))
            .await?
        {
            Some(record) => Ok(record.version),
            None => Err(WorkflowError::ThreadExists(run.thread_id.clone())),
        }
    }

    /// Loads a run with the version to pass to [`Checkpointer::save`].
    pub async fn load(&self, thread_id: &str) -> Result<Option<(WorkflowRun, u64)>> {
        match self.store.get(RUNS_COLLECTION, thread_id).await? {
            Some(record) => Ok(Some((deserialize_value(&record.value)?, record.version))),
            None => Ok(None),
        }
    }

    /// Writes `run` if it is still at `expected_version`. Returns the new version.
    pub async fn save(&self, run: &mut WorkflowRun, expected_version: u64) -> Result<u64> {
        run.updated_at = Utc::now();
        let bytes = serialize_value(&*run)?;
        match self
            .store
            .compare_and_swap(
                RUNS_COLLECTION,
                &run.thread_id,
                Some(expected_version),
                &bytes,
                Some(self.retention),
            )
            .await?
        {
            Some(record) => {
                debug!(
                    "Checkpointed thread {} at node {} (status={})",
                    run.thread_id, run.current_node, run.status
                );
                Ok(record.version)
            }
            None => Err(WorkflowError::ConcurrentModification {
                thread_id: run.thread_id.clone(),
            }),
        }
    }

    /// Runs with `status`, ordered by thread id.
    pub async fn list_by_status(&self, status: RunStatus) -> Result<Vec<WorkflowRun>> {
        let mut runs = Vec::new();
        for record in self.store.scan_prefix(RUNS_COLLECTION, "").await? {
            let run: WorkflowRun = deserialize_value(&record.value)?;
            if run.status == status {
                runs.push(run);
            }
        }
        Ok(runs)
    }

    pub async fn delete(&self, thread_id: &str) -> Result<bool> {
        Ok(self.store.delete(RUNS_COLLECTION, thread_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStateStore;
    use serde_json::json;

    fn checkpointer() -> Checkpointer {
        Checkpointer::new(Arc::new(InMemoryStateStore::new()), Duration::from_secs(3600))
    }

    fn blob() -> StateBlob {
        StateBlob {
            schema_version: 1,
            data: json!({"n": 0}),
        }
    }

    #[tokio::test]
    async fn test_create_is_exclusive() {
        let checkpointer = checkpointer();
        let run = WorkflowRun::new("t1", "start", blob());
        checkpointer.create(&run).await.unwrap();
        assert!(matches!(
            checkpointer.create(&run).await,
            Err(WorkflowError::ThreadExists(id)) if id == "t1"
        ));
    }

    #[tokio::test]
    async fn test_save_detects_stale_version() {
        let checkpointer = checkpointer();
        let version = checkpointer
            .create(&WorkflowRun::new("t1", "start", blob()))
            .await
            .unwrap();

        let (mut first, _) = checkpointer.load("t1").await.unwrap().unwrap();
        let (mut second, _) = checkpointer.load("t1").await.unwrap().unwrap();

        first.current_node = "next".into();
        checkpointer.save(&mut first, version).await.unwrap();

        second.status = RunStatus::Failed;
        assert!(matches!(
            checkpointer.save(&mut second, version).await,
            Err(WorkflowError::ConcurrentModification { .. })
        ));

        let (stored, _) = checkpointer.load("t1").await.unwrap().unwrap();
        assert_eq!(stored.current_node, "next");
        assert_eq!(stored.status, RunStatus::Running);
    }

    #[tokio::test]
    async fn test_list_by_status() {
        let checkpointer = checkpointer();
        for (id, status) in [
            ("b", RunStatus::Suspended),
            ("a", RunStatus::Suspended),
            ("c", RunStatus::Completed),
        ] {
            let mut run = WorkflowRun::new(id, "start", blob());
            run.status = status;
            checkpointer.create(&run).await.unwrap();
        }

        let suspended = checkpointer.list_by_status(RunStatus::Suspended).await.unwrap();
        let ids: Vec<&str> = suspended.iter().map(|r| r.thread_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        assert!(checkpointer.delete("c").await.unwrap());
        assert!(checkpointer.load("c").await.unwrap().is_none());
    }
}
