use super::job::{JobResult, JobRunner, JobStatus, WatchedJob};
use super::progress::{report_quietly, ProgressSink, TracingProgressSink};
use crate::config::serde_secs;
use crate::core::Transient;
use crate::workflow::{Checkpointer, Interrupt, ResumeTarget, RunReport, RunStatus, Suspension, WorkflowError};
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    #[serde(with = "serde_secs")]
    pub poll_interval: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
        }
    }
}

impl WatcherConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Counts from one pass over the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub polled: usize,
    pub still_running: usize,
    pub resumed: usize,
    /// Resume failed transiently; the job stays registered.
    pub requeued: usize,
    /// Resume failed permanently; the registration was dropped.
    pub dropped: usize,
    /// The run had moved past the suspension this job was watched for.
    pub stale: usize,
    /// Status or result queries that failed.
    pub errors: usize,
}

/// Counts from the startup scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub registered: usize,
    pub expired: usize,
    pub failed: usize,
}

/// Reconciliation loop for external jobs.
///
/// Runs suspended on an [`Interrupt::ExternalJob`] are registered here.
/// Every poll heartbeats each job's task through the progress sink and
/// queries the runner. A terminal job (succeeded, failed or not found) is
/// claimed by removing it from the registry and its run is resumed exactly
/// once with a [`JobResult`].
///
/// The registry is in-memory only. After a restart,
/// [`JobWatcher::recover`] rebuilds it from the suspended runs in the
/// checkpoint store.
///
/// # Lifecycle
/// 1. Create: `JobWatcher::new(runner, target)`
/// 2. Recover: `watcher.recover(&checkpointer).await`
/// 3. Start: `watcher.start()` returns a handle
/// 4. Shutdown: `handle.shutdown().await` (registrations are abandoned, jobs keep running)
pub struct JobWatcher {
    runner: Arc<dyn JobRunner>,
    target: Arc<dyn ResumeTarget>,
    progress: Arc<dyn ProgressSink>,
    config: WatcherConfig,
    registry: DashMap<String, WatchedJob>,
}

impl JobWatcher {
    pub fn new(runner: Arc<dyn JobRunner>, target: Arc<dyn ResumeTarget>) -> Self {
        Self {
            runner,
            target,
            progress: Arc::new(TracingProgressSink),
            config: WatcherConfig::default(),
            registry: DashMap::new(),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_config(mut self, config: WatcherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    /// Starts watching a job. Returns false if it is already watched.
    pub fn register(
        &self,
        job_id: impl Into<String>,
        thread_id: impl Into<String>,
        suspension_token: impl Into<String>,
        metadata: Value,
    ) -> bool {
        self.insert(WatchedJob::new(job_id, thread_id, suspension_token, metadata))
    }

    /// Registers the job a run suspended on. Other interrupts are ignored.
    pub fn register_suspension(&self, thread_id: &str, suspension: &Suspension) -> bool {
        let Interrupt::ExternalJob { job_id, metadata } = &suspension.interrupt else {
            return false;
        };
        self.insert(
            WatchedJob::new(job_id.as_str(), thread_id, suspension.token.as_str(), metadata.clone())
                .with_expiry(suspension.expires_at),
        )
    }

    /// Stops watching a job. The job itself keeps running.
    pub fn abandon(&self, job_id: &str) -> Option<WatchedJob> {
        self.registry.remove(job_id).map(|(_, job)| job)
    }

    pub fn is_watching(&self, job_id: &str) -> bool {
        self.registry.contains_key(job_id)
    }

    /// Current registrations, ordered by job id.
    pub fn watched(&self) -> Vec<WatchedJob> {
        let mut jobs: Vec<WatchedJob> = self.registry.iter().map(|e| e.value().clone()).collect();
        jobs.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        jobs
    }

    pub fn clear(&self) {
        self.registry.clear();
    }

    /// One pass over every registered job.
    pub async fn poll_once(&self) -> PollSummary {
        let mut summary = PollSummary::default();
        let now = Utc::now();

        for job in self.watched() {
            let polls = match self.registry.get_mut(&job.job_id) {
                Some(mut entry) => {
                    entry.polls += 1;
                    entry.polls
                }
                // Abandoned since the snapshot.
                None => continue,
            };
            summary.polled += 1;

            report_quietly(
                self.progress.as_ref(),
                &job.thread_id,
                &format!("Waiting on external job {} (poll {})", job.job_id, polls),
            )
            .await;

            let result = if job.is_expired(now) {
                warn!("Watch window for job {} expired, failing its run", job.job_id);
                JobResult::expired(&job.job_id)
            } else {
                match self.harvest(&job.job_id).await {
                    Ok(Some(result)) => result,
                    Ok(None) => {
                        summary.still_running += 1;
                        continue;
                    }
                    Err(e) => {
                        warn!("Polling job {} failed (will retry next poll): {}", job.job_id, e);
                        summary.errors += 1;
                        continue;
                    }
                }
            };

            // Removing the registration is the claim: only one poller resumes.
            let Some((_, claimed)) = self.registry.remove(&job.job_id) else {
                continue;
            };
            match self
                .target
                .resume_if_token(&claimed.thread_id, &claimed.suspension_token, result.to_value())
                .await
            {
                Ok(report) => {
                    summary.resumed += 1;
                    info!(
                        "Resumed thread {} after job {} ({:?}), run is now {}",
                        claimed.thread_id, claimed.job_id, result.status, report.status
                    );
                    self.follow(&report);
                }
                Err(e @ WorkflowError::StaleSuspension { .. }) => {
                    warn!(
                        "Dropping stale watch of job {} for thread {}: {}",
                        claimed.job_id, claimed.thread_id, e
                    );
                    summary.stale += 1;
                }
                Err(e) if e.is_transient() => {
                    warn!(
                        "Resume of thread {} for job {} failed transiently, will retry: {}",
                        claimed.thread_id, claimed.job_id, e
                    );
                    self.registry.insert(claimed.job_id.clone(), claimed);
                    summary.requeued += 1;
                }
                Err(e) => {
                    error!(
                        "Resume of thread {} for job {} failed, dropping registration: {}",
                        claimed.thread_id, claimed.job_id, e
                    );
                    summary.dropped += 1;
                }
            }
        }

        if summary.polled > 0 {
            debug!("Job watcher poll: {:?}", summary);
        }
        summary
    }

    /// Rebuilds registrations from suspended runs after a restart.
    ///
    /// Runs whose suspension has expired are resumed with a failed
    /// [`JobResult`] instead, so they cannot stay suspended forever.
    pub async fn recover(&self, checkpointer: &Checkpointer) -> Result<RecoveryReport, WorkflowError> {
        let mut report = RecoveryReport::default();
        let now = Utc::now();

        for run in checkpointer.list_by_status(RunStatus::Suspended).await? {
            let Some(suspension) = &run.suspension else {
                continue;
            };
            let Some(job_id) = suspension.interrupt.job_id() else {
                continue;
            };

            if !suspension.is_expired(now) {
                if self.register_suspension(&run.thread_id, suspension) {
                    report.registered += 1;
                }
                continue;
            }

            match self
                .target
                .resume_if_token(&run.thread_id, &suspension.token, JobResult::expired(job_id).to_value())
                .await
            {
                Ok(resumed) => {
                    warn!(
                        "Suspension of thread {} on job {} expired, resumed with failure",
                        run.thread_id, job_id
                    );
                    report.expired += 1;
                    self.follow(&resumed);
                }
                Err(e @ WorkflowError::StaleSuspension { .. }) => {
                    warn!("Expired thread {} moved on before recovery: {}", run.thread_id, e);
                }
                Err(e) => {
                    error!("Could not resume expired thread {}: {}", run.thread_id, e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "Job watcher recovery: registered={}, expired={}, failed={}",
            report.registered, report.expired, report.failed
        );
        Ok(report)
    }

    /// Spawns the poll loop.
    pub fn start(self: &Arc<Self>) -> WatcherHandle {
        let watcher = Arc::clone(self);
        let token = CancellationToken::new();
        let child = token.child_token();

        let handle = tokio::spawn(async move {
            info!(
                "Job watcher started (poll_interval={:?})",
                watcher.config.poll_interval
            );

            let mut ticker = tokio::time::interval(watcher.config.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;

                    _ = child.cancelled() => break,

                    _ = ticker.tick() => {
                        watcher.poll_once().instrument(info_span!("job_watch")).await;
                    }
                }
            }

            let abandoned = watcher.watched();
            watcher.clear();
            for job in &abandoned {
                info!(
                    "Abandoned watch of job {} for thread {} (job keeps running)",
                    job.job_id, job.thread_id
                );
            }
            info!("Job watcher stopped ({} registrations abandoned)", abandoned.len());
        });

        WatcherHandle { handle, token }
    }

    fn insert(&self, job: WatchedJob) -> bool {
        if self.registry.contains_key(&job.job_id) {
            return false;
        }
        debug!("Watching job {} for thread {}", job.job_id, job.thread_id);
        self.registry.insert(job.job_id.clone(), job);
        true
    }

    /// Resumed runs that suspend on another job are watched right away.
    fn follow(&self, report: &RunReport) {
        if let Some(suspension) = &report.suspension {
            self.register_suspension(&report.thread_id, suspension);
        }
    }

    /// `None` while the job is still running.
    async fn harvest(&self, job_id: &str) -> Result<Option<JobResult>, crate::core::BoxError> {
        let result = match self.runner.status(job_id).await? {
            JobStatus::Running => return Ok(None),
            JobStatus::Succeeded => JobResult::succeeded(job_id, self.runner.result(job_id).await?),
            JobStatus::Failed => {
                let output = self.runner.result(job_id).await.unwrap_or(Value::Null);
                JobResult::failed(job_id, output, format!("job {} failed", job_id))
            }
            JobStatus::NotFound => JobResult::not_found(job_id),
        };
        Ok(Some(result))
    }
}

/// Handle for stopping a watcher started by [`JobWatcher::start`].
pub struct WatcherHandle {
    handle: JoinHandle<()>,
    token: CancellationToken,
}

impl WatcherHandle {
    pub async fn shutdown(self) {
        self.token.cancel();
        let _ = self.handle.await;
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}
