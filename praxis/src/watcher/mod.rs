//! External job watcher.
//!
//! Long external work (training runs, batch evaluations, builds) is
//! dispatched through a [`JobRunner`] and the workflow suspends on an
//! [`Interrupt::ExternalJob`](crate::workflow::Interrupt::ExternalJob).
//! The [`JobWatcher`] polls the runner, keeps the task alive through a
//! [`ProgressSink`], and resumes the run once the job is terminal.

mod job;
mod poller;
mod progress;

pub use job::{JobResult, JobRunner, JobSpec, JobStatus, WatchedJob, SUSPENSION_EXPIRED};
pub use poller::{JobWatcher, PollSummary, RecoveryReport, WatcherConfig, WatcherHandle};
pub use progress::{report_quietly, ProgressSink, TracingProgressSink};
