use crate::core::BoxError;
use async_trait::async_trait;
use tracing::{info, warn};

/// Fire-and-forget progress and liveness reporting.
///
/// Implementations forward messages to whatever monitors the task (a chat
/// thread, a status page, an idle-timeout watchdog). Errors are logged by
/// callers and never fail the work being reported on.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, task_id: &str, message: &str) -> Result<(), BoxError>;
}

/// Default sink: writes progress to the `tracing` log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgressSink;

#[async_trait]
impl ProgressSink for TracingProgressSink {
    async fn report(&self, task_id: &str, message: &str) -> Result<(), BoxError> {
        info!(task_id = %task_id, "{}", message);
        Ok(())
    }
}

/// Reports through `sink`, logging and swallowing any failure.
pub async fn report_quietly(sink: &dyn ProgressSink, task_id: &str, message: &str) {
    if let Err(e) = sink.report(task_id, message).await {
        warn!("Progress report for task {} failed: {}", task_id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingSink {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ProgressSink for FailingSink {
        async fn report(&self, _task_id: &str, _message: &str) -> Result<(), BoxError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err("sink offline".into())
        }
    }

    #[tokio::test]
    async fn test_failures_are_swallowed() {
        let sink = FailingSink {
            calls: AtomicUsize::new(0),
        };
        report_quietly(&sink, "task-1", "still working").await;
        report_quietly(&TracingProgressSink, "task-1", "still working").await;
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
    }
}
