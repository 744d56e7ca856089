//! Hierarchical context store.
//!
//! Fragments are keyed by `(task_id, scope, scope_key)`. Each fragment is
//! split into a short summary, which is always present, and an optional
//! detail, which can be large. The two halves live in separate collections,
//! so coarse views such as [`ContextStore::list_summaries`] never read
//! detail bytes. Call sites that need full fidelity fetch detail lazily
//! with [`ContextStore::get_detail`].
//!
//! Every record expires after one shared retention window (30 days by
//! default) regardless of how the task ended.

mod fragment;

pub use fragment::{ContextFragment, ContextScope, SummaryEntry};

use crate::config::serde_secs;
use crate::core::{deserialize_value, serialize_value, truncate_chars, CoreError};
use crate::storage::{StateStore, StorageError};
use chrono::Utc;
use fragment::StoredSummary;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const SUMMARIES: &str = "context_summaries";
const DETAILS: &str = "context_details";
const SEPARATOR: char = '/';

pub const DEFAULT_RETENTION: Duration = Duration::from_secs(30 * 24 * 3600);
pub const DEFAULT_MAX_SUMMARY_CHARS: usize = 500;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ContextError {
    #[error("invalid context key: {0}")]
    InvalidKey(String),

    #[error("summary must not be empty")]
    EmptySummary,

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),
}

pub type Result<T> = std::result::Result<T, ContextError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// How long fragments stay reachable after their last save.
    #[serde(with = "serde_secs")]
    pub retention: Duration,
    /// Longer summaries are truncated on save.
    pub max_summary_chars: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            retention: DEFAULT_RETENTION,
            max_summary_chars: DEFAULT_MAX_SUMMARY_CHARS,
        }
    }
}

impl ContextConfig {
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_max_summary_chars(mut self, max: usize) -> Self {
        self.max_summary_chars = max;
        self
    }
}

/// Scoped summary/detail records per task.
pub struct ContextStore {
    store: Arc<dyn StateStore>,
    config: ContextConfig,
}

impl ContextStore {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self::with_config(store, ContextConfig::default())
    }

    pub fn with_config(store: Arc<dyn StateStore>, config: ContextConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Upserts a fragment. Saving without `detail` drops any detail stored earlier.
    pub async fn save(
        &self,
        task_id: &str,
        scope: &ContextScope,
        scope_key: &str,
        summary: &str,
        detail: Option<&str>,
    ) -> Result<ContextFragment> {
        let key = fragment_key(task_id, scope, scope_key)?;
        let summary = summary.trim();
        if summary.is_empty() {
            return Err(ContextError::EmptySummary);
        }
        let summary = truncate_chars(summary, self.config.max_summary_chars);
        let created_at = Utc::now();
        let ttl = Some(self.config.retention);

        match detail {
            Some(detail) => {
                self.store
                    .put(DETAILS, &key, &serialize_value(&detail)?, ttl)
                    .await?;
            }
            None => {
                self.store.delete(DETAILS, &key).await?;
            }
        }

        let stored = StoredSummary {
            scope_key: scope_key.to_string(),
            summary: summary.clone(),
            has_detail: detail.is_some(),
            created_at,
        };
        self.store
            .put(SUMMARIES, &key, &serialize_value(&stored)?, ttl)
            .await?;

        debug!("Saved context fragment {}", key);
        Ok(ContextFragment {
            task_id: task_id.to_string(),
            scope: scope.clone(),
            scope_key: scope_key.to_string(),
            summary,
            detail: detail.map(str::to_string),
            created_at,
        })
    }

    pub async fn get_summary(
        &self,
        task_id: &str,
        scope: &ContextScope,
        scope_key: &str,
    ) -> Result<Option<String>> {
        Ok(self
            .load_summary(&fragment_key(task_id, scope, scope_key)?)
            .await?
            .map(|s| s.summary))
    }

    pub async fn get_detail(
        &self,
        task_id: &str,
        scope: &ContextScope,
        scope_key: &str,
    ) -> Result<Option<String>> {
        self.load_detail(&fragment_key(task_id, scope, scope_key)?)
            .await
    }

    /// Loads summary and detail together.
    pub async fn get_fragment(
        &self,
        task_id: &str,
        scope: &ContextScope,
        scope_key: &str,
    ) -> Result<Option<ContextFragment>> {
        let key = fragment_key(task_id, scope, scope_key)?;
        let Some(stored) = self.load_summary(&key).await? else {
            return Ok(None);
        };
        let detail = if stored.has_detail {
            self.load_detail(&key).await?
        } else {
            None
        };

        Ok(Some(ContextFragment {
            task_id: task_id.to_string(),
            scope: scope.clone(),
            scope_key: stored.scope_key,
            summary: stored.summary,
            detail,
            created_at: stored.created_at,
        }))
    }

    /// Summaries of every live fragment under `(task_id, scope)`, ordered by scope key.
    pub async fn list_summaries(
        &self,
        task_id: &str,
        scope: &ContextScope,
    ) -> Result<Vec<SummaryEntry>> {
        let prefix = scope_prefix(task_id, scope)?;
        self.store
            .scan_prefix(SUMMARIES, &prefix)
            .await?
            .into_iter()
            .map(|record| {
                deserialize_value::<StoredSummary>(&record.value)
                    .map(SummaryEntry::from)
                    .map_err(ContextError::from)
            })
            .collect()
    }

    /// Removes every fragment of a task. Returns how many summaries were removed.
    pub async fn delete_task(&self, task_id: &str) -> Result<usize> {
        validate_segment("task_id", task_id)?;
        let prefix = format!("{}{}", task_id, SEPARATOR);

        let mut removed = 0;
        for collection in [SUMMARIES, DETAILS] {
            for record in self.store.scan_prefix(collection, &prefix).await? {
                if self.store.delete(collection, &record.key).await? && collection == SUMMARIES {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn load_summary(&self, key: &str) -> Result<Option<StoredSummary>> {
        match self.store.get(SUMMARIES, key).await? {
            Some(record) => Ok(Some(deserialize_value(&record.value)?)),
            None => Ok(None),
        }
    }

    async fn load_detail(&self, key: &str) -> Result<Option<String>> {
        match self.store.get(DETAILS, key).await? {
            Some(record) => Ok(Some(deserialize_value(&record.value)?)),
            None => Ok(None),
        }
    }
}

fn validate_segment(name: &str, value: &str) -> Result<()> {
    if value.is_empty() || value.contains(SEPARATOR) {
        return Err(ContextError::InvalidKey(format!(
            "{} must be non-empty and must not contain '{}' (got {:?})",
            name, SEPARATOR, value
        )));
    }
    Ok(())
}

fn scope_prefix(task_id: &str, scope: &ContextScope) -> Result<String> {
    validate_segment("task_id", task_id)?;
    validate_segment("scope", scope.as_str())?;
    Ok(format!("{}{sep}{}{sep}", task_id, scope.key_segment(), sep = SEPARATOR))
}

fn fragment_key(task_id: &str, scope: &ContextScope, scope_key: &str) -> Result<String> {
    if scope_key.is_empty() {
        return Err(ContextError::InvalidKey("scope_key must be non-empty".into()));
    }
    Ok(format!("{}{}", scope_prefix(task_id, scope)?, scope_key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStateStore;

    fn context_store() -> ContextStore {
        ContextStore::new(Arc::new(InMemoryStateStore::new()))
    }

    #[tokio::test]
    async fn test_save_then_get_summary_and_detail() {
        let ctx = context_store();
        ctx.save(
            "task-1",
            &ContextScope::Step,
            "s1",
            "Parsed the issue",
            Some("full transcript"),
        )
        .await
        .unwrap();

        assert_eq!(
            ctx.get_summary("task-1", &ContextScope::Step, "s1")
                .await
                .unwrap()
                .as_deref(),
            Some("Parsed the issue")
        );
        assert_eq!(
            ctx.get_detail("task-1", &ContextScope::Step, "s1")
                .await
                .unwrap()
                .as_deref(),
            Some("full transcript")
        );
    }

    #[tokio::test]
    async fn test_save_without_detail_drops_old_detail() {
        let ctx = context_store();
        ctx.save("t", &ContextScope::Goal, "g", "v1", Some("big"))
            .await
            .unwrap();
        ctx.save("t", &ContextScope::Goal, "g", "v2", None)
            .await
            .unwrap();

        let fragment = ctx
            .get_fragment("t", &ContextScope::Goal, "g")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fragment.summary, "v2");
        assert_eq!(fragment.detail, None);
        assert!(ctx
            .get_detail("t", &ContextScope::Goal, "g")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_summary_rules() {
        let ctx = ContextStore::with_config(
            Arc::new(InMemoryStateStore::new()),
            ContextConfig::default().with_max_summary_chars(5),
        );

        assert!(matches!(
            ctx.save("t", &ContextScope::Step, "s", "   ", None).await,
            Err(ContextError::EmptySummary)
        ));

        let fragment = ctx
            .save("t", &ContextScope::Step, "s", "abcdefgh", None)
            .await
            .unwrap();
        assert_eq!(fragment.summary, "abcde…");
    }

    #[tokio::test]
    async fn test_invalid_keys_are_rejected() {
        let ctx = context_store();
        assert!(matches!(
            ctx.save("a/b", &ContextScope::Step, "s", "x", None).await,
            Err(ContextError::InvalidKey(_))
        ));
        assert!(matches!(
            ctx.get_summary("t", &ContextScope::Custom("x/y".into()), "s")
                .await,
            Err(ContextError::InvalidKey(_))
        ));
        assert!(matches!(
            ctx.get_summary("t", &ContextScope::Step, "").await,
            Err(ContextError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn test_custom_scope_named_like_builtin_is_separate() {
        let ctx = context_store();
        ctx.save("t1", &ContextScope::Goal, "main", "ship the release", None)
            .await
            .unwrap();
        ctx.save("t1", &ContextScope::Custom("goal".into()), "main", "user notes", None)
            .await
            .unwrap();

        assert_eq!(
            ctx.get_summary("t1", &ContextScope::Goal, "main").await.unwrap().as_deref(),
            Some("ship the release")
        );
        assert_eq!(
            ctx.get_summary("t1", &ContextScope::Custom("goal".into()), "main")
                .await
                .unwrap()
                .as_deref(),
            Some("user notes")
        );
        assert_eq!(ctx.list_summaries("t1", &ContextScope::Goal).await.unwrap().len(), 1);
        assert_eq!(ctx.delete_task("t1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_list_summaries_is_scoped_and_ordered() {
        let ctx = context_store();
        ctx.save("t1", &ContextScope::Step, "b", "second", Some("d"))
            .await
            .unwrap();
        ctx.save("t1", &ContextScope::Step, "a", "first", None)
            .await
            .unwrap();
        ctx.save("t1", &ContextScope::Goal, "g", "goal", None)
            .await
            .unwrap();
        ctx.save("t10", &ContextScope::Step, "z", "other task", None)
            .await
            .unwrap();

        let entries = ctx.list_summaries("t1", &ContextScope::Step).await.unwrap();
        let keys: Vec<&str> = entries.iter().map(|e| e.scope_key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert!(entries[1].has_detail);
    }

    #[tokio::test]
    async fn test_delete_task_removes_everything() {
        let ctx = context_store();
        ctx.save("t1", &ContextScope::Step, "a", "one", Some("d"))
            .await
            .unwrap();
        ctx.save("t1", &ContextScope::Goal, "g", "two", None)
            .await
            .unwrap();
        ctx.save("t2", &ContextScope::Goal, "g", "kept", None)
            .await
            .unwrap();

        assert_eq!(ctx.delete_task("t1").await.unwrap(), 2);
        assert!(ctx
            .get_detail("t1", &ContextScope::Step, "a")
            .await
            .unwrap()
            .is_none());
        assert!(ctx
            .get_summary("t2", &ContextScope::Goal, "g")
            .await
            .unwrap()
            .is_some());
    }
}
