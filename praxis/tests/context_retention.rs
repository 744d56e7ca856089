//! Context fragments: two-level reads, scoped listing and retention.

use praxis::context::{ContextConfig, ContextError, ContextScope, ContextStore};
use praxis::storage::{InMemoryStateStore, StateStore};
use std::sync::Arc;
use std::time::Duration;

fn store() -> Arc<dyn StateStore> {
    Arc::new(InMemoryStateStore::new())
}

#[tokio::test]
async fn test_summary_and_detail_are_read_separately() {
    let context = ContextStore::new(store());
    let scope = ContextScope::Delegation;

    context
        .save(
            "task-1",
            &scope,
            "d1",
            "Found the flaky test",
            Some("Full transcript: the test races the cache flusher ..."),
        )
        .await
        .unwrap();

    assert_eq!(
        context.get_summary("task-1", &scope, "d1").await.unwrap().as_deref(),
        Some("Found the flaky test")
    );
    let detail = context.get_detail("task-1", &scope, "d1").await.unwrap().unwrap();
    assert!(detail.starts_with("Full transcript"));

    let fragment = context.get_fragment("task-1", &scope, "d1").await.unwrap().unwrap();
    assert_eq!(fragment.scope, ContextScope::Delegation);
    assert!(fragment.detail.is_some());

    // Overwriting without detail drops the old detail.
    context
        .save("task-1", &scope, "d1", "Fixed the flaky test", None)
        .await
        .unwrap();
    assert!(context.get_detail("task-1", &scope, "d1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_listing_is_scoped_and_ordered() {
    let context = ContextStore::new(store());
    for key in ["step-2", "step-1", "step-3"] {
        context
            .save("task-1", &ContextScope::Step, key, &format!("summary of {}", key), None)
            .await
            .unwrap();
    }
    context
        .save("task-1", &ContextScope::Goal, "main", "Ship the release", None)
        .await
        .unwrap();
    context
        .save("task-2", &ContextScope::Step, "step-1", "Other task", None)
        .await
        .unwrap();

    let steps = context.list_summaries("task-1", &ContextScope::Step).await.unwrap();
    let keys: Vec<&str> = steps.iter().map(|s| s.scope_key.as_str()).collect();
    assert_eq!(keys, vec!["step-1", "step-2", "step-3"]);

    assert_eq!(context.delete_task("task-1").await.unwrap(), 4);
    assert!(context
        .list_summaries("task-1", &ContextScope::Step)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(
        context.list_summaries("task-2", &ContextScope::Step).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn test_fragments_expire_after_retention() {
    let context = ContextStore::with_config(
        store(),
        ContextConfig::default().with_retention(Duration::from_millis(100)),
    );
    context
        .save("task-1", &ContextScope::Goal, "main", "Short-lived", Some("detail"))
        .await
        .unwrap();
    assert!(context
        .get_fragment("task-1", &ContextScope::Goal, "main")
        .await
        .unwrap()
        .is_some());

    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(context
        .get_summary("task-1", &ContextScope::Goal, "main")
        .await
        .unwrap()
        .is_none());
    assert!(context
        .get_detail("task-1", &ContextScope::Goal, "main")
        .await
        .unwrap()
        .is_none());
    assert!(context
        .list_summaries("task-1", &ContextScope::Goal)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_summaries_are_bounded_and_keys_validated() {
    let context = ContextStore::with_config(store(), ContextConfig::default().with_max_summary_chars(10));

    let fragment = context
        .save("task-1", &ContextScope::Artifact, "report.md", "A summary that is far too long", None)
        .await
        .unwrap();
    assert_eq!(fragment.summary, "A summary …");

    assert!(matches!(
        context.save("task-1", &ContextScope::Goal, "main", "   ", None).await,
        Err(ContextError::EmptySummary)
    ));
    assert!(matches!(
        context.save("task/1", &ContextScope::Goal, "main", "summary", None).await,
        Err(ContextError::InvalidKey(_))
    ));
}
