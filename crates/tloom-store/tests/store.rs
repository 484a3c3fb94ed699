//! Store invariant tests against an in-memory database.

use chrono::{Duration, Utc};

use tloom_models::{CreateTaskSpec, Stage, SubStatus, SubTaskId, Task, TaskStatus};
use tloom_store::{
    ApplyOutcome, CancelOutcome, NewAnalysis, NewMediaItem, RetryOutcome, Store, StoreError,
    SubTaskPatch, TaskPatch,
};

fn spec(variants: u32) -> CreateTaskSpec {
    CreateTaskSpec::new("test task", vec!["https://x/a.md".into()]).with_variant_count(variants)
}

fn media_fields() -> NewMediaItem {
    NewMediaItem {
        local_path: "/tmp/tloom/a.md".into(),
        remote_url: "https://cdn/a.md".into(),
        media_type: tloom_models::MediaType::Markdown,
        file_size: 128,
        mime_type: "text/markdown".into(),
        resolution: None,
        duration_ms: None,
    }
}

async fn claimed_task(store: &Store, variants: u32) -> Task {
    store.create_task(&spec(variants), "/tmp/tloom").await.unwrap();
    store
        .claim_task("w1", Duration::seconds(300), Utc::now())
        .await
        .unwrap()
        .expect("pending task to claim")
}

#[tokio::test]
async fn create_task_rejects_invalid_specs() {
    let store = Store::in_memory().await.unwrap();

    for bad_variants in [0u32, 6] {
        let err = store
            .create_task(&spec(bad_variants), "/tmp/tloom")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidSpec(_)));
    }

    let mut no_urls = spec(1);
    no_urls.media_urls.clear();
    let err = store.create_task(&no_urls, "/tmp/tloom").await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidSpec(_)));

    // Both boundary values are accepted
    assert!(store.create_task(&spec(1), "/tmp/tloom").await.is_ok());
    assert!(store.create_task(&spec(5), "/tmp/tloom").await.is_ok());
}

#[tokio::test]
async fn claim_moves_task_to_processing_with_lease() {
    let store = Store::in_memory().await.unwrap();
    let created = store.create_task(&spec(1), "/tmp/tloom").await.unwrap();

    let now = Utc::now();
    let claimed = store
        .claim_task("w1", Duration::seconds(300), now)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(claimed.id, created.id);
    assert_eq!(claimed.status, TaskStatus::Processing);
    assert_eq!(claimed.lease_worker_id.as_deref(), Some("w1"));
    assert!(claimed.started_at.is_some());

    // Nothing left to claim
    let none = store
        .claim_task("w2", Duration::seconds(300), now)
        .await
        .unwrap();
    assert!(none.is_none());
}

#[tokio::test]
async fn claim_is_single_in_flight_per_task() {
    let store = Store::in_memory().await.unwrap();
    for _ in 0..3 {
        store.create_task(&spec(1), "/tmp/tloom").await.unwrap();
    }

    let now = Utc::now();
    let mut seen = std::collections::HashSet::new();
    for worker in ["w1", "w2", "w3"] {
        let task = store
            .claim_task(worker, Duration::seconds(300), now)
            .await
            .unwrap()
            .unwrap();
        // Every claim hands out a distinct task
        assert!(seen.insert(task.id));
    }
}

#[tokio::test]
async fn progress_regression_is_rejected() {
    let store = Store::in_memory().await.unwrap();
    let task = claimed_task(&store, 1).await;

    let applied = store
        .apply_task_update(task.id, &TaskPatch::progress(40))
        .await
        .unwrap();
    assert!(applied.is_applied());

    let rejected = store
        .apply_task_update(task.id, &TaskPatch::progress(30))
        .await
        .unwrap();
    assert!(matches!(rejected, ApplyOutcome::RejectedRegression));

    // Equal progress passes through
    let equal = store
        .apply_task_update(task.id, &TaskPatch::progress(40))
        .await
        .unwrap();
    assert!(equal.is_applied());
}

#[tokio::test]
async fn off_allowlist_transition_is_rejected() {
    let store = Store::in_memory().await.unwrap();
    let created = store.create_task(&spec(1), "/tmp/tloom").await.unwrap();

    // pending -> completed skips processing
    let rejected = store
        .apply_task_update(created.id, &TaskPatch::status(TaskStatus::Completed))
        .await
        .unwrap();
    assert!(matches!(rejected, ApplyOutcome::RejectedRegression));
}

#[tokio::test]
async fn terminal_rows_are_sticky() {
    let store = Store::in_memory().await.unwrap();
    let task = claimed_task(&store, 1).await;

    let done = store
        .apply_task_update(
            task.id,
            &TaskPatch::status(TaskStatus::Completed)
                .with_progress(100)
                .with_stage(Stage::Completed),
        )
        .await
        .unwrap()
        .applied()
        .unwrap();
    assert!(done.completed_at.is_some());
    assert!(done.lease_worker_id.is_none());

    // Any further write is a silent no-op
    let noop = store
        .apply_task_update(task.id, &TaskPatch::status(TaskStatus::Failed))
        .await
        .unwrap();
    assert!(matches!(noop, ApplyOutcome::NoopTerminal));

    let reread = store.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(reread.status, TaskStatus::Completed);
    assert_eq!(reread.progress, 100);
}

#[tokio::test]
async fn sub_task_creation_is_idempotent() {
    let store = Store::in_memory().await.unwrap();
    let task = claimed_task(&store, 3).await;
    let styles = vec!["default".into(), "energetic".into(), "calm".into()];

    let first = store.create_sub_tasks(&task, &styles).await.unwrap();
    let second = store.create_sub_tasks(&task, &styles).await.unwrap();

    assert_eq!(first.len(), 3);
    assert_eq!(second.len(), 3);
    let ids: Vec<_> = first.iter().map(|c| c.id).collect();
    let ids_again: Vec<_> = second.iter().map(|c| c.id).collect();
    assert_eq!(ids, ids_again);
    assert_eq!(second[1].script_style, "energetic");
}

#[tokio::test]
async fn media_upsert_is_idempotent() {
    let store = Store::in_memory().await.unwrap();
    let task = claimed_task(&store, 1).await;

    let a = store
        .upsert_media_item(task.id, "https://x/a.md", &media_fields())
        .await
        .unwrap();
    let b = store
        .upsert_media_item(task.id, "https://x/a.md", &media_fields())
        .await
        .unwrap();

    assert_eq!(a.id, b.id);
    assert_eq!(store.media_items_for_task(task.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn analysis_insert_is_idempotent_per_item() {
    let store = Store::in_memory().await.unwrap();
    let task = claimed_task(&store, 1).await;
    let item = store
        .upsert_media_item(task.id, "https://x/a.md", &media_fields())
        .await
        .unwrap();

    let fields = NewAnalysis {
        description: "an article about looms".into(),
        tags: vec!["weaving".into()],
        theme: None,
        status: tloom_models::AnalysisStatus::Completed,
        quality_score: Some(0.9),
    };
    let a = store.insert_analysis(task.id, item.id, &fields).await.unwrap();
    let b = store.insert_analysis(task.id, item.id, &fields).await.unwrap();

    assert_eq!(a.id, b.id);
    assert_eq!(store.analyses_for_task(task.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn sub_task_lifecycle_and_merge_listing() {
    let store = Store::in_memory().await.unwrap();
    let task = claimed_task(&store, 2).await;
    let children = store
        .create_sub_tasks(&task, &["default".into(), "energetic".into()])
        .await
        .unwrap();

    let child = &children[0];
    for patch in [
        SubTaskPatch::status(SubStatus::ScriptGenerating).with_progress(5),
        SubTaskPatch::status(SubStatus::ScriptReady).with_progress(50),
        SubTaskPatch::status(SubStatus::VideoSubmitting),
        SubTaskPatch::status(SubStatus::VideoProcessing)
            .with_progress(60)
            .with_merge_submission("ext-1", Utc::now()),
    ] {
        assert!(store
            .apply_sub_task_update(child.id, &patch)
            .await
            .unwrap()
            .is_applied());
    }

    let submitted = store.list_submitted_subtasks(50).await.unwrap();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].id, child.id);
    assert_eq!(submitted[0].external_merge_id.as_deref(), Some("ext-1"));

    // Skipping ahead is rejected for the sibling still in pending
    let rejected = store
        .apply_sub_task_update(
            children[1].id,
            &SubTaskPatch::status(SubStatus::VideoProcessing),
        )
        .await
        .unwrap();
    assert!(matches!(rejected, ApplyOutcome::RejectedRegression));
}

#[tokio::test]
async fn lease_refresh_and_loss() {
    let store = Store::in_memory().await.unwrap();
    let task = claimed_task(&store, 1).await;
    let now = Utc::now();

    let deadline = store
        .refresh_lease(task.id, "w1", Duration::seconds(300), now)
        .await
        .unwrap();
    assert!(deadline > now);

    // Wrong worker
    let err = store
        .refresh_lease(task.id, "w2", Duration::seconds(300), now)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::LeaseLost(_)));

    // Released lease cannot be refreshed
    store.release_lease(task.id, "w1").await.unwrap();
    let err = store
        .refresh_lease(task.id, "w1", Duration::seconds(300), now)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::LeaseLost(_)));
}

#[tokio::test]
async fn expired_leases_are_reclaimed_with_budget() {
    let store = Store::in_memory().await.unwrap();
    let task = claimed_task(&store, 1).await;

    // Not yet expired
    let none = store.reclaim_expired_leases(Utc::now()).await.unwrap();
    assert!(none.is_empty());

    let later = Utc::now() + Duration::seconds(600);
    let reclaimed = store.reclaim_expired_leases(later).await.unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].status, TaskStatus::Pending);
    assert_eq!(reclaimed[0].reclaim_count, 1);

    // Nothing left holding an expired lease
    let reclaimed_again = store.reclaim_expired_leases(later).await.unwrap();
    assert!(reclaimed_again.is_empty());

    // Burn through the budget
    for _ in 0..3 {
        store
            .claim_task("w1", Duration::seconds(300), Utc::now())
            .await
            .unwrap()
            .unwrap();
        store
            .reclaim_expired_leases(Utc::now() + Duration::seconds(600))
            .await
            .unwrap();
    }
    let failed = store.fail_retry_exhausted(3, Utc::now()).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, task.id);
    assert_eq!(failed[0].status, TaskStatus::Failed);
    assert_eq!(failed[0].error_message.as_deref(), Some("exceeded retry budget"));
}

#[tokio::test]
async fn cancel_pending_is_immediate_and_processing_is_flagged() {
    let store = Store::in_memory().await.unwrap();
    let pending = store.create_task(&spec(1), "/tmp/tloom").await.unwrap();

    assert_eq!(
        store.request_cancel(pending.id).await.unwrap(),
        CancelOutcome::Accepted
    );
    let cancelled = store.get_task(pending.id).await.unwrap().unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);
    assert!(cancelled.completed_at.is_some());

    // Terminal cancel is a no-op
    assert_eq!(
        store.request_cancel(pending.id).await.unwrap(),
        CancelOutcome::NoopTerminal
    );

    let processing = claimed_task(&store, 1).await;
    assert_eq!(
        store.request_cancel(processing.id).await.unwrap(),
        CancelOutcome::Accepted
    );
    let flagged = store.get_task(processing.id).await.unwrap().unwrap();
    assert_eq!(flagged.status, TaskStatus::Processing);
    assert!(flagged.cancel_requested);
}

#[tokio::test]
async fn retry_resets_failed_task_and_discards_children() {
    let store = Store::in_memory().await.unwrap();
    let task = claimed_task(&store, 2).await;
    store
        .create_sub_tasks(&task, &["default".into(), "energetic".into()])
        .await
        .unwrap();

    // Retry rejected while non-failed
    assert_eq!(
        store.retry_task(task.id).await.unwrap(),
        RetryOutcome::RejectedNonterminal
    );

    store
        .apply_task_update(
            task.id,
            &TaskPatch::status(TaskStatus::Failed).with_error("all variants failed"),
        )
        .await
        .unwrap();

    assert_eq!(store.retry_task(task.id).await.unwrap(), RetryOutcome::Accepted);

    let reset = store.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(reset.status, TaskStatus::Pending);
    assert_eq!(reset.progress, 0);
    assert!(reset.error_message.is_none());
    assert!(reset.completed_at.is_none());
    assert!(store.children_of(task.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn snapshot_round_trip_is_lossless() {
    let store = Store::in_memory().await.unwrap();
    let task = claimed_task(&store, 1).await;

    let snapshot = store.get_task(task.id).await.unwrap().unwrap();
    let json = serde_json::to_string(&snapshot).unwrap();
    let restored: Task = serde_json::from_str(&json).unwrap();
    assert_eq!(serde_json::to_string(&restored).unwrap(), json);
}

#[tokio::test]
async fn script_rows_are_unique_per_sub_task() {
    let store = Store::in_memory().await.unwrap();
    let task = claimed_task(&store, 1).await;
    let children = store.create_sub_tasks(&task, &["default".into()]).await.unwrap();
    let child_id = children[0].id;

    let script = tloom_models::ScriptContent::from_scenes(
        child_id,
        "default",
        vec!["Title".into()],
        vec![tloom_models::ScriptScene {
            text: "hello world".into(),
            duration_s: 3.0,
            media_item_ids: vec![],
        }],
    );

    let first = store.insert_script(&script).await.unwrap();
    // Second insert with a fresh id keeps the original row
    let dup = tloom_models::ScriptContent {
        id: uuid::Uuid::new_v4(),
        ..script.clone()
    };
    let second = store.insert_script(&dup).await.unwrap();
    assert_eq!(first.id, second.id);

    assert!(store.script_for_sub_task(child_id).await.unwrap().is_some());
    assert!(store
        .script_for_sub_task(SubTaskId::new())
        .await
        .unwrap()
        .is_none());
}
