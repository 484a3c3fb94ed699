//! End-to-end pipeline scenarios over an in-memory store with scripted
//! collaborator fakes.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use serde_json::{json, Value};

use tloom_models::{
    CreateTaskSpec, MaterialAnalysis, MediaItem, MediaType, ScriptContent, ScriptScene, Stage,
    SubStatus, SubVideoTask, Task, TaskId, TaskStatus,
};
use tloom_ports::{
    AnalysisOutput, FetchedMedia, MediaAnalyzer, MediaFetcher, MergeOutput, MergeStatus, PortError,
    PortResult, ScriptGenerator, ScriptOutput, SubtitleRenderer, Uploader, VideoMergePoller,
    VideoMergeSubmitter,
};
use tloom_store::{Store, StoreError, SubTaskPatch};
use tloom_worker::stages::{
    run_material_analysis, run_material_processing, run_subtask_creation, run_video_submission,
};
use tloom_worker::{
    ops, Clock, Dispatcher, Housekeeper, ManualClock, MergeReconciler, Orchestrator,
    OrchestratorConfig, StageOutcome, SubtitleFailureMode, WorkerContext,
};

// ============================================================================
// Scripted fakes
// ============================================================================

#[derive(Default)]
struct FakeFetcher {
    fail: HashSet<String>,
}

#[async_trait]
impl MediaFetcher for FakeFetcher {
    async fn fetch(
        &self,
        url: &str,
        dest_dir: &Path,
        _timeout: StdDuration,
    ) -> PortResult<FetchedMedia> {
        if self.fail.contains(url) {
            return Err(PortError::permanent("source unreachable"));
        }
        let name = url.rsplit('/').next().unwrap_or("asset.md");
        Ok(FetchedMedia {
            local_path: dest_dir.join(name),
            file_size: 64,
            mime_type: "text/markdown".into(),
            media_type: MediaType::Markdown,
            resolution: None,
            duration_ms: None,
        })
    }
}

struct FakeUploader;

#[async_trait]
impl Uploader for FakeUploader {
    async fn put(&self, local_path: &Path) -> PortResult<String> {
        let name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(format!("https://cdn.test/{name}"))
    }
}

/// Analyzer whose first call can fire a cancel request, so a test can
/// cancel a task deterministically while stage 2 is running.
#[derive(Default)]
struct FakeAnalyzer {
    cancel_on_call: Mutex<Option<(Store, TaskId)>>,
}

#[async_trait]
impl MediaAnalyzer for FakeAnalyzer {
    async fn analyze(&self, item: &MediaItem) -> PortResult<AnalysisOutput> {
        let hook = self.cancel_on_call.lock().unwrap().take();
        if let Some((store, task_id)) = hook {
            store.request_cancel(task_id).await.unwrap();
        }
        Ok(AnalysisOutput {
            description: format!("summary of {}", item.original_url),
            tags: vec!["docs".into()],
            theme: Some("tutorial".into()),
            quality_score: Some(0.8),
        })
    }
}

#[derive(Default)]
struct FakeScripts {
    fail_styles: HashSet<String>,
    calls: AtomicU32,
}

#[async_trait]
impl ScriptGenerator for FakeScripts {
    async fn generate(
        &self,
        task: &Task,
        analyses: &[MaterialAnalysis],
        style: &str,
    ) -> PortResult<ScriptOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_styles.contains(style) {
            return Err(PortError::permanent("style unsupported by model"));
        }
        let media_ids: Vec<_> = analyses.iter().map(|a| a.media_item_id).collect();
        let scenes = vec![
            ScriptScene {
                text: "hook line".into(),
                duration_s: 3.0,
                media_item_ids: media_ids.clone(),
            },
            ScriptScene {
                text: "the body of the story".into(),
                duration_s: 5.0,
                media_item_ids: media_ids.clone(),
            },
            ScriptScene {
                text: "call to action".into(),
                duration_s: 2.0,
                media_item_ids: media_ids,
            },
        ];
        Ok(ScriptOutput {
            titles: vec![format!("{} ({style})", task.title)],
            scenes,
            payload: json!({ "style": style, "title": task.title }),
        })
    }
}

/// Idempotent submitter: the same key always maps to the same external
/// job, and `created` counts how many distinct jobs exist.
#[derive(Default)]
struct FakeSubmitter {
    jobs: Mutex<HashMap<String, String>>,
    created: AtomicU32,
}

#[async_trait]
impl VideoMergeSubmitter for FakeSubmitter {
    async fn submit(&self, _payload: &Value, idempotency_key: &str) -> PortResult<String> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(existing) = jobs.get(idempotency_key) {
            return Ok(existing.clone());
        }
        let id = format!("ext-{}", self.created.fetch_add(1, Ordering::SeqCst) + 1);
        jobs.insert(idempotency_key.to_string(), id.clone());
        Ok(id)
    }
}

/// Merge service whose per-job status sequence is scripted by the test.
/// The last scripted status repeats; unscripted jobs poll as processing.
#[derive(Default)]
struct FakeMergeService {
    scripted: Mutex<HashMap<String, VecDeque<MergeStatus>>>,
    poll_errors: Mutex<HashMap<String, u32>>,
}

impl FakeMergeService {
    fn script(&self, external_id: &str, statuses: Vec<MergeStatus>) {
        self.scripted
            .lock()
            .unwrap()
            .insert(external_id.to_string(), statuses.into());
    }

    fn error_for(&self, external_id: &str, times: u32) {
        self.poll_errors
            .lock()
            .unwrap()
            .insert(external_id.to_string(), times);
    }

    fn succeeded(video_url: &str, duration_ms: i64) -> MergeStatus {
        MergeStatus::Succeeded(MergeOutput {
            video_url: video_url.into(),
            thumbnail_url: Some(format!("{video_url}.jpg")),
            duration_ms: Some(duration_ms),
        })
    }
}

#[async_trait]
impl VideoMergePoller for FakeMergeService {
    async fn status(&self, external_id: &str) -> PortResult<MergeStatus> {
        {
            let mut errors = self.poll_errors.lock().unwrap();
            if let Some(remaining) = errors.get_mut(external_id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(PortError::transient("merge service 502"));
                }
            }
        }
        let mut scripted = self.scripted.lock().unwrap();
        match scripted.get_mut(external_id) {
            Some(queue) if queue.len() > 1 => Ok(queue.pop_front().unwrap()),
            Some(queue) => Ok(queue.front().cloned().unwrap_or(MergeStatus::Processing)),
            None => Ok(MergeStatus::Processing),
        }
    }
}

#[derive(Default)]
struct FakeSubtitles {
    fail: bool,
}

#[async_trait]
impl SubtitleRenderer for FakeSubtitles {
    async fn render(&self, _sub_task: &SubVideoTask) -> PortResult<()> {
        if self.fail {
            Err(PortError::permanent("font cache corrupted"))
        } else {
            Ok(())
        }
    }
}

// ============================================================================
// Test rig
// ============================================================================

#[derive(Default)]
struct RigOptions {
    fetch_fail: Vec<&'static str>,
    script_fail_styles: Vec<&'static str>,
    subtitle_fail: bool,
    subtitle_mode: SubtitleFailureMode,
    uploader_override: Option<Arc<dyn Uploader>>,
    poll_interval: Option<StdDuration>,
}

struct Rig {
    _workspace: tempfile::TempDir,
    store: Store,
    config: OrchestratorConfig,
    ctx: WorkerContext,
    clock: Arc<ManualClock>,
    analyzer: Arc<FakeAnalyzer>,
    scripts: Arc<FakeScripts>,
    submitter: Arc<FakeSubmitter>,
    merge: Arc<FakeMergeService>,
    dispatcher: Dispatcher,
    reconciler: MergeReconciler,
    housekeeper: Housekeeper,
}

async fn build_rig(opts: RigOptions) -> Rig {
    // RUST_LOG=tloom=debug surfaces the pipeline's structured logs
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();

    let workspace = tempfile::tempdir().unwrap();
    let store = Store::in_memory().await.unwrap();

    let mut config = OrchestratorConfig::default();
    config.workspace_root = workspace.path().to_string_lossy().into_owned();
    config.subtitle_failure_mode = opts.subtitle_mode;
    if let Some(interval) = opts.poll_interval {
        config.poll_interval = interval;
    }

    let clock = Arc::new(ManualClock::starting_at(chrono::Utc::now()));
    let fetcher = Arc::new(FakeFetcher {
        fail: opts.fetch_fail.iter().map(|s| s.to_string()).collect(),
    });
    let analyzer = Arc::new(FakeAnalyzer::default());
    let scripts = Arc::new(FakeScripts {
        fail_styles: opts.script_fail_styles.iter().map(|s| s.to_string()).collect(),
        calls: AtomicU32::new(0),
    });
    let submitter = Arc::new(FakeSubmitter::default());
    let merge = Arc::new(FakeMergeService::default());
    let subtitles = Arc::new(FakeSubtitles {
        fail: opts.subtitle_fail,
    });
    let uploader: Arc<dyn Uploader> = opts.uploader_override.unwrap_or(Arc::new(FakeUploader));

    let ctx = WorkerContext::builder(config.clone(), store.clone())
        .clock(clock.clone() as Arc<dyn Clock>)
        .fetcher(fetcher)
        .analyzer(analyzer.clone())
        .script_generator(scripts.clone())
        .merge_submitter(submitter.clone())
        .merge_poller(merge.clone())
        .subtitle_renderer(subtitles)
        .uploader(uploader)
        .build();

    Rig {
        _workspace: workspace,
        store,
        config,
        ctx: ctx.clone(),
        clock,
        analyzer,
        scripts,
        submitter,
        merge,
        dispatcher: Dispatcher::new(ctx.clone()),
        reconciler: MergeReconciler::new(ctx.clone()),
        housekeeper: Housekeeper::new(ctx),
    }
}

impl Rig {
    async fn create(&self, spec: CreateTaskSpec) -> Task {
        ops::create_task(&self.store, &self.config, &spec).await.unwrap()
    }

    async fn task(&self, id: TaskId) -> Task {
        self.store.get_task(id).await.unwrap().unwrap()
    }

    async fn children(&self, id: TaskId) -> Vec<SubVideoTask> {
        self.store.children_of(id).await.unwrap()
    }

    /// Claim the oldest pending task and drive it to the poller hand-off.
    async fn run_pipeline(&self) -> bool {
        self.dispatcher.claim_and_process().await.unwrap()
    }

    /// One poll cycle plus completion of any subtitle renders it started.
    async fn poll(&self) {
        self.reconciler.check_once().await.unwrap();
        self.reconciler.drain_renders().await;
    }
}

fn single_doc_spec(title: &str) -> CreateTaskSpec {
    CreateTaskSpec::new(title, vec!["https://x/a.md".into()])
}

// ============================================================================
// End-to-end scenarios
// ============================================================================

#[tokio::test]
async fn happy_single_variant_completes() {
    let rig = build_rig(RigOptions::default()).await;
    let task = rig.create(single_doc_spec("intro video")).await;

    assert!(rig.run_pipeline().await);

    let handed_off = rig.task(task.id).await;
    assert_eq!(handed_off.status, TaskStatus::Processing);
    assert_eq!(handed_off.progress, 75);
    assert!(handed_off.lease_worker_id.is_none());

    let children = rig.children(task.id).await;
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].status, SubStatus::VideoProcessing);
    let ext = children[0].external_merge_id.clone().unwrap();

    // First cycle observes a still-running job, second the success
    rig.merge.script(
        &ext,
        vec![
            MergeStatus::Processing,
            FakeMergeService::succeeded("v1.mp4", 30_000),
        ],
    );
    rig.poll().await;
    assert_eq!(
        rig.children(task.id).await[0].status,
        SubStatus::VideoProcessing
    );
    rig.poll().await;

    let done = rig.task(task.id).await;
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.progress, 100);
    assert_eq!(done.video_url.as_deref(), Some("v1.mp4"));
    assert_eq!(done.video_duration_ms, Some(30_000));
    assert_eq!(done.current_stage, Some(Stage::Completed));
    assert!(done.completed_at.is_some());

    let child = &rig.children(task.id).await[0];
    assert_eq!(child.status, SubStatus::Completed);
    assert_eq!(child.progress, 100);
    assert!(child.error_message.is_none());
}

#[tokio::test]
async fn partial_success_keeps_first_completed_video() {
    let rig = build_rig(RigOptions {
        script_fail_styles: vec!["energetic"],
        ..Default::default()
    })
    .await;
    let task = rig
        .create(single_doc_spec("promo").with_variant_count(3))
        .await;

    assert!(rig.run_pipeline().await);

    let children = rig.children(task.id).await;
    // Variant 2 rotates onto the failing style
    assert_eq!(children[1].status, SubStatus::ScriptFailed);
    let ext1 = children[0].external_merge_id.clone().unwrap();
    let ext3 = children[2].external_merge_id.clone().unwrap();

    rig.merge
        .script(&ext1, vec![FakeMergeService::succeeded("v1.mp4", 12_000)]);
    rig.merge
        .script(&ext3, vec![MergeStatus::Failed("render farm exploded".into())]);
    rig.poll().await;

    let done = rig.task(task.id).await;
    assert_eq!(done.status, TaskStatus::PartialSuccess);
    assert_eq!(done.progress, 100);
    assert_eq!(done.video_url.as_deref(), Some("v1.mp4"));

    let children = rig.children(task.id).await;
    assert_eq!(children[0].status, SubStatus::Completed);
    assert_eq!(children[1].status, SubStatus::ScriptFailed);
    assert_eq!(children[2].status, SubStatus::Failed);
}

#[tokio::test]
async fn all_variants_failing_fails_the_parent() {
    let rig = build_rig(RigOptions::default()).await;
    let task = rig
        .create(single_doc_spec("doomed").with_variant_count(2))
        .await;

    assert!(rig.run_pipeline().await);

    let children = rig.children(task.id).await;
    for child in &children {
        let ext = child.external_merge_id.clone().unwrap();
        rig.merge
            .script(&ext, vec![MergeStatus::Failed("codec mismatch".into())]);
    }
    rig.poll().await;

    let done = rig.task(task.id).await;
    assert_eq!(done.status, TaskStatus::Failed);
    assert_eq!(done.error_message.as_deref(), Some("all variants failed"));
    assert!(rig
        .children(task.id)
        .await
        .iter()
        .all(|c| c.status == SubStatus::Failed));
}

#[tokio::test]
async fn crashed_worker_resumes_without_duplicate_scripts() {
    let rig = build_rig(RigOptions::default()).await;
    let task = rig
        .create(single_doc_spec("resumable").with_variant_count(2))
        .await;

    // Worker A claims and gets through stages 1-3, scripts child 1, dies
    let claimed = rig
        .store
        .claim_task("worker-a", ChronoDuration::seconds(300), rig.clock.now())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        run_material_processing(&rig.ctx, &claimed).await.unwrap(),
        StageOutcome::Advanced
    );
    let fresh = rig.task(task.id).await;
    assert_eq!(
        run_material_analysis(&rig.ctx, &fresh).await.unwrap(),
        StageOutcome::Advanced
    );
    let fresh = rig.task(task.id).await;
    assert_eq!(
        run_subtask_creation(&rig.ctx, &fresh).await.unwrap(),
        StageOutcome::Advanced
    );

    let children = rig.children(task.id).await;
    let child1 = &children[0];
    rig.store
        .apply_sub_task_update(
            child1.id,
            &SubTaskPatch::status(SubStatus::ScriptGenerating).with_progress(5),
        )
        .await
        .unwrap();
    let script = ScriptContent::from_scenes(
        child1.id,
        "default",
        vec!["Resumable".into()],
        vec![ScriptScene {
            text: "already written".into(),
            duration_s: 4.0,
            media_item_ids: vec![],
        }],
    );
    let stored = rig.store.insert_script(&script).await.unwrap();
    rig.store
        .apply_sub_task_update(
            child1.id,
            &SubTaskPatch::status(SubStatus::ScriptReady)
                .with_progress(50)
                .with_script(stored.id, json!({ "style": "default" })),
        )
        .await
        .unwrap();
    let generator_calls_before = rig.scripts.calls.load(Ordering::SeqCst);

    // Lease expires; housekeeping hands the task back
    rig.clock.advance(ChronoDuration::seconds(600));
    let stats = rig.housekeeper.check_once().await.unwrap();
    assert_eq!(stats.reclaimed, 1);

    // Worker B claims and finishes; child 1 is skipped, child 2 generated
    assert!(rig.run_pipeline().await);
    assert_eq!(
        rig.scripts.calls.load(Ordering::SeqCst) - generator_calls_before,
        1
    );

    let children = rig.children(task.id).await;
    assert!(children
        .iter()
        .all(|c| c.status == SubStatus::VideoProcessing));
    let kept = rig
        .store
        .script_for_sub_task(children[0].id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(kept.id, stored.id);

    // Drive both merges to success; the task reaches terminal
    for child in &children {
        let ext = child.external_merge_id.clone().unwrap();
        rig.merge
            .script(&ext, vec![FakeMergeService::succeeded("v.mp4", 9_000)]);
    }
    rig.poll().await;
    assert_eq!(rig.task(task.id).await.status, TaskStatus::Completed);
}

#[tokio::test]
async fn merge_timeout_fails_child_and_parent() {
    let rig = build_rig(RigOptions::default()).await;
    let task = rig.create(single_doc_spec("slow merge")).await;

    assert!(rig.run_pipeline().await);

    // Merge service keeps reporting processing
    rig.poll().await;
    assert_eq!(
        rig.children(task.id).await[0].status,
        SubStatus::VideoProcessing
    );

    rig.clock.advance(ChronoDuration::seconds(1801));
    rig.poll().await;

    let child = &rig.children(task.id).await[0];
    assert_eq!(child.status, SubStatus::Failed);
    assert_eq!(child.error_message.as_deref(), Some("merge timeout"));

    let done = rig.task(task.id).await;
    assert_eq!(done.status, TaskStatus::Failed);
    assert!(done.error_message.is_some());
}

#[tokio::test]
async fn cancel_mid_pipeline_creates_no_children() {
    let rig = build_rig(RigOptions::default()).await;
    let task = rig.create(single_doc_spec("cancelled")).await;

    // The cancel arrives while stage 2 runs; the dispatcher sees it at
    // the stage 3 boundary
    *rig.analyzer.cancel_on_call.lock().unwrap() = Some((rig.store.clone(), task.id));

    assert!(rig.run_pipeline().await);

    let done = rig.task(task.id).await;
    assert_eq!(done.status, TaskStatus::Cancelled);
    assert!(done.completed_at.is_some());
    assert!(rig.children(task.id).await.is_empty());
}

// ============================================================================
// Property checks
// ============================================================================

#[tokio::test]
async fn resubmission_with_same_key_reuses_external_job() {
    let rig = build_rig(RigOptions::default()).await;
    let task = rig.create(single_doc_spec("idempotent submit")).await;

    let claimed = rig
        .store
        .claim_task("worker-a", ChronoDuration::seconds(300), rig.clock.now())
        .await
        .unwrap()
        .unwrap();
    run_material_processing(&rig.ctx, &claimed).await.unwrap();
    run_material_analysis(&rig.ctx, &rig.task(task.id).await)
        .await
        .unwrap();
    run_subtask_creation(&rig.ctx, &rig.task(task.id).await)
        .await
        .unwrap();
    tloom_worker::stages::run_script_generation(&rig.ctx, &rig.task(task.id).await)
        .await
        .unwrap();

    // A previous worker got as far as calling the merge service, then
    // died before persisting the job ID
    let child = rig.children(task.id).await.remove(0);
    rig.store
        .apply_sub_task_update(child.id, &SubTaskPatch::status(SubStatus::VideoSubmitting))
        .await
        .unwrap();
    let lost_id = rig
        .submitter
        .submit(&json!({}), &child.id.to_string())
        .await
        .unwrap();

    // The rerun submits with the same key and adopts the original job
    run_video_submission(&rig.ctx, &rig.task(task.id).await)
        .await
        .unwrap();

    let child = rig.children(task.id).await.remove(0);
    assert_eq!(child.status, SubStatus::VideoProcessing);
    assert_eq!(child.external_merge_id.as_deref(), Some(lost_id.as_str()));
    assert_eq!(rig.submitter.created.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn fetch_stage_is_idempotent_and_tolerates_partial_failure() {
    let rig = build_rig(RigOptions {
        fetch_fail: vec!["https://x/broken.png"],
        ..Default::default()
    })
    .await;
    let spec = CreateTaskSpec::new(
        "mixed sources",
        vec!["https://x/a.md".into(), "https://x/broken.png".into()],
    );
    let task = rig.create(spec).await;

    let claimed = rig
        .store
        .claim_task("worker-a", ChronoDuration::seconds(300), rig.clock.now())
        .await
        .unwrap()
        .unwrap();

    let first = run_material_processing(&rig.ctx, &claimed).await.unwrap();
    assert_eq!(first, StageOutcome::Advanced);
    let second = run_material_processing(&rig.ctx, &rig.task(task.id).await)
        .await
        .unwrap();
    assert_eq!(second, StageOutcome::Advanced);

    let items = rig.store.media_items_for_task(task.id).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].original_url, "https://x/a.md");

    let snapshot = rig.task(task.id).await;
    assert!(snapshot
        .error_message
        .as_deref()
        .unwrap()
        .contains("broken.png"));
}

#[tokio::test]
async fn task_fails_when_no_media_is_fetchable() {
    let rig = build_rig(RigOptions {
        fetch_fail: vec!["https://x/a.md"],
        ..Default::default()
    })
    .await;
    let task = rig.create(single_doc_spec("unfetchable")).await;

    assert!(rig.run_pipeline().await);

    let done = rig.task(task.id).await;
    assert_eq!(done.status, TaskStatus::Failed);
    assert!(done.error_message.unwrap().contains("no media"));
    assert!(rig.children(task.id).await.is_empty());
}

#[tokio::test]
async fn unreachable_merge_service_fails_child_after_budget() {
    let rig = build_rig(RigOptions::default()).await;
    let task = rig.create(single_doc_spec("flaky poller")).await;

    assert!(rig.run_pipeline().await);
    let ext = rig.children(task.id).await[0]
        .external_merge_id
        .clone()
        .unwrap();

    // Every poll errors; after the failure budget the child is failed
    rig.merge.error_for(&ext, u32::MAX);
    for _ in 0..rig.config.poll_failure_limit {
        rig.poll().await;
    }

    let child = &rig.children(task.id).await[0];
    assert_eq!(child.status, SubStatus::Failed);
    assert_eq!(child.error_message.as_deref(), Some("merge unreachable"));
    assert_eq!(rig.task(task.id).await.status, TaskStatus::Failed);
}

#[tokio::test]
async fn subtitle_failure_degrades_to_completed_with_note() {
    let rig = build_rig(RigOptions {
        subtitle_fail: true,
        ..Default::default()
    })
    .await;
    let task = rig.create(single_doc_spec("degraded subtitles")).await;

    assert!(rig.run_pipeline().await);
    let ext = rig.children(task.id).await[0]
        .external_merge_id
        .clone()
        .unwrap();
    rig.merge
        .script(&ext, vec![FakeMergeService::succeeded("v1.mp4", 8_000)]);
    rig.poll().await;

    let child = &rig.children(task.id).await[0];
    assert_eq!(child.status, SubStatus::Completed);
    assert_eq!(child.progress, 100);
    assert!(child
        .error_message
        .as_deref()
        .unwrap()
        .contains("subtitle render failed"));
    assert_eq!(child.video_url.as_deref(), Some("v1.mp4"));

    assert_eq!(rig.task(task.id).await.status, TaskStatus::Completed);
}

#[tokio::test]
async fn subtitle_failure_fails_child_in_strict_mode() {
    let rig = build_rig(RigOptions {
        subtitle_fail: true,
        subtitle_mode: SubtitleFailureMode::Fail,
        ..Default::default()
    })
    .await;
    let task = rig.create(single_doc_spec("strict subtitles")).await;

    assert!(rig.run_pipeline().await);
    let ext = rig.children(task.id).await[0]
        .external_merge_id
        .clone()
        .unwrap();
    rig.merge
        .script(&ext, vec![FakeMergeService::succeeded("v1.mp4", 8_000)]);
    rig.poll().await;

    let child = &rig.children(task.id).await[0];
    assert_eq!(child.status, SubStatus::Failed);
    assert_eq!(rig.task(task.id).await.status, TaskStatus::Failed);
}

#[tokio::test]
async fn create_rejects_out_of_range_specs() {
    let rig = build_rig(RigOptions::default()).await;

    for bad in [0u32, 6] {
        let err = ops::create_task(
            &rig.store,
            &rig.config,
            &single_doc_spec("bad").with_variant_count(bad),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StoreError::InvalidSpec(_)));
    }

    let mut empty = single_doc_spec("bad");
    empty.media_urls.clear();
    let err = ops::create_task(&rig.store, &rig.config, &empty)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidSpec(_)));

    for ok in [1u32, 5] {
        assert!(ops::create_task(
            &rig.store,
            &rig.config,
            &single_doc_spec("ok").with_variant_count(ok),
        )
        .await
        .is_ok());
    }
}

#[tokio::test]
async fn orchestrator_runs_a_task_to_completion_end_to_end() {
    let rig = build_rig(RigOptions {
        poll_interval: Some(StdDuration::from_millis(50)),
        ..Default::default()
    })
    .await;
    let task = rig.create(single_doc_spec("service mode")).await;

    let orchestrator = Arc::new(Orchestrator::new(rig.ctx.clone(), 1));
    let runner = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.run().await.unwrap() })
    };

    // Wait for the dispatcher to submit the variant
    let ext = tokio::time::timeout(StdDuration::from_secs(10), async {
        loop {
            if let Some(child) = rig.children(task.id).await.first() {
                if let Some(ext) = &child.external_merge_id {
                    break ext.clone();
                }
            }
            tokio::time::sleep(StdDuration::from_millis(20)).await;
        }
    })
    .await
    .expect("variant was never submitted");

    rig.merge
        .script(&ext, vec![FakeMergeService::succeeded("v1.mp4", 5_000)]);

    // The poller completes the child and aggregates the parent
    tokio::time::timeout(StdDuration::from_secs(10), async {
        loop {
            if rig.task(task.id).await.is_terminal() {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(20)).await;
        }
    })
    .await
    .expect("task never reached a terminal state");

    orchestrator.shutdown();
    runner.await.unwrap();

    assert_eq!(rig.task(task.id).await.status, TaskStatus::Completed);
}

#[tokio::test]
async fn mocked_uploader_is_called_once_per_media_item() {
    let mut uploader = tloom_ports::MockUploader::new();
    uploader
        .expect_put()
        .times(1)
        .returning(|p: &Path| {
            let name = p.file_name().unwrap().to_string_lossy().into_owned();
            Ok(format!("https://cdn.test/{name}"))
        });

    let rig = build_rig(RigOptions {
        uploader_override: Some(Arc::new(uploader)),
        ..Default::default()
    })
    .await;
    let task = rig.create(single_doc_spec("uploaded once")).await;

    let claimed = rig
        .store
        .claim_task("worker-a", ChronoDuration::seconds(300), rig.clock.now())
        .await
        .unwrap()
        .unwrap();
    run_material_processing(&rig.ctx, &claimed).await.unwrap();
    // Second run hits the cached media item and never re-uploads
    run_material_processing(&rig.ctx, &rig.task(task.id).await)
        .await
        .unwrap();

    let items = rig.store.media_items_for_task(task.id).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].remote_url, "https://cdn.test/a.md");
}
