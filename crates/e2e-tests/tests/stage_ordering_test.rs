//! Stage ordering and queue idempotence.

use std::sync::Arc;

use pretty_assertions::assert_eq;

use e2e_tests::{run_to_idle, task, CallLog, ScriptedStage, TestHarness};
use fulltext_indexer::{FullTextPipeline, PipelineEvent};
use fulltext_types::{PipelineSettings, QueuedChange};

fn chain(harness: &TestHarness, log: &CallLog, a: ScriptedStage) -> FullTextPipeline {
    harness
        .builder()
        .settings(PipelineSettings::default().with_batch_size(3))
        .stage(Arc::new(a))
        .stage(Arc::new(ScriptedStage::new("b-v1", &["a-v1"], log)))
        .stage(Arc::new(ScriptedStage::new("c-v1", &["a-v1", "b-v1"], log)))
        .build()
        .unwrap()
}

/// A stage is only ever invoked once its prerequisites are complete, even
/// while an earlier stage keeps failing for some documents.
#[tokio::test]
async fn test_collect_never_runs_before_requirements() {
    let harness = TestHarness::new();
    let log = CallLog::new();
    let a = ScriptedStage::new("a-v1", &[], &log);
    let failures = a.failures();
    failures.lock().unwrap().insert("t3".to_string());

    let pipeline = chain(&harness, &log, a);
    let mut events = pipeline.subscribe();

    let docs: Vec<_> = (1..=8)
        .map(|i| task(&format!("t{i}"), &format!("Task {i}")))
        .collect();
    harness.submit(&pipeline, &docs);

    // t3 keeps failing, so bound the passes
    let reports = pipeline.run_until_idle(&pipeline.context(), 8).await.unwrap();
    assert!(reports.iter().any(|r| r.failed_total() > 0));
    assert!(log.violations().is_empty(), "violations: {:?}", log.violations());

    // t3 never got past the first stage
    assert_eq!(log.collects("b-v1", "t3"), 0);
    let t3 = pipeline.get_state("t3").unwrap().unwrap();
    assert!(t3.completed_stages().is_empty());

    // Recover and finish
    failures.lock().unwrap().clear();
    pipeline.queue(&pipeline.context(), [("t3".to_string(), QueuedChange::updated())]);
    run_to_idle(&pipeline).await;
    assert!(log.violations().is_empty());

    let t3 = pipeline.get_state("t3").unwrap().unwrap();
    assert_eq!(t3.completed_stages(), vec!["a-v1", "b-v1", "c-v1"]);

    // Completion events per document follow chain order
    let mut order: Vec<String> = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let PipelineEvent::StageCompleted { doc_id, stage } = event {
            if doc_id == "t5" {
                order.push(stage);
            }
        }
    }
    assert_eq!(order, vec!["a-v1", "b-v1", "c-v1"]);
}

/// One stage per document per pass.
#[tokio::test]
async fn test_document_advances_one_stage_per_pass() {
    let harness = TestHarness::new();
    let log = CallLog::new();
    let pipeline = chain(&harness, &log, ScriptedStage::new("a-v1", &[], &log));
    harness.submit(&pipeline, &[task("t1", "One")]);

    let ctx = pipeline.context();
    let first = pipeline.run_pass(&ctx).await.unwrap();
    assert_eq!(first.processed.get("a-v1"), Some(&1));
    assert_eq!(first.processed.get("b-v1"), None);

    let second = pipeline.run_pass(&ctx).await.unwrap();
    assert_eq!(second.processed.get("b-v1"), Some(&1));

    let third = pipeline.run_pass(&ctx).await.unwrap();
    assert_eq!(third.processed.get("c-v1"), Some(&1));

    assert!(pipeline.run_pass(&ctx).await.unwrap().is_idle());
}

/// Queueing the same change twice before a pass equals queueing it once.
#[tokio::test]
async fn test_duplicate_queue_is_idempotent() {
    let once = TestHarness::new();
    let once_log = CallLog::new();
    let once_pipeline = chain(&once, &once_log, ScriptedStage::new("a-v1", &[], &once_log));
    once.submit(&once_pipeline, &[task("t1", "Same")]);
    run_to_idle(&once_pipeline).await;

    let twice = TestHarness::new();
    let twice_log = CallLog::new();
    let twice_pipeline = chain(&twice, &twice_log, ScriptedStage::new("a-v1", &[], &twice_log));
    let doc = task("t1", "Same");
    twice.submit(&twice_pipeline, &[doc.clone()]);
    twice_pipeline.queue(
        &twice_pipeline.context(),
        [("t1".to_string(), QueuedChange::created(doc.initial_state()))],
    );
    run_to_idle(&twice_pipeline).await;

    let a = once_pipeline.get_state("t1").unwrap().unwrap();
    let b = twice_pipeline.get_state("t1").unwrap().unwrap();
    assert_eq!(a.completed_stages(), b.completed_stages());
    assert_eq!(a.fields, b.fields);
    assert_eq!(a.removed, b.removed);

    for stage in ["a-v1", "b-v1", "c-v1"] {
        assert_eq!(once_log.collects(stage, "t1"), 1);
        assert_eq!(twice_log.collects(stage, "t1"), 1);
    }
}

/// Re-queueing a fully processed document with no change in stage
/// versions re-runs nothing once it completed.
#[tokio::test]
async fn test_completed_stages_not_rerun_on_restart() {
    let harness = TestHarness::new();
    let log = CallLog::new();
    {
        let pipeline = chain(&harness, &log, ScriptedStage::new("a-v1", &[], &log));
        harness.submit(&pipeline, &[task("t1", "One")]);
        run_to_idle(&pipeline).await;
    }

    // Same chain over the same store
    let pipeline = chain(&harness, &log, ScriptedStage::new("a-v1", &[], &log));
    let report = run_to_idle(&pipeline).await;
    assert_eq!(report.processed_total(), 0);
    assert_eq!(log.collects("a-v1", "t1"), 1);
}
