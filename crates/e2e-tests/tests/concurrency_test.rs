//! Concurrent callers: notifications arriving while a pass drains, and
//! parallel updates to one document.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::task::JoinSet;

use e2e_tests::{run_to_idle, task, CallLog, ScriptedStage, TestHarness};
use fulltext_indexer::FullTextPipeline;
use fulltext_storage::DocStateStore;
use fulltext_types::{DocUpdate, PipelineSettings, QueuedChange};

fn slow_chain(harness: &TestHarness, log: &CallLog) -> FullTextPipeline {
    harness
        .builder()
        .settings(PipelineSettings::default().with_batch_size(2).with_workers(2))
        .stage(Arc::new(
            ScriptedStage::new("a-v1", &[], log).with_delay(Duration::from_millis(100)),
        ))
        .stage(Arc::new(ScriptedStage::new("b-v1", &["a-v1"], log)))
        .build()
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_queue_while_pass_drains() {
    let harness = TestHarness::new();
    let log = CallLog::new();
    let pipeline = slow_chain(&harness, &log);

    let first: Vec<_> = (0..4).map(|i| task(&format!("t{i}"), "First wave")).collect();
    let second: Vec<_> = (4..8).map(|i| task(&format!("t{i}"), "Second wave")).collect();
    harness.submit(&pipeline, &first);
    for doc in &second {
        harness.storage.put_document(doc).unwrap();
    }

    let driver = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            let ctx = pipeline.context();
            pipeline.run_until_idle(&ctx, 50).await
        })
    };

    // Land inside the first stage's sleep, from two callers at once
    tokio::time::sleep(Duration::from_millis(30)).await;
    let mut feeders = JoinSet::new();
    for _ in 0..2 {
        let pipeline = pipeline.clone();
        let changes: Vec<_> = second
            .iter()
            .chain(first.iter())
            .map(|d| (d.id.clone(), QueuedChange::created(d.initial_state())))
            .collect();
        feeders.spawn(async move { pipeline.queue(&pipeline.context(), changes) });
    }
    while let Some(joined) = feeders.join_next().await {
        joined.unwrap();
    }

    driver.await.unwrap().unwrap();
    run_to_idle(&pipeline).await;

    assert!(log.violations().is_empty(), "violations: {:?}", log.violations());
    for doc in first.iter().chain(second.iter()) {
        assert_eq!(log.collects("a-v1", &doc.id), 1, "a-v1 runs for {}", doc.id);
        assert_eq!(log.collects("b-v1", &doc.id), 1, "b-v1 runs for {}", doc.id);
        let state = pipeline.get_state(&doc.id).unwrap().unwrap();
        assert_eq!(state.completed_stages(), vec!["a-v1", "b-v1"]);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_updates_to_one_document() {
    let harness = TestHarness::new();
    let log = CallLog::new();
    let pipeline = slow_chain(&harness, &log);
    let ctx = pipeline.context();
    assert!(pipeline
        .add(&ctx, task("t1", "Shared").initial_state())
        .await
        .unwrap());

    let mut writers = JoinSet::new();
    for i in 0..32 {
        let pipeline = pipeline.clone();
        writers.spawn(async move {
            let ctx = pipeline.context();
            let update = DocUpdate::new().set_field(format!("note.{i}"), json!(i));
            // Some writers force durability mid-stream
            pipeline.update(&ctx, "t1", false, update, i % 5 == 0).await
        });
    }
    {
        let pipeline = pipeline.clone();
        writers.spawn(async move {
            let ctx = pipeline.context();
            pipeline
                .update(&ctx, "t1", true, DocUpdate::for_stage("a-v1"), false)
                .await
        });
    }
    while let Some(joined) = writers.join_next().await {
        joined.unwrap().unwrap();
    }

    pipeline.flush().await.unwrap();
    let stored = harness.storage.get_state("t1").unwrap().unwrap();
    for i in 0..32 {
        assert_eq!(stored.fields.get(&format!("note.{i}")), Some(&json!(i)));
    }
    assert_eq!(stored.completed_stages(), vec!["a-v1"]);
}
