//! Search completeness flag and backend failure behaviour, over the default
//! stage chain and a real Tantivy index.

use std::sync::Arc;

use pretty_assertions::assert_eq;

use e2e_tests::{comment, run_to_idle, task, CallLog, ScriptedStage, TestHarness, UnavailableBackend};
use fulltext_indexer::{default_stages, FullTextPipeline, IndexingError};
use fulltext_types::{
    PipelineSettings, SearchQuery, StageSettings, CONTENT_STAGE_ID, FIELD_STAGE_ID,
    FULL_TEXT_PUSH_STAGE_ID,
};

fn default_pipeline(harness: &TestHarness) -> FullTextPipeline {
    let settings = PipelineSettings::default();
    harness
        .builder()
        .settings(settings.clone())
        .stages(default_stages(&StageSettings::default(), &settings).unwrap())
        .build()
        .unwrap()
}

fn ids(hits: &fulltext_types::SearchHits) -> Vec<String> {
    let mut ids: Vec<String> = hits.docs.iter().map(|d| d.id.clone()).collect();
    ids.sort();
    ids
}

#[tokio::test]
async fn test_pass_flag_tracks_incomplete_documents() {
    let harness = TestHarness::new();
    let pipeline = default_pipeline(&harness);
    let ctx = pipeline.context();

    let docs: Vec<_> = (0..10)
        .map(|i| task(&format!("t{i}"), &format!("Alpha task {i}")))
        .collect();

    // Seven fully indexed
    harness.submit(&pipeline, &docs[..7]);
    run_to_idle(&pipeline).await;

    // Three known but not yet pushed
    for doc in &docs[7..] {
        harness.storage.put_document(doc).unwrap();
        assert!(pipeline.add(&ctx, doc.initial_state()).await.unwrap());
    }

    let query = SearchQuery::text("alpha");
    let hits = pipeline
        .search(&["task".to_string()], &query, 20, 0)
        .await
        .unwrap();
    assert!(hits.pass);
    assert_eq!(hits.docs.len(), 7);

    // An unscoped search covers every class, so it sees the same gap
    let unscoped = pipeline.search(&[], &query, 20, 0).await.unwrap();
    assert!(unscoped.pass);
    assert_eq!(unscoped.docs.len(), 7);

    run_to_idle(&pipeline).await;

    let unscoped = pipeline.search(&[], &query, 20, 0).await.unwrap();
    assert!(!unscoped.pass);
    assert_eq!(unscoped.docs.len(), 10);

    let hits = pipeline
        .search(&["task".to_string()], &query, 20, 0)
        .await
        .unwrap();
    assert!(!hits.pass);
    let expected: Vec<String> = {
        let mut v: Vec<String> = docs.iter().map(|d| d.id.clone()).collect();
        v.sort();
        v
    };
    assert_eq!(ids(&hits), expected);
}

#[tokio::test]
async fn test_search_scope_and_summary() {
    let harness = TestHarness::new();
    let pipeline = default_pipeline(&harness);

    harness.submit(
        &pipeline,
        &[
            task("t1", "Login page fails"),
            comment("c1", "t1", "Seen on staging too"),
            task("t2", "Dark mode"),
        ],
    );
    run_to_idle(&pipeline).await;

    // Comment text reaches the task through its summary
    let hits = pipeline
        .search(&["task".to_string()], &SearchQuery::text("staging"), 10, 0)
        .await
        .unwrap();
    assert!(!hits.pass);
    assert_eq!(ids(&hits), vec!["t1".to_string()]);

    // Subclasses are in scope of their ancestor
    let hits = pipeline
        .search(&["doc".to_string()], &SearchQuery::text("staging"), 10, 0)
        .await
        .unwrap();
    assert_eq!(ids(&hits), vec!["c1".to_string(), "t1".to_string()]);

    // Space filter
    let hits = pipeline
        .search(
            &["task".to_string()],
            &SearchQuery::text("login").in_space("elsewhere"),
            10,
            0,
        )
        .await
        .unwrap();
    assert!(hits.docs.is_empty());
}

#[tokio::test]
async fn test_removed_documents_leave_results() {
    let harness = TestHarness::new();
    let pipeline = default_pipeline(&harness);
    harness.submit(&pipeline, &[task("t1", "Alpha one"), task("t2", "Alpha two")]);
    run_to_idle(&pipeline).await;

    let ctx = pipeline.context();
    assert!(pipeline.mark_remove(&ctx, "t1").await.unwrap());

    // Before the pass reaches the backend, the tombstone still filters it
    let hits = pipeline
        .search(&["task".to_string()], &SearchQuery::text("alpha"), 10, 0)
        .await
        .unwrap();
    assert_eq!(ids(&hits), vec!["t2".to_string()]);

    run_to_idle(&pipeline).await;
    let hits = pipeline
        .search(&["task".to_string()], &SearchQuery::text("alpha"), 10, 0)
        .await
        .unwrap();
    assert_eq!(ids(&hits), vec!["t2".to_string()]);
    assert!(!hits.pass);
}

#[tokio::test]
async fn test_tombstones_do_not_shorten_a_page() {
    let harness = TestHarness::new();
    let pipeline = default_pipeline(&harness);
    harness.submit(
        &pipeline,
        &[
            task("t1", "Alpha one"),
            task("t2", "Alpha two"),
            task("t3", "Alpha three"),
        ],
    );
    run_to_idle(&pipeline).await;

    // Both stay in the backend until the next pass routes their removal
    let ctx = pipeline.context();
    assert!(pipeline.mark_remove(&ctx, "t1").await.unwrap());
    assert!(pipeline.mark_remove(&ctx, "t2").await.unwrap());

    let scope = ["task".to_string()];
    let query = SearchQuery::text("alpha");
    let hits = pipeline.search(&scope, &query, 2, 0).await.unwrap();
    assert_eq!(ids(&hits), vec!["t3".to_string()]);
    assert!(!hits.pass);

    let hits = pipeline.search(&scope, &query, 1, 0).await.unwrap();
    assert_eq!(ids(&hits), vec!["t3".to_string()]);

    let hits = pipeline.search(&scope, &query, 10, 1).await.unwrap();
    assert!(hits.docs.is_empty());

    let hits = pipeline.search(&scope, &query, usize::MAX, 0).await.unwrap();
    assert_eq!(ids(&hits), vec!["t3".to_string()]);
}

#[tokio::test]
async fn test_backend_outage_fails_search_and_retries_push() {
    let harness = TestHarness::new();
    let settings = PipelineSettings::default();
    let pipeline = harness
        .builder_with_backend(Arc::new(UnavailableBackend))
        .settings(settings.clone())
        .stages(default_stages(&StageSettings::default(), &settings).unwrap())
        .build()
        .unwrap();

    harness.submit(&pipeline, &[task("t1", "Alpha")]);
    let reports = pipeline
        .run_until_idle(&pipeline.context(), 5)
        .await
        .unwrap();

    let push_failures: usize = reports
        .iter()
        .filter_map(|r| r.failed.get(FULL_TEXT_PUSH_STAGE_ID))
        .map(Vec::len)
        .sum();
    assert!(push_failures >= 2, "push should be retried every pass");

    let state = pipeline.get_state("t1").unwrap().unwrap();
    assert!(state.is_stage_complete(CONTENT_STAGE_ID));
    assert!(state.is_stage_complete(FIELD_STAGE_ID));
    assert!(!state.is_stage_complete(FULL_TEXT_PUSH_STAGE_ID));

    let err = pipeline
        .search(&["task".to_string()], &SearchQuery::text("alpha"), 10, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, IndexingError::Search(_)));
}

#[tokio::test]
async fn test_no_push_stage_passes_through() {
    let harness = TestHarness::new();
    let log = CallLog::new();
    let pipeline = harness
        .builder()
        .stage(Arc::new(ScriptedStage::new("a-v1", &[], &log)))
        .build()
        .unwrap();

    let hits = pipeline
        .search(&["task".to_string()], &SearchQuery::text("anything"), 10, 0)
        .await
        .unwrap();
    assert!(hits.pass);
    assert!(hits.docs.is_empty());
}
