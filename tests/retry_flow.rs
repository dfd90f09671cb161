//! Automatic and manual extraction retries against a scripted model

mod common;

use common::{memory_store, movement_response, request, NOVEL};
use novelgraph::llm::task_tag;
use novelgraph::{
    EntityExtractor, ExtractionError, ExtractionRetryCoordinator, MockModelClient, ModelConfig,
    ModelError, RetrySettings,
};
use std::sync::Arc;
use std::time::Duration;

fn fast_retries() -> RetrySettings {
    RetrySettings {
        max_attempts: 3,
        delay_ms: 5,
    }
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    for _ in 0..400 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn transient_failures_retry_then_recover_manually() {
    let store = memory_store();
    let timeout = || ModelError::Request("gateway timeout".to_string());
    let client = Arc::new(
        MockModelClient::new()
            .with_failure(task_tag::ENTITY_EXTRACTION, timeout())
            .with_failure(task_tag::ENTITY_EXTRACTION, timeout())
            .with_failure(task_tag::ENTITY_EXTRACTION, timeout())
            .with_response(
                task_tag::ENTITY_EXTRACTION,
                movement_response("Sect Gate", "Lin Chen arrives at the sect gate"),
            ),
    );
    let extractor = Arc::new(EntityExtractor::new(store.clone(), client.clone()));
    let coordinator = ExtractionRetryCoordinator::new(extractor, fast_retries());

    let first = coordinator
        .run(request(5, "Lin Chen climbed the stone steps."))
        .await;
    assert!(matches!(first, Err(ExtractionError::Model(_))));
    let pending = coordinator.failed_extraction(NOVEL, 5).unwrap();
    assert!(pending.retry_scheduled);
    assert!(!pending.permanent);

    // Two automatic retries, then the record gives up
    wait_until(|| coordinator.permanent_failures().len() == 1).await;
    let failed = coordinator.failed_extraction(NOVEL, 5).unwrap();
    assert_eq!(failed.retry_count, 3);
    assert_eq!(failed.failures.len(), 3);
    assert!(!failed.retry_scheduled);
    assert_eq!(client.calls_for(task_tag::ENTITY_EXTRACTION), 3);
    assert!(store.character_state(NOVEL, "Lin Chen").is_none());

    // A manual retry still works on a permanent record
    let summary = coordinator.retry_now(NOVEL, 5).await.unwrap().unwrap();
    assert_eq!(summary.state_updates, 1);
    assert!(coordinator.failed_extraction(NOVEL, 5).is_none());
    assert!(coordinator.failed_extractions().is_empty());
    assert_eq!(
        store.character_state(NOVEL, "Lin Chen").unwrap().location.as_deref(),
        Some("Sect Gate")
    );
}

#[tokio::test]
async fn missing_credentials_fail_permanently_without_a_model_call() {
    let client = Arc::new(MockModelClient::new().with_default_response("{}"));
    let extractor = Arc::new(EntityExtractor::new(memory_store(), client.clone()));
    let coordinator = ExtractionRetryCoordinator::new(extractor, fast_retries());

    let mut unkeyed = request(2, "Lin Chen met the elder.");
    unkeyed.model_config = ModelConfig::new("openai", "gpt-test");
    let err = coordinator.run(unkeyed).await.unwrap_err();
    assert!(err.is_permanent());

    let record = coordinator.failed_extraction(NOVEL, 2).unwrap();
    assert!(record.permanent);
    assert!(!record.retry_scheduled);
    assert_eq!(record.retry_count, 1);
    assert_eq!(client.calls_for(task_tag::ENTITY_EXTRACTION), 0);
}

#[tokio::test]
async fn unparseable_response_is_not_a_failure() {
    let client = Arc::new(
        MockModelClient::new().with_response(task_tag::ENTITY_EXTRACTION, "I could not find anything."),
    );
    let extractor = Arc::new(EntityExtractor::new(memory_store(), client));
    let coordinator = ExtractionRetryCoordinator::new(extractor, fast_retries());

    let summary = coordinator
        .run(request(3, "Lin Chen sat in silence."))
        .await
        .unwrap();
    assert!(summary.parse_failed);
    assert_eq!(summary.entities_written, 0);
    assert!(coordinator.failed_extractions().is_empty());
    assert!(coordinator.retry_now(NOVEL, 3).await.is_none());
}

#[tokio::test]
async fn failures_are_tracked_per_chapter() {
    let client = Arc::new(MockModelClient::new());
    let extractor = Arc::new(EntityExtractor::new(memory_store(), client));
    let settings = RetrySettings {
        max_attempts: 1,
        delay_ms: 5,
    };
    let coordinator = ExtractionRetryCoordinator::new(extractor, settings);

    for chapter in [7, 4] {
        assert!(coordinator
            .run(request(chapter, "Lin Chen waited by the river."))
            .await
            .is_err());
    }

    let chapters: Vec<u32> = coordinator
        .failed_extractions()
        .iter()
        .map(|f| f.request.chapter_number)
        .collect();
    assert_eq!(chapters, vec![4, 7]);
    assert_eq!(coordinator.permanent_failures().len(), 2);
    assert_eq!(coordinator.failed_extraction(NOVEL, 4).unwrap().key(), "azure-sect_4");
}
