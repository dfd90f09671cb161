//! Failure tracking and bounded retry for chapter extraction
//!
//! One record per `"{novel}_{chapter}"`. A transient failure schedules a
//! retry after a flat delay on a background task; the task loops on the
//! failure counter instead of re-entering itself, so retry depth is bounded
//! by `max_attempts` alone. Success removes the record. Exhausted or
//! misconfigured records are listed as permanent; a later failure with a
//! valid config and attempts left makes the record retryable again.

use crate::config::RetrySettings;
use crate::extraction::{ChapterExtractor, ExtractionError, ExtractionRequest, ExtractionSummary};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Map key for one chapter of one novel
pub fn failure_key(novel_id: &str, chapter_number: u32) -> String {
    format!("{}_{}", novel_id, chapter_number)
}

/// A chapter whose extraction has failed at least once and not yet succeeded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedExtraction {
    /// Everything needed to re-run the extraction unchanged
    #[serde(flatten)]
    pub request: ExtractionRequest,
    pub retry_count: u32,
    /// Failure messages, oldest first
    pub failures: Vec<String>,
    pub last_failure: DateTime<Utc>,
    /// An automatic retry is pending
    pub retry_scheduled: bool,
    /// No further automatic retries will run
    pub permanent: bool,
}

impl FailedExtraction {
    pub fn key(&self) -> String {
        failure_key(&self.request.novel_id, self.request.chapter_number)
    }
}

/// Whether the caller should (start or keep) retrying after a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FailureDecision {
    retry: bool,
    already_scheduled: bool,
}

/// Wraps a [`ChapterExtractor`] with failure bookkeeping and automatic retry.
///
/// Cheap to clone; clones share the failure map.
#[derive(Clone)]
pub struct ExtractionRetryCoordinator {
    extractor: Arc<dyn ChapterExtractor>,
    failures: Arc<DashMap<String, FailedExtraction>>,
    settings: RetrySettings,
}

impl std::fmt::Debug for ExtractionRetryCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractionRetryCoordinator")
            .field("tracked", &self.failures.len())
            .field("settings", &self.settings)
            .finish()
    }
}

impl ExtractionRetryCoordinator {
    pub fn new(extractor: Arc<dyn ChapterExtractor>, settings: RetrySettings) -> Self {
        Self {
            extractor,
            failures: Arc::new(DashMap::new()),
            settings,
        }
    }

    /// Run an extraction, recording the failure (and scheduling a retry) if it fails
    pub async fn run(&self, request: ExtractionRequest) -> Result<ExtractionSummary, ExtractionError> {
        match self.extractor.extract(&request).await {
            Ok(summary) => {
                self.clear(&request);
                Ok(summary)
            }
            Err(e) => {
                self.record_failure(&request, &e);
                Err(e)
            }
        }
    }

    /// Record one failure for a chapter.
    ///
    /// Schedules a background retry when attempts remain, the config still
    /// validates, and no retry is already pending. Scheduling needs a Tokio
    /// runtime; outside one the record is kept without a retry.
    pub fn record_failure(&self, request: &ExtractionRequest, error: &ExtractionError) -> FailedExtraction {
        let decision = self.note_failure(request, error);
        if decision.retry && !decision.already_scheduled {
            self.schedule(failure_key(&request.novel_id, request.chapter_number));
        }
        let key = failure_key(&request.novel_id, request.chapter_number);
        let snapshot = self.failures.get(&key).map(|r| r.value().clone());
        snapshot.unwrap_or_else(|| FailedExtraction {
            request: request.clone(),
            retry_count: 1,
            failures: vec![error.to_string()],
            last_failure: Utc::now(),
            retry_scheduled: false,
            permanent: error.is_permanent(),
        })
    }

    /// All tracked failures, pending and permanent, ordered by key
    pub fn failed_extractions(&self) -> Vec<FailedExtraction> {
        let mut records: Vec<FailedExtraction> = self.failures.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| {
            a.request
                .novel_id
                .cmp(&b.request.novel_id)
                .then(a.request.chapter_number.cmp(&b.request.chapter_number))
        });
        records
    }

    /// Failures that will not be retried automatically
    pub fn permanent_failures(&self) -> Vec<FailedExtraction> {
        self.failed_extractions()
            .into_iter()
            .filter(|f| f.permanent)
            .collect()
    }

    pub fn failed_extraction(&self, novel_id: &str, chapter_number: u32) -> Option<FailedExtraction> {
        self.failures
            .get(&failure_key(novel_id, chapter_number))
            .map(|r| r.value().clone())
    }

    /// Re-run a tracked extraction immediately.
    ///
    /// Returns `None` when nothing is tracked for the chapter. A failure is
    /// recorded and reschedules only while attempts remain and the config
    /// validates.
    pub async fn retry_now(
        &self,
        novel_id: &str,
        chapter_number: u32,
    ) -> Option<Result<ExtractionSummary, ExtractionError>> {
        let request = self.failed_extraction(novel_id, chapter_number)?.request;
        info!(novel_id, chapter = chapter_number, "manual extraction retry");
        Some(self.run(request).await)
    }

    fn clear(&self, request: &ExtractionRequest) {
        let key = failure_key(&request.novel_id, request.chapter_number);
        if self.failures.remove(&key).is_some() {
            info!(
                novel_id = %request.novel_id,
                chapter = request.chapter_number,
                "extraction recovered, failure record cleared"
            );
        }
    }

    /// Update the record for a failure; the map guard never outlives this call
    fn note_failure(&self, request: &ExtractionRequest, error: &ExtractionError) -> FailureDecision {
        let key = failure_key(&request.novel_id, request.chapter_number);
        let config_valid = request.model_config.validate().is_ok();
        let now = Utc::now();

        let mut entry = self.failures.entry(key).or_insert_with(|| FailedExtraction {
            request: request.clone(),
            retry_count: 0,
            failures: Vec::new(),
            last_failure: now,
            retry_scheduled: false,
            permanent: false,
        });
        let record = entry.value_mut();
        // The latest request wins: a rewritten chapter or fixed config replaces the old one
        record.request = request.clone();
        record.retry_count += 1;
        record.failures.push(error.to_string());
        record.last_failure = now;

        let already_scheduled = record.retry_scheduled;
        let retry = !error.is_permanent() && config_valid && record.retry_count < self.settings.max_attempts;
        record.retry_scheduled = retry;
        record.permanent = !retry;

        if retry {
            warn!(
                novel_id = %request.novel_id,
                chapter = request.chapter_number,
                attempt = record.retry_count,
                error = %error,
                "extraction failed, retry pending"
            );
        } else {
            warn!(
                novel_id = %request.novel_id,
                chapter = request.chapter_number,
                attempts = record.retry_count,
                error = %error,
                "extraction failed permanently"
            );
        }
        FailureDecision { retry, already_scheduled }
    }

    fn schedule(&self, key: String) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let coordinator = self.clone();
                handle.spawn(async move { coordinator.retry_loop(key).await });
            }
            Err(_) => {
                warn!(key = %key, "no async runtime, extraction retry not scheduled");
                if let Some(mut record) = self.failures.get_mut(&key) {
                    record.retry_scheduled = false;
                }
            }
        }
    }

    /// Background retry: sleep, re-run, repeat while the counter allows
    async fn retry_loop(self, key: String) {
        loop {
            tokio::time::sleep(self.settings.delay()).await;

            let pending = self
                .failures
                .get(&key)
                .filter(|r| r.retry_scheduled && !r.permanent)
                .map(|r| r.request.clone());
            let Some(request) = pending else {
                debug!(key = %key, "retry no longer pending");
                return;
            };

            debug!(novel_id = %request.novel_id, chapter = request.chapter_number, "automatic extraction retry");
            match self.extractor.extract(&request).await {
                Ok(_) => {
                    self.clear(&request);
                    return;
                }
                Err(e) => {
                    if !self.note_failure(&request, &e).retry {
                        return;
                    }
                }
            }
        }
    }
}
