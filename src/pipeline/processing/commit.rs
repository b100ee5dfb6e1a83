//! Chunked commit of accepted records.
//!
//! Chunks are inserted one after another. Each insert is retried with
//! exponential backoff; a chunk that exhausts its retries is counted as failed
//! and the executor moves on. Audit entries are appended per committed chunk
//! with their own, shorter retry budget. A failed audit never rolls back the
//! insert; it is counted under [`AUDIT_FAILED_CODE`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::app::ports::{AuditEntry, ImportStore, NewShipment, StoreError};
use crate::common::constants::{
    AUDIT_FAILED_CODE, DEFAULT_AUDIT_ATTEMPTS, DEFAULT_AUDIT_DELAY_MS, DEFAULT_BACKOFF_MULTIPLIER,
    DEFAULT_COMMIT_CHUNK_SIZE, DEFAULT_INSERT_ATTEMPTS, DEFAULT_INSERT_DELAY_MS,
};
use crate::domain::{CanonicalField, CanonicalRecord, RecordMessage, RecordStatus};
use crate::observability::metrics;
use crate::pipeline::retry::{retry_with_policy, RetryPolicy};

/// Deterministic key for a record: `sha256(tracking_code|email|order_number)`, hex encoded.
pub fn idempotency_key(record: &CanonicalRecord) -> String {
    let part = |field| record.get(field).map(str::trim).unwrap_or("");
    let material = format!(
        "{}|{}|{}",
        part(CanonicalField::TrackingCode).to_uppercase(),
        part(CanonicalField::CustomerEmail).to_lowercase(),
        part(CanonicalField::OrderNumber)
    );
    hex::encode(Sha256::digest(material.as_bytes()))
}

impl From<&CanonicalRecord> for NewShipment {
    fn from(record: &CanonicalRecord) -> Self {
        Self {
            idempotency_key: idempotency_key(record),
            source_row: record.row,
            fields: record.values.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommitConfig {
    pub chunk_size: usize,
    pub insert_retry: RetryPolicy,
    pub audit_retry: RetryPolicy,
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_COMMIT_CHUNK_SIZE,
            insert_retry: RetryPolicy::new(DEFAULT_INSERT_ATTEMPTS, DEFAULT_INSERT_DELAY_MS, DEFAULT_BACKOFF_MULTIPLIER),
            audit_retry: RetryPolicy::new(DEFAULT_AUDIT_ATTEMPTS, DEFAULT_AUDIT_DELAY_MS, DEFAULT_BACKOFF_MULTIPLIER),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CommitMetrics {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub chunks_succeeded: usize,
    pub chunks_failed: usize,
    /// Running average over all chunks, in milliseconds.
    pub average_chunk_ms: f64,
    pub audit_failures: usize,
    pub error_codes: BTreeMap<String, usize>,
}

impl CommitMetrics {
    fn record_chunk_time(&mut self, elapsed_ms: f64) {
        let chunks = (self.chunks_succeeded + self.chunks_failed) as f64;
        self.average_chunk_ms += (elapsed_ms - self.average_chunk_ms) / chunks.max(1.0);
    }

    fn count_error(&mut self, code: &str) {
        *self.error_codes.entry(code.to_string()).or_default() += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommitOutcome {
    Committed { shipment_id: String },
    CommittedWithWarnings { shipment_id: String },
    Failed { error_code: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordDetail {
    pub row: usize,
    pub tracking_code: Option<String>,
    #[serde(flatten)]
    pub outcome: CommitOutcome,
    pub messages: Vec<RecordMessage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportResult {
    pub import_id: Uuid,
    pub submitted: usize,
    pub succeeded: usize,
    /// Committed records that carried warnings; included in `succeeded`.
    pub warnings: usize,
    pub failed: usize,
    pub details: Vec<RecordDetail>,
    pub metrics: CommitMetrics,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ImportResult {
    /// One line used for completion notifications.
    pub fn summary_line(&self) -> String {
        let mut line = format!(
            "Import {}: {} of {} shipments imported ({} with warnings), {} failed",
            self.import_id, self.succeeded, self.submitted, self.warnings, self.failed
        );
        if self.metrics.audit_failures > 0 {
            line.push_str(&format!(", {} audit entries missing", self.metrics.audit_failures));
        }
        line
    }
}

pub struct CommitExecutor {
    store: Arc<dyn ImportStore>,
    config: CommitConfig,
}

impl CommitExecutor {
    pub fn new(store: Arc<dyn ImportStore>, config: CommitConfig) -> Self {
        Self { store, config }
    }

    /// Commit `records` in chunks. Never fails as a whole: every record ends
    /// up counted as succeeded or failed.
    pub async fn execute(&self, records: &[CanonicalRecord]) -> ImportResult {
        let import_id = Uuid::new_v4();
        let started_at = Utc::now();
        let chunk_size = self.config.chunk_size.max(1);
        let chunk_count = records.len().div_ceil(chunk_size);
        let mut metrics = CommitMetrics::default();
        let mut details = Vec::with_capacity(records.len());

        info!(%import_id, records = records.len(), chunks = chunk_count, "Starting commit");

        for (index, chunk) in records.chunks(chunk_size).enumerate() {
            let chunk_started = Instant::now();
            let shipments: Vec<NewShipment> = chunk.iter().map(NewShipment::from).collect();

            let inserted = retry_with_policy(&self.config.insert_retry, |attempt| {
                if attempt > 1 {
                    warn!(chunk = index, attempt, "Retrying chunk insert");
                }
                self.store.insert_batch(&shipments)
            })
            .await;

            metrics.processed += chunk.len();
            match inserted {
                Ok(ids) => {
                    let audit_ok = self.append_audit(import_id, chunk, &ids, index).await;
                    if !audit_ok {
                        metrics.audit_failures += 1;
                        metrics.count_error(AUDIT_FAILED_CODE);
                        metrics::commit::audit_failed();
                    }

                    metrics.succeeded += chunk.len();
                    metrics.chunks_succeeded += 1;
                    for (offset, record) in chunk.iter().enumerate() {
                        let shipment_id = ids.get(offset).cloned().unwrap_or_default();
                        let outcome = if record.status == RecordStatus::Warning {
                            CommitOutcome::CommittedWithWarnings { shipment_id }
                        } else {
                            CommitOutcome::Committed { shipment_id }
                        };
                        details.push(detail(record, outcome));
                    }
                    let elapsed = chunk_started.elapsed();
                    metrics.record_chunk_time(elapsed.as_secs_f64() * 1000.0);
                    metrics::commit::chunk_succeeded(chunk.len(), elapsed.as_secs_f64());
                    info!(chunk = index, of = chunk_count, records = chunk.len(), "Chunk committed");
                }
                Err(StoreError { code, message }) => {
                    metrics.failed += chunk.len();
                    metrics.chunks_failed += 1;
                    metrics.count_error(&code);
                    for record in chunk {
                        details.push(detail(
                            record,
                            CommitOutcome::Failed {
                                error_code: code.clone(),
                            },
                        ));
                    }
                    let elapsed = chunk_started.elapsed();
                    metrics.record_chunk_time(elapsed.as_secs_f64() * 1000.0);
                    metrics::commit::chunk_failed(chunk.len(), &code, elapsed.as_secs_f64());
                    error!(
                        chunk = index,
                        of = chunk_count,
                        records = chunk.len(),
                        error_code = %code,
                        error = %message,
                        "Chunk failed after retries"
                    );
                }
            }
        }

        let warnings = details
            .iter()
            .filter(|d| matches!(d.outcome, CommitOutcome::CommittedWithWarnings { .. }))
            .count();
        let result = ImportResult {
            import_id,
            submitted: records.len(),
            succeeded: metrics.succeeded,
            warnings,
            failed: metrics.failed,
            details,
            metrics,
            started_at,
            finished_at: Utc::now(),
        };
        info!(%import_id, "{}", result.summary_line());
        result
    }

    /// Returns false when the audit append exhausted its retries.
    async fn append_audit(&self, import_id: Uuid, chunk: &[CanonicalRecord], ids: &[String], index: usize) -> bool {
        let recorded_at = Utc::now();
        let entries: Vec<AuditEntry> = chunk
            .iter()
            .zip(ids)
            .map(|(record, id)| AuditEntry {
                id: Uuid::new_v4(),
                import_id,
                shipment_id: id.clone(),
                source_row: record.row,
                action: "shipment_imported".to_string(),
                recorded_at,
            })
            .collect();

        match retry_with_policy(&self.config.audit_retry, |_| self.store.append_audit(&entries)).await {
            Ok(()) => true,
            Err(e) => {
                warn!(chunk = index, error = %e, "Audit append failed after retries");
                false
            }
        }
    }
}

fn detail(record: &CanonicalRecord, outcome: CommitOutcome) -> RecordDetail {
    RecordDetail {
        row: record.row,
        tracking_code: record.tracking_code().map(str::to_string),
        outcome,
        messages: record.messages.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Dataset, FieldMapping, MessageSeverity};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    use crate::app::ports::StoredShipment;

    #[derive(Default)]
    struct FlakyStore {
        insert_calls: AtomicUsize,
        /// Insert calls (1-based) that fail
        failing_calls: Vec<usize>,
        fail_audit: bool,
        inserted: Mutex<Vec<NewShipment>>,
    }

    #[async_trait]
    impl ImportStore for FlakyStore {
        async fn find_by_tracking_codes(&self, _codes: &[String]) -> Result<Vec<StoredShipment>, StoreError> {
            Ok(Vec::new())
        }

        async fn insert_batch(&self, shipments: &[NewShipment]) -> Result<Vec<String>, StoreError> {
            let call = self.insert_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.failing_calls.contains(&call) {
                return Err(StoreError::new("timeout", "backend timed out"));
            }
            let mut inserted = self.inserted.lock().await;
            inserted.extend_from_slice(shipments);
            Ok(shipments.iter().map(|s| format!("shp-{}", s.source_row)).collect())
        }

        async fn append_audit(&self, _entries: &[AuditEntry]) -> Result<(), StoreError> {
            if self.fail_audit {
                Err(StoreError::new("audit_down", "audit log unavailable"))
            } else {
                Ok(())
            }
        }
    }

    fn fast_config(chunk_size: usize) -> CommitConfig {
        CommitConfig {
            chunk_size,
            insert_retry: RetryPolicy::new(4, 1, 2.0),
            audit_retry: RetryPolicy::new(3, 1, 2.0),
        }
    }

    fn records(n: usize) -> Vec<CanonicalRecord> {
        let headers = vec!["tracking_code".to_string(), "customer_email".to_string()];
        let rows = (0..n)
            .map(|i| vec![format!("SM{:010}BR", i), format!("c{}@example.com", i)])
            .collect();
        let data = Dataset::new(headers.clone(), rows);
        data.to_records(&FieldMapping::exact_from_headers(&headers))
    }

    #[test]
    fn test_idempotency_key_is_stable_and_normalized() {
        let mut a = records(1).remove(0);
        let key = idempotency_key(&a);
        assert_eq!(key.len(), 64);

        a.values
            .insert(CanonicalField::CustomerEmail, "C0@EXAMPLE.COM".to_string());
        assert_eq!(idempotency_key(&a), key);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let store = Arc::new(FlakyStore {
            failing_calls: vec![1, 2],
            ..Default::default()
        });
        let executor = CommitExecutor::new(store.clone(), fast_config(10));

        let result = executor.execute(&records(5)).await;
        assert_eq!(result.succeeded, 5);
        assert_eq!(result.failed, 0);
        assert_eq!(store.insert_calls.load(Ordering::SeqCst), 3);
        assert!(result.metrics.error_codes.is_empty());
    }

    #[tokio::test]
    async fn test_failed_chunk_does_not_abort_import() {
        // Chunk 2 uses insert calls 2..=5 and fails every attempt
        let store = Arc::new(FlakyStore {
            failing_calls: vec![2, 3, 4, 5],
            ..Default::default()
        });
        let executor = CommitExecutor::new(store.clone(), fast_config(2));

        let result = executor.execute(&records(6)).await;
        assert_eq!(result.submitted, 6);
        assert_eq!(result.succeeded, 4);
        assert_eq!(result.failed, 2);
        assert_eq!(result.succeeded + result.failed, result.submitted);
        assert_eq!(result.metrics.chunks_failed, 1);
        assert_eq!(result.metrics.error_codes.get("timeout"), Some(&1));
        assert!(matches!(
            result.details[2].outcome,
            CommitOutcome::Failed { ref error_code } if error_code == "timeout"
        ));
        assert_eq!(store.inserted.lock().await.len(), 4);
    }

    #[tokio::test]
    async fn test_audit_failure_keeps_records_committed() {
        let store = Arc::new(FlakyStore {
            fail_audit: true,
            ..Default::default()
        });
        let executor = CommitExecutor::new(store, fast_config(10));

        let result = executor.execute(&records(3)).await;
        assert_eq!(result.succeeded, 3);
        assert_eq!(result.metrics.audit_failures, 1);
        assert_eq!(result.metrics.error_codes.get(AUDIT_FAILED_CODE), Some(&1));
        assert!(result.summary_line().contains("audit entries missing"));
    }

    #[tokio::test]
    async fn test_warning_records_reported_separately() {
        let mut recs = records(2);
        recs[1].push_message(MessageSeverity::Warning, "format", "odd phone");
        let executor = CommitExecutor::new(Arc::new(FlakyStore::default()), fast_config(10));

        let result = executor.execute(&recs).await;
        assert_eq!(result.warnings, 1);
        assert!(matches!(result.details[1].outcome, CommitOutcome::CommittedWithWarnings { .. }));
        assert_eq!(result.details[1].messages.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let executor = CommitExecutor::new(Arc::new(FlakyStore::default()), fast_config(10));
        let result = executor.execute(&[]).await;
        assert_eq!(result.submitted, 0);
        assert_eq!(result.metrics.chunks_succeeded, 0);
    }
}
