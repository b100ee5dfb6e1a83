//! Metrics for the import pipeline
//!
//! Thin wrappers over the `metrics` facade using Prometheus naming
//! conventions. Without an installed recorder every call is a no-op, so
//! library users and tests pay nothing unless they call [`init`].

use std::fmt;
use std::sync::OnceLock;
use tracing::info;

/// Enum representing all metric names used in the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Validation metrics
    ValidationRunsStarted,
    ValidationRunsCompleted,
    ValidationRunsCancelled,
    ValidationRunDuration,
    ValidationChunksProcessed,
    ValidationRecordsProcessed,
    ValidationValidatorUnavailable,

    // Duplicate metrics
    DuplicateGroupsFound,
    DuplicateStoreMatches,

    // Quality metrics
    QualityScore,
    QualityAlertsRaised,

    // Commit metrics
    CommitChunksSucceeded,
    CommitChunksFailed,
    CommitRecordsCommitted,
    CommitRecordsFailed,
    CommitChunkDuration,
    CommitAuditFailures,
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::ValidationRunsStarted => "import_validation_runs_started_total",
            MetricName::ValidationRunsCompleted => "import_validation_runs_completed_total",
            MetricName::ValidationRunsCancelled => "import_validation_runs_cancelled_total",
            MetricName::ValidationRunDuration => "import_validation_run_duration_seconds",
            MetricName::ValidationChunksProcessed => "import_validation_chunks_processed_total",
            MetricName::ValidationRecordsProcessed => "import_validation_records_processed_total",
            MetricName::ValidationValidatorUnavailable => "import_validation_validator_unavailable_total",

            MetricName::DuplicateGroupsFound => "import_duplicate_groups_found_total",
            MetricName::DuplicateStoreMatches => "import_duplicate_store_matches_total",

            MetricName::QualityScore => "import_quality_score",
            MetricName::QualityAlertsRaised => "import_quality_alerts_raised_total",

            MetricName::CommitChunksSucceeded => "import_commit_chunks_succeeded_total",
            MetricName::CommitChunksFailed => "import_commit_chunks_failed_total",
            MetricName::CommitRecordsCommitted => "import_commit_records_committed_total",
            MetricName::CommitRecordsFailed => "import_commit_records_failed_total",
            MetricName::CommitChunkDuration => "import_commit_chunk_duration_seconds",
            MetricName::CommitAuditFailures => "import_commit_audit_failures_total",
        }
    }

    /// Get all metric names as an iterator
    pub fn all_metrics() -> impl Iterator<Item = MetricName> {
        use MetricName::*;
        [
            ValidationRunsStarted,
            ValidationRunsCompleted,
            ValidationRunsCancelled,
            ValidationRunDuration,
            ValidationChunksProcessed,
            ValidationRecordsProcessed,
            ValidationValidatorUnavailable,
            DuplicateGroupsFound,
            DuplicateStoreMatches,
            QualityScore,
            QualityAlertsRaised,
            CommitChunksSucceeded,
            CommitChunksFailed,
            CommitRecordsCommitted,
            CommitRecordsFailed,
            CommitChunkDuration,
            CommitAuditFailures,
        ]
        .into_iter()
    }

    /// Returns (phase, description, unit)
    pub fn metadata(&self) -> (&'static str, &'static str, Option<&'static str>) {
        match self {
            MetricName::ValidationRunsStarted => ("validation", "Validation runs started", None),
            MetricName::ValidationRunsCompleted => ("validation", "Validation runs that published a report", None),
            MetricName::ValidationRunsCancelled => ("validation", "Validation runs cancelled or superseded", None),
            MetricName::ValidationRunDuration => ("validation", "Wall-clock time of a validation run", Some("s")),
            MetricName::ValidationChunksProcessed => ("validation", "Chunks processed per validator", None),
            MetricName::ValidationRecordsProcessed => ("validation", "Records processed per validator", None),
            MetricName::ValidationValidatorUnavailable => ("validation", "Validators that reported unavailable", None),

            MetricName::DuplicateGroupsFound => ("duplicates", "Intra-batch duplicate groups by key", None),
            MetricName::DuplicateStoreMatches => ("duplicates", "Records matching stored shipments", None),

            MetricName::QualityScore => ("quality", "Composite quality score of published reports", None),
            MetricName::QualityAlertsRaised => ("quality", "Report alerts by severity", None),

            MetricName::CommitChunksSucceeded => ("commit", "Commit chunks inserted", None),
            MetricName::CommitChunksFailed => ("commit", "Commit chunks that exhausted retries", None),
            MetricName::CommitRecordsCommitted => ("commit", "Records inserted", None),
            MetricName::CommitRecordsFailed => ("commit", "Records in failed chunks", None),
            MetricName::CommitChunkDuration => ("commit", "Time to insert and audit one chunk", Some("s")),
            MetricName::CommitAuditFailures => ("commit", "Audit appends that exhausted retries", None),
        }
    }
}

static METRICS_HANDLE: OnceLock<metrics_exporter_prometheus::PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Safe to call once per process.
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {}", e))?;
    METRICS_HANDLE.set(handle).ok();
    info!("Metrics system initialized");
    Ok(())
}

/// Render the current metrics in Prometheus text format.
pub fn get_metrics_handle() -> Option<String> {
    METRICS_HANDLE.get().map(|handle| handle.render())
}

pub mod validation {
    use super::MetricName;

    pub fn run_started() {
        ::metrics::counter!(MetricName::ValidationRunsStarted.as_str()).increment(1);
    }

    pub fn run_completed(secs: f64) {
        ::metrics::counter!(MetricName::ValidationRunsCompleted.as_str()).increment(1);
        ::metrics::histogram!(MetricName::ValidationRunDuration.as_str()).record(secs);
    }

    pub fn run_cancelled() {
        ::metrics::counter!(MetricName::ValidationRunsCancelled.as_str()).increment(1);
    }

    /// One progress event corresponds to one processed chunk
    pub fn chunk_processed(validator: &str) {
        ::metrics::counter!(MetricName::ValidationChunksProcessed.as_str(), "validator" => validator.to_string())
            .increment(1);
    }

    pub fn records_processed(validator: &str, records: usize) {
        ::metrics::counter!(MetricName::ValidationRecordsProcessed.as_str(), "validator" => validator.to_string())
            .increment(records as u64);
    }

    pub fn validator_unavailable(validator: &str) {
        ::metrics::counter!(
            MetricName::ValidationValidatorUnavailable.as_str(),
            "validator" => validator.to_string()
        )
        .increment(1);
    }
}

pub mod duplicates {
    use super::MetricName;

    pub fn group_found(key: &str) {
        ::metrics::counter!(MetricName::DuplicateGroupsFound.as_str(), "key" => key.to_string()).increment(1);
    }

    pub fn store_matches(count: usize) {
        ::metrics::counter!(MetricName::DuplicateStoreMatches.as_str()).increment(count as u64);
    }
}

pub mod quality {
    use super::MetricName;

    pub fn score_recorded(score: u8) {
        ::metrics::histogram!(MetricName::QualityScore.as_str()).record(score as f64);
    }

    pub fn alert_raised(severity: &str) {
        ::metrics::counter!(MetricName::QualityAlertsRaised.as_str(), "severity" => severity.to_string())
            .increment(1);
    }
}

pub mod commit {
    use super::MetricName;

    pub fn chunk_succeeded(records: usize, secs: f64) {
        ::metrics::counter!(MetricName::CommitChunksSucceeded.as_str()).increment(1);
        ::metrics::counter!(MetricName::CommitRecordsCommitted.as_str()).increment(records as u64);
        ::metrics::histogram!(MetricName::CommitChunkDuration.as_str()).record(secs);
    }

    pub fn chunk_failed(records: usize, error_code: &str, secs: f64) {
        ::metrics::counter!(MetricName::CommitChunksFailed.as_str(), "error_code" => error_code.to_string())
            .increment(1);
        ::metrics::counter!(MetricName::CommitRecordsFailed.as_str()).increment(records as u64);
        ::metrics::histogram!(MetricName::CommitChunkDuration.as_str()).record(secs);
    }

    pub fn audit_failed() {
        ::metrics::counter!(MetricName::CommitAuditFailures.as_str()).increment(1);
    }
}
