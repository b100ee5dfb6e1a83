//! Pluggable validators run over the same chunked record set.
//!
//! Every validator drives [`run_chunked`](crate::pipeline::engine::run_chunked)
//! itself so it can pick its own chunk size and pacing. Per-record findings are
//! reported as [`RecordOutcome`]s carrying a tagged [`OutcomePayload`]; dataset
//! level statistics travel in a tagged [`ValidatorSummary`]. The quality
//! aggregator dispatches on those tags and never looks inside a validator.

pub mod business_rules;
pub mod format;
pub mod fraud;
pub mod lookup;
pub mod required;
pub mod seasonal;
pub mod structural;
pub mod suggestions;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::domain::{CanonicalField, CanonicalRecord, FieldMapping, MessageSeverity, RawRow};
use crate::pipeline::engine::{ChunkOptions, ChunkProgress, EngineReport, EngineRun, ValidationOutcome};
use crate::pipeline::processing::duplicates::{DuplicateCandidate, DuplicateSummary};

use self::business_rules::{RuleStats, RuleViolation};
use self::format::FieldFormatStats;
use self::fraud::{FraudAssessment, FraudSummary};
use self::seasonal::SeasonalFieldSummary;
use self::suggestions::MappingSuggestion;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidatorKind {
    Required,
    Format,
    CarrierLookup,
    PostalCodeLookup,
    Duplicates,
    BusinessRules,
    Seasonal,
    Fraud,
    MappingAdvisor,
}

impl ValidatorKind {
    pub fn name(&self) -> &'static str {
        match self {
            ValidatorKind::Required => "required",
            ValidatorKind::Format => "format",
            ValidatorKind::CarrierLookup => "carrier_lookup",
            ValidatorKind::PostalCodeLookup => "postal_code_lookup",
            ValidatorKind::Duplicates => "duplicates",
            ValidatorKind::BusinessRules => "business_rules",
            ValidatorKind::Seasonal => "seasonal",
            ValidatorKind::Fraud => "fraud",
            ValidatorKind::MappingAdvisor => "mapping_advisor",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ValidatorKind::Required => "Required fields",
            ValidatorKind::Format => "Format checks",
            ValidatorKind::CarrierLookup => "Carrier recognition",
            ValidatorKind::PostalCodeLookup => "Postal code lookup",
            ValidatorKind::Duplicates => "Duplicate detection",
            ValidatorKind::BusinessRules => "Business rules",
            ValidatorKind::Seasonal => "Seasonal check",
            ValidatorKind::Fraud => "Fraud screening",
            ValidatorKind::MappingAdvisor => "Mapping suggestions",
        }
    }

    /// External lookups and the advisor may legitimately differ between runs.
    pub fn is_deterministic(&self) -> bool {
        !matches!(
            self,
            ValidatorKind::CarrierLookup | ValidatorKind::PostalCodeLookup | ValidatorKind::MappingAdvisor
        )
    }
}

impl fmt::Display for ValidatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Error)]
pub enum ValidatorError {
    #[error("{validator} is unavailable: {reason}")]
    Unavailable { validator: ValidatorKind, reason: String },

    #[error("lookup failed: {0}")]
    Lookup(String),

    #[error("invalid rule: {0}")]
    InvalidRule(String),
}

/// Per-record finding, tagged by the validator that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum OutcomePayload {
    Required {
        field: CanonicalField,
    },
    Format {
        field: CanonicalField,
        value: String,
    },
    Carrier {
        code: String,
        recognized: bool,
    },
    PostalCode {
        field: CanonicalField,
        code: String,
        exists: bool,
    },
    Duplicate(DuplicateCandidate),
    Rule(RuleViolation),
    Seasonal {
        field: CanonicalField,
        date: NaiveDate,
        earliest: NaiveDate,
        latest: NaiveDate,
    },
    Fraud(FraudAssessment),
}

impl OutcomePayload {
    /// How strongly the finding affects the record's status.
    pub fn severity(&self) -> MessageSeverity {
        match self {
            OutcomePayload::Required { .. } => MessageSeverity::Error,
            OutcomePayload::Format { field, .. } => {
                // Identity fields must be well formed to be imported at all
                if matches!(field, CanonicalField::TrackingCode | CanonicalField::CustomerEmail) {
                    MessageSeverity::Error
                } else {
                    MessageSeverity::Warning
                }
            }
            OutcomePayload::Carrier { recognized, .. } => {
                if *recognized {
                    MessageSeverity::Info
                } else {
                    MessageSeverity::Warning
                }
            }
            OutcomePayload::PostalCode { exists, .. } => {
                if *exists {
                    MessageSeverity::Info
                } else {
                    MessageSeverity::Warning
                }
            }
            OutcomePayload::Duplicate(candidate) => candidate.severity(),
            OutcomePayload::Rule(violation) => violation.severity,
            OutcomePayload::Seasonal { .. } => MessageSeverity::Warning,
            OutcomePayload::Fraud(assessment) => assessment.severity(),
        }
    }

    pub fn message(&self) -> String {
        match self {
            OutcomePayload::Required { field } => format!("{} is empty", field.label()),
            OutcomePayload::Format { field, value } => {
                format!("{} has an unexpected format: '{}'", field.label(), value)
            }
            OutcomePayload::Carrier { code, recognized } => {
                if *recognized {
                    format!("Carrier '{}' recognized", code)
                } else {
                    format!("Carrier '{}' is not recognized", code)
                }
            }
            OutcomePayload::PostalCode { field, code, exists } => {
                if *exists {
                    format!("{} {} found", field.label(), code)
                } else {
                    format!("{} {} does not exist", field.label(), code)
                }
            }
            OutcomePayload::Duplicate(candidate) => candidate.describe(),
            OutcomePayload::Rule(violation) => violation.describe(),
            OutcomePayload::Seasonal {
                field,
                date,
                earliest,
                latest,
            } => format!(
                "{} {} is outside the usual range {} to {}",
                field.label(),
                date,
                earliest,
                latest
            ),
            OutcomePayload::Fraud(assessment) => assessment.describe(),
        }
    }

    /// Recognized carriers and found postal codes are informational only and
    /// are not attached to records.
    pub fn is_noteworthy(&self) -> bool {
        !matches!(
            self,
            OutcomePayload::Carrier { recognized: true, .. } | OutcomePayload::PostalCode { exists: true, .. }
        )
    }
}

pub type RecordOutcome = ValidationOutcome<OutcomePayload>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupSubject {
    Carrier,
    PostalCode,
}

/// Dataset-level statistics, tagged by validator kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ValidatorSummary {
    Required {
        /// Records with an empty value, per mapped required field.
        empty_by_field: Vec<(CanonicalField, usize)>,
        invalid_records: usize,
    },
    Format {
        fields: Vec<FieldFormatStats>,
    },
    Lookup {
        subject: LookupSubject,
        checked: usize,
        failed: usize,
    },
    Duplicates(DuplicateSummary),
    BusinessRules {
        records: usize,
        violating_records: usize,
        rules: Vec<RuleStats>,
    },
    Seasonal {
        records: usize,
        /// Distinct records with at least one date out of range.
        out_of_bounds_records: usize,
        fields: Vec<SeasonalFieldSummary>,
    },
    Fraud(FraudSummary),
    Suggestions {
        suggestions: Vec<MappingSuggestion>,
    },
}

/// Everything one validator produced for one completed run.
#[derive(Debug, Clone)]
pub struct ValidatorReport {
    pub kind: ValidatorKind,
    pub processed: usize,
    pub outcomes: Vec<RecordOutcome>,
    pub summary: ValidatorSummary,
    pub elapsed: Duration,
}

impl ValidatorReport {
    pub fn new(kind: ValidatorKind, summary: ValidatorSummary) -> Self {
        Self {
            kind,
            processed: 0,
            outcomes: Vec::new(),
            summary,
            elapsed: Duration::ZERO,
        }
    }

    /// Take counts, outcomes and timing from a completed engine run.
    pub fn from_engine(kind: ValidatorKind, report: EngineReport<OutcomePayload>, summary: ValidatorSummary) -> Self {
        Self {
            kind,
            processed: report.total_processed,
            outcomes: report.outcomes,
            summary,
            elapsed: report.elapsed,
        }
    }
}

/// How a validator run ended. Cancellation is not an error.
#[derive(Debug, Clone)]
pub enum ValidatorRun {
    Completed(ValidatorReport),
    Cancelled,
}

/// What the aggregator receives per validator.
#[derive(Debug, Clone)]
pub enum ValidatorResult {
    Report(ValidatorReport),
    Unavailable { kind: ValidatorKind, reason: String },
}

impl ValidatorResult {
    pub fn kind(&self) -> ValidatorKind {
        match self {
            ValidatorResult::Report(report) => report.kind,
            ValidatorResult::Unavailable { kind, .. } => *kind,
        }
    }
}

/// Progress sink shared by every validator of a run.
pub type ProgressFn<'a> = &'a (dyn Fn(ValidatorKind, ChunkProgress) + Send + Sync);

/// Inputs shared by all validators of one validation run.
pub struct ValidationContext<'a> {
    pub records: &'a [CanonicalRecord],
    pub rows: &'a [RawRow],
    pub headers: &'a [String],
    pub mapping: &'a FieldMapping,
    pub chunking: &'a ChunkOptions,
    pub cancel: &'a CancellationToken,
    pub progress: ProgressFn<'a>,
}

impl<'a> ValidationContext<'a> {
    pub fn report_progress(&self, kind: ValidatorKind, progress: ChunkProgress) {
        (self.progress)(kind, progress);
    }
}

#[async_trait]
pub trait Validator: Send + Sync {
    fn kind(&self) -> ValidatorKind;

    async fn run(&self, ctx: &ValidationContext<'_>) -> Result<ValidatorRun, ValidatorError>;
}

/// Unwrap a completed engine run or signal cancellation.
pub(crate) fn completed<P>(run: EngineRun<P>) -> Option<EngineReport<P>> {
    match run {
        EngineRun::Completed(report) => Some(report),
        EngineRun::Cancelled { .. } => None,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::domain::Dataset;

    /// Build records from `(header, values)` columns with an exact-name mapping.
    pub fn dataset(headers: &[&str], rows: Vec<Vec<&str>>) -> (Dataset, FieldMapping) {
        let headers: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
        let rows = rows
            .into_iter()
            .map(|row| row.into_iter().map(str::to_string).collect())
            .collect();
        let data = Dataset::new(headers.clone(), rows);
        let mapping = FieldMapping::exact_from_headers(&headers);
        (data, mapping)
    }

    pub fn no_progress(_: ValidatorKind, _: ChunkProgress) {}

    pub async fn run_validator(
        validator: &dyn Validator,
        data: &Dataset,
        mapping: &FieldMapping,
        chunk_size: usize,
    ) -> Result<ValidatorRun, ValidatorError> {
        let records = data.to_records(mapping);
        let token = CancellationToken::new();
        let chunking = ChunkOptions::new(chunk_size);
        let ctx = ValidationContext {
            records: &records,
            rows: data.rows(),
            headers: data.headers(),
            mapping,
            chunking: &chunking,
            cancel: &token,
            progress: &no_progress,
        };
        validator.run(&ctx).await
    }

    pub async fn completed_report(
        validator: &dyn Validator,
        data: &Dataset,
        mapping: &FieldMapping,
    ) -> ValidatorReport {
        match run_validator(validator, data, mapping, 2).await {
            Ok(ValidatorRun::Completed(report)) => report,
            Ok(ValidatorRun::Cancelled) => panic!("validator run was cancelled"),
            Err(e) => panic!("validator failed: {e}"),
        }
    }
}
