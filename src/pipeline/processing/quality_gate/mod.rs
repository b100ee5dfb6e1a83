//! Quality aggregation: folds every validator result of one run into a single
//! report with a score, alerts, suggestions and a preview.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::common::constants::{
    FRAUD_RATIO_LIMIT, FRAUD_RATIO_PENALTY, LOOKUP_WARNING_RATIO, SCORE_DEDUP_CLEAN, SCORE_FRAUD_CLEAN,
    SCORE_FRAUD_MINOR, SCORE_REQUIRED_FIELDS, SCORE_RULES_CLEAN, SCORE_RULES_MINOR, SCORE_SEASONAL_CLEAN,
    SCORE_SEASONAL_MINOR, SCORE_UNIQUE_MAPPING, SUGGESTION_BONUS_MAX,
};
use crate::domain::{CanonicalRecord, FieldFormat, MessageSeverity, RecordStatus};
use crate::observability::metrics;
use crate::pipeline::processing::duplicates::{DuplicateKey, DuplicateSummary};
use crate::pipeline::processing::validators::fraud::FraudSummary;
use crate::pipeline::processing::validators::structural::StructuralReport;
use crate::pipeline::processing::validators::suggestions::MappingSuggestion;
use crate::pipeline::processing::validators::{
    LookupSubject, ValidatorKind, ValidatorReport, ValidatorResult, ValidatorSummary,
};

/// Individual alerts per duplicate group before they are folded into one line.
const MAX_GROUP_ALERTS: usize = 10;
const RULES_MINOR_RATIO: f64 = 0.05;
const SEASONAL_MINOR_RATIO: f64 = 0.10;

/// Severity of a report alert, most severe first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    /// Blocks the commit
    Error,
    /// Visible but non-blocking
    Warning,
    /// Informational, including unavailable validators
    Info,
    /// A category that passed
    Success,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Error => "error",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Info => "info",
            AlertSeverity::Success => "success",
        }
    }
}

/// One dataset-level finding shown to the user
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityAlert {
    /// How serious the finding is
    pub severity: AlertSeverity,
    /// Short headline
    pub title: String,
    /// Human-readable description of the finding
    pub message: String,
    /// Canonical field key or source column the alert is about
    pub field: Option<String>,
    /// What the user could do about it
    pub suggestion: Option<String>,
    /// Validator that produced the alert, if any
    pub source: Option<ValidatorKind>,
}

impl QualityAlert {
    fn new(severity: AlertSeverity, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            title: title.into(),
            message: message.into(),
            field: None,
            suggestion: None,
            source: None,
        }
    }

    fn field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    fn suggest(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    fn from_validator(mut self, kind: ValidatorKind) -> Self {
        self.source = Some(kind);
        self
    }
}

/// Record status totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecordCounts {
    pub valid: usize,
    pub warning: usize,
    pub invalid: usize,
}

impl RecordCounts {
    pub fn from_records(records: &[CanonicalRecord]) -> Self {
        records.iter().fold(Self::default(), |mut counts, record| {
            match record.status {
                RecordStatus::Valid => counts.valid += 1,
                RecordStatus::Warning => counts.warning += 1,
                RecordStatus::Invalid => counts.invalid += 1,
            }
            counts
        })
    }

    /// Records eligible for commit
    pub fn accepted(&self) -> usize {
        self.valid + self.warning
    }

    pub fn total(&self) -> usize {
        self.valid + self.warning + self.invalid
    }
}

/// Output of one complete, non-cancelled validation run
#[derive(Debug, Clone, Serialize)]
pub struct QualityReport {
    /// Mapping version the run validated
    pub run_version: u64,
    /// Composite score in `[0, 100]`
    pub score: u8,
    /// True when no error alert is present
    pub is_valid: bool,
    pub alerts: Vec<QualityAlert>,
    pub suggestions: Vec<MappingSuggestion>,
    pub counts: RecordCounts,
    /// First rows after validation, for display
    pub preview: Vec<CanonicalRecord>,
    /// Every record with its final status
    #[serde(skip)]
    pub records: Vec<CanonicalRecord>,
    pub generated_at: DateTime<Utc>,
}

impl QualityReport {
    pub fn error_alerts(&self) -> impl Iterator<Item = &QualityAlert> {
        self.alerts.iter().filter(|a| a.severity == AlertSeverity::Error)
    }

    pub fn accepted_records(&self) -> Vec<CanonicalRecord> {
        self.records.iter().filter(|r| r.is_accepted()).cloned().collect()
    }

    pub fn alerts_with(&self, severity: AlertSeverity) -> usize {
        self.alerts.iter().filter(|a| a.severity == severity).count()
    }
}

/// Everything a finished run hands to the aggregator
#[derive(Debug, Clone)]
pub struct CompletedRun {
    pub version: u64,
    pub structural: StructuralReport,
    /// Freshly mapped records, statuses not yet applied
    pub records: Vec<CanonicalRecord>,
    pub results: Vec<ValidatorResult>,
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed(CompletedRun),
    Cancelled { version: u64 },
}

impl RunOutcome {
    pub fn version(&self) -> u64 {
        match self {
            RunOutcome::Completed(run) => run.version,
            RunOutcome::Cancelled { version } => *version,
        }
    }
}

/// Score and alert accumulator for one run
struct Tally {
    score: i32,
    alerts: Vec<QualityAlert>,
}

impl Tally {
    fn add(&mut self, points: i32) {
        self.score += points;
    }

    fn push(&mut self, alert: QualityAlert) {
        self.alerts.push(alert);
    }
}

#[derive(Debug, Clone)]
pub struct QualityAggregator {
    preview_rows: usize,
}

impl Default for QualityAggregator {
    fn default() -> Self {
        Self::new(crate::common::constants::DEFAULT_PREVIEW_ROWS)
    }
}

impl QualityAggregator {
    pub fn new(preview_rows: usize) -> Self {
        Self { preview_rows }
    }

    /// Publishable report for `outcome`, or `None` when the run was cancelled
    /// or validated a mapping version other than `current_version`.
    pub fn finalize(&self, outcome: RunOutcome, current_version: u64) -> Option<QualityReport> {
        match outcome {
            RunOutcome::Cancelled { version } => {
                debug!(version, "Discarding cancelled run");
                None
            }
            RunOutcome::Completed(run) if run.version != current_version => {
                debug!(
                    version = run.version,
                    current_version, "Discarding superseded run"
                );
                None
            }
            RunOutcome::Completed(run) => Some(self.aggregate(run)),
        }
    }

    pub fn aggregate(&self, run: CompletedRun) -> QualityReport {
        let CompletedRun {
            version,
            structural,
            mut records,
            results,
        } = run;

        let mut tally = Tally {
            score: 0,
            alerts: Vec::new(),
        };
        let mut suggestions = Vec::new();

        if records.is_empty() {
            tally.push(QualityAlert::new(
                AlertSeverity::Info,
                "Empty dataset",
                "The file has no data rows; nothing to validate or import",
            ));
        } else {
            self.apply_structural(&structural, &mut records, &mut tally);

            for result in &results {
                match result {
                    ValidatorResult::Report(report) => {
                        apply_outcomes(report, &mut records);
                        self.summarize(report, &mut tally, &mut suggestions);
                    }
                    ValidatorResult::Unavailable { kind, reason } => {
                        tally.push(
                            QualityAlert::new(
                                AlertSeverity::Info,
                                format!("{} unavailable", kind.label()),
                                format!("Validation unavailable: {}", reason),
                            )
                            .from_validator(*kind),
                        );
                    }
                }
            }
        }

        let mut score = tally.score.clamp(0, 100);
        if !structural.missing_required.is_empty() {
            score = score.min(SCORE_REQUIRED_FIELDS - 1);
        }
        let score = score as u8;

        let mut alerts = tally.alerts;
        alerts.sort_by_key(|a| a.severity);
        let is_valid = !alerts.iter().any(|a| a.severity == AlertSeverity::Error);
        let counts = RecordCounts::from_records(&records);
        let preview = records.iter().take(self.preview_rows).cloned().collect();

        metrics::quality::score_recorded(score);
        for alert in &alerts {
            metrics::quality::alert_raised(alert.severity.as_str());
        }
        info!(
            version,
            score,
            is_valid,
            alerts = alerts.len(),
            valid = counts.valid,
            warning = counts.warning,
            invalid = counts.invalid,
            "Quality report ready"
        );

        QualityReport {
            run_version: version,
            score,
            is_valid,
            alerts,
            suggestions,
            counts,
            preview,
            records,
            generated_at: Utc::now(),
        }
    }

    fn apply_structural(&self, structural: &StructuralReport, records: &mut [CanonicalRecord], tally: &mut Tally) {
        if structural.missing_required.is_empty() {
            tally.add(SCORE_REQUIRED_FIELDS);
            tally.push(QualityAlert::new(
                AlertSeverity::Success,
                "Required fields mapped",
                "Tracking code, customer name and customer email are all mapped",
            ));
        } else {
            let labels: Vec<&str> = structural.missing_required.iter().map(|f| f.label()).collect();
            let first = structural.missing_required[0];
            tally.push(
                QualityAlert::new(
                    AlertSeverity::Error,
                    "Required fields not mapped",
                    format!("Map a column to: {}", labels.join(", ")),
                )
                .field(first.key())
                .suggest("Assign a source column to every required field before importing"),
            );
            for record in records.iter_mut() {
                for field in &structural.missing_required {
                    record.push_message(
                        MessageSeverity::Error,
                        "structural",
                        format!("{} is not mapped", field.label()),
                    );
                }
            }
        }

        if structural.has_unique_mapping() {
            tally.add(SCORE_UNIQUE_MAPPING);
        } else {
            for (column, fields) in &structural.columns_mapped_twice {
                let keys: Vec<&str> = fields.iter().map(|f| f.key()).collect();
                tally.push(
                    QualityAlert::new(
                        AlertSeverity::Error,
                        "Column mapped more than once",
                        format!("Column '{}' is mapped to {}", column, keys.join(", ")),
                    )
                    .field(column.clone())
                    .suggest("Each column can feed only one field"),
                );
            }
        }
    }

    fn summarize(
        &self,
        report: &ValidatorReport,
        tally: &mut Tally,
        suggestions: &mut Vec<MappingSuggestion>,
    ) {
        let kind = report.kind;
        match &report.summary {
            ValidatorSummary::Required {
                empty_by_field,
                invalid_records,
            } => {
                for (field, count) in empty_by_field {
                    tally.push(
                        QualityAlert::new(
                            AlertSeverity::Warning,
                            format!("Empty {}", field.label().to_lowercase()),
                            format!("{} records have no {} and will not be imported", count, field.label().to_lowercase()),
                        )
                        .field(field.key())
                        .from_validator(kind),
                    );
                }
                debug!(invalid_records, "Required value check done");
            }

            ValidatorSummary::Format { fields } => {
                let mut all_pass = !fields.is_empty();
                for stats in fields {
                    if stats.passes() {
                        tally.add(format_points(stats.format));
                        continue;
                    }
                    let Some(ratio) = stats.ratio() else {
                        all_pass = false;
                        continue;
                    };
                    all_pass = false;
                    tally.push(
                        QualityAlert::new(
                            AlertSeverity::Warning,
                            format!("{} format", stats.field.label()),
                            format!(
                                "Only {:.0}% of {} values look valid (expected at least {:.0}%)",
                                ratio * 100.0,
                                stats.field.label().to_lowercase(),
                                stats.threshold * 100.0
                            ),
                        )
                        .field(stats.field.key())
                        .suggest("Check that the right column is mapped to this field")
                        .from_validator(kind),
                    );
                }
                if all_pass {
                    tally.push(
                        QualityAlert::new(AlertSeverity::Success, "Formats look consistent", "Every checked field passed")
                            .from_validator(kind),
                    );
                }
            }

            ValidatorSummary::Lookup {
                subject,
                checked,
                failed,
            } => {
                if *checked == 0 || *failed == 0 {
                    return;
                }
                let what = match subject {
                    LookupSubject::Carrier => "carrier codes are not recognized",
                    LookupSubject::PostalCode => "postal codes do not exist",
                };
                let ratio = *failed as f64 / *checked as f64;
                let severity = if ratio > LOOKUP_WARNING_RATIO {
                    AlertSeverity::Warning
                } else {
                    AlertSeverity::Info
                };
                tally.push(
                    QualityAlert::new(severity, kind.label(), format!("{} of {} {}", failed, checked, what))
                        .from_validator(kind),
                );
            }

            ValidatorSummary::Duplicates(summary) => {
                summarize_duplicates(summary, kind, tally);
            }

            ValidatorSummary::BusinessRules {
                records,
                violating_records,
                rules,
            } => {
                for rule in rules.iter().filter(|r| r.violations > 0) {
                    let severity = if rule.severity == MessageSeverity::Info {
                        AlertSeverity::Info
                    } else {
                        AlertSeverity::Warning
                    };
                    tally.push(
                        QualityAlert::new(
                            severity,
                            rule.rule_name.clone(),
                            format!("{} records violate rule '{}'", rule.violations, rule.rule_id),
                        )
                        .field(rule.field.key())
                        .from_validator(kind),
                    );
                }
                let ratio = ratio(*violating_records, *records);
                if *violating_records == 0 {
                    tally.add(SCORE_RULES_CLEAN);
                    tally.push(
                        QualityAlert::new(AlertSeverity::Success, "Business rules", "No rule violations")
                            .from_validator(kind),
                    );
                } else if ratio < RULES_MINOR_RATIO {
                    tally.add(SCORE_RULES_MINOR);
                }
            }

            ValidatorSummary::Seasonal {
                records,
                out_of_bounds_records,
                fields,
            } => {
                for field in fields {
                    if field.out_of_bounds > 0 {
                        tally.push(
                            QualityAlert::new(
                                AlertSeverity::Warning,
                                format!("Unusual {}", field.field.label().to_lowercase()),
                                format!("{} records fall outside the usual date range", field.out_of_bounds),
                            )
                            .field(field.field.key())
                            .suggest("Confirm the date column and its format")
                            .from_validator(kind),
                        );
                    }
                    if let Some(spike) = &field.spike {
                        tally.push(
                            QualityAlert::new(
                                AlertSeverity::Info,
                                "Volume spike",
                                format!(
                                    "{} holds {} records ({:.0}% of dated rows)",
                                    spike.date,
                                    spike.records,
                                    spike.share * 100.0
                                ),
                            )
                            .field(field.field.key())
                            .from_validator(kind),
                        );
                    }
                }
                if *out_of_bounds_records == 0 {
                    tally.add(SCORE_SEASONAL_CLEAN);
                } else if ratio(*out_of_bounds_records, *records) < SEASONAL_MINOR_RATIO {
                    tally.add(SCORE_SEASONAL_MINOR);
                }
            }

            ValidatorSummary::Fraud(summary) => {
                summarize_fraud(summary, kind, tally);
            }

            ValidatorSummary::Suggestions { suggestions: found } => {
                let high: Vec<&MappingSuggestion> = found.iter().filter(|s| s.is_high_confidence()).collect();
                for suggestion in &high {
                    tally.add((suggestion.confidence * SUGGESTION_BONUS_MAX).round() as i32);
                }
                if !high.is_empty() {
                    tally.push(
                        QualityAlert::new(
                            AlertSeverity::Info,
                            "Mapping suggestions",
                            format!("{} unmapped columns look like known fields", high.len()),
                        )
                        .suggest("Review the suggested mappings")
                        .from_validator(kind),
                    );
                }
                suggestions.extend(found.iter().cloned());
            }
        }
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

fn format_points(format: FieldFormat) -> i32 {
    match format {
        FieldFormat::TrackingCode | FieldFormat::Email => 15,
        _ => 10,
    }
}

/// Attach every noteworthy outcome of a report to its record.
fn apply_outcomes(report: &ValidatorReport, records: &mut [CanonicalRecord]) {
    for outcome in &report.outcomes {
        if !outcome.payload.is_noteworthy() {
            continue;
        }
        if let Some(record) = records.get_mut(outcome.item) {
            record.push_message(outcome.payload.severity(), report.kind.name(), outcome.payload.message());
        }
    }
}

fn summarize_duplicates(summary: &DuplicateSummary, kind: ValidatorKind, tally: &mut Tally) {
    for key in [DuplicateKey::TrackingCode, DuplicateKey::OrderNumber] {
        let groups: Vec<_> = summary.groups_for(key).collect();
        let label = key.field().label();
        for group in groups.iter().take(MAX_GROUP_ALERTS) {
            let rows: Vec<String> = group.rows.iter().map(|r| (r + 1).to_string()).collect();
            tally.push(
                QualityAlert::new(
                    AlertSeverity::Warning,
                    format!("Duplicate {}", label.to_lowercase()),
                    format!(
                        "{} {} appears {} times (rows {})",
                        label,
                        group.value,
                        group.count(),
                        rows.join(", ")
                    ),
                )
                .field(key.field().key())
                .from_validator(kind),
            );
        }
        if groups.len() > MAX_GROUP_ALERTS {
            tally.push(
                QualityAlert::new(
                    AlertSeverity::Warning,
                    format!("Duplicate {}", label.to_lowercase()),
                    format!("{} more repeated values", groups.len() - MAX_GROUP_ALERTS),
                )
                .field(key.field().key())
                .from_validator(kind),
            );
        }
    }

    let email_groups = summary.groups_for(DuplicateKey::Email).count();
    if email_groups > 0 {
        tally.push(
            QualityAlert::new(
                AlertSeverity::Info,
                "Repeated customer emails",
                format!("{} emails appear on more than one row", email_groups),
            )
            .field(DuplicateKey::Email.field().key())
            .from_validator(kind),
        );
    }

    if summary.store_matches > 0 {
        tally.push(
            QualityAlert::new(
                AlertSeverity::Warning,
                "Already in the system",
                format!(
                    "{} records match existing shipments ({} confidently, these will be skipped)",
                    summary.store_matches, summary.store_high_confidence
                ),
            )
            .field(DuplicateKey::TrackingCode.field().key())
            .from_validator(kind),
        );
    }

    if summary.exact_repeats > 0 {
        tally.push(
            QualityAlert::new(
                AlertSeverity::Warning,
                "Repeated rows",
                format!(
                    "{} rows repeat an earlier row exactly; only the first copy will be imported",
                    summary.exact_repeats
                ),
            )
            .field(DuplicateKey::TrackingCode.field().key())
            .from_validator(kind),
        );
    }

    if let Some(error) = &summary.store_lookup_error {
        tally.push(
            QualityAlert::new(
                AlertSeverity::Info,
                "Existing shipment check unavailable",
                format!("Validation unavailable: {}", error),
            )
            .from_validator(kind),
        );
    }

    if summary.is_clean() {
        tally.add(SCORE_DEDUP_CLEAN);
        tally.push(
            QualityAlert::new(AlertSeverity::Success, "No duplicates", "No repeated or existing shipments found")
                .from_validator(kind),
        );
    }
}

fn summarize_fraud(summary: &FraudSummary, kind: ValidatorKind, tally: &mut Tally) {
    let flagged_ratio = summary.flagged_ratio();
    if summary.flagged == 0 {
        tally.add(SCORE_FRAUD_CLEAN);
        tally.push(
            QualityAlert::new(AlertSeverity::Success, "Fraud screening", "No suspicious records").from_validator(kind),
        );
        return;
    }

    tally.push(
        QualityAlert::new(
            AlertSeverity::Warning,
            "Suspicious records",
            format!(
                "{} records need review, {} blocked",
                summary.flagged - summary.blocked,
                summary.blocked
            ),
        )
        .suggest("Review flagged records before importing")
        .from_validator(kind),
    );
    if flagged_ratio <= FRAUD_RATIO_LIMIT {
        tally.add(SCORE_FRAUD_MINOR);
    } else {
        tally.add(-FRAUD_RATIO_PENALTY);
        tally.push(
            QualityAlert::new(
                AlertSeverity::Warning,
                "High fraud ratio",
                format!("{:.0}% of records are flagged", flagged_ratio * 100.0),
            )
            .from_validator(kind),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CanonicalField, Dataset, FieldMapping};
    use crate::pipeline::processing::duplicates::DuplicateGroup;
    use crate::pipeline::processing::validators::format::FieldFormatStats;
    use crate::pipeline::processing::validators::seasonal::SeasonalFieldSummary;
    use std::time::Duration;

    fn records(n: usize) -> (Vec<CanonicalRecord>, FieldMapping) {
        let headers = vec![
            "tracking_code".to_string(),
            "customer_name".to_string(),
            "customer_email".to_string(),
        ];
        let rows = (0..n)
            .map(|i| {
                vec![
                    format!("SM{:010}BR", i),
                    format!("Cliente {}", i),
                    format!("c{}@example.com", i),
                ]
            })
            .collect();
        let data = Dataset::new(headers.clone(), rows);
        let mapping = FieldMapping::exact_from_headers(&headers);
        (data.to_records(&mapping), mapping)
    }

    fn report(kind: ValidatorKind, summary: ValidatorSummary) -> ValidatorResult {
        ValidatorResult::Report(ValidatorReport {
            kind,
            processed: 0,
            outcomes: Vec::new(),
            summary,
            elapsed: Duration::ZERO,
        })
    }

    fn run(version: u64, mapping: &FieldMapping, records: Vec<CanonicalRecord>, results: Vec<ValidatorResult>) -> CompletedRun {
        CompletedRun {
            version,
            structural: StructuralReport::evaluate(mapping),
            records,
            results,
        }
    }

    #[test]
    fn test_superseded_and_cancelled_runs_are_discarded() {
        let aggregator = QualityAggregator::default();
        let (records, mapping) = records(3);

        let stale = RunOutcome::Completed(run(1, &mapping, records.clone(), Vec::new()));
        assert!(aggregator.finalize(stale, 2).is_none());
        assert!(aggregator.finalize(RunOutcome::Cancelled { version: 2 }, 2).is_none());

        let current = RunOutcome::Completed(run(2, &mapping, records, Vec::new()));
        let report = aggregator.finalize(current, 2).unwrap();
        assert_eq!(report.run_version, 2);
        assert_eq!(report.preview.len(), 3);
    }

    #[test]
    fn test_empty_dataset_single_info_alert() {
        let aggregator = QualityAggregator::default();
        let (_, mapping) = records(0);

        let report = aggregator.aggregate(run(1, &mapping, Vec::new(), Vec::new()));
        assert_eq!(report.alerts.len(), 1);
        assert_eq!(report.alerts[0].severity, AlertSeverity::Info);
        assert!(report.is_valid);
        assert_eq!(report.counts.total(), 0);
    }

    #[test]
    fn test_unmapped_required_field_blocks_and_caps_score() {
        let aggregator = QualityAggregator::default();
        let (_, mut mapping) = records(0);
        mapping.unassign(CanonicalField::CustomerEmail);
        let (recs, _) = records(5);
        let recs: Vec<CanonicalRecord> = recs
            .into_iter()
            .map(|mut r| {
                r.values.remove(&CanonicalField::CustomerEmail);
                r
            })
            .collect();

        let fraud = report(ValidatorKind::Fraud, ValidatorSummary::Fraud(FraudSummary::default()));
        let report = aggregator.aggregate(run(1, &mapping, recs, vec![fraud]));

        assert!(!report.is_valid);
        assert!(report.score < 30);
        assert_eq!(report.alerts[0].severity, AlertSeverity::Error);
        assert_eq!(report.counts.invalid, 5);
    }

    #[test]
    fn test_duplicate_alert_cites_code_and_count() {
        let aggregator = QualityAggregator::default();
        let (recs, mapping) = records(2);
        let summary = DuplicateSummary {
            groups: vec![DuplicateGroup {
                key: DuplicateKey::TrackingCode,
                value: "SM1234567890BR".into(),
                rows: vec![0, 1],
            }],
            ..Default::default()
        };

        let report = aggregator.aggregate(run(
            1,
            &mapping,
            recs,
            vec![report(ValidatorKind::Duplicates, ValidatorSummary::Duplicates(summary))],
        ));
        let alert = report
            .alerts
            .iter()
            .find(|a| a.title == "Duplicate tracking code")
            .unwrap();
        assert!(alert.message.contains("SM1234567890BR"));
        assert!(alert.message.contains("2 times"));
        assert!(report.is_valid);
    }

    #[test]
    fn test_score_contributions_and_clamp() {
        let aggregator = QualityAggregator::default();
        let (recs, mapping) = records(10);
        let format = ValidatorSummary::Format {
            fields: vec![
                FieldFormatStats {
                    field: CanonicalField::TrackingCode,
                    format: FieldFormat::TrackingCode,
                    checked: 10,
                    passed: 10,
                    threshold: 0.8,
                },
                FieldFormatStats {
                    field: CanonicalField::CustomerEmail,
                    format: FieldFormat::Email,
                    checked: 10,
                    passed: 10,
                    threshold: 0.8,
                },
            ],
        };
        let results = vec![
            report(ValidatorKind::Format, format),
            report(ValidatorKind::Duplicates, ValidatorSummary::Duplicates(DuplicateSummary::default())),
            report(
                ValidatorKind::BusinessRules,
                ValidatorSummary::BusinessRules {
                    records: 10,
                    violating_records: 0,
                    rules: Vec::new(),
                },
            ),
            report(ValidatorKind::Fraud, ValidatorSummary::Fraud(FraudSummary::default())),
        ];

        // 30 + 20 + 15 + 15 + 15 + 15 + 15 = 125, clamped
        let report = aggregator.aggregate(run(1, &mapping, recs, results));
        assert_eq!(report.score, 100);
        assert!(report.is_valid);
    }

    #[test]
    fn test_high_fraud_ratio_subtracts_points() {
        let aggregator = QualityAggregator::default();
        let (recs, mapping) = records(10);
        let fraud = FraudSummary {
            assessed: 10,
            flagged: 3,
            blocked: 0,
            ..Default::default()
        };

        let report = aggregator.aggregate(run(
            1,
            &mapping,
            recs,
            vec![report(ValidatorKind::Fraud, ValidatorSummary::Fraud(fraud))],
        ));
        // 30 + 20 - 20
        assert_eq!(report.score, 30);
        assert!(report.alerts.iter().any(|a| a.title == "High fraud ratio"));
    }

    #[test]
    fn test_seasonal_ratio_counts_records_not_fields() {
        let aggregator = QualityAggregator::default();
        let (recs, mapping) = records(20);
        let field = |field| SeasonalFieldSummary {
            field,
            dated: 20,
            out_of_bounds: 1,
            monthly: Default::default(),
            spike: None,
        };
        // One record is out of range on both date fields
        let seasonal = ValidatorSummary::Seasonal {
            records: 20,
            out_of_bounds_records: 1,
            fields: vec![field(CanonicalField::ShippingDate), field(CanonicalField::DeliveredAt)],
        };

        let report = aggregator.aggregate(run(1, &mapping, recs, vec![report(ValidatorKind::Seasonal, seasonal)]));
        // 30 + 20 + 5 for a minor share of unusual dates
        assert_eq!(report.score, 55);
    }

    #[test]
    fn test_unavailable_validator_is_info_only() {
        let aggregator = QualityAggregator::default();
        let (recs, mapping) = records(2);
        let unavailable = ValidatorResult::Unavailable {
            kind: ValidatorKind::PostalCodeLookup,
            reason: "timeout".into(),
        };

        let report = aggregator.aggregate(run(1, &mapping, recs, vec![unavailable]));
        assert!(report.is_valid);
        assert!(report
            .alerts
            .iter()
            .any(|a| a.severity == AlertSeverity::Info && a.message.contains("timeout")));
        assert_eq!(report.score, 50);
    }
}
