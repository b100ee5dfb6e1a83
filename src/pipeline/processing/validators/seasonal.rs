use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future;

use super::format::parse_date;
use super::{
    completed, OutcomePayload, RecordOutcome, ValidationContext, Validator, ValidatorError, ValidatorKind,
    ValidatorReport, ValidatorRun, ValidatorSummary,
};
use crate::domain::CanonicalField;
use crate::pipeline::engine::run_chunked;

/// Historical bounds for one date field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonalBounds {
    pub field: CanonicalField,
    pub earliest: NaiveDate,
    pub latest: NaiveDate,
    /// Largest share of dated records a single day may hold.
    #[serde(default = "default_daily_share")]
    pub max_daily_share: f64,
}

fn default_daily_share() -> f64 {
    0.5
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailySpike {
    pub date: NaiveDate,
    pub records: usize,
    pub share: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeasonalFieldSummary {
    pub field: CanonicalField,
    pub dated: usize,
    pub out_of_bounds: usize,
    /// Record count per `YYYY-MM`.
    pub monthly: BTreeMap<String, usize>,
    pub spike: Option<DailySpike>,
}

#[derive(Default)]
struct FieldTally {
    dated: usize,
    out_of_bounds: usize,
    monthly: BTreeMap<String, usize>,
    daily: BTreeMap<NaiveDate, usize>,
}

pub struct SeasonalValidator {
    bounds: Vec<SeasonalBounds>,
}

impl SeasonalValidator {
    pub fn new(bounds: Vec<SeasonalBounds>) -> Self {
        Self { bounds }
    }
}

#[async_trait]
impl Validator for SeasonalValidator {
    fn kind(&self) -> ValidatorKind {
        ValidatorKind::Seasonal
    }

    async fn run(&self, ctx: &ValidationContext<'_>) -> Result<ValidatorRun, ValidatorError> {
        let kind = self.kind();
        let active: Vec<&SeasonalBounds> = self
            .bounds
            .iter()
            .filter(|b| ctx.mapping.is_mapped(b.field))
            .collect();
        let mut tallies: Vec<FieldTally> = active.iter().map(|_| FieldTally::default()).collect();

        let run = run_chunked(
            ctx.records,
            ctx.chunking,
            Some(ctx.cancel),
            |chunk, _| {
                let mut outcomes: Vec<RecordOutcome> = Vec::new();
                for record in chunk {
                    for (bounds, tally) in active.iter().zip(tallies.iter_mut()) {
                        let Some(date) = record.get(bounds.field).and_then(parse_date) else {
                            continue;
                        };
                        tally.dated += 1;
                        *tally.monthly.entry(date.format("%Y-%m").to_string()).or_default() += 1;
                        *tally.daily.entry(date).or_default() += 1;

                        if date < bounds.earliest || date > bounds.latest {
                            tally.out_of_bounds += 1;
                            outcomes.push(RecordOutcome::fail(
                                record.row,
                                OutcomePayload::Seasonal {
                                    field: bounds.field,
                                    date,
                                    earliest: bounds.earliest,
                                    latest: bounds.latest,
                                },
                            ));
                        }
                    }
                }
                future::ready(Ok::<_, ValidatorError>(outcomes))
            },
            |progress| ctx.report_progress(kind, progress),
        )
        .await?;

        let Some(report) = completed(run) else {
            return Ok(ValidatorRun::Cancelled);
        };
        let fields = active
            .iter()
            .zip(tallies)
            .map(|(bounds, tally)| {
                let spike = tally
                    .daily
                    .iter()
                    .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
                    .map(|(date, count)| DailySpike {
                        date: *date,
                        records: *count,
                        share: *count as f64 / tally.dated as f64,
                    })
                    .filter(|peak| tally.dated > 1 && peak.share > bounds.max_daily_share);
                SeasonalFieldSummary {
                    field: bounds.field,
                    dated: tally.dated,
                    out_of_bounds: tally.out_of_bounds,
                    monthly: tally.monthly,
                    spike,
                }
            })
            .collect();
        let summary = ValidatorSummary::Seasonal {
            records: report.total_processed,
            out_of_bounds_records: report.total_processed - report.total_valid,
            fields,
        };
        Ok(ValidatorRun::Completed(ValidatorReport::from_engine(kind, report, summary)))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{completed_report, dataset};
    use super::*;

    fn bounds(max_daily_share: f64) -> SeasonalBounds {
        SeasonalBounds {
            field: CanonicalField::ShippingDate,
            earliest: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            latest: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
            max_daily_share,
        }
    }

    #[tokio::test]
    async fn test_out_of_bounds_dates_and_monthly_distribution() {
        let (data, mapping) = dataset(
            &["tracking_code", "shipping_date"],
            vec![
                vec!["SM1234567890BR", "2024-03-01"],
                vec!["SM1234567891BR", "15/03/2024"],
                vec!["SM1234567892BR", "2019-07-04"],
                vec!["SM1234567893BR", "not a date"],
            ],
        );
        let validator = SeasonalValidator::new(vec![bounds(0.9)]);

        let report = completed_report(&validator, &data, &mapping).await;
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.outcomes[0].item, 2);

        let ValidatorSummary::Seasonal { fields, .. } = report.summary else {
            panic!("expected seasonal summary");
        };
        assert_eq!(fields[0].dated, 3);
        assert_eq!(fields[0].out_of_bounds, 1);
        assert_eq!(fields[0].monthly.get("2024-03"), Some(&2));
        assert!(fields[0].spike.is_none());
    }

    #[tokio::test]
    async fn test_daily_spike_detected() {
        let (data, mapping) = dataset(
            &["tracking_code", "shipping_date"],
            vec![
                vec!["SM1234567890BR", "2024-11-29"],
                vec!["SM1234567891BR", "2024-11-29"],
                vec!["SM1234567892BR", "2024-11-29"],
                vec!["SM1234567893BR", "2024-11-30"],
            ],
        );
        let validator = SeasonalValidator::new(vec![bounds(0.5)]);

        let report = completed_report(&validator, &data, &mapping).await;
        let ValidatorSummary::Seasonal { fields, .. } = report.summary else {
            panic!("expected seasonal summary");
        };
        let spike = fields[0].spike.as_ref().unwrap();
        assert_eq!(spike.date, NaiveDate::from_ymd_opt(2024, 11, 29).unwrap());
        assert_eq!(spike.records, 3);
    }

    #[tokio::test]
    async fn test_record_with_two_bad_dates_counts_once() {
        let (data, mapping) = dataset(
            &["tracking_code", "shipping_date", "delivered_at"],
            vec![
                vec!["SM1234567890BR", "2019-01-10", "2019-01-20"],
                vec!["SM1234567891BR", "2024-05-02", "2024-05-09"],
            ],
        );
        let delivered = SeasonalBounds {
            field: CanonicalField::DeliveredAt,
            ..bounds(0.9)
        };
        let validator = SeasonalValidator::new(vec![bounds(0.9), delivered]);

        let report = completed_report(&validator, &data, &mapping).await;
        assert_eq!(report.outcomes.len(), 2);
        let ValidatorSummary::Seasonal {
            out_of_bounds_records,
            fields,
            ..
        } = report.summary
        else {
            panic!("expected seasonal summary");
        };
        assert_eq!(out_of_bounds_records, 1);
        assert_eq!(fields.iter().map(|f| f.out_of_bounds).sum::<usize>(), 2);
    }
}
