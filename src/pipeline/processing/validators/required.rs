use async_trait::async_trait;
use std::collections::BTreeMap;
use std::future;

use super::{
    completed, OutcomePayload, RecordOutcome, ValidationContext, Validator, ValidatorError, ValidatorKind,
    ValidatorReport, ValidatorRun, ValidatorSummary,
};
use crate::domain::CanonicalField;
use crate::pipeline::engine::run_chunked;

/// Flags records whose mapped required fields are empty.
///
/// Unmapped required fields are a mapping problem and are handled by the
/// structural check instead.
#[derive(Debug, Default)]
pub struct RequiredFieldValidator;

#[async_trait]
impl Validator for RequiredFieldValidator {
    fn kind(&self) -> ValidatorKind {
        ValidatorKind::Required
    }

    async fn run(&self, ctx: &ValidationContext<'_>) -> Result<ValidatorRun, ValidatorError> {
        let kind = self.kind();
        let fields: Vec<CanonicalField> = CanonicalField::REQUIRED
            .iter()
            .copied()
            .filter(|field| ctx.mapping.is_mapped(*field))
            .collect();
        let mut empty_by_field: BTreeMap<CanonicalField, usize> = BTreeMap::new();

        let run = run_chunked(
            ctx.records,
            ctx.chunking,
            Some(ctx.cancel),
            |chunk, _| {
                let mut outcomes: Vec<RecordOutcome> = Vec::new();
                for record in chunk {
                    for field in &fields {
                        if record.get(*field).is_none() {
                            *empty_by_field.entry(*field).or_default() += 1;
                            outcomes.push(RecordOutcome::fail(record.row, OutcomePayload::Required { field: *field }));
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
        let invalid_records = report.total_processed - report.total_valid;
        let summary = ValidatorSummary::Required {
            empty_by_field: empty_by_field.into_iter().collect(),
            invalid_records,
        };
        Ok(ValidatorRun::Completed(ValidatorReport::from_engine(kind, report, summary)))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{completed_report, dataset};
    use super::*;

    #[tokio::test]
    async fn test_empty_required_values_flagged() {
        let (data, mapping) = dataset(
            &["tracking_code", "customer_name", "customer_email"],
            vec![
                vec!["SM1234567890BR", "Ana", "ana@example.com"],
                vec!["SM1234567891BR", "", "bia@example.com"],
                vec!["", "", "caio@example.com"],
            ],
        );

        let report = completed_report(&RequiredFieldValidator, &data, &mapping).await;
        assert_eq!(report.outcomes.len(), 3);
        assert!(report.outcomes.iter().all(|o| !o.valid));
        match report.summary {
            ValidatorSummary::Required {
                empty_by_field,
                invalid_records,
            } => {
                assert_eq!(invalid_records, 2);
                assert!(empty_by_field.contains(&(CanonicalField::CustomerName, 2)));
                assert!(empty_by_field.contains(&(CanonicalField::TrackingCode, 1)));
            }
            other => panic!("unexpected summary {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unmapped_required_field_is_not_checked_per_record() {
        let (data, mapping) = dataset(&["tracking_code"], vec![vec!["SM1234567890BR"]]);
        let report = completed_report(&RequiredFieldValidator, &data, &mapping).await;
        assert!(report.outcomes.is_empty());
    }
}
