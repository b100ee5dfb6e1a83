use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::app::ports::{CarrierLookupPort, ImportStore, PostalCodeLookupPort};
use crate::common::error::{ImportError, Result};
use crate::config::ImportConfig;
use crate::domain::{Dataset, FieldMapping};
use crate::observability::metrics;
use crate::pipeline::engine::{ChunkOptions, ChunkProgress};
use crate::pipeline::processing::duplicates::DuplicateDetector;
use crate::pipeline::processing::quality_gate::{CompletedRun, RunOutcome};
use crate::pipeline::processing::validators::business_rules::BusinessRuleValidator;
use crate::pipeline::processing::validators::format::FormatValidator;
use crate::pipeline::processing::validators::fraud::FraudValidator;
use crate::pipeline::processing::validators::lookup::{CarrierLookupValidator, PostalCodeLookupValidator};
use crate::pipeline::processing::validators::required::RequiredFieldValidator;
use crate::pipeline::processing::validators::seasonal::SeasonalValidator;
use crate::pipeline::processing::validators::structural::StructuralReport;
use crate::pipeline::processing::validators::suggestions::MappingAdvisor;
use crate::pipeline::processing::validators::{
    ProgressFn, ValidationContext, Validator, ValidatorKind, ValidatorResult, ValidatorRun,
};

/// The validators of one session, run in order over the same records.
#[derive(Clone)]
pub struct ValidatorSet {
    validators: Vec<Arc<dyn Validator>>,
}

impl ValidatorSet {
    pub fn new(validators: Vec<Arc<dyn Validator>>) -> Self {
        Self { validators }
    }

    /// The full set, wired from configuration. `postal_codes` is optional so
    /// offline runs can skip the HTTP lookup.
    pub fn from_config(
        config: &ImportConfig,
        store: Arc<dyn ImportStore>,
        carriers: Arc<dyn CarrierLookupPort>,
        postal_codes: Option<Arc<dyn PostalCodeLookupPort>>,
    ) -> Result<Self> {
        let lookup_chunking = config.lookup_chunk_options();
        let business_rules = BusinessRuleValidator::new(&config.business_rules)
            .map_err(|e| ImportError::Config(e.to_string()))?;
        let fraud = FraudValidator::new(&config.fraud_patterns).map_err(|e| ImportError::Config(e.to_string()))?;

        let mut validators: Vec<Arc<dyn Validator>> = vec![
            Arc::new(RequiredFieldValidator),
            Arc::new(FormatValidator::new(config.thresholds.clone())),
            Arc::new(CarrierLookupValidator::new(carriers, lookup_chunking.clone())),
        ];
        if let Some(port) = postal_codes {
            validators.push(Arc::new(PostalCodeLookupValidator::new(port, lookup_chunking)));
        }
        validators.push(Arc::new(DuplicateDetector::new(store)));
        validators.push(Arc::new(business_rules));
        validators.push(Arc::new(SeasonalValidator::new(config.seasonal.clone())));
        validators.push(Arc::new(fraud));
        validators.push(Arc::new(MappingAdvisor));

        Ok(Self::new(validators))
    }

    pub fn kinds(&self) -> Vec<ValidatorKind> {
        self.validators.iter().map(|v| v.kind()).collect()
    }

    /// One validation run for `mapping`.
    ///
    /// A validator error becomes [`ValidatorResult::Unavailable`] and the run
    /// goes on. Cancellation stops the run at once and nothing of it is kept.
    /// Without a single required field mapped, only the structural check runs.
    pub async fn run(
        &self,
        dataset: &Dataset,
        mapping: &FieldMapping,
        version: u64,
        chunking: &ChunkOptions,
        cancel: &CancellationToken,
        progress: ProgressFn<'_>,
    ) -> RunOutcome {
        let started = Instant::now();
        metrics::validation::run_started();

        let records = dataset.to_records(mapping);
        let structural = StructuralReport::evaluate(mapping);
        let mut results = Vec::with_capacity(self.validators.len());

        if !dataset.is_empty() && !structural.has_required_coverage() {
            info!(version, "No required field mapped; skipping record validators");
        } else if !dataset.is_empty() {
            let tracked = |kind: ValidatorKind, p: ChunkProgress| {
                metrics::validation::chunk_processed(kind.name());
                progress(kind, p);
            };
            let ctx = ValidationContext {
                records: &records,
                rows: dataset.rows(),
                headers: dataset.headers(),
                mapping,
                chunking,
                cancel,
                progress: &tracked,
            };

            for validator in &self.validators {
                if cancel.is_cancelled() {
                    return RunOutcome::Cancelled { version };
                }
                let kind = validator.kind();
                let span = info_span!("validator", validator = kind.name(), run_version = version);
                match validator.run(&ctx).instrument(span).await {
                    Ok(ValidatorRun::Completed(report)) => {
                        metrics::validation::records_processed(kind.name(), report.processed);
                        results.push(ValidatorResult::Report(report));
                    }
                    Ok(ValidatorRun::Cancelled) => return RunOutcome::Cancelled { version },
                    Err(e) => {
                        warn!(validator = kind.name(), error = %e, "Validator unavailable");
                        metrics::validation::validator_unavailable(kind.name());
                        results.push(ValidatorResult::Unavailable {
                            kind,
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }

        if cancel.is_cancelled() {
            return RunOutcome::Cancelled { version };
        }
        metrics::validation::run_completed(started.elapsed().as_secs_f64());
        RunOutcome::Completed(CompletedRun {
            version,
            structural,
            records,
            results,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ports::{NewShipment, StoreError, StoredShipment, AuditEntry};
    use crate::pipeline::processing::validators::ValidatorError;
    use crate::pipeline::processing::validators::test_support::{dataset, no_progress};
    use async_trait::async_trait;
    use std::collections::HashSet;

    struct BrokenCarriers;

    #[async_trait]
    impl CarrierLookupPort for BrokenCarriers {
        async fn recognize(&self, _codes: &[String]) -> std::result::Result<HashSet<String>, String> {
            Err("directory offline".to_string())
        }
    }

    struct EmptyStore;

    #[async_trait]
    impl ImportStore for EmptyStore {
        async fn find_by_tracking_codes(&self, _codes: &[String]) -> std::result::Result<Vec<StoredShipment>, StoreError> {
            Ok(Vec::new())
        }

        async fn insert_batch(&self, shipments: &[NewShipment]) -> std::result::Result<Vec<String>, StoreError> {
            Ok(shipments.iter().map(|s| s.idempotency_key.clone()).collect())
        }

        async fn append_audit(&self, _entries: &[AuditEntry]) -> std::result::Result<(), StoreError> {
            Ok(())
        }
    }

    /// Cancels the run's token when it starts
    struct Canceller(CancellationToken);

    #[async_trait]
    impl Validator for Canceller {
        fn kind(&self) -> ValidatorKind {
            ValidatorKind::Seasonal
        }

        async fn run(&self, _ctx: &ValidationContext<'_>) -> std::result::Result<ValidatorRun, ValidatorError> {
            self.0.cancel();
            Ok(ValidatorRun::Cancelled)
        }
    }

    fn full_set(carriers: Arc<dyn CarrierLookupPort>) -> ValidatorSet {
        ValidatorSet::from_config(&ImportConfig::default(), Arc::new(EmptyStore), carriers, None).unwrap()
    }

    #[tokio::test]
    async fn test_failing_validator_degrades_without_stopping_others() {
        let (data, mapping) = dataset(
            &["tracking_code", "customer_name", "customer_email", "carrier"],
            vec![vec!["SM1234567890BR", "Ana", "ana@example.com", "CORREIOS"]],
        );
        let set = full_set(Arc::new(BrokenCarriers));
        let token = CancellationToken::new();

        let outcome = set
            .run(&data, &mapping, 1, &ChunkOptions::new(10), &token, &no_progress)
            .await;
        let RunOutcome::Completed(run) = outcome else {
            panic!("run should complete");
        };
        assert_eq!(run.results.len(), set.kinds().len());
        assert!(run.results.iter().any(|r| matches!(
            r,
            ValidatorResult::Unavailable { kind: ValidatorKind::CarrierLookup, .. }
        )));
        assert!(run
            .results
            .iter()
            .any(|r| matches!(r, ValidatorResult::Report(rep) if rep.kind == ValidatorKind::Fraud)));
    }

    #[tokio::test]
    async fn test_zero_required_coverage_runs_no_validators() {
        let (data, mapping) = dataset(&["carrier", "notes"], vec![vec!["CORREIOS", "fragile"]]);
        let set = full_set(Arc::new(BrokenCarriers));
        let token = CancellationToken::new();

        let outcome = set
            .run(&data, &mapping, 1, &ChunkOptions::new(10), &token, &no_progress)
            .await;
        let RunOutcome::Completed(run) = outcome else {
            panic!("run should complete");
        };
        assert!(run.results.is_empty());
        assert_eq!(run.structural.missing_required.len(), 3);
    }

    #[tokio::test]
    async fn test_cancellation_discards_run() {
        let (data, mapping) = dataset(
            &["tracking_code", "customer_name", "customer_email"],
            vec![vec!["SM1234567890BR", "Ana", "ana@example.com"]],
        );
        let token = CancellationToken::new();
        let set = ValidatorSet::new(vec![
            Arc::new(RequiredFieldValidator),
            Arc::new(Canceller(token.clone())),
            Arc::new(MappingAdvisor),
        ]);

        let outcome = set
            .run(&data, &mapping, 7, &ChunkOptions::new(10), &token, &no_progress)
            .await;
        assert!(matches!(outcome, RunOutcome::Cancelled { version: 7 }));
    }

    #[test]
    fn test_invalid_rule_is_config_error() {
        let config = ImportConfig::parse(
            r#"
            [[business_rules]]
            id = "bad"
            name = "Broken pattern"
            field = "notes"
            check = { type = "pattern", regex = "([" }
            "#,
        )
        .unwrap();
        let result = ValidatorSet::from_config(&config, Arc::new(EmptyStore), Arc::new(BrokenCarriers), None);
        assert!(matches!(result, Err(ImportError::Config(_))));
    }
}
