use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::app::ports::{CarrierLookupPort, ImportStore, PostalCodeLookupPort};
use crate::app::session::ImportSession;
use crate::app::validation_use_case::ValidatorSet;
use crate::config::ImportConfig;
use crate::domain::{Dataset, FieldMapping};
use crate::infra::{CarrierDirectory, HttpPostalCodeLookup, RateLimiter};
use crate::pipeline::processing::commit::{CommitExecutor, ImportResult};
use crate::pipeline::processing::quality_gate::QualityReport;

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ImportOutcome {
    /// An error alert is open; nothing was written
    Blocked { report: Arc<QualityReport> },
    Imported {
        report: Arc<QualityReport>,
        result: ImportResult,
    },
}

/// Validate-then-commit flow used by the CLI.
pub struct ImportUseCase {
    config: ImportConfig,
    store: Arc<dyn ImportStore>,
    carriers: Arc<dyn CarrierLookupPort>,
    postal_codes: Option<Arc<dyn PostalCodeLookupPort>>,
}

impl ImportUseCase {
    pub fn new(
        config: ImportConfig,
        store: Arc<dyn ImportStore>,
        carriers: Arc<dyn CarrierLookupPort>,
        postal_codes: Option<Arc<dyn PostalCodeLookupPort>>,
    ) -> Self {
        Self {
            config,
            store,
            carriers,
            postal_codes,
        }
    }

    /// Wire the lookup adapters from configuration.
    pub fn from_config(config: ImportConfig, store: Arc<dyn ImportStore>) -> Result<Self> {
        let carriers: Arc<dyn CarrierLookupPort> = Arc::new(CarrierDirectory::new(&config.lookup.carriers));
        let postal_codes: Option<Arc<dyn PostalCodeLookupPort>> = if config.lookup.postal_code_lookup {
            let limiter = RateLimiter::per_minute(config.lookup.requests_per_min, config.lookup.concurrency);
            let client = HttpPostalCodeLookup::new(
                config.lookup.postal_code_base_url.clone(),
                Duration::from_secs(config.lookup.timeout_seconds),
                limiter,
            )
            .context("Failed to build postal code client")?;
            Some(Arc::new(client))
        } else {
            None
        };
        Ok(Self::new(config, store, carriers, postal_codes))
    }

    pub fn open_session(&self, dataset: Dataset, mapping: FieldMapping) -> Result<ImportSession> {
        let validators = ValidatorSet::from_config(
            &self.config,
            self.store.clone(),
            self.carriers.clone(),
            self.postal_codes.clone(),
        )
        .context("Invalid validator configuration")?;
        Ok(ImportSession::new(Arc::new(dataset), mapping, validators, &self.config))
    }

    pub async fn validate(&self, dataset: Dataset, mapping: FieldMapping) -> Result<Arc<QualityReport>> {
        let session = self.open_session(dataset, mapping)?;
        let report = session.validate_now().await.context("Validation did not produce a report")?;
        session.shutdown();
        Ok(report)
    }

    pub async fn import(&self, dataset: Dataset, mapping: FieldMapping) -> Result<ImportOutcome> {
        let session = self.open_session(dataset, mapping)?;
        let report = session.validate_now().await.context("Validation did not produce a report")?;

        if !report.is_valid {
            warn!(
                score = report.score,
                errors = report.error_alerts().count(),
                "Import blocked by open error alerts"
            );
            session.shutdown();
            return Ok(ImportOutcome::Blocked { report });
        }

        let executor = CommitExecutor::new(self.store.clone(), self.config.commit_config());
        let result = session.commit(&executor).await.context("Commit failed")?;
        info!("{}", result.summary_line());
        session.shutdown();
        Ok(ImportOutcome::Imported { report, result })
    }
}
