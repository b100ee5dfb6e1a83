//! Validators backed by external lookups.
//!
//! Both run with their own (smaller, paced) chunk options so that a dataset of
//! thousands of rows turns into a bounded number of upstream calls. A failing
//! lookup ends the validator with an error; the session reports it as
//! unavailable and carries on with the other validators.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

use super::format::{digits_only, is_valid_postal_code};
use super::{
    completed, LookupSubject, OutcomePayload, RecordOutcome, ValidationContext, Validator, ValidatorError,
    ValidatorKind, ValidatorReport, ValidatorRun, ValidatorSummary,
};
use crate::app::ports::{CarrierLookupPort, PostalCodeLookupPort};
use crate::domain::CanonicalField;
use crate::pipeline::engine::{run_chunked, ChunkOptions};

fn normalize_carrier(code: &str) -> String {
    code.trim().to_uppercase()
}

pub struct CarrierLookupValidator {
    port: Arc<dyn CarrierLookupPort>,
    chunking: ChunkOptions,
}

impl CarrierLookupValidator {
    pub fn new(port: Arc<dyn CarrierLookupPort>, chunking: ChunkOptions) -> Self {
        Self { port, chunking }
    }
}

#[async_trait]
impl Validator for CarrierLookupValidator {
    fn kind(&self) -> ValidatorKind {
        ValidatorKind::CarrierLookup
    }

    async fn run(&self, ctx: &ValidationContext<'_>) -> Result<ValidatorRun, ValidatorError> {
        let kind = self.kind();
        if !ctx.mapping.is_mapped(CanonicalField::Carrier) {
            debug!("Carrier not mapped, skipping carrier lookup");
            let summary = ValidatorSummary::Lookup {
                subject: LookupSubject::Carrier,
                checked: 0,
                failed: 0,
            };
            return Ok(ValidatorRun::Completed(ValidatorReport::new(kind, summary)));
        }

        let run = run_chunked(
            ctx.records,
            &self.chunking,
            Some(ctx.cancel),
            |chunk, _| {
                let port = self.port.clone();
                async move {
                    let codes: Vec<String> = chunk
                        .iter()
                        .filter_map(|r| r.get(CanonicalField::Carrier))
                        .map(normalize_carrier)
                        .collect::<BTreeSet<_>>()
                        .into_iter()
                        .collect();
                    if codes.is_empty() {
                        return Ok(Vec::new());
                    }

                    let recognized = port.recognize(&codes).await.map_err(|e| {
                        warn!(error = %e, "Carrier lookup failed");
                        ValidatorError::Lookup(e)
                    })?;

                    let outcomes: Vec<RecordOutcome> = chunk
                        .iter()
                        .filter_map(|record| {
                            let code = normalize_carrier(record.get(CanonicalField::Carrier)?);
                            let ok = recognized.contains(&code);
                            let payload = OutcomePayload::Carrier { code, recognized: ok };
                            Some(if ok {
                                RecordOutcome::pass(record.row, payload)
                            } else {
                                RecordOutcome::fail(record.row, payload)
                            })
                        })
                        .collect();
                    Ok::<_, ValidatorError>(outcomes)
                }
            },
            |progress| ctx.report_progress(kind, progress),
        )
        .await?;

        let Some(report) = completed(run) else {
            return Ok(ValidatorRun::Cancelled);
        };
        let checked = report.outcomes.len();
        let failed = report.outcomes.iter().filter(|o| !o.valid).count();
        let summary = ValidatorSummary::Lookup {
            subject: LookupSubject::Carrier,
            checked,
            failed,
        };
        Ok(ValidatorRun::Completed(ValidatorReport::from_engine(kind, report, summary)))
    }
}

pub struct PostalCodeLookupValidator {
    port: Arc<dyn PostalCodeLookupPort>,
    chunking: ChunkOptions,
}

impl PostalCodeLookupValidator {
    pub fn new(port: Arc<dyn PostalCodeLookupPort>, chunking: ChunkOptions) -> Self {
        Self { port, chunking }
    }
}

const POSTAL_FIELDS: [CanonicalField; 2] = [CanonicalField::OriginPostalCode, CanonicalField::DestinationPostalCode];

#[async_trait]
impl Validator for PostalCodeLookupValidator {
    fn kind(&self) -> ValidatorKind {
        ValidatorKind::PostalCodeLookup
    }

    async fn run(&self, ctx: &ValidationContext<'_>) -> Result<ValidatorRun, ValidatorError> {
        let kind = self.kind();
        let fields: Vec<CanonicalField> = POSTAL_FIELDS
            .iter()
            .copied()
            .filter(|field| ctx.mapping.is_mapped(*field))
            .collect();
        if fields.is_empty() {
            let summary = ValidatorSummary::Lookup {
                subject: LookupSubject::PostalCode,
                checked: 0,
                failed: 0,
            };
            return Ok(ValidatorRun::Completed(ValidatorReport::new(kind, summary)));
        }

        let run = run_chunked(
            ctx.records,
            &self.chunking,
            Some(ctx.cancel),
            |chunk, _| {
                let port = self.port.clone();
                let fields = fields.clone();
                async move {
                    // Malformed codes are the format validator's business
                    let wanted: Vec<(usize, CanonicalField, String)> = chunk
                        .iter()
                        .flat_map(|record| {
                            fields.iter().filter_map(move |field| {
                                let value = record.get(*field)?;
                                is_valid_postal_code(value).then(|| (record.row, *field, digits_only(value)))
                            })
                        })
                        .collect();
                    if wanted.is_empty() {
                        return Ok(Vec::new());
                    }

                    let codes: Vec<String> = wanted
                        .iter()
                        .map(|(_, _, code)| code.clone())
                        .collect::<BTreeSet<_>>()
                        .into_iter()
                        .collect();
                    let found = port.exists(&codes).await.map_err(|e| {
                        warn!(error = %e, "Postal code lookup failed");
                        ValidatorError::Lookup(e)
                    })?;

                    let outcomes: Vec<RecordOutcome> = wanted
                        .into_iter()
                        .map(|(row, field, code)| {
                            let exists = found.get(&code).copied().unwrap_or(false);
                            let payload = OutcomePayload::PostalCode { field, code, exists };
                            if exists {
                                RecordOutcome::pass(row, payload)
                            } else {
                                RecordOutcome::fail(row, payload)
                            }
                        })
                        .collect();
                    Ok::<_, ValidatorError>(outcomes)
                }
            },
            |progress| ctx.report_progress(kind, progress),
        )
        .await?;

        let Some(report) = completed(run) else {
            return Ok(ValidatorRun::Cancelled);
        };
        let checked = report.outcomes.len();
        let failed = report.outcomes.iter().filter(|o| !o.valid).count();
        let summary = ValidatorSummary::Lookup {
            subject: LookupSubject::PostalCode,
            checked,
            failed,
        };
        Ok(ValidatorRun::Completed(ValidatorReport::from_engine(kind, report, summary)))
    }
}
