use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future;

use super::format::matches_format;
use super::{
    completed, RecordOutcome, ValidationContext, Validator, ValidatorError, ValidatorKind, ValidatorReport,
    ValidatorRun, ValidatorSummary,
};
use crate::common::constants::HIGH_CONFIDENCE_SUGGESTION;
use crate::domain::{CanonicalField, FieldFormat};
use crate::pipeline::engine::run_chunked;

const MIN_CONFIDENCE: f64 = 0.5;
const PER_COLUMN: usize = 3;
const NAME_WEIGHT: f64 = 0.6;
const SHAPE_WEIGHT: f64 = 0.4;
/// Free-text fields carry no shape evidence, so name similarity alone is discounted.
const TEXT_DISCOUNT: f64 = 0.85;

/// A proposed column → field assignment. Never applied automatically.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MappingSuggestion {
    pub column: String,
    pub field: CanonicalField,
    pub confidence: f64,
    pub reasoning: String,
}

impl MappingSuggestion {
    pub fn is_high_confidence(&self) -> bool {
        self.confidence >= HIGH_CONFIDENCE_SUGGESTION
    }
}

fn normalize(text: &str) -> String {
    text.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == '_' || c == '-' || c == '.' { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Best Jaro-Winkler similarity of a header against a field's key, label and aliases.
pub fn header_similarity(header: &str, field: CanonicalField) -> f64 {
    let header = normalize(header);
    std::iter::once(normalize(field.key()))
        .chain(std::iter::once(normalize(field.label())))
        .chain(field.aliases().iter().map(|alias| normalize(alias)))
        .map(|candidate| strsim::jaro_winkler(&header, &candidate))
        .fold(0.0, f64::max)
}

#[derive(Default)]
struct ShapeTally {
    sampled: usize,
    matches: BTreeMap<FieldFormat, usize>,
}

const SHAPED_FORMATS: [FieldFormat; 8] = [
    FieldFormat::TrackingCode,
    FieldFormat::Email,
    FieldFormat::TaxId,
    FieldFormat::PostalCode,
    FieldFormat::Date,
    FieldFormat::Currency,
    FieldFormat::Phone,
    FieldFormat::Number,
];

/// Ranks unmapped canonical fields for every unmapped column.
#[derive(Debug, Default)]
pub struct MappingAdvisor;

impl MappingAdvisor {
    fn rank(column: &str, tally: &ShapeTally, candidates: &[CanonicalField]) -> Vec<MappingSuggestion> {
        let mut ranked: Vec<MappingSuggestion> = candidates
            .iter()
            .filter_map(|field| {
                let name = header_similarity(column, *field);
                let format = field.format();
                let (confidence, reasoning) = match (format, tally.sampled) {
                    (FieldFormat::Text, _) | (_, 0) => (
                        name * TEXT_DISCOUNT,
                        format!("header similarity {:.2}", name),
                    ),
                    (format, sampled) => {
                        let shape = tally.matches.get(&format).copied().unwrap_or(0) as f64 / sampled as f64;
                        (
                            NAME_WEIGHT * name + SHAPE_WEIGHT * shape,
                            format!("header similarity {:.2}, {:.0}% of values look like {:?}", name, shape * 100.0, format),
                        )
                    }
                };
                let confidence = (confidence * 100.0).round() / 100.0;
                (confidence >= MIN_CONFIDENCE).then(|| MappingSuggestion {
                    column: column.to_string(),
                    field: *field,
                    confidence,
                    reasoning,
                })
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.field.cmp(&b.field))
        });
        ranked.truncate(PER_COLUMN);
        ranked
    }
}

#[async_trait]
impl Validator for MappingAdvisor {
    fn kind(&self) -> ValidatorKind {
        ValidatorKind::MappingAdvisor
    }

    async fn run(&self, ctx: &ValidationContext<'_>) -> Result<ValidatorRun, ValidatorError> {
        let kind = self.kind();
        let columns: Vec<&str> = ctx.mapping.unmapped_columns(ctx.headers);
        let candidates: Vec<CanonicalField> = CanonicalField::ALL
            .iter()
            .copied()
            .filter(|field| !ctx.mapping.is_mapped(*field))
            .collect();
        if columns.is_empty() || candidates.is_empty() {
            let summary = ValidatorSummary::Suggestions {
                suggestions: Vec::new(),
            };
            return Ok(ValidatorRun::Completed(ValidatorReport::new(kind, summary)));
        }

        let mut tallies: Vec<ShapeTally> = columns.iter().map(|_| ShapeTally::default()).collect();
        let run = run_chunked(
            ctx.rows,
            ctx.chunking,
            Some(ctx.cancel),
            |chunk, _| {
                for row in chunk {
                    for (column, tally) in columns.iter().zip(tallies.iter_mut()) {
                        let Some(value) = row.get(column).map(str::trim).filter(|v| !v.is_empty()) else {
                            continue;
                        };
                        tally.sampled += 1;
                        for format in SHAPED_FORMATS {
                            if matches_format(format, value) == Some(true) {
                                *tally.matches.entry(format).or_default() += 1;
                            }
                        }
                    }
                }
                future::ready(Ok::<Vec<RecordOutcome>, ValidatorError>(Vec::new()))
            },
            |progress| ctx.report_progress(kind, progress),
        )
        .await?;

        let Some(report) = completed(run) else {
            return Ok(ValidatorRun::Cancelled);
        };
        let suggestions = columns
            .iter()
            .zip(&tallies)
            .flat_map(|(column, tally)| Self::rank(column, tally, &candidates))
            .collect();
        Ok(ValidatorRun::Completed(ValidatorReport::from_engine(
            kind,
            report,
            ValidatorSummary::Suggestions { suggestions },
        )))
    }
}
