//! Weighted fraud-pattern screening.
//!
//! Each matched pattern adds its weight to a per-record score (clamped to 100).
//! The score maps to a risk band and the band to a recommendation.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future;

use super::format::parse_field_number;
use super::{
    completed, OutcomePayload, RecordOutcome, ValidationContext, Validator, ValidatorError, ValidatorKind,
    ValidatorReport, ValidatorRun, ValidatorSummary,
};
use crate::domain::{CanonicalField, CanonicalRecord, MessageSeverity};
use crate::pipeline::engine::run_chunked;

const MAX_SCORE: u32 = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FraudPattern {
    pub name: String,
    pub weight: u32,
    pub check: PatternCheck,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PatternCheck {
    EmailDomain { domains: Vec<String> },
    FieldPattern { field: CanonicalField, regex: String },
    ValueAbove { field: CanonicalField, threshold: f64 },
    MissingField { field: CanonicalField },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_score(score: u32) -> Self {
        match score {
            0 => RiskLevel::None,
            1..=24 => RiskLevel::Low,
            25..=49 => RiskLevel::Medium,
            50..=74 => RiskLevel::High,
            _ => RiskLevel::Critical,
        }
    }

    pub fn recommendation(&self) -> Recommendation {
        match self {
            RiskLevel::None | RiskLevel::Low => Recommendation::Accept,
            RiskLevel::Medium | RiskLevel::High => Recommendation::Review,
            RiskLevel::Critical => Recommendation::Block,
        }
    }

    /// Medium and above count as flagged.
    pub fn is_flagged(&self) -> bool {
        *self >= RiskLevel::Medium
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Accept,
    Review,
    Block,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FraudAssessment {
    pub score: u32,
    pub risk: RiskLevel,
    pub recommendation: Recommendation,
    pub matched: Vec<String>,
}

impl FraudAssessment {
    pub fn from_matches(matched: Vec<(String, u32)>) -> Self {
        let score = matched.iter().map(|(_, w)| *w).sum::<u32>().min(MAX_SCORE);
        let risk = RiskLevel::from_score(score);
        Self {
            score,
            risk,
            recommendation: risk.recommendation(),
            matched: matched.into_iter().map(|(name, _)| name).collect(),
        }
    }

    pub fn severity(&self) -> MessageSeverity {
        match self.recommendation {
            Recommendation::Accept => MessageSeverity::Info,
            Recommendation::Review => MessageSeverity::Warning,
            Recommendation::Block => MessageSeverity::Error,
        }
    }

    pub fn describe(&self) -> String {
        format!(
            "Fraud score {} ({:?} risk) from: {}",
            self.score,
            self.risk,
            self.matched.join(", ")
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FraudSummary {
    pub assessed: usize,
    /// Medium risk or above.
    pub flagged: usize,
    pub blocked: usize,
    pub by_risk: BTreeMap<RiskLevel, usize>,
}

impl FraudSummary {
    pub fn flagged_ratio(&self) -> f64 {
        if self.assessed == 0 {
            0.0
        } else {
            self.flagged as f64 / self.assessed as f64
        }
    }
}

enum CompiledCheck {
    EmailDomain(Vec<String>),
    FieldPattern(CanonicalField, Regex),
    ValueAbove(CanonicalField, f64),
    MissingField(CanonicalField),
}

impl CompiledCheck {
    fn matches(&self, record: &CanonicalRecord) -> bool {
        match self {
            CompiledCheck::EmailDomain(domains) => record
                .get(CanonicalField::CustomerEmail)
                .and_then(|email| email.rsplit_once('@'))
                .is_some_and(|(_, domain)| {
                    let domain = domain.to_lowercase();
                    domains.iter().any(|d| *d == domain)
                }),
            CompiledCheck::FieldPattern(field, regex) => record.get(*field).is_some_and(|v| regex.is_match(v)),
            CompiledCheck::ValueAbove(field, threshold) => record
                .get(*field)
                .and_then(|v| parse_field_number(*field, v))
                .is_some_and(|v| v > *threshold),
            CompiledCheck::MissingField(field) => record.get(*field).is_none(),
        }
    }
}

pub struct FraudValidator {
    patterns: Vec<(FraudPattern, CompiledCheck)>,
}

impl FraudValidator {
    pub fn new(patterns: &[FraudPattern]) -> Result<Self, ValidatorError> {
        let patterns = patterns
            .iter()
            .map(|pattern| {
                let check = match &pattern.check {
                    PatternCheck::EmailDomain { domains } => {
                        CompiledCheck::EmailDomain(domains.iter().map(|d| d.trim().to_lowercase()).collect())
                    }
                    PatternCheck::FieldPattern { field, regex } => CompiledCheck::FieldPattern(
                        *field,
                        Regex::new(regex).map_err(|e| {
                            ValidatorError::InvalidRule(format!("fraud pattern '{}': {}", pattern.name, e))
                        })?,
                    ),
                    PatternCheck::ValueAbove { field, threshold } => CompiledCheck::ValueAbove(*field, *threshold),
                    PatternCheck::MissingField { field } => CompiledCheck::MissingField(*field),
                };
                Ok((pattern.clone(), check))
            })
            .collect::<Result<Vec<_>, ValidatorError>>()?;
        Ok(Self { patterns })
    }

    pub fn assess(&self, record: &CanonicalRecord) -> FraudAssessment {
        let matched = self
            .patterns
            .iter()
            .filter(|(_, check)| check.matches(record))
            .map(|(pattern, _)| (pattern.name.clone(), pattern.weight))
            .collect();
        FraudAssessment::from_matches(matched)
    }
}

#[async_trait]
impl Validator for FraudValidator {
    fn kind(&self) -> ValidatorKind {
        ValidatorKind::Fraud
    }

    async fn run(&self, ctx: &ValidationContext<'_>) -> Result<ValidatorRun, ValidatorError> {
        let kind = self.kind();
        let mut summary = FraudSummary::default();

        let run = run_chunked(
            ctx.records,
            ctx.chunking,
            Some(ctx.cancel),
            |chunk, _| {
                let mut outcomes: Vec<RecordOutcome> = Vec::new();
                for record in chunk {
                    let assessment = self.assess(record);
                    summary.assessed += 1;
                    *summary.by_risk.entry(assessment.risk).or_default() += 1;
                    if assessment.risk.is_flagged() {
                        summary.flagged += 1;
                    }
                    if assessment.recommendation == Recommendation::Block {
                        summary.blocked += 1;
                    }
                    if assessment.score > 0 {
                        let ok = !assessment.risk.is_flagged();
                        let payload = OutcomePayload::Fraud(assessment);
                        outcomes.push(if ok {
                            RecordOutcome::pass(record.row, payload)
                        } else {
                            RecordOutcome::fail(record.row, payload)
                        });
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
        Ok(ValidatorRun::Completed(ValidatorReport::from_engine(
            kind,
            report,
            ValidatorSummary::Fraud(summary),
        )))
    }
}
