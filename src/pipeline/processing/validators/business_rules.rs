use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::future;

use super::format::parse_field_number;
use super::{
    completed, OutcomePayload, RecordOutcome, ValidationContext, Validator, ValidatorError, ValidatorKind,
    ValidatorReport, ValidatorRun, ValidatorSummary,
};
use crate::domain::{CanonicalField, CanonicalRecord, MessageSeverity};
use crate::pipeline::engine::run_chunked;

/// A configurable rule over one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessRule {
    pub id: String,
    pub name: String,
    pub field: CanonicalField,
    pub check: RuleCheck,
    #[serde(default = "default_severity")]
    pub severity: MessageSeverity,
}

fn default_severity() -> MessageSeverity {
    MessageSeverity::Warning
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleCheck {
    Threshold { max: f64 },
    Range { min: f64, max: f64 },
    Pattern { regex: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleViolation {
    pub rule_id: String,
    pub rule_name: String,
    pub field: CanonicalField,
    pub severity: MessageSeverity,
    pub value: String,
}

impl RuleViolation {
    pub fn describe(&self) -> String {
        format!("{}: {} '{}' violates the rule", self.rule_name, self.field.label(), self.value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleStats {
    pub rule_id: String,
    pub rule_name: String,
    pub field: CanonicalField,
    pub severity: MessageSeverity,
    pub violations: usize,
}

enum CompiledCheck {
    Threshold(f64),
    Range(f64, f64),
    Pattern(Regex),
}

struct CompiledRule {
    rule: BusinessRule,
    check: CompiledCheck,
}

impl CompiledRule {
    /// Rules only apply to present values; numeric rules skip non-numeric
    /// values, which the format validator reports.
    fn violated_by(&self, record: &CanonicalRecord) -> Option<String> {
        let value = record.get(self.rule.field)?;
        let violated = match &self.check {
            CompiledCheck::Threshold(max) => parse_field_number(self.rule.field, value)? > *max,
            CompiledCheck::Range(min, max) => {
                let n = parse_field_number(self.rule.field, value)?;
                n < *min || n > *max
            }
            CompiledCheck::Pattern(regex) => !regex.is_match(value),
        };
        violated.then(|| value.to_string())
    }
}

pub struct BusinessRuleValidator {
    rules: Vec<CompiledRule>,
}

impl BusinessRuleValidator {
    pub fn new(rules: &[BusinessRule]) -> Result<Self, ValidatorError> {
        let rules = rules
            .iter()
            .map(|rule| {
                let check = match &rule.check {
                    RuleCheck::Threshold { max } => CompiledCheck::Threshold(*max),
                    RuleCheck::Range { min, max } if min > max => {
                        return Err(ValidatorError::InvalidRule(format!(
                            "rule '{}' has min {} above max {}",
                            rule.id, min, max
                        )))
                    }
                    RuleCheck::Range { min, max } => CompiledCheck::Range(*min, *max),
                    RuleCheck::Pattern { regex } => CompiledCheck::Pattern(
                        Regex::new(regex)
                            .map_err(|e| ValidatorError::InvalidRule(format!("rule '{}': {}", rule.id, e)))?,
                    ),
                };
                Ok(CompiledRule {
                    rule: rule.clone(),
                    check,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[async_trait]
impl Validator for BusinessRuleValidator {
    fn kind(&self) -> ValidatorKind {
        ValidatorKind::BusinessRules
    }

    async fn run(&self, ctx: &ValidationContext<'_>) -> Result<ValidatorRun, ValidatorError> {
        let kind = self.kind();
        let mut counts = vec![0usize; self.rules.len()];
        let mut violating: BTreeSet<usize> = BTreeSet::new();

        let run = run_chunked(
            ctx.records,
            ctx.chunking,
            Some(ctx.cancel),
            |chunk, _| {
                let mut outcomes: Vec<RecordOutcome> = Vec::new();
                for record in chunk {
                    for (idx, compiled) in self.rules.iter().enumerate() {
                        let Some(value) = compiled.violated_by(record) else {
                            continue;
                        };
                        counts[idx] += 1;
                        violating.insert(record.row);
                        let rule = &compiled.rule;
                        outcomes.push(RecordOutcome::fail(
                            record.row,
                            OutcomePayload::Rule(RuleViolation {
                                rule_id: rule.id.clone(),
                                rule_name: rule.name.clone(),
                                field: rule.field,
                                severity: rule.severity,
                                value,
                            }),
                        ));
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
        let rules = self
            .rules
            .iter()
            .zip(counts)
            .map(|(compiled, violations)| RuleStats {
                rule_id: compiled.rule.id.clone(),
                rule_name: compiled.rule.name.clone(),
                field: compiled.rule.field,
                severity: compiled.rule.severity,
                violations,
            })
            .collect();
        let summary = ValidatorSummary::BusinessRules {
            records: report.total_processed,
            violating_records: violating.len(),
            rules,
        };
        Ok(ValidatorRun::Completed(ValidatorReport::from_engine(kind, report, summary)))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{completed_report, dataset};
    use super::*;

    fn rules() -> Vec<BusinessRule> {
        vec![
            BusinessRule {
                id: "max-value".into(),
                name: "Declared value cap".into(),
                field: CanonicalField::DeclaredValue,
                check: RuleCheck::Threshold { max: 5000.0 },
                severity: MessageSeverity::Error,
            },
            BusinessRule {
                id: "weight".into(),
                name: "Weight range".into(),
                field: CanonicalField::WeightKg,
                check: RuleCheck::Range { min: 0.1, max: 30.0 },
                severity: MessageSeverity::Warning,
            },
            BusinessRule {
                id: "state".into(),
                name: "State code".into(),
                field: CanonicalField::DestinationState,
                check: RuleCheck::Pattern {
                    regex: "^[A-Z]{2}$".into(),
                },
                severity: MessageSeverity::Info,
            },
        ]
    }

    #[tokio::test]
    async fn test_one_outcome_per_violated_rule() {
        let (data, mapping) = dataset(
            &["tracking_code", "declared_value", "weight_kg", "destination_state"],
            vec![
                vec!["SM1234567890BR", "120,00", "1.5", "SP"],
                vec!["SM1234567891BR", "9.999,00", "45", "Sao Paulo"],
                vec!["SM1234567892BR", "", "abc", "RJ"],
            ],
        );
        let validator = BusinessRuleValidator::new(&rules()).unwrap();

        let report = completed_report(&validator, &data, &mapping).await;
        assert_eq!(report.outcomes.len(), 3);
        assert!(report.outcomes.iter().all(|o| o.item == 1));
        assert_eq!(report.outcomes[0].payload.severity(), MessageSeverity::Error);

        let ValidatorSummary::BusinessRules {
            violating_records,
            rules,
            ..
        } = report.summary
        else {
            panic!("expected rule summary");
        };
        assert_eq!(violating_records, 1);
        assert!(rules.iter().all(|r| r.violations == 1));
    }

    #[test]
    fn test_invalid_regex_is_rejected() {
        let rule = BusinessRule {
            id: "broken".into(),
            name: "Broken".into(),
            field: CanonicalField::Notes,
            check: RuleCheck::Pattern { regex: "([".into() },
            severity: MessageSeverity::Warning,
        };
        assert!(matches!(
            BusinessRuleValidator::new(&[rule]),
            Err(ValidatorError::InvalidRule(_))
        ));
    }

    #[test]
    fn test_rules_deserialize_from_toml() {
        #[derive(Deserialize)]
        struct File {
            business_rules: Vec<BusinessRule>,
        }
        let file: File = toml::from_str(
            r#"
            [[business_rules]]
            id = "qty"
            name = "Quantity range"
            field = "quantity"
            severity = "error"
            check = { type = "range", min = 1.0, max = 100.0 }
            "#,
        )
        .unwrap();
        assert_eq!(file.business_rules[0].check, RuleCheck::Range { min: 1.0, max: 100.0 });
        assert_eq!(file.business_rules[0].severity, MessageSeverity::Error);
    }
}
