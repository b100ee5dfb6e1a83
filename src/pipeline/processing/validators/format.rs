//! Value-shape checks for canonical fields.

use async_trait::async_trait;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future;

use super::{
    completed, OutcomePayload, RecordOutcome, ValidationContext, Validator, ValidatorError, ValidatorKind,
    ValidatorReport, ValidatorRun, ValidatorSummary,
};
use crate::domain::{CanonicalField, FieldFormat};
use crate::pipeline::engine::run_chunked;

static UPU_TRACKING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z]{2}\d{9,10}[A-Z]{2}$").unwrap());
static GENERIC_TRACKING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z0-9]{8,30}$").unwrap());
static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(\.[A-Za-z0-9\-]+)*\.[A-Za-z]{2,}$").unwrap());
// Plain amounts, or grouped thousands with the other separator before the cents.
// A lone 3-digit group ("12.345") could be either, so it is rejected.
static CURRENCY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^-?\d+([.,]\d{1,2})?$|^-?\d{1,3}(\.\d{3})+,\d{1,2}$|^-?\d{1,3}(,\d{3})+\.\d{1,2}$").unwrap()
});

pub fn is_valid_tracking_code(value: &str) -> bool {
    let upper = value.trim().to_uppercase();
    UPU_TRACKING.is_match(&upper) || GENERIC_TRACKING.is_match(&upper)
}

pub fn is_valid_email(value: &str) -> bool {
    EMAIL.is_match(value.trim())
}

fn digits(value: &str) -> Vec<u32> {
    value.chars().filter_map(|c| c.to_digit(10)).collect()
}

/// Digits-only form of a value, used for postal codes and phones.
pub fn digits_only(value: &str) -> String {
    value.chars().filter(char::is_ascii_digit).collect()
}

fn check_digit(digits: &[u32], weights: &[u32]) -> u32 {
    let sum: u32 = digits.iter().zip(weights).map(|(d, w)| d * w).sum();
    match sum % 11 {
        0 | 1 => 0,
        rest => 11 - rest,
    }
}

fn is_valid_cpf(d: &[u32]) -> bool {
    if d.iter().all(|x| *x == d[0]) {
        return false;
    }
    let first = check_digit(&d[..9], &[10, 9, 8, 7, 6, 5, 4, 3, 2]);
    let second = check_digit(&d[..10], &[11, 10, 9, 8, 7, 6, 5, 4, 3, 2]);
    first == d[9] && second == d[10]
}

fn is_valid_cnpj(d: &[u32]) -> bool {
    if d.iter().all(|x| *x == d[0]) {
        return false;
    }
    let first = check_digit(&d[..12], &[5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2]);
    let second = check_digit(&d[..13], &[6, 5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2]);
    first == d[12] && second == d[13]
}

/// CPF (11 digits) or CNPJ (14 digits), punctuation allowed, check digits verified.
pub fn is_valid_tax_id(value: &str) -> bool {
    if value.chars().any(|c| c.is_ascii_alphabetic()) {
        return false;
    }
    let d = digits(value);
    match d.len() {
        11 => is_valid_cpf(&d),
        14 => is_valid_cnpj(&d),
        _ => false,
    }
}

pub fn is_valid_postal_code(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.chars().all(|c| c.is_ascii_digit() || c == '-' || c == '.') && digits_only(trimmed).len() == 8
}

/// `YYYY-MM-DD` or `DD/MM/YYYY`.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%d/%m/%Y"))
        .ok()
}

pub fn is_valid_currency(value: &str) -> bool {
    let trimmed = value.trim();
    let amount = trimmed.strip_prefix("R$").unwrap_or(trimmed).trim();
    CURRENCY.is_match(amount)
}

pub fn is_valid_phone(value: &str) -> bool {
    let trimmed = value.trim();
    let allowed = trimmed
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, ' ' | '-' | '(' | ')' | '+'));
    let mut number = digits_only(trimmed);
    // Country prefix is optional
    if trimmed.starts_with('+') && number.starts_with("55") {
        number.drain(..2);
    }
    allowed && (10..=11).contains(&number.len())
}

/// Parse a decimal written with either `.` or `,` as the fraction separator.
pub fn parse_decimal(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    let amount = trimmed.strip_prefix("R$").unwrap_or(trimmed).trim();
    let normalized = match (amount.rfind('.'), amount.rfind(',')) {
        (Some(dot), Some(comma)) if comma > dot => amount.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => amount.replace(',', ""),
        (None, Some(_)) => amount.replace(',', "."),
        _ => amount.to_string(),
    };
    normalized.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Parse an amount only if it is a well-formed currency value.
pub fn parse_currency(value: &str) -> Option<f64> {
    is_valid_currency(value).then(|| parse_decimal(value)).flatten()
}

/// Numeric value of a field, read with the rules of its format.
pub fn parse_field_number(field: CanonicalField, value: &str) -> Option<f64> {
    match field.format() {
        FieldFormat::Currency => parse_currency(value),
        _ => parse_decimal(value),
    }
}

/// Whether `value` has the shape of `format`. `None` for free text.
pub fn matches_format(format: FieldFormat, value: &str) -> Option<bool> {
    let ok = match format {
        FieldFormat::TrackingCode => is_valid_tracking_code(value),
        FieldFormat::Email => is_valid_email(value),
        FieldFormat::TaxId => is_valid_tax_id(value),
        FieldFormat::PostalCode => is_valid_postal_code(value),
        FieldFormat::Date => parse_date(value).is_some(),
        FieldFormat::Currency => is_valid_currency(value),
        FieldFormat::Phone => is_valid_phone(value),
        FieldFormat::Number => parse_decimal(value).is_some(),
        FieldFormat::Text => return None,
    };
    Some(ok)
}

/// Minimum pass ratio per value format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatThresholds {
    pub tracking_code: f64,
    pub email: f64,
    pub tax_id: f64,
    pub postal_code: f64,
    pub date: f64,
    pub currency: f64,
    pub phone: f64,
}

impl Default for FormatThresholds {
    fn default() -> Self {
        Self {
            tracking_code: 0.80,
            email: 0.80,
            tax_id: 0.70,
            postal_code: 0.80,
            date: 0.70,
            currency: 0.80,
            phone: 0.60,
        }
    }
}

impl FormatThresholds {
    /// Threshold for a checked format; `None` means the format is not checked.
    pub fn for_format(&self, format: FieldFormat) -> Option<f64> {
        match format {
            FieldFormat::TrackingCode => Some(self.tracking_code),
            FieldFormat::Email => Some(self.email),
            FieldFormat::TaxId => Some(self.tax_id),
            FieldFormat::PostalCode => Some(self.postal_code),
            FieldFormat::Date => Some(self.date),
            FieldFormat::Currency => Some(self.currency),
            FieldFormat::Phone => Some(self.phone),
            FieldFormat::Number | FieldFormat::Text => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldFormatStats {
    pub field: CanonicalField,
    pub format: FieldFormat,
    /// Non-empty values seen.
    pub checked: usize,
    pub passed: usize,
    pub threshold: f64,
}

impl FieldFormatStats {
    pub fn ratio(&self) -> Option<f64> {
        (self.checked > 0).then(|| self.passed as f64 / self.checked as f64)
    }

    /// A field with no values has nothing to pass.
    pub fn passes(&self) -> bool {
        self.ratio().is_some_and(|ratio| ratio >= self.threshold)
    }
}

#[derive(Debug, Default)]
pub struct FormatValidator {
    thresholds: FormatThresholds,
}

impl FormatValidator {
    pub fn new(thresholds: FormatThresholds) -> Self {
        Self { thresholds }
    }
}

#[async_trait]
impl Validator for FormatValidator {
    fn kind(&self) -> ValidatorKind {
        ValidatorKind::Format
    }

    async fn run(&self, ctx: &ValidationContext<'_>) -> Result<ValidatorRun, ValidatorError> {
        let kind = self.kind();
        let mut stats: BTreeMap<CanonicalField, FieldFormatStats> = ctx
            .mapping
            .iter()
            .filter_map(|(field, _)| {
                let format = field.format();
                let threshold = self.thresholds.for_format(format)?;
                Some((
                    field,
                    FieldFormatStats {
                        field,
                        format,
                        checked: 0,
                        passed: 0,
                        threshold,
                    },
                ))
            })
            .collect();

        let run = run_chunked(
            ctx.records,
            ctx.chunking,
            Some(ctx.cancel),
            |chunk, _| {
                let mut outcomes: Vec<RecordOutcome> = Vec::new();
                for record in chunk {
                    for (field, entry) in stats.iter_mut() {
                        let Some(value) = record.get(*field) else {
                            continue;
                        };
                        entry.checked += 1;
                        if matches_format(entry.format, value) == Some(true) {
                            entry.passed += 1;
                        } else {
                            outcomes.push(RecordOutcome::fail(
                                record.row,
                                OutcomePayload::Format {
                                    field: *field,
                                    value: value.to_string(),
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
        let summary = ValidatorSummary::Format {
            fields: stats.into_values().collect(),
        };
        Ok(ValidatorRun::Completed(ValidatorReport::from_engine(kind, report, summary)))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{completed_report, dataset};
    use super::*;

    #[test]
    fn test_tracking_codes() {
        assert!(is_valid_tracking_code("SM1234567890BR"));
        assert!(is_valid_tracking_code("sm123456789br"));
        assert!(is_valid_tracking_code("JD014600006281934"));
        assert!(!is_valid_tracking_code("12-34"));
        assert!(!is_valid_tracking_code(""));
    }

    #[test]
    fn test_emails() {
        assert!(is_valid_email("ana.souza+loja@example.com.br"));
        assert!(!is_valid_email("ana@"));
        assert!(!is_valid_email("not an email"));
    }

    #[test]
    fn test_tax_ids() {
        assert!(is_valid_tax_id("529.982.247-25"));
        assert!(is_valid_tax_id("11.222.333/0001-81"));
        assert!(!is_valid_tax_id("529.982.247-24"));
        assert!(!is_valid_tax_id("111.111.111-11"));
        assert!(!is_valid_tax_id("12345"));
    }

    #[test]
    fn test_postal_codes_dates_and_phones() {
        assert!(is_valid_postal_code("01310-100"));
        assert!(is_valid_postal_code("01310100"));
        assert!(!is_valid_postal_code("1310-100"));

        assert_eq!(parse_date("2024-03-15"), NaiveDate::from_ymd_opt(2024, 3, 15));
        assert_eq!(parse_date("15/03/2024"), NaiveDate::from_ymd_opt(2024, 3, 15));
        assert_eq!(parse_date("2024-02-30"), None);

        assert!(is_valid_phone("(11) 98765-4321"));
        assert!(is_valid_phone("+55 11 3456-7890"));
        assert!(!is_valid_phone("12345"));
    }

    #[test]
    fn test_currency_and_decimals() {
        assert!(is_valid_currency("R$ 1.234,56"));
        assert!(is_valid_currency("99.9"));
        assert!(!is_valid_currency("12.345"));
        assert!(!is_valid_currency("1234.567"));
        assert!(!is_valid_currency("1.234.567"));
        assert!(!is_valid_currency("1,234,56"));
        assert!(!is_valid_currency("abc"));
        assert!(is_valid_currency("1,234,567.89"));
        assert!(is_valid_currency("-10,5"));
        assert_eq!(parse_currency("R$ 1.234,56"), Some(1234.56));
        assert_eq!(parse_currency("12.345"), None);
        assert_eq!(parse_field_number(CanonicalField::DeclaredValue, "12.345"), None);
        assert_eq!(parse_field_number(CanonicalField::WeightKg, "12.345"), Some(12.345));

        assert_eq!(parse_decimal("1.234,56"), Some(1234.56));
        assert_eq!(parse_decimal("1,234.56"), Some(1234.56));
        assert_eq!(parse_decimal("45,9"), Some(45.9));
        assert_eq!(parse_decimal("n/a"), None);
    }

    #[tokio::test]
    async fn test_ratio_below_threshold_and_record_outcomes() {
        let mut rows = Vec::new();
        for i in 0..10 {
            let phone = if i < 5 { "(11) 98765-4321" } else { "call me" };
            rows.push(vec!["SM1234567890BR", phone]);
        }
        let (data, mapping) = dataset(&["tracking_code", "customer_phone"], rows);

        let report = completed_report(&FormatValidator::default(), &data, &mapping).await;
        assert_eq!(report.outcomes.len(), 5);

        let ValidatorSummary::Format { fields } = report.summary else {
            panic!("expected format summary");
        };
        let phone = fields.iter().find(|s| s.field == CanonicalField::CustomerPhone).unwrap();
        assert_eq!(phone.ratio(), Some(0.5));
        assert!(!phone.passes());
        let tracking = fields.iter().find(|s| s.field == CanonicalField::TrackingCode).unwrap();
        assert!(tracking.passes());
    }

    #[tokio::test]
    async fn test_bad_tracking_code_is_record_error() {
        let (data, mapping) = dataset(&["tracking_code", "shipping_date"], vec![vec!["??", "yesterday"]]);
        let report = completed_report(&FormatValidator::default(), &data, &mapping).await;

        let severities: Vec<_> = report.outcomes.iter().map(|o| o.payload.severity()).collect();
        assert!(severities.contains(&crate::domain::MessageSeverity::Error));
        assert!(severities.contains(&crate::domain::MessageSeverity::Warning));
    }
}
