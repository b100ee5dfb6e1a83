use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use super::fields::CanonicalField;
use super::mapping::FieldMapping;
use crate::common::error::{ImportError, Result};

/// One parsed source row. Values are positional against the shared header list.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    headers: Arc<[String]>,
    values: Vec<String>,
}

impl RawRow {
    pub fn new(headers: Arc<[String]>, mut values: Vec<String>) -> Self {
        values.resize(headers.len(), String::new());
        Self { headers, values }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.headers
            .iter()
            .position(|header| header == column)
            .and_then(|idx| self.values.get(idx))
            .map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().map(String::as_str))
    }
}

/// Headers plus rows as handed over by the file parser.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    headers: Arc<[String]>,
    rows: Vec<RawRow>,
}

/// On-disk shape accepted by the CLI: headers plus one object per row.
#[derive(Debug, Deserialize)]
struct DatasetFile {
    headers: Vec<String>,
    rows: Vec<BTreeMap<String, serde_json::Value>>,
}

impl Dataset {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let headers: Arc<[String]> = headers.into();
        let rows = rows
            .into_iter()
            .map(|values| RawRow::new(headers.clone(), values))
            .collect();
        Self { headers, rows }
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let file: DatasetFile = serde_json::from_str(content)?;
        if file.headers.is_empty() && !file.rows.is_empty() {
            return Err(ImportError::Dataset("rows present but header list is empty".to_string()));
        }

        let rows = file
            .rows
            .iter()
            .map(|row| {
                file.headers
                    .iter()
                    .map(|header| match row.get(header) {
                        Some(serde_json::Value::String(s)) => s.clone(),
                        Some(serde_json::Value::Null) | None => String::new(),
                        Some(other) => other.to_string(),
                    })
                    .collect()
            })
            .collect();
        Ok(Self::new(file.headers, rows))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[RawRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Apply a mapping to every row, in input order.
    pub fn to_records(&self, mapping: &FieldMapping) -> Vec<CanonicalRecord> {
        self.rows
            .iter()
            .enumerate()
            .map(|(idx, row)| CanonicalRecord::from_row(idx, row, mapping))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Valid,
    Warning,
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageSeverity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMessage {
    pub severity: MessageSeverity,
    pub validator: String,
    pub text: String,
}

/// A row expressed in canonical fields, with its accumulated validation state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    /// Zero-based position of the source row.
    pub row: usize,
    pub values: BTreeMap<CanonicalField, String>,
    pub status: RecordStatus,
    pub messages: Vec<RecordMessage>,
}

impl CanonicalRecord {
    pub fn from_row(row_idx: usize, row: &RawRow, mapping: &FieldMapping) -> Self {
        let values = mapping
            .iter()
            .filter_map(|(field, column)| {
                let value = row.get(column)?.trim();
                (!value.is_empty()).then(|| (field, value.to_string()))
            })
            .collect();

        Self {
            row: row_idx,
            values,
            status: RecordStatus::Valid,
            messages: Vec::new(),
        }
    }

    /// Non-empty value of a field.
    pub fn get(&self, field: CanonicalField) -> Option<&str> {
        self.values.get(&field).map(String::as_str)
    }

    pub fn tracking_code(&self) -> Option<&str> {
        self.get(CanonicalField::TrackingCode)
    }

    /// Record a message and fold it into the status.
    /// Errors make the record invalid; warnings only downgrade a valid record.
    pub fn push_message(&mut self, severity: MessageSeverity, validator: &str, text: impl Into<String>) {
        self.status = match (severity, self.status) {
            (MessageSeverity::Error, _) => RecordStatus::Invalid,
            (MessageSeverity::Warning, RecordStatus::Valid) => RecordStatus::Warning,
            (_, current) => current,
        };
        self.messages.push(RecordMessage {
            severity,
            validator: validator.to_string(),
            text: text.into(),
        });
    }

    pub fn is_accepted(&self) -> bool {
        self.status != RecordStatus::Invalid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset() -> Dataset {
        Dataset::new(
            vec!["Rastreio".into(), "Cliente".into(), "Email".into()],
            vec![
                vec!["SM1234567890BR".into(), " Ana ".into(), "ana@example.com".into()],
                vec!["SM1234567891BR".into(), "".into()],
            ],
        )
    }

    #[test]
    fn test_raw_row_pads_missing_values() {
        let data = dataset();
        assert_eq!(data.rows()[1].get("Email"), Some(""));
        assert_eq!(data.rows()[1].get("Unknown"), None);
    }

    #[test]
    fn test_to_records_trims_and_skips_empty() {
        let mut mapping = FieldMapping::new();
        mapping.assign(CanonicalField::TrackingCode, "Rastreio");
        mapping.assign(CanonicalField::CustomerName, "Cliente");

        let records = dataset().to_records(&mapping);
        assert_eq!(records[0].get(CanonicalField::CustomerName), Some("Ana"));
        assert_eq!(records[1].get(CanonicalField::CustomerName), None);
        assert_eq!(records[1].row, 1);
    }

    #[test]
    fn test_status_folding() {
        let mut mapping = FieldMapping::new();
        mapping.assign(CanonicalField::TrackingCode, "Rastreio");
        let mut record = dataset().to_records(&mapping).remove(0);

        record.push_message(MessageSeverity::Info, "format", "note");
        assert_eq!(record.status, RecordStatus::Valid);
        record.push_message(MessageSeverity::Warning, "format", "soft");
        assert_eq!(record.status, RecordStatus::Warning);
        record.push_message(MessageSeverity::Error, "required", "hard");
        assert_eq!(record.status, RecordStatus::Invalid);
        record.push_message(MessageSeverity::Warning, "fraud", "late warning");
        assert_eq!(record.status, RecordStatus::Invalid);
        assert!(!record.is_accepted());
    }

    #[test]
    fn test_from_json_stringifies_numbers() {
        let data = Dataset::from_json(
            r#"{"headers": ["code", "qty"], "rows": [{"code": "A1", "qty": 3}, {"code": null}]}"#,
        )
        .unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data.rows()[0].get("qty"), Some("3"));
        assert_eq!(data.rows()[1].get("code"), Some(""));
    }
}
