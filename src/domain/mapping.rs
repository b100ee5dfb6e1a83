use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::path::Path;

use super::fields::CanonicalField;
use crate::common::error::{ImportError, Result};

/// Canonical field → source column assignment for one import session.
///
/// A field can point at only one column by construction. The reverse is not
/// enforced here: a column assigned to two fields is reported by
/// [`FieldMapping::columns_mapped_twice`] and blocks the commit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    fields: BTreeMap<CanonicalField, String>,
}

/// A starting suggestion produced by the external column detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSuggestion {
    pub column: String,
    pub field: CanonicalField,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: Option<String>,
}

impl FieldMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the starting mapping from detector suggestions.
    ///
    /// Suggestions below `min_confidence` are ignored. Highest confidence wins
    /// per field, and a column already claimed by a stronger suggestion is not
    /// reused.
    pub fn from_suggestions(suggestions: &[ColumnSuggestion], min_confidence: f64) -> Self {
        let mut ranked: Vec<&ColumnSuggestion> = suggestions
            .iter()
            .filter(|s| s.confidence >= min_confidence)
            .collect();
        ranked.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.column.cmp(&b.column))
        });

        let mut mapping = FieldMapping::new();
        let mut used_columns = HashSet::new();
        for suggestion in ranked {
            if mapping.fields.contains_key(&suggestion.field) || used_columns.contains(&suggestion.column) {
                continue;
            }
            used_columns.insert(suggestion.column.clone());
            mapping.fields.insert(suggestion.field, suggestion.column.clone());
        }
        mapping
    }

    /// Map headers whose name equals a canonical key (case and spacing insensitive).
    pub fn exact_from_headers(headers: &[String]) -> Self {
        let mut mapping = FieldMapping::new();
        for header in headers {
            let key = header.trim().to_lowercase().replace([' ', '-'], "_");
            if let Ok(field) = key.parse::<CanonicalField>() {
                mapping.fields.entry(field).or_insert_with(|| header.clone());
            }
        }
        mapping
    }

    pub fn assign(&mut self, field: CanonicalField, column: impl Into<String>) -> Option<String> {
        self.fields.insert(field, column.into())
    }

    pub fn unassign(&mut self, field: CanonicalField) -> Option<String> {
        self.fields.remove(&field)
    }

    pub fn column_for(&self, field: CanonicalField) -> Option<&str> {
        self.fields.get(&field).map(String::as_str)
    }

    pub fn is_mapped(&self, field: CanonicalField) -> bool {
        self.fields.contains_key(&field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (CanonicalField, &str)> {
        self.fields.iter().map(|(field, column)| (*field, column.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn missing_required(&self) -> Vec<CanonicalField> {
        CanonicalField::REQUIRED
            .iter()
            .copied()
            .filter(|field| !self.is_mapped(*field))
            .collect()
    }

    /// Columns assigned to more than one canonical field, with the fields involved.
    pub fn columns_mapped_twice(&self) -> BTreeMap<String, Vec<CanonicalField>> {
        let mut by_column: BTreeMap<String, Vec<CanonicalField>> = BTreeMap::new();
        for (field, column) in &self.fields {
            by_column.entry(column.clone()).or_default().push(*field);
        }
        by_column.retain(|_, fields| fields.len() > 1);
        by_column
    }

    /// Columns of the dataset that no field points at.
    pub fn unmapped_columns<'a>(&self, headers: &'a [String]) -> Vec<&'a str> {
        let mapped: BTreeSet<&str> = self.fields.values().map(String::as_str).collect();
        headers
            .iter()
            .map(String::as_str)
            .filter(|header| !mapped.contains(header))
            .collect()
    }
}

/// Reusable, persistable form of a field mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingTemplate {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub fields: BTreeMap<String, String>,
}

impl MappingTemplate {
    pub fn from_mapping(name: impl Into<String>, mapping: &FieldMapping) -> Self {
        Self {
            name: name.into(),
            created_at: Utc::now(),
            fields: mapping
                .iter()
                .map(|(field, column)| (field.key().to_string(), column.to_string()))
                .collect(),
        }
    }

    pub fn to_mapping(&self) -> Result<FieldMapping> {
        let mut mapping = FieldMapping::new();
        for (key, column) in &self.fields {
            let field: CanonicalField = key.parse()?;
            mapping.assign(field, column.clone());
        }
        Ok(mapping)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            ImportError::Config(format!(
                "Failed to read mapping template '{}': {}",
                path.display(),
                e
            ))
        })?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn suggestion(column: &str, field: CanonicalField, confidence: f64) -> ColumnSuggestion {
        ColumnSuggestion {
            column: column.to_string(),
            field,
            confidence,
            reasoning: None,
        }
    }

    #[test]
    fn test_from_suggestions_prefers_highest_confidence() {
        let mapping = FieldMapping::from_suggestions(
            &[
                suggestion("Email", CanonicalField::CustomerEmail, 0.95),
                suggestion("Contato", CanonicalField::CustomerEmail, 0.60),
                suggestion("Email", CanonicalField::CustomerName, 0.70),
                suggestion("Nome", CanonicalField::CustomerName, 0.65),
            ],
            0.5,
        );

        assert_eq!(mapping.column_for(CanonicalField::CustomerEmail), Some("Email"));
        // "Email" is already claimed, so the weaker name suggestion wins
        assert_eq!(mapping.column_for(CanonicalField::CustomerName), Some("Nome"));
        assert!(mapping.columns_mapped_twice().is_empty());
    }

    #[test]
    fn test_columns_mapped_twice_detected() {
        let mut mapping = FieldMapping::new();
        mapping.assign(CanonicalField::CustomerName, "Cliente");
        mapping.assign(CanonicalField::Notes, "Cliente");
        mapping.assign(CanonicalField::TrackingCode, "Rastreio");

        let twice = mapping.columns_mapped_twice();
        assert_eq!(twice.len(), 1);
        assert_eq!(twice["Cliente"], vec![CanonicalField::CustomerName, CanonicalField::Notes]);
    }

    #[test]
    fn test_missing_required() {
        let mut mapping = FieldMapping::new();
        mapping.assign(CanonicalField::TrackingCode, "codigo");
        assert_eq!(
            mapping.missing_required(),
            vec![CanonicalField::CustomerName, CanonicalField::CustomerEmail]
        );
    }

    #[test]
    fn test_exact_from_headers() {
        let headers = vec!["Tracking Code".to_string(), "customer-email".to_string(), "misc".to_string()];
        let mapping = FieldMapping::exact_from_headers(&headers);
        assert_eq!(mapping.column_for(CanonicalField::TrackingCode), Some("Tracking Code"));
        assert_eq!(mapping.column_for(CanonicalField::CustomerEmail), Some("customer-email"));
        assert_eq!(mapping.unmapped_columns(&headers), vec!["misc"]);
    }

    #[test]
    fn test_template_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("template.json");

        let mut mapping = FieldMapping::new();
        mapping.assign(CanonicalField::TrackingCode, "Rastreio");
        mapping.assign(CanonicalField::DestinationPostalCode, "CEP");

        MappingTemplate::from_mapping("marketplace-export", &mapping)
            .save(&path)
            .unwrap();
        let loaded = MappingTemplate::load(&path).unwrap();

        assert_eq!(loaded.name, "marketplace-export");
        assert_eq!(loaded.to_mapping().unwrap(), mapping);
    }
}
