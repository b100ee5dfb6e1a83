use serde::Serialize;
use std::collections::BTreeMap;

use crate::domain::{CanonicalField, FieldMapping};

/// Mapping-level problems, evaluated once per run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StructuralReport {
    pub missing_required: Vec<CanonicalField>,
    pub columns_mapped_twice: BTreeMap<String, Vec<CanonicalField>>,
}

impl StructuralReport {
    pub fn evaluate(mapping: &FieldMapping) -> Self {
        Self {
            missing_required: mapping.missing_required(),
            columns_mapped_twice: mapping.columns_mapped_twice(),
        }
    }

    /// At least one required field is mapped, so record validators have
    /// something to work with.
    pub fn has_required_coverage(&self) -> bool {
        self.missing_required.len() < CanonicalField::REQUIRED.len()
    }

    pub fn has_unique_mapping(&self) -> bool {
        self.columns_mapped_twice.is_empty()
    }

    pub fn is_clean(&self) -> bool {
        self.missing_required.is_empty() && self.has_unique_mapping()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_required_reported() {
        let mut mapping = FieldMapping::new();
        mapping.assign(CanonicalField::TrackingCode, "Rastreio");
        mapping.assign(CanonicalField::CustomerName, "Cliente");

        let report = StructuralReport::evaluate(&mapping);
        assert_eq!(report.missing_required, vec![CanonicalField::CustomerEmail]);
        assert!(report.has_required_coverage());
        assert!(!report.is_clean());
    }

    #[test]
    fn test_zero_required_coverage() {
        let mut mapping = FieldMapping::new();
        mapping.assign(CanonicalField::Notes, "Obs");

        let report = StructuralReport::evaluate(&mapping);
        assert!(!report.has_required_coverage());
        assert_eq!(report.missing_required.len(), 3);
    }

    #[test]
    fn test_column_mapped_twice() {
        let mut mapping = FieldMapping::new();
        mapping.assign(CanonicalField::OrderNumber, "Pedido");
        mapping.assign(CanonicalField::InvoiceNumber, "Pedido");

        let report = StructuralReport::evaluate(&mapping);
        assert!(!report.has_unique_mapping());
        assert_eq!(
            report.columns_mapped_twice.get("Pedido"),
            Some(&vec![CanonicalField::OrderNumber, CanonicalField::InvoiceNumber])
        );
    }
}
