use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use uuid::Uuid;

use crate::domain::CanonicalField;

/// Failure reported by a storage backend. `code` feeds the commit error table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError {
    pub code: String,
    pub message: String,
}

impl StoreError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for StoreError {}

/// A shipment already present in the target store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredShipment {
    pub id: String,
    pub tracking_code: String,
    pub customer_email: Option<String>,
    pub order_number: Option<String>,
}

/// A shipment ready to be inserted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewShipment {
    pub idempotency_key: String,
    pub source_row: usize,
    pub fields: BTreeMap<CanonicalField, String>,
}

impl NewShipment {
    pub fn tracking_code(&self) -> Option<&str> {
        self.fields.get(&CanonicalField::TrackingCode).map(String::as_str)
    }
}

/// One audit line appended per committed record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub import_id: Uuid,
    pub shipment_id: String,
    pub source_row: usize,
    pub action: String,
    pub recorded_at: DateTime<Utc>,
}

/// The contract the pipeline needs from persistent storage.
#[async_trait]
pub trait ImportStore: Send + Sync {
    /// One bulk lookup for many tracking codes.
    async fn find_by_tracking_codes(&self, codes: &[String]) -> Result<Vec<StoredShipment>, StoreError>;

    /// Insert a batch; returns the store ids in input order.
    async fn insert_batch(&self, shipments: &[NewShipment]) -> Result<Vec<String>, StoreError>;

    async fn append_audit(&self, entries: &[AuditEntry]) -> Result<(), StoreError>;
}

/// Recognizes carrier codes. Called once per lookup chunk.
#[async_trait]
pub trait CarrierLookupPort: Send + Sync {
    async fn recognize(&self, codes: &[String]) -> Result<HashSet<String>, String>;
}

/// Checks postal-code existence. Keys of the result are the digits-only codes.
#[async_trait]
pub trait PostalCodeLookupPort: Send + Sync {
    async fn exists(&self, codes: &[String]) -> Result<HashMap<String, bool>, String>;
}

#[async_trait]
pub trait RateLimiterPort: Send + Sync {
    async fn acquire(&self);
}
