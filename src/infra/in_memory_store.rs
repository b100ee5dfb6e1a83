use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::app::ports::{AuditEntry, ImportStore, NewShipment, StoreError, StoredShipment};
use crate::domain::CanonicalField;

/// Failures injected for one insert batch.
#[derive(Debug, Clone)]
struct ScriptedFailure {
    remaining: u32,
    code: String,
}

#[derive(Debug, Default)]
struct StoreState {
    shipments: Vec<StoredShipment>,
    by_key: HashMap<String, String>,
    audit: Vec<AuditEntry>,
    insert_calls: usize,
    lookup_calls: usize,
    /// 1-based ordinal of distinct batches seen; retries of a batch keep its ordinal
    batch_ordinal: usize,
    last_batch_key: Option<String>,
    scripted: HashMap<usize, ScriptedFailure>,
    lookup_error: Option<String>,
    audit_error: Option<String>,
}

/// In-memory storage for the CLI, demos and tests.
///
/// Inserts honour idempotency keys: a shipment whose key is already stored is
/// not inserted again and its existing id is returned.
#[derive(Debug, Default)]
pub struct InMemoryImportStore {
    state: Mutex<StoreState>,
}

impl InMemoryImportStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-existing shipments, as if imported earlier.
    pub fn with_existing(existing: Vec<StoredShipment>) -> Self {
        Self {
            state: Mutex::new(StoreState {
                shipments: existing,
                ..Default::default()
            }),
        }
    }

    /// Fail the `ordinal`-th distinct batch (1-based) `times` times with `code`.
    pub async fn fail_batch(&self, ordinal: usize, times: u32, code: &str) {
        let mut state = self.state.lock().await;
        state.scripted.insert(
            ordinal,
            ScriptedFailure {
                remaining: times,
                code: code.to_string(),
            },
        );
    }

    pub async fn fail_lookups(&self, reason: Option<&str>) {
        self.state.lock().await.lookup_error = reason.map(str::to_string);
    }

    pub async fn fail_audit(&self, reason: Option<&str>) {
        self.state.lock().await.audit_error = reason.map(str::to_string);
    }

    pub async fn shipment_count(&self) -> usize {
        self.state.lock().await.shipments.len()
    }

    pub async fn audit_entries(&self) -> Vec<AuditEntry> {
        self.state.lock().await.audit.clone()
    }

    pub async fn insert_calls(&self) -> usize {
        self.state.lock().await.insert_calls
    }

    pub async fn lookup_calls(&self) -> usize {
        self.state.lock().await.lookup_calls
    }
}

#[async_trait]
impl ImportStore for InMemoryImportStore {
    async fn find_by_tracking_codes(&self, codes: &[String]) -> Result<Vec<StoredShipment>, StoreError> {
        let mut state = self.state.lock().await;
        state.lookup_calls += 1;
        if let Some(reason) = &state.lookup_error {
            return Err(StoreError::new("lookup_unavailable", reason.clone()));
        }

        let wanted: Vec<String> = codes.iter().map(|c| c.trim().to_uppercase()).collect();
        let found: Vec<StoredShipment> = state
            .shipments
            .iter()
            .filter(|s| wanted.contains(&s.tracking_code.to_uppercase()))
            .cloned()
            .collect();
        debug!(requested = codes.len(), found = found.len(), "Bulk tracking code lookup");
        Ok(found)
    }

    async fn insert_batch(&self, shipments: &[NewShipment]) -> Result<Vec<String>, StoreError> {
        let mut state = self.state.lock().await;
        state.insert_calls += 1;

        let first_key = shipments.first().map(|s| s.idempotency_key.clone());
        if first_key != state.last_batch_key {
            state.batch_ordinal += 1;
            state.last_batch_key = first_key;
        }
        let ordinal = state.batch_ordinal;
        if let Some(failure) = state.scripted.get_mut(&ordinal) {
            if failure.remaining > 0 {
                failure.remaining -= 1;
                return Err(StoreError::new(
                    failure.code.clone(),
                    format!("scripted failure for batch {}", ordinal),
                ));
            }
        }

        let mut ids = Vec::with_capacity(shipments.len());
        for shipment in shipments {
            if let Some(id) = state.by_key.get(&shipment.idempotency_key) {
                ids.push(id.clone());
                continue;
            }
            let id = Uuid::new_v4().to_string();
            state.by_key.insert(shipment.idempotency_key.clone(), id.clone());
            state.shipments.push(StoredShipment {
                id: id.clone(),
                tracking_code: shipment.tracking_code().unwrap_or_default().to_string(),
                customer_email: shipment.fields.get(&CanonicalField::CustomerEmail).cloned(),
                order_number: shipment.fields.get(&CanonicalField::OrderNumber).cloned(),
            });
            ids.push(id);
        }
        debug!(batch = ordinal, inserted = ids.len(), "Batch stored");
        Ok(ids)
    }

    async fn append_audit(&self, entries: &[AuditEntry]) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if let Some(reason) = &state.audit_error {
            return Err(StoreError::new("audit_unavailable", reason.clone()));
        }
        state.audit.extend_from_slice(entries);
        Ok(())
    }
}
