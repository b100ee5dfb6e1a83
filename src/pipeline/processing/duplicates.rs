//! Duplicate detection, within the batch and against the target store.
//!
//! The intra-batch pass groups records by normalized tracking code, order
//! number and email while the engine walks the chunks. The store pass then
//! issues a single bulk lookup with every distinct tracking code; one call per
//! record would not survive a ten-thousand-row import.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::app::ports::{ImportStore, StoredShipment};
use crate::domain::{CanonicalField, CanonicalRecord, MessageSeverity};
use crate::observability::metrics;
use crate::pipeline::engine::run_chunked;
use crate::pipeline::processing::commit::idempotency_key;
use crate::pipeline::processing::validators::{
    completed, OutcomePayload, RecordOutcome, ValidationContext, Validator, ValidatorError, ValidatorKind,
    ValidatorReport, ValidatorRun, ValidatorSummary,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateKey {
    TrackingCode,
    OrderNumber,
    Email,
}

impl DuplicateKey {
    pub const ALL: [DuplicateKey; 3] = [DuplicateKey::TrackingCode, DuplicateKey::OrderNumber, DuplicateKey::Email];

    pub fn field(&self) -> CanonicalField {
        match self {
            DuplicateKey::TrackingCode => CanonicalField::TrackingCode,
            DuplicateKey::OrderNumber => CanonicalField::OrderNumber,
            DuplicateKey::Email => CanonicalField::CustomerEmail,
        }
    }

    pub fn normalize(&self, value: &str) -> String {
        match self {
            DuplicateKey::TrackingCode => value.trim().to_uppercase(),
            DuplicateKey::OrderNumber => value.trim().to_string(),
            DuplicateKey::Email => value.trim().to_lowercase(),
        }
    }

    fn value_of(&self, record: &CanonicalRecord) -> Option<String> {
        record.get(self.field()).map(|v| self.normalize(v))
    }
}

/// Records sharing the same normalized key value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateGroup {
    pub key: DuplicateKey,
    pub value: String,
    pub rows: Vec<usize>,
}

impl DuplicateGroup {
    pub fn count(&self) -> usize {
        self.rows.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum Counterpart {
    Stored { id: String },
    Batch { row: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchConfidence {
    /// Every identity key agrees; the record would produce the same shipment.
    Exact,
    High,
    Low,
}

/// A record paired with something it duplicates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateCandidate {
    pub row: usize,
    pub counterpart: Counterpart,
    pub key: DuplicateKey,
    pub confidence: MatchConfidence,
    /// Other keys that agree between the pair.
    pub also_matched: Vec<DuplicateKey>,
}

impl DuplicateCandidate {
    /// A tracking code already in the store, or an exact repeat of an earlier
    /// row, keeps the record out of the commit.
    pub fn severity(&self) -> MessageSeverity {
        match (&self.counterpart, self.confidence) {
            (Counterpart::Stored { .. }, MatchConfidence::Exact | MatchConfidence::High) => MessageSeverity::Error,
            (Counterpart::Batch { .. }, MatchConfidence::Exact) => MessageSeverity::Error,
            _ => MessageSeverity::Warning,
        }
    }

    pub fn describe(&self) -> String {
        let key = self.key.field().label();
        match &self.counterpart {
            Counterpart::Stored { id } => match self.confidence {
                MatchConfidence::Exact | MatchConfidence::High => {
                    format!("Already imported as shipment {} (same {})", id, key.to_lowercase())
                }
                MatchConfidence::Low => format!("{} matches stored shipment {}", key, id),
            },
            Counterpart::Batch { row } => match self.confidence {
                MatchConfidence::Exact => format!("Exact repeat of row {}; only the first is imported", row + 1),
                _ => format!("{} repeats row {}", key, row + 1),
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DuplicateSummary {
    pub groups: Vec<DuplicateGroup>,
    pub store_matches: usize,
    pub store_high_confidence: usize,
    /// Rows identical to an earlier row on every identity key.
    pub exact_repeats: usize,
    /// Set when the store lookup failed; intra-batch results are still valid.
    pub store_lookup_error: Option<String>,
}

impl DuplicateSummary {
    pub fn groups_for(&self, key: DuplicateKey) -> impl Iterator<Item = &DuplicateGroup> {
        self.groups.iter().filter(move |g| g.key == key)
    }

    pub fn is_clean(&self) -> bool {
        self.groups.is_empty() && self.store_matches == 0 && self.store_lookup_error.is_none()
    }
}

fn agreeing_keys(a: &CanonicalRecord, b: &CanonicalRecord, except: DuplicateKey) -> Vec<DuplicateKey> {
    DuplicateKey::ALL
        .iter()
        .copied()
        .filter(|key| *key != except)
        .filter(|key| matches!((key.value_of(a), key.value_of(b)), (Some(x), Some(y)) if x == y))
        .collect()
}

fn agreeing_with_stored(record: &CanonicalRecord, stored: &StoredShipment) -> Vec<DuplicateKey> {
    let mut keys = Vec::new();
    if let (Some(a), Some(b)) = (DuplicateKey::Email.value_of(record), stored.customer_email.as_deref()) {
        if a == DuplicateKey::Email.normalize(b) {
            keys.push(DuplicateKey::Email);
        }
    }
    if let (Some(a), Some(b)) = (DuplicateKey::OrderNumber.value_of(record), stored.order_number.as_deref()) {
        if a == DuplicateKey::OrderNumber.normalize(b) {
            keys.push(DuplicateKey::OrderNumber);
        }
    }
    keys
}

fn confidence_for(also_matched: &[DuplicateKey]) -> MatchConfidence {
    if also_matched.is_empty() {
        MatchConfidence::Low
    } else {
        MatchConfidence::High
    }
}

pub struct DuplicateDetector {
    store: Arc<dyn ImportStore>,
}

impl DuplicateDetector {
    pub fn new(store: Arc<dyn ImportStore>) -> Self {
        Self { store }
    }

    /// Per-record findings for tracking-code and order-number groups.
    /// Email groups only surface as a dataset-level note.
    ///
    /// A later row whose idempotency key equals an earlier row of its tracking
    /// group is an exact repeat and is not committed.
    fn batch_outcomes(records: &[CanonicalRecord], groups: &[DuplicateGroup]) -> Vec<RecordOutcome> {
        let mut outcomes = Vec::new();
        for group in groups.iter().filter(|g| g.key != DuplicateKey::Email) {
            let keys: Vec<String> = if group.key == DuplicateKey::TrackingCode {
                group.rows.iter().map(|&r| idempotency_key(&records[r])).collect()
            } else {
                Vec::new()
            };
            for (position, &row) in group.rows.iter().enumerate() {
                let earlier = keys
                    .get(position)
                    .and_then(|key| keys[..position].iter().position(|k| k == key))
                    .map(|first| group.rows[first]);
                if let Some(first) = earlier {
                    outcomes.push(RecordOutcome::fail(
                        row,
                        OutcomePayload::Duplicate(DuplicateCandidate {
                            row,
                            counterpart: Counterpart::Batch { row: first },
                            key: group.key,
                            confidence: MatchConfidence::Exact,
                            also_matched: agreeing_keys(&records[row], &records[first], group.key),
                        }),
                    ));
                    continue;
                }
                let Some(&other) = group.rows.iter().find(|r| **r != row) else {
                    continue;
                };
                let also_matched = agreeing_keys(&records[row], &records[other], group.key);
                outcomes.push(RecordOutcome::fail(
                    row,
                    OutcomePayload::Duplicate(DuplicateCandidate {
                        row,
                        counterpart: Counterpart::Batch { row: other },
                        key: group.key,
                        confidence: confidence_for(&also_matched),
                        also_matched,
                    }),
                ));
            }
        }
        outcomes
    }

    fn store_outcomes(records: &[CanonicalRecord], stored: &[StoredShipment]) -> Vec<RecordOutcome> {
        let mut by_code: HashMap<String, &StoredShipment> = HashMap::new();
        for shipment in stored {
            by_code
                .entry(DuplicateKey::TrackingCode.normalize(&shipment.tracking_code))
                .or_insert(shipment);
        }

        records
            .iter()
            .filter_map(|record| {
                let code = DuplicateKey::TrackingCode.value_of(record)?;
                let shipment = by_code.get(&code)?;
                let also_matched = agreeing_with_stored(record, shipment);
                // The tracking code is the shipment's primary key, so a stored match
                // is never weak, whatever else agrees
                let confidence = if also_matched.is_empty() {
                    MatchConfidence::High
                } else {
                    MatchConfidence::Exact
                };
                Some(RecordOutcome::fail(
                    record.row,
                    OutcomePayload::Duplicate(DuplicateCandidate {
                        row: record.row,
                        counterpart: Counterpart::Stored {
                            id: shipment.id.clone(),
                        },
                        key: DuplicateKey::TrackingCode,
                        confidence,
                        also_matched,
                    }),
                ))
            })
            .collect()
    }
}

#[async_trait]
impl Validator for DuplicateDetector {
    fn kind(&self) -> ValidatorKind {
        ValidatorKind::Duplicates
    }

    async fn run(&self, ctx: &ValidationContext<'_>) -> Result<ValidatorRun, ValidatorError> {
        let kind = self.kind();
        let mut seen: BTreeMap<(DuplicateKey, String), Vec<usize>> = BTreeMap::new();

        let run = run_chunked(
            ctx.records,
            ctx.chunking,
            Some(ctx.cancel),
            |chunk, _| {
                for record in chunk {
                    for key in DuplicateKey::ALL {
                        if let Some(value) = key.value_of(record) {
                            seen.entry((key, value)).or_default().push(record.row);
                        }
                    }
                }
                future::ready(Ok::<Vec<RecordOutcome>, ValidatorError>(Vec::new()))
            },
            |progress| ctx.report_progress(kind, progress),
        )
        .await?;

        let Some(engine_report) = completed(run) else {
            return Ok(ValidatorRun::Cancelled);
        };

        let groups: Vec<DuplicateGroup> = seen
            .into_iter()
            .filter(|(_, rows)| rows.len() > 1)
            .map(|((key, value), rows)| DuplicateGroup { key, value, rows })
            .collect();
        for group in &groups {
            metrics::duplicates::group_found(group.key.field().key());
        }

        let codes: Vec<String> = ctx
            .records
            .iter()
            .filter_map(|r| DuplicateKey::TrackingCode.value_of(r))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut store_lookup_error = None;
        let stored = if codes.is_empty() {
            Vec::new()
        } else {
            debug!(codes = codes.len(), "Looking up tracking codes in store");
            let lookup = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return Ok(ValidatorRun::Cancelled),
                result = self.store.find_by_tracking_codes(&codes) => result,
            };
            match lookup {
                Ok(stored) => stored,
                Err(e) => {
                    warn!(error = %e, "Store duplicate lookup failed");
                    store_lookup_error = Some(e.to_string());
                    Vec::new()
                }
            }
        };

        let mut outcomes = Self::batch_outcomes(ctx.records, &groups);
        let store_found = Self::store_outcomes(ctx.records, &stored);
        let exact_repeats = outcomes
            .iter()
            .filter(|o| matches!(&o.payload, OutcomePayload::Duplicate(c) if c.confidence == MatchConfidence::Exact))
            .count();
        let store_high_confidence = store_found
            .iter()
            .filter(|o| matches!(&o.payload, OutcomePayload::Duplicate(c) if c.confidence != MatchConfidence::Low))
            .count();
        let store_matches = store_found.len();
        metrics::duplicates::store_matches(store_matches);
        outcomes.extend(store_found);
        outcomes.sort_by_key(|o| o.item);

        let summary = DuplicateSummary {
            groups,
            store_matches,
            store_high_confidence,
            exact_repeats,
            store_lookup_error,
        };
        let mut report = ValidatorReport::from_engine(kind, engine_report, ValidatorSummary::Duplicates(summary));
        report.outcomes = outcomes;
        Ok(ValidatorRun::Completed(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ports::{AuditEntry, NewShipment, StoreError};
    use crate::pipeline::processing::validators::test_support::{completed_report, dataset};

    struct FixedStore {
        stored: Vec<StoredShipment>,
        fail: bool,
        calls: std::sync::atomic::AtomicUsize,
    }

    impl FixedStore {
        fn new(stored: Vec<StoredShipment>) -> Self {
            Self {
                stored,
                fail: false,
                calls: Default::default(),
            }
        }
    }

    #[async_trait]
    impl ImportStore for FixedStore {
        async fn find_by_tracking_codes(&self, codes: &[String]) -> Result<Vec<StoredShipment>, StoreError> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if self.fail {
                return Err(StoreError::new("unavailable", "store offline"));
            }
            Ok(self
                .stored
                .iter()
                .filter(|s| codes.contains(&s.tracking_code))
                .cloned()
                .collect())
        }

        async fn insert_batch(&self, _shipments: &[NewShipment]) -> Result<Vec<String>, StoreError> {
            Ok(Vec::new())
        }

        async fn append_audit(&self, _entries: &[AuditEntry]) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn summary_of(report: &ValidatorReport) -> &DuplicateSummary {
        match &report.summary {
            ValidatorSummary::Duplicates(summary) => summary,
            other => panic!("unexpected summary {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_intra_batch_tracking_group_is_symmetric() {
        let (data, mapping) = dataset(
            &["tracking_code", "customer_email"],
            vec![
                vec!["SM1234567890BR", "ana@example.com"],
                vec!["sm1234567890br", "bia@example.com"],
                vec!["SM0000000001BR", "caio@example.com"],
            ],
        );
        let detector = DuplicateDetector::new(Arc::new(FixedStore::new(Vec::new())));

        let report = completed_report(&detector, &data, &mapping).await;
        let summary = summary_of(&report);
        let group = summary.groups_for(DuplicateKey::TrackingCode).next().unwrap();
        assert_eq!(group.value, "SM1234567890BR");
        assert_eq!(group.count(), 2);

        let flagged: Vec<usize> = report.outcomes.iter().map(|o| o.item).collect();
        assert_eq!(flagged, vec![0, 1]);
        assert!(report
            .outcomes
            .iter()
            .all(|o| o.payload.severity() == MessageSeverity::Warning));
    }

    #[tokio::test]
    async fn test_store_pass_uses_one_bulk_lookup() {
        let (data, mapping) = dataset(
            &["tracking_code", "customer_email"],
            vec![
                vec!["SM1234567890BR", "ana@example.com"],
                vec!["SM1234567891BR", "bia@example.com"],
                vec!["SM1234567892BR", "caio@example.com"],
            ],
        );
        let store = Arc::new(FixedStore::new(vec![
            StoredShipment {
                id: "shp-1".into(),
                tracking_code: "SM1234567890BR".into(),
                customer_email: Some("ANA@example.com".into()),
                order_number: None,
            },
            StoredShipment {
                id: "shp-2".into(),
                tracking_code: "SM1234567891BR".into(),
                customer_email: Some("other@example.com".into()),
                order_number: None,
            },
        ]));
        let detector = DuplicateDetector::new(store.clone());

        let report = completed_report(&detector, &data, &mapping).await;
        assert_eq!(store.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        let summary = summary_of(&report);
        assert_eq!(summary.store_matches, 2);
        assert_eq!(summary.store_high_confidence, 2);

        // A tracking code match alone is enough to skip the record
        assert!(report
            .outcomes
            .iter()
            .all(|o| o.payload.severity() == MessageSeverity::Error));
        let confidences: Vec<MatchConfidence> = report
            .outcomes
            .iter()
            .filter_map(|o| match &o.payload {
                OutcomePayload::Duplicate(c) => Some(c.confidence),
                _ => None,
            })
            .collect();
        assert_eq!(confidences, vec![MatchConfidence::Exact, MatchConfidence::High]);
    }

    #[tokio::test]
    async fn test_exact_repeat_in_batch_keeps_only_first_row() {
        let (data, mapping) = dataset(
            &["tracking_code", "customer_email"],
            vec![
                vec!["SM1234567890BR", "ana@example.com"],
                vec!["SM1234567890BR", "ana@example.com"],
                vec!["SM1234567890BR", "bia@example.com"],
            ],
        );
        let detector = DuplicateDetector::new(Arc::new(FixedStore::new(Vec::new())));

        let report = completed_report(&detector, &data, &mapping).await;
        let severities: Vec<(usize, MessageSeverity)> = report
            .outcomes
            .iter()
            .map(|o| (o.item, o.payload.severity()))
            .collect();
        assert_eq!(
            severities,
            vec![
                (0, MessageSeverity::Warning),
                (1, MessageSeverity::Error),
                (2, MessageSeverity::Warning),
            ]
        );
        assert_eq!(summary_of(&report).exact_repeats, 1);
    }

    #[tokio::test]
    async fn test_store_failure_keeps_batch_results() {
        let (data, mapping) = dataset(
            &["tracking_code", "order_number"],
            vec![vec!["SM1234567890BR", "PED-1"], vec!["SM1234567891BR", "PED-1"]],
        );
        let store = FixedStore {
            stored: Vec::new(),
            fail: true,
            calls: Default::default(),
        };
        let detector = DuplicateDetector::new(Arc::new(store));

        let report = completed_report(&detector, &data, &mapping).await;
        let summary = summary_of(&report);
        assert!(summary.store_lookup_error.is_some());
        assert_eq!(summary.groups_for(DuplicateKey::OrderNumber).count(), 1);
        assert_eq!(report.outcomes.len(), 2);
    }
}
