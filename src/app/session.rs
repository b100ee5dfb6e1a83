//! Import session: owns the current mapping and the last published report.
//!
//! Mapping edits bump a version and cancel the running validation at once.
//! A trailing-edge debouncer starts a fresh run once edits have been quiet for
//! the configured window. A run publishes only if its token is still live and
//! its version is still current when it finishes; everything else is dropped.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

use crate::app::validation_use_case::ValidatorSet;
use crate::common::constants::SESSION_EVENT_CAPACITY;
use crate::common::error::{ImportError, Result};
use crate::config::ImportConfig;
use crate::domain::{Dataset, FieldMapping, MappingTemplate};
use crate::observability::metrics;
use crate::pipeline::engine::{ChunkOptions, ChunkProgress};
use crate::pipeline::processing::commit::{CommitExecutor, ImportResult};
use crate::pipeline::processing::quality_gate::{QualityAggregator, QualityReport, RunOutcome};
use crate::pipeline::processing::validators::{ValidatorKind, ValidatorResult};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Progress {
        version: u64,
        validator: ValidatorKind,
        progress: ChunkProgress,
    },
    ValidatorDegraded {
        version: u64,
        validator: ValidatorKind,
        reason: String,
    },
    ReportPublished {
        version: u64,
        score: u8,
        is_valid: bool,
    },
    RunCancelled {
        version: u64,
    },
}

struct SessionState {
    mapping: FieldMapping,
    version: u64,
    report: Option<Arc<QualityReport>>,
    active: Option<(u64, CancellationToken)>,
}

struct SessionInner {
    id: Uuid,
    dataset: Arc<Dataset>,
    validators: ValidatorSet,
    aggregator: QualityAggregator,
    chunking: ChunkOptions,
    state: Mutex<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    commit_in_flight: AtomicBool,
    /// Parent of every run token; cancelled on shutdown
    closed: CancellationToken,
}

pub struct ImportSession {
    inner: Arc<SessionInner>,
    changes: mpsc::UnboundedSender<()>,
}

/// Clears the in-flight flag when the commit ends, however it ends.
struct CommitGuard<'a>(&'a AtomicBool);

impl Drop for CommitGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ImportSession {
    /// Must be called inside a tokio runtime; the debouncer is spawned here.
    pub fn new(dataset: Arc<Dataset>, mapping: FieldMapping, validators: ValidatorSet, config: &ImportConfig) -> Self {
        let (events, _) = broadcast::channel(SESSION_EVENT_CAPACITY);
        let inner = Arc::new(SessionInner {
            id: Uuid::new_v4(),
            dataset,
            validators,
            aggregator: QualityAggregator::new(config.validation.preview_rows),
            chunking: config.chunk_options(),
            state: Mutex::new(SessionState {
                mapping,
                version: 1,
                report: None,
                active: None,
            }),
            events,
            commit_in_flight: AtomicBool::new(false),
            closed: CancellationToken::new(),
        });

        let (changes, rx) = mpsc::unbounded_channel();
        tokio::spawn(debounce_loop(
            Arc::downgrade(&inner),
            rx,
            config.debounce(),
            inner.closed.clone(),
        ));
        info!(session = %inner.id, rows = inner.dataset.len(), "Import session opened");

        Self { inner, changes }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub async fn mapping(&self) -> FieldMapping {
        self.inner.state.lock().await.mapping.clone()
    }

    pub async fn version(&self) -> u64 {
        self.inner.state.lock().await.version
    }

    /// Last published report, which may belong to an older mapping version.
    pub async fn current_report(&self) -> Option<Arc<QualityReport>> {
        self.inner.state.lock().await.report.clone()
    }

    /// Replace the mapping. The running validation is cancelled now; a new one
    /// starts once edits have been quiet for the debounce window.
    pub async fn update_mapping(&self, mapping: FieldMapping) -> Result<u64> {
        let version = {
            let mut state = self.inner.state.lock().await;
            self.inner.ensure_open()?;
            state.version += 1;
            state.mapping = mapping;
            if let Some((running, token)) = state.active.take() {
                debug!(superseded = running, "Cancelling validation for previous mapping");
                token.cancel();
            }
            state.version
        };
        // The receiver only goes away after shutdown
        self.changes
            .send(())
            .map_err(|_| ImportError::SessionClosed {
                session_id: self.inner.id.to_string(),
            })?;
        Ok(version)
    }

    /// Validate the current mapping right away and wait for the report.
    pub async fn validate_now(&self) -> Result<Arc<QualityReport>> {
        self.inner.ensure_open()?;
        match self.inner.clone().run_validation().await {
            Some(report) => Ok(report),
            None => Err(ImportError::NoReport {
                version: self.version().await,
            }),
        }
    }

    /// Commit the accepted records of the current report.
    pub async fn commit(&self, executor: &CommitExecutor) -> Result<ImportResult> {
        if self.inner.commit_in_flight.swap(true, Ordering::AcqRel) {
            return Err(ImportError::CommitInProgress {
                session_id: self.inner.id.to_string(),
            });
        }
        let _guard = CommitGuard(&self.inner.commit_in_flight);
        self.inner.ensure_open()?;

        let report = {
            let state = self.inner.state.lock().await;
            match &state.report {
                Some(report) if report.run_version == state.version => report.clone(),
                _ => return Err(ImportError::NoReport { version: state.version }),
            }
        };

        if let Some(alert) = report.error_alerts().next() {
            return Err(ImportError::CommitBlocked {
                reason: format!("{}: {}", alert.title, alert.message),
            });
        }

        let accepted = report.accepted_records();
        info!(
            session = %self.inner.id,
            version = report.run_version,
            accepted = accepted.len(),
            skipped = report.counts.invalid,
            "Committing accepted records"
        );
        Ok(executor.execute(&accepted).await)
    }

    pub async fn template(&self, name: &str) -> MappingTemplate {
        MappingTemplate::from_mapping(name, &self.mapping().await)
    }

    pub async fn apply_template(&self, template: &MappingTemplate) -> Result<u64> {
        let mapping = template.to_mapping()?;
        self.update_mapping(mapping).await
    }

    /// Cancel any running validation and stop the debouncer.
    pub fn shutdown(&self) {
        if !self.inner.closed.is_cancelled() {
            info!(session = %self.inner.id, "Import session closed");
        }
        self.inner.closed.cancel();
    }
}

impl Drop for ImportSession {
    fn drop(&mut self) {
        self.inner.closed.cancel();
    }
}

impl SessionInner {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(ImportError::SessionClosed {
                session_id: self.id.to_string(),
            });
        }
        Ok(())
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// One validation run for the current mapping. Returns the report if it was published.
    async fn run_validation(self: Arc<Self>) -> Option<Arc<QualityReport>> {
        let (version, mapping, token) = {
            let mut state = self.state.lock().await;
            if self.closed.is_cancelled() {
                return None;
            }
            if let Some((_, previous)) = state.active.take() {
                previous.cancel();
            }
            let token = self.closed.child_token();
            state.active = Some((state.version, token.clone()));
            (state.version, state.mapping.clone(), token)
        };

        let progress_token = token.clone();
        let events = self.events.clone();
        let progress = move |validator: ValidatorKind, progress: ChunkProgress| {
            if !progress_token.is_cancelled() {
                let _ = events.send(SessionEvent::Progress {
                    version,
                    validator,
                    progress,
                });
            }
        };

        let span = info_span!("validation_run", session = %self.id, run_version = version);
        let outcome = self
            .validators
            .run(&self.dataset, &mapping, version, &self.chunking, &token, &progress)
            .instrument(span)
            .await;

        let mut state = self.state.lock().await;
        if let Some((active_version, _)) = &state.active {
            if *active_version == version {
                state.active = None;
            }
        }

        if token.is_cancelled() || state.version != version {
            drop(state);
            debug!(version, "Validation run superseded");
            metrics::validation::run_cancelled();
            self.emit(SessionEvent::RunCancelled { version });
            return None;
        }

        if let RunOutcome::Completed(run) = &outcome {
            for result in &run.results {
                if let ValidatorResult::Unavailable { kind, reason } = result {
                    self.emit(SessionEvent::ValidatorDegraded {
                        version,
                        validator: *kind,
                        reason: reason.clone(),
                    });
                }
            }
        }

        let current = state.version;
        let Some(report) = self.aggregator.finalize(outcome, current) else {
            drop(state);
            metrics::validation::run_cancelled();
            self.emit(SessionEvent::RunCancelled { version });
            return None;
        };

        let report = Arc::new(report);
        state.report = Some(report.clone());
        drop(state);

        self.emit(SessionEvent::ReportPublished {
            version,
            score: report.score,
            is_valid: report.is_valid,
        });
        Some(report)
    }
}

/// Trailing-edge debounce: fire once `window` after the last change.
async fn debounce_loop(
    inner: Weak<SessionInner>,
    mut changes: mpsc::UnboundedReceiver<()>,
    window: Duration,
    closed: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = closed.cancelled() => return,
            change = changes.recv() => {
                if change.is_none() {
                    return;
                }
            }
        }

        loop {
            tokio::select! {
                _ = closed.cancelled() => return,
                change = changes.recv() => {
                    if change.is_none() {
                        return;
                    }
                }
                _ = tokio::time::sleep(window) => break,
            }
        }

        let Some(session) = inner.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            if session.run_validation().await.is_none() {
                debug!("Debounced validation produced no report");
            }
        });
    }
}
