//! Chunked validation engine.
//!
//! Drives a per-chunk validator over a dataset in order-preserving fixed-size
//! slices, one slice at a time. Between slices the engine sleeps for the
//! configured delay so that lookup validators stay under upstream rate limits.
//! Cancellation is observed before each slice, while a slice is in flight and
//! during the inter-chunk delay; a cancelled run reports only how far it got
//! and returns no outcomes.

use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Chunk sizing and pacing for one engine run.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkOptions {
    pub chunk_size: usize,
    /// Fixed pause between consecutive chunks.
    pub delay: Option<Duration>,
}

impl ChunkOptions {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size,
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = (!delay.is_zero()).then_some(delay);
        self
    }
}

/// Result of validating one item, with a validator-specific payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationOutcome<P> {
    /// Identifier of the item (the source row index for records).
    pub item: usize,
    pub valid: bool,
    pub payload: P,
}

impl<P> ValidationOutcome<P> {
    pub fn pass(item: usize, payload: P) -> Self {
        Self { item, valid: true, payload }
    }

    pub fn fail(item: usize, payload: P) -> Self {
        Self { item, valid: false, payload }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChunkProgress {
    pub processed: usize,
    pub total: usize,
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkResult {
    pub index: usize,
    pub processed: usize,
    pub valid: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct EngineReport<P> {
    pub total_processed: usize,
    pub total_valid: usize,
    pub outcomes: Vec<ValidationOutcome<P>>,
    pub chunks: Vec<ChunkResult>,
    pub elapsed: Duration,
}

/// How an engine run ended. A cancelled run carries no outcomes.
#[derive(Debug, Clone)]
pub enum EngineRun<P> {
    Completed(EngineReport<P>),
    Cancelled { processed: usize },
}

impl<P> EngineRun<P> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineRun::Cancelled { .. })
    }
}

/// Run `validate` over `items` in chunks.
///
/// `validate` receives the chunk and its offset into `items`. A chunk counts
/// an item as valid unless some outcome for that item has `valid == false`.
/// An error from any chunk aborts the whole run and is returned as-is.
pub async fn run_chunked<'a, T, P, E, F, Fut>(
    items: &'a [T],
    options: &ChunkOptions,
    cancel: Option<&CancellationToken>,
    mut validate: F,
    mut on_progress: impl FnMut(ChunkProgress),
) -> Result<EngineRun<P>, E>
where
    F: FnMut(&'a [T], usize) -> Fut,
    Fut: Future<Output = Result<Vec<ValidationOutcome<P>>, E>>,
{
    let started = Instant::now();
    let total = items.len();
    let chunk_size = options.chunk_size.max(1);
    let chunk_count = total.div_ceil(chunk_size);
    let unbound = CancellationToken::new();
    let token = cancel.unwrap_or(&unbound);

    let mut report = EngineReport {
        total_processed: 0,
        total_valid: 0,
        outcomes: Vec::new(),
        chunks: Vec::with_capacity(chunk_count),
        elapsed: Duration::ZERO,
    };

    for (index, chunk) in items.chunks(chunk_size).enumerate() {
        if token.is_cancelled() {
            return Ok(EngineRun::Cancelled {
                processed: report.total_processed,
            });
        }

        let chunk_started = Instant::now();
        let offset = index * chunk_size;
        let outcomes = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(chunk = index, "Run cancelled while chunk was in flight");
                return Ok(EngineRun::Cancelled { processed: report.total_processed });
            }
            result = validate(chunk, offset) => result?,
        };

        if token.is_cancelled() {
            return Ok(EngineRun::Cancelled {
                processed: report.total_processed,
            });
        }

        let failed: HashSet<usize> = outcomes.iter().filter(|o| !o.valid).map(|o| o.item).collect();
        let valid = chunk.len().saturating_sub(failed.len());
        let elapsed = chunk_started.elapsed();

        report.total_processed += chunk.len();
        report.total_valid += valid;
        report.outcomes.extend(outcomes);
        report.chunks.push(ChunkResult {
            index,
            processed: chunk.len(),
            valid,
            elapsed,
        });

        debug!(
            chunk = index,
            of = chunk_count,
            processed = chunk.len(),
            valid,
            elapsed_ms = elapsed.as_millis() as u64,
            "Chunk validated"
        );

        on_progress(ChunkProgress {
            processed: report.total_processed,
            total,
            percent: report.total_processed as f64 * 100.0 / total as f64,
        });

        let is_last = index + 1 == chunk_count;
        if let (Some(delay), false) = (options.delay, is_last) {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    return Ok(EngineRun::Cancelled { processed: report.total_processed });
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    report.elapsed = started.elapsed();
    Ok(EngineRun::Completed(report))
}
