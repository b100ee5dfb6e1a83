/// Reference values for chunking, pacing, retries and scoring.
/// These are the defaults behind `ImportConfig`; the config file may override any of them.
use std::time::Duration;

// Validation chunking
pub const DEFAULT_VALIDATION_CHUNK_SIZE: usize = 500;
pub const DEFAULT_LOOKUP_CHUNK_SIZE: usize = 25;
pub const DEFAULT_LOOKUP_DELAY_MS: u64 = 250;
pub const DEFAULT_PREVIEW_ROWS: usize = 3;

// Session
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;
pub const SESSION_EVENT_CAPACITY: usize = 256;

// Commit
pub const DEFAULT_COMMIT_CHUNK_SIZE: usize = 100;
pub const DEFAULT_INSERT_ATTEMPTS: u32 = 4;
pub const DEFAULT_INSERT_DELAY_MS: u64 = 800;
pub const DEFAULT_AUDIT_ATTEMPTS: u32 = 3;
pub const DEFAULT_AUDIT_DELAY_MS: u64 = 600;
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

// Lookup rate limiting
pub const DEFAULT_LOOKUP_REQUESTS_PER_MIN: u64 = 120;
pub const DEFAULT_LOOKUP_CONCURRENCY: u32 = 4;
pub const DEFAULT_POSTAL_CODE_BASE_URL: &str = "https://viacep.com.br/ws";

// Scoring
pub const SCORE_REQUIRED_FIELDS: i32 = 30;
pub const SCORE_UNIQUE_MAPPING: i32 = 20;
pub const SCORE_DEDUP_CLEAN: i32 = 15;
pub const SCORE_RULES_CLEAN: i32 = 15;
pub const SCORE_RULES_MINOR: i32 = 10;
pub const SCORE_SEASONAL_CLEAN: i32 = 10;
pub const SCORE_SEASONAL_MINOR: i32 = 5;
pub const SCORE_FRAUD_CLEAN: i32 = 15;
pub const SCORE_FRAUD_MINOR: i32 = 10;
pub const FRAUD_RATIO_PENALTY: i32 = 20;
pub const FRAUD_RATIO_LIMIT: f64 = 0.10;
pub const SUGGESTION_BONUS_MAX: f64 = 5.0;
pub const HIGH_CONFIDENCE_SUGGESTION: f64 = 0.80;

/// Ratio of failing lookups above which a warning alert is raised.
pub const LOOKUP_WARNING_RATIO: f64 = 0.20;

/// Error code recorded when an audit append exhausts its retries.
pub const AUDIT_FAILED_CODE: &str = "audit_failed";

pub fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}
