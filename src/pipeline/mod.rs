// Import pipeline: chunked execution engine, retries, and the processing stages

pub mod engine;
pub mod processing;
pub mod retry;

pub use engine::{run_chunked, ChunkOptions, ChunkProgress, EngineReport, EngineRun};
pub use retry::{retry_with_backoff, retry_with_policy, RetryPolicy};
