// Processing stages: validators, duplicate detection, the quality gate and commit

pub mod commit;
pub mod duplicates;
pub mod quality_gate;
pub mod validators;

pub use commit::{CommitConfig, CommitExecutor, ImportResult};
pub use duplicates::DuplicateDetector;
pub use quality_gate::{QualityAggregator, QualityReport};
