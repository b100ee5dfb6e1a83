// Domain data shapes shared across layers

pub mod fields;
pub mod mapping;
pub mod record;

pub use fields::{CanonicalField, FieldFormat};
pub use mapping::{ColumnSuggestion, FieldMapping, MappingTemplate};
pub use record::{CanonicalRecord, Dataset, MessageSeverity, RawRow, RecordMessage, RecordStatus};
