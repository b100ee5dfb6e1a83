// Adapters implementing the application ports

pub mod carrier_directory;
pub mod in_memory_store;
pub mod postal_code_client;
pub mod rate_limiter;

pub use carrier_directory::CarrierDirectory;
pub use in_memory_store::InMemoryImportStore;
pub use postal_code_client::HttpPostalCodeLookup;
pub use rate_limiter::{Limits, RateLimiter};
