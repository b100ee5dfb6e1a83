pub mod import_use_case;
pub mod ports;
pub mod session;
pub mod validation_use_case;

pub use import_use_case::{ImportOutcome, ImportUseCase};
pub use session::{ImportSession, SessionEvent};
pub use validation_use_case::ValidatorSet;
