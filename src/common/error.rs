use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid dataset: {0}")]
    Dataset(String),

    #[error("Unknown canonical field: {0}")]
    UnknownField(String),

    #[error("Commit blocked: {reason}")]
    CommitBlocked { reason: String },

    #[error("A commit is already running for session {session_id}")]
    CommitInProgress { session_id: String },

    #[error("No quality report is available for mapping version {version}")]
    NoReport { version: u64 },

    #[error("Session {session_id} has been shut down")]
    SessionClosed { session_id: String },

    #[error("Store error [{code}]: {message}")]
    Store { code: String, message: String },

    #[error("Environment variable error: {0}")]
    Env(#[from] std::env::VarError),
}

impl From<crate::app::ports::StoreError> for ImportError {
    fn from(err: crate::app::ports::StoreError) -> Self {
        ImportError::Store {
            code: err.code,
            message: err.message,
        }
    }
}

pub type Result<T> = std::result::Result<T, ImportError>;
