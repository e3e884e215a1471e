//! Error types for the linesweep core library.

use std::path::PathBuf;

/// Top-level error enum for the linesweep core library.
///
/// Every variant here is an orchestration or infrastructure failure.
/// Failures of the program under validation never become a
/// `LineSweepError`; the sweep records them as [`crate::models::ValidationError`]s.
#[derive(Debug, thiserror::Error)]
pub enum LineSweepError {
    #[error("Validation session not found: {0}")]
    SessionNotFound(String),

    #[error("Clearance store not found for session: {0}")]
    StoreNotFound(String),

    #[error("Debug session not found: {0}")]
    DebugSessionNotFound(String),

    #[error("Invalid validation config: {0}")]
    InvalidConfig(String),

    #[error("Session {session_id} cannot start from state {state}")]
    InvalidState { session_id: String, state: String },

    #[error("Session {0} already has an active validation loop")]
    AlreadyRunning(String),

    #[error("Failed to read source file {path}: {source}")]
    SourceRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to format timestamp: {0}")]
    ClockFormat(#[from] time::error::Format),
}

impl LineSweepError {
    #[must_use]
    pub fn source_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::SourceRead {
            path: path.into(),
            source,
        }
    }

    /// True for errors that describe the orchestration request itself
    /// (unknown ids, bad config, wrong state) rather than infrastructure.
    pub fn is_orchestration(&self) -> bool {
        matches!(
            self,
            Self::SessionNotFound(_)
                | Self::StoreNotFound(_)
                | Self::DebugSessionNotFound(_)
                | Self::InvalidConfig(_)
                | Self::InvalidState { .. }
                | Self::AlreadyRunning(_)
        )
    }
}

pub type LineSweepResult<T> = Result<T, LineSweepError>;
