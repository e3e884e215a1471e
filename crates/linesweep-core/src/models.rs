//! Shared typed models used across the classifier, store, and orchestrator.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::config::{MAX_NARRATION_RATE, MIN_NARRATION_RATE};
use crate::errors::{LineSweepError, LineSweepResult};

// ---------------------------------------------------------------------------
// Clock helpers
// ---------------------------------------------------------------------------

/// Current UTC time as an RFC 3339 string.
pub fn now_rfc3339() -> LineSweepResult<String> {
    Ok(OffsetDateTime::now_utc().format(&Rfc3339)?)
}

/// Milliseconds since the Unix epoch; pre-epoch times collapse to 0.
pub fn epoch_millis(at: SystemTime) -> i64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

pub fn now_millis() -> i64 {
    epoch_millis(SystemTime::now())
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationMode {
    InteractiveNarrated,
    SilentAutomated,
}

/// Per-session configuration. Frozen once the session is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationConfig {
    pub debug_session_id: String,
    pub mode: ValidationMode,
    pub start_file: PathBuf,
    pub start_line: Option<u32>,
    pub follow_calls: bool,
    pub skip_cleared: bool,
    pub narration_rate: Option<u32>,
    pub persistence_path: Option<PathBuf>,
}

impl ValidationConfig {
    pub fn new(debug_session_id: impl Into<String>, start_file: impl Into<PathBuf>) -> Self {
        Self {
            debug_session_id: debug_session_id.into(),
            mode: ValidationMode::SilentAutomated,
            start_file: start_file.into(),
            start_line: None,
            follow_calls: false,
            skip_cleared: true,
            narration_rate: None,
            persistence_path: None,
        }
    }

    pub fn with_mode(mut self, mode: ValidationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_start_line(mut self, line: u32) -> Self {
        self.start_line = Some(line);
        self
    }

    pub fn with_follow_calls(mut self, follow: bool) -> Self {
        self.follow_calls = follow;
        self
    }

    pub fn with_skip_cleared(mut self, skip: bool) -> Self {
        self.skip_cleared = skip;
        self
    }

    pub fn with_narration_rate(mut self, rate: u32) -> Self {
        self.narration_rate = Some(rate);
        self
    }

    pub fn with_persistence_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.persistence_path = Some(path.into());
        self
    }

    /// First line of the start file considered by the sweep (1-based).
    pub fn effective_start_line(&self) -> u32 {
        self.start_line.unwrap_or(1)
    }

    pub fn is_narrated(&self) -> bool {
        self.mode == ValidationMode::InteractiveNarrated
    }

    pub fn validate(&self) -> LineSweepResult<()> {
        if self.debug_session_id.trim().is_empty() {
            return Err(LineSweepError::InvalidConfig(
                "debug session id must not be empty".to_string(),
            ));
        }
        if self.start_file.as_os_str().is_empty() {
            return Err(LineSweepError::InvalidConfig(
                "start file must not be empty".to_string(),
            ));
        }
        if self.start_line == Some(0) {
            return Err(LineSweepError::InvalidConfig(
                "start line is 1-based".to_string(),
            ));
        }
        if let Some(rate) = self.narration_rate {
            if !(MIN_NARRATION_RATE..=MAX_NARRATION_RATE).contains(&rate) {
                return Err(LineSweepError::InvalidConfig(format!(
                    "narration rate {rate} outside {MIN_NARRATION_RATE}..={MAX_NARRATION_RATE}"
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Session lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Running,
    Paused,
    Completed,
    Error,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    /// Transitions requested from outside the sweep loop.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (Self::Running, Self::Paused)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Error)
                | (Self::Paused, Self::Running)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure of the program under validation at a specific line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationError {
    pub file: String,
    pub line: u32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    pub occurred_at: String,
}

/// One run of the engine against one external debug session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationSession {
    pub id: String,
    pub debug_session_id: String,
    pub config: ValidationConfig,
    pub state: SessionState,
    pub current_file: Option<String>,
    pub current_line: Option<u32>,
    pub total_lines_validated: usize,
    pub errors_found: Vec<ValidationError>,
    pub processed_files: BTreeSet<String>,
    pub created_at: String,
    pub started_at_ms: Option<i64>,
}

impl ValidationSession {
    pub fn new(id: String, config: ValidationConfig, created_at: String) -> Self {
        Self {
            id,
            debug_session_id: config.debug_session_id.clone(),
            config,
            state: SessionState::Paused,
            current_file: None,
            current_line: None,
            total_lines_validated: 0,
            errors_found: Vec::new(),
            processed_files: BTreeSet::new(),
            created_at,
            started_at_ms: None,
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            debug_session_id: self.debug_session_id.clone(),
            state: self.state,
            current_file: self.current_file.clone(),
            current_line: self.current_line,
            total_lines_validated: self.total_lines_validated,
            error_count: self.errors_found.len(),
            created_at: self.created_at.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub debug_session_id: String,
    pub state: SessionState,
    pub current_file: Option<String>,
    pub current_line: Option<u32>,
    pub total_lines_validated: usize,
    pub error_count: usize,
    pub created_at: String,
}

/// Outcome of one `start_validation` call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub success: bool,
    pub session_id: String,
    pub state: Option<SessionState>,
    pub total_lines_validated: usize,
    pub errors_found: Vec<ValidationError>,
    pub breakpoints_verified: usize,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ValidationResult {
    /// Result for a call that failed before any sweep ran.
    pub fn orchestration_failure(session_id: &str, err: &LineSweepError) -> Self {
        Self {
            success: false,
            session_id: session_id.to_string(),
            state: None,
            total_lines_validated: 0,
            errors_found: Vec::new(),
            breakpoints_verified: 0,
            elapsed_ms: 0,
            message: Some(err.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Ledger entries
// ---------------------------------------------------------------------------

/// An error as stored in a file's ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedError {
    pub line: u32,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    pub occurred_at: String,
}

/// Durable validation state for one absolute file path.
///
/// Valid only while `file_hash` equals the file's current content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileValidationState {
    #[serde(skip_serializing, default)]
    pub path: String,
    pub last_modified: i64,
    pub file_hash: String,
    pub cleared_lines: BTreeSet<u32>,
    pub total_lines: u32,
    #[serde(default)]
    pub errors: Vec<RecordedError>,
}

impl FileValidationState {
    pub fn cleared_percentage(&self) -> f64 {
        if self.total_lines == 0 {
            return 0.0;
        }
        let pct = self.cleared_lines.len() as f64 * 100.0 / self.total_lines as f64;
        (pct * 100.0).round() / 100.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStatistics {
    pub cleared: usize,
    pub total: u32,
    pub percentage: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStatistics {
    pub total_files: usize,
    pub total_cleared_lines: usize,
    pub total_errors: usize,
    pub files: BTreeMap<String, FileStatistics>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatistics {
    pub session_id: String,
    pub state: SessionState,
    pub total_lines_validated: usize,
    pub errors_found: usize,
    pub files_processed: usize,
    pub current_file: Option<String>,
    pub current_line: Option<u32>,
    pub store: StoreStatistics,
}

// ---------------------------------------------------------------------------
// Line classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineCategory {
    Empty,
    Comment,
    Docstring,
    Decorator,
    Definition,
    Import,
    Continuation,
    ClosingBracket,
    Return,
    Control,
    Assignment,
    FunctionCall,
    Other,
}

impl LineCategory {
    pub fn is_executable(self) -> bool {
        matches!(
            self,
            Self::Return | Self::Control | Self::Assignment | Self::FunctionCall | Self::Other
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Comment => "comment",
            Self::Docstring => "docstring",
            Self::Decorator => "decorator",
            Self::Definition => "definition",
            Self::Import => "import",
            Self::Continuation => "continuation",
            Self::ClosingBracket => "closing_bracket",
            Self::Return => "return",
            Self::Control => "control",
            Self::Assignment => "assignment",
            Self::FunctionCall => "function_call",
            Self::Other => "other",
        }
    }
}

/// Classification of a single source line. Recomputed on demand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineInfo {
    pub file: String,
    pub line_number: u32,
    pub content: String,
    pub category: LineCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calls: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imports: Option<Vec<String>>,
}

impl LineInfo {
    pub fn new(file: &Path, line_number: u32, content: &str, category: LineCategory) -> Self {
        Self {
            file: file.to_string_lossy().into_owned(),
            line_number,
            content: content.to_string(),
            category,
            calls: None,
            imports: None,
        }
    }

    pub fn is_executable(&self) -> bool {
        self.category.is_executable()
    }

    pub fn has_calls(&self) -> bool {
        self.calls.as_ref().is_some_and(|c| !c.is_empty())
    }
}
