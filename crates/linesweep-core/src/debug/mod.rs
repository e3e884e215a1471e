//! Interface to the external debug session that actually runs the target.
//!
//! The engine never starts programs or speaks a wire protocol itself. It
//! drives whatever implements [`DebugBackend`]: breakpoints in bulk,
//! continue/step, stack and variable inspection, and a blocking wait for
//! the next stop event.

pub mod signal;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use signal::StopSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    Running,
    Paused,
    Terminated,
}

/// Why the debuggee stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "lowercase")]
pub enum StopReason {
    Breakpoint,
    Step,
    Entry,
    Pause,
    /// The program raised at the current top frame.
    Exception { description: String },
    /// The program exited; there is no stack to inspect.
    Terminated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugSessionInfo {
    pub id: String,
    pub execution_state: ExecutionState,
    /// Reason for the most recent stop, if the session is paused.
    pub last_stop: Option<StopReason>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakpointStatus {
    pub line: u32,
    pub verified: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub id: i64,
    pub name: String,
    pub file: PathBuf,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub name: String,
    pub variables_reference: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    pub value: String,
    pub type_name: Option<String>,
}

/// A request the external session could not carry out.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct DebugFailure {
    pub reason: String,
}

impl DebugFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

pub type DebugResult<T> = Result<T, DebugFailure>;

/// The external debug-session collaborator.
///
/// Implementations must be shareable across threads: one validation loop
/// runs per debug session, and several loops may run at once against
/// different session ids.
pub trait DebugBackend: Send + Sync {
    fn session(&self, session_id: &str) -> Option<DebugSessionInfo>;

    /// Replace all breakpoints in `file` with `lines`. An empty slice
    /// clears the file.
    fn set_breakpoints(
        &self,
        session_id: &str,
        file: &Path,
        lines: &[u32],
    ) -> DebugResult<Vec<BreakpointStatus>>;

    fn continue_execution(&self, session_id: &str) -> DebugResult<()>;
    fn step_over(&self, session_id: &str) -> DebugResult<()>;
    fn step_into(&self, session_id: &str) -> DebugResult<()>;
    fn step_out(&self, session_id: &str) -> DebugResult<()>;

    /// Frames, innermost first. Empty when the program is not running.
    fn stack_trace(&self, session_id: &str) -> DebugResult<Vec<StackFrame>>;

    fn scopes(&self, session_id: &str, frame_id: i64) -> DebugResult<Vec<Scope>>;
    fn variables(&self, session_id: &str, variables_reference: i64) -> DebugResult<Vec<Variable>>;

    /// Block until the session reports a stop or `timeout` elapses.
    /// `None` means the wait timed out.
    fn wait_for_stopped(&self, session_id: &str, timeout: Duration) -> Option<StopReason>;
}

#[cfg(test)]
pub(crate) mod scripted;
