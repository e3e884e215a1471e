//! Engine settings, environment overrides, and loop guardrails.

use std::path::PathBuf;
use std::time::Duration;

// Loop and store guards
pub const DEFAULT_STORE_PATH: &str = "~/.linesweep/clearance.db";
pub const DEFAULT_FLUSH_INTERVAL: usize = 10;
pub const DEFAULT_STEP_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_SWEEP_TIMEOUT_MS: u64 = 30_000;
pub const MAX_SWEEP_ITERATIONS: usize = 10_000;
pub const MAX_CALL_DEPTH: usize = 16;

// Narration rate bounds, words per minute
pub const MIN_NARRATION_RATE: u32 = 50;
pub const MAX_NARRATION_RATE: u32 = 400;

/// Process-wide knobs for the validation engine.
///
/// Per-session choices live in [`crate::models::ValidationConfig`]; these are
/// the values an operator tunes once for the whole engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub default_store_path: PathBuf,
    /// Number of `mark_line_cleared` calls between eager flushes.
    pub flush_interval: usize,
    /// Bound on waits that follow a single step (into, over, out).
    pub step_timeout: Duration,
    /// Bound on waits that follow a continue during a breakpoint sweep.
    pub sweep_timeout: Duration,
    pub max_iterations: usize,
    pub max_call_depth: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_store_path: expand_tilde(DEFAULT_STORE_PATH),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            step_timeout: Duration::from_millis(DEFAULT_STEP_TIMEOUT_MS),
            sweep_timeout: Duration::from_millis(DEFAULT_SWEEP_TIMEOUT_MS),
            max_iterations: MAX_SWEEP_ITERATIONS,
            max_call_depth: MAX_CALL_DEPTH,
        }
    }
}

impl EngineSettings {
    /// Defaults overridden by `LINESWEEP_*` environment variables.
    ///
    /// Unset or unparsable values keep the default.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        if let Ok(path) = std::env::var("LINESWEEP_STORE_PATH") {
            let trimmed = path.trim();
            if !trimmed.is_empty() {
                settings.default_store_path = expand_tilde(trimmed);
            }
        }
        if let Some(v) = env_number("LINESWEEP_FLUSH_INTERVAL") {
            settings.flush_interval = (v as usize).max(1);
        }
        if let Some(v) = env_number("LINESWEEP_STEP_TIMEOUT_MS") {
            settings.step_timeout = Duration::from_millis(v.max(1));
        }
        if let Some(v) = env_number("LINESWEEP_SWEEP_TIMEOUT_MS") {
            settings.sweep_timeout = Duration::from_millis(v.max(1));
        }
        if let Some(v) = env_number("LINESWEEP_MAX_ITERATIONS") {
            settings.max_iterations = (v as usize).max(1);
        }
        settings
    }

    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.default_store_path = path.into();
        self
    }

    pub fn with_timeouts(mut self, step: Duration, sweep: Duration) -> Self {
        self.step_timeout = step;
        self.sweep_timeout = sweep;
        self
    }

    pub fn with_flush_interval(mut self, interval: usize) -> Self {
        self.flush_interval = interval.max(1);
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }
}

fn env_number(key: &str) -> Option<u64> {
    std::env::var(key).ok()?.trim().parse::<u64>().ok()
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            let mut expanded = PathBuf::from(home);
            if path.len() > 2 {
                expanded.push(&path[2..]);
            }
            return expanded;
        }
    }
    PathBuf::from(path)
}
