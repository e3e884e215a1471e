//! The breakpoint sweep: arm every candidate line of a file, run the target,
//! and clear each line the moment execution reaches it.
//!
//! Calls out of a swept line can be followed into other files. That is a
//! nested sweep over the callee file, started from the frame the step-into
//! landed on, which ends as soon as execution leaves the callee.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::classifier::{classify_file, executable_lines, LineClassifier};
use crate::config::EngineSettings;
use crate::debug::{DebugBackend, ExecutionState, StackFrame, StopReason};
use crate::errors::LineSweepResult;
use crate::models::{now_rfc3339, LineInfo, ValidationConfig, ValidationError};
use crate::orchestrator::narration::{
    call_argument_names, describe_error, describe_line, resolve_argument_values, Narrator,
};
use crate::orchestrator::SessionSlot;
use crate::store::fingerprint::{ledger_key, resolve_path};
use crate::store::ClearanceStore;

/// How a sweep over one file ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SweepExit {
    /// The program ran to completion.
    Terminated,
    /// Execution left the callee file. Carries the stop that showed it.
    Returned(Option<StopReason>),
    Paused,
    CeilingReached,
    /// The program could not be resumed after a failure.
    Aborted,
}

/// What the loop does at the top of the next iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
enum NextAction {
    /// Continue the target, then wait for it to stop.
    Resume,
    /// The target was already resumed; only wait.
    Wait,
    /// The target is stopped right now; look at where.
    Inspect(Option<StopReason>),
}

/// Result of trying to follow a call out of a swept line.
enum Follow {
    Inspect(Option<StopReason>),
    Exit(SweepExit),
    Failed(String),
}

pub(crate) struct Sweep<'a> {
    pub backend: &'a dyn DebugBackend,
    pub classifier: &'a dyn LineClassifier,
    pub narrator: &'a dyn Narrator,
    pub settings: &'a EngineSettings,
    pub slot: &'a SessionSlot,
    pub store: &'a ClearanceStore,
    pub config: &'a ValidationConfig,
    pub debug_session_id: &'a str,
    /// Epoch millis at which this run started.
    pub started_ms: i64,
    pub iterations: usize,
    pub breakpoints_verified: usize,
}

impl<'a> Sweep<'a> {
    /// Sweep the start file from `start_line` until the program ends, the
    /// session is paused, or the iteration ceiling is hit.
    pub fn run(&mut self, start_file: &Path, start_line: u32) -> LineSweepResult<SweepExit> {
        let file = resolve_path(start_file);
        self.sweep_file(&file, start_line, 0, None, NextAction::Resume)
    }

    fn sweep_file(
        &mut self,
        file: &Path,
        start_line: u32,
        depth: usize,
        entry_depth: Option<usize>,
        initial: NextAction,
    ) -> LineSweepResult<SweepExit> {
        let key = ledger_key(file);
        self.slot.session.lock().processed_files.insert(key.clone());

        let infos = classify_file(self.classifier, file)?;
        let candidates = self.candidate_lines(file, &infos, start_line)?;
        debug!(
            file = %key,
            depth,
            candidates = candidates.len(),
            "sweeping file"
        );

        let armed = self.arm(file, &candidates, depth == 0);
        let exit = self.drive(file, &infos, &candidates, depth, entry_depth, initial);
        if armed {
            if let Err(e) = self.backend.set_breakpoints(self.debug_session_id, file, &[]) {
                warn!("Failed to clear breakpoints in {}: {}", key, e);
            }
        }
        exit
    }

    /// Executable lines at or after `start_line`, minus lines the ledger
    /// already cleared before this run began.
    fn candidate_lines(
        &self,
        file: &Path,
        infos: &[LineInfo],
        start_line: u32,
    ) -> LineSweepResult<BTreeSet<u32>> {
        let mut candidates: BTreeSet<u32> = executable_lines(infos)
            .into_iter()
            .filter(|&line| line >= start_line)
            .collect();

        if self.config.skip_cleared {
            if let Some(state) = self.store.get_file_state(file)? {
                if state.last_modified < self.started_ms {
                    let before = candidates.len();
                    candidates.retain(|line| !state.cleared_lines.contains(line));
                    debug!(
                        skipped = before - candidates.len(),
                        "skipping previously cleared lines"
                    );
                }
            }
        }
        Ok(candidates)
    }

    /// One bulk breakpoint request for all candidates. Returns whether
    /// anything was armed.
    fn arm(&mut self, file: &Path, candidates: &BTreeSet<u32>, top_level: bool) -> bool {
        if candidates.is_empty() {
            return false;
        }
        let lines: Vec<u32> = candidates.iter().copied().collect();
        match self
            .backend
            .set_breakpoints(self.debug_session_id, file, &lines)
        {
            Ok(statuses) => {
                let verified = statuses.iter().filter(|s| s.verified).count();
                if top_level {
                    self.breakpoints_verified += verified;
                }
                debug!(
                    requested = lines.len(),
                    verified,
                    "armed breakpoints in {}",
                    file.display()
                );
                true
            }
            Err(e) => {
                warn!("Failed to set breakpoints in {}: {}", file.display(), e);
                false
            }
        }
    }

    fn drive(
        &mut self,
        file: &Path,
        infos: &[LineInfo],
        candidates: &BTreeSet<u32>,
        depth: usize,
        entry_depth: Option<usize>,
        initial: NextAction,
    ) -> LineSweepResult<SweepExit> {
        let mut visited: HashSet<u32> = HashSet::new();
        let mut action = initial;

        loop {
            if self.slot.pause_requested.load(Ordering::SeqCst) {
                info!(file = %file.display(), "pause requested, leaving sweep");
                return Ok(SweepExit::Paused);
            }
            if self.iterations >= self.settings.max_iterations {
                warn!(
                    "Iteration ceiling of {} reached while sweeping {}",
                    self.settings.max_iterations,
                    file.display()
                );
                return Ok(SweepExit::CeilingReached);
            }
            self.iterations += 1;

            let stop = match std::mem::replace(&mut action, NextAction::Resume) {
                NextAction::Inspect(stop) => stop,
                resume_or_wait => {
                    if resume_or_wait == NextAction::Resume {
                        if let Err(e) = self.backend.continue_execution(self.debug_session_id) {
                            self.record_failure(file, None, &e.reason, None)?;
                            if !self.recovery_resume() {
                                return Ok(SweepExit::Aborted);
                            }
                            action = NextAction::Wait;
                            continue;
                        }
                    }
                    match self.wait_for_stop(self.settings.sweep_timeout) {
                        Some(stop) => Some(stop),
                        None => {
                            warn!(
                                "Timed out after {:?} waiting for a breakpoint in {}",
                                self.settings.sweep_timeout,
                                file.display()
                            );
                            self.record_failure(
                                file,
                                None,
                                "Timed out waiting for the program to stop",
                                None,
                            )?;
                            if !self.recovery_resume() {
                                return Ok(SweepExit::Aborted);
                            }
                            action = NextAction::Wait;
                            continue;
                        }
                    }
                }
            };

            if stop == Some(StopReason::Terminated) {
                return Ok(SweepExit::Terminated);
            }
            let frames = match self.backend.stack_trace(self.debug_session_id) {
                Ok(frames) => frames,
                Err(e) => {
                    debug!("stack trace unavailable, treating as termination: {e}");
                    return Ok(SweepExit::Terminated);
                }
            };
            let Some(top) = frames.first() else {
                return Ok(SweepExit::Terminated);
            };
            let top_file = resolve_path(&top.file);
            self.set_position(&top_file, top.line);

            if let Some(StopReason::Exception { description }) = &stop {
                let stack = render_stack(&frames);
                self.record_failure(&top_file, Some(top.line), description, Some(&stack))?;
                if !self.recovery_resume() {
                    return Ok(SweepExit::Aborted);
                }
                action = NextAction::Wait;
                continue;
            }

            if top_file.as_path() != file {
                if depth > 0 {
                    return Ok(SweepExit::Returned(stop));
                }
                continue;
            }
            if entry_depth.is_some_and(|d| frames.len() < d) {
                return Ok(SweepExit::Returned(stop));
            }
            if !candidates.contains(&top.line) || !visited.insert(top.line) {
                continue;
            }

            let Some(info) = infos.get(top.line as usize - 1) else {
                continue;
            };
            self.clear_line(file, info, &frames)?;

            if self.config.follow_calls
                && info.has_calls()
                && depth < self.settings.max_call_depth
            {
                match self.follow_call(frames.len(), depth)? {
                    Follow::Inspect(next) => action = NextAction::Inspect(next),
                    Follow::Exit(exit) => return Ok(exit),
                    Follow::Failed(reason) => {
                        self.record_failure(file, None, &reason, None)?;
                        if !self.recovery_resume() {
                            return Ok(SweepExit::Aborted);
                        }
                        action = NextAction::Wait;
                    }
                }
            }
        }
    }

    fn clear_line(
        &mut self,
        file: &Path,
        info: &LineInfo,
        frames: &[StackFrame],
    ) -> LineSweepResult<()> {
        if self.config.is_narrated() {
            let values = match (info.has_calls(), frames.first()) {
                (true, Some(top)) => resolve_argument_values(
                    self.backend,
                    self.debug_session_id,
                    top.id,
                    &call_argument_names(&info.content),
                ),
                _ => Vec::new(),
            };
            self.narrator
                .speak(&describe_line(info, &values), self.config.narration_rate);
        }

        self.store.mark_line_cleared(file, info.line_number)?;
        self.slot.session.lock().total_lines_validated += 1;
        debug!(
            line = info.line_number,
            category = info.category.as_str(),
            "cleared {}",
            file.display()
        );
        Ok(())
    }

    /// Step into the call on the current line and sweep the callee's file.
    /// Leaves the target stopped back in the caller frame when it can.
    fn follow_call(&mut self, caller_depth: usize, depth: usize) -> LineSweepResult<Follow> {
        if let Err(e) = self.backend.step_into(self.debug_session_id) {
            return Ok(Follow::Failed(e.reason));
        }
        let stop = match self.wait_for_stop(self.settings.step_timeout) {
            Some(StopReason::Terminated) => return Ok(Follow::Exit(SweepExit::Terminated)),
            Some(stop) => stop,
            None => {
                warn!(
                    "Timed out after {:?} waiting for step into",
                    self.settings.step_timeout
                );
                return Ok(Follow::Failed("Timed out waiting for step into".to_string()));
            }
        };
        if matches!(stop, StopReason::Exception { .. }) {
            return Ok(Follow::Inspect(Some(stop)));
        }

        let frames = match self.backend.stack_trace(self.debug_session_id) {
            Ok(frames) if !frames.is_empty() => frames,
            _ => return Ok(Follow::Exit(SweepExit::Terminated)),
        };
        if frames.len() <= caller_depth {
            // Nothing traceable was entered.
            return Ok(Follow::Inspect(Some(stop)));
        }

        let callee = &frames[0];
        let callee_file = resolve_path(&callee.file);
        let already_swept = self
            .slot
            .session
            .lock()
            .processed_files
            .contains(&ledger_key(&callee_file));
        if already_swept || !callee_file.is_file() {
            debug!(
                callee = %callee_file.display(),
                already_swept,
                "not sweeping callee"
            );
            return self.step_back_out(caller_depth);
        }

        info!(
            callee = %callee_file.display(),
            line = callee.line,
            depth = depth + 1,
            "following call"
        );
        let exit = self.sweep_file(
            &callee_file,
            callee.line,
            depth + 1,
            Some(frames.len()),
            NextAction::Inspect(Some(stop)),
        )?;
        match exit {
            SweepExit::Returned(stop) => {
                let current = self
                    .backend
                    .stack_trace(self.debug_session_id)
                    .map(|f| f.len())
                    .unwrap_or(0);
                if current > caller_depth {
                    self.step_back_out(caller_depth)
                } else {
                    Ok(Follow::Inspect(stop))
                }
            }
            other => Ok(Follow::Exit(other)),
        }
    }

    fn step_back_out(&mut self, caller_depth: usize) -> LineSweepResult<Follow> {
        let current = self
            .backend
            .stack_trace(self.debug_session_id)
            .map(|f| f.len())
            .unwrap_or(0);
        if current <= caller_depth {
            return Ok(Follow::Inspect(None));
        }
        if let Err(e) = self.backend.step_out(self.debug_session_id) {
            return Ok(Follow::Failed(e.reason));
        }
        match self.wait_for_stop(self.settings.step_timeout) {
            Some(StopReason::Terminated) => Ok(Follow::Exit(SweepExit::Terminated)),
            Some(stop) => Ok(Follow::Inspect(Some(stop))),
            None => {
                warn!(
                    "Timed out after {:?} waiting for step out",
                    self.settings.step_timeout
                );
                Ok(Follow::Failed("Timed out waiting for step out".to_string()))
            }
        }
    }

    /// Next stop of the target. A target that is already paused answers
    /// immediately with its last stop.
    fn wait_for_stop(&self, timeout: Duration) -> Option<StopReason> {
        match self.backend.session(self.debug_session_id) {
            None => return Some(StopReason::Terminated),
            Some(info) => match info.execution_state {
                ExecutionState::Terminated => return Some(StopReason::Terminated),
                ExecutionState::Paused => {
                    return Some(info.last_stop.unwrap_or(StopReason::Pause));
                }
                ExecutionState::Running => {}
            },
        }
        self.backend
            .wait_for_stopped(self.debug_session_id, timeout)
    }

    /// One attempt to get the target moving again after a failure.
    fn recovery_resume(&self) -> bool {
        match self.backend.continue_execution(self.debug_session_id) {
            Ok(()) => true,
            Err(e) => {
                warn!("Recovery resume failed, abandoning sweep: {}", e);
                false
            }
        }
    }

    fn set_position(&self, file: &Path, line: u32) {
        let mut session = self.slot.session.lock();
        session.current_file = Some(file.to_string_lossy().into_owned());
        session.current_line = Some(line);
    }

    /// Record a failure of the program under validation. Without an explicit
    /// line the failure is pinned to the last known position.
    fn record_failure(
        &self,
        file: &Path,
        line: Option<u32>,
        message: &str,
        stack: Option<&str>,
    ) -> LineSweepResult<()> {
        let (file, line) = match line {
            Some(line) => (file.to_path_buf(), line),
            None => {
                let session = self.slot.session.lock();
                match (&session.current_file, session.current_line) {
                    (Some(f), Some(l)) => (PathBuf::from(f), l),
                    _ => (file.to_path_buf(), self.config.effective_start_line()),
                }
            }
        };

        let error = ValidationError {
            file: file.to_string_lossy().into_owned(),
            line,
            message: message.to_string(),
            stack: stack.map(str::to_string),
            occurred_at: now_rfc3339()?,
        };
        warn!(
            file = %error.file,
            line,
            "validation error: {}",
            message
        );
        if let Err(e) = self.store.record_error(&file, line, message, stack) {
            warn!("Failed to persist validation error for {}: {}", error.file, e);
        }
        if self.config.is_narrated() {
            self.narrator
                .speak(&describe_error(&error), self.config.narration_rate);
        }
        self.slot.session.lock().errors_found.push(error);
        Ok(())
    }
}

fn render_stack(frames: &[StackFrame]) -> String {
    frames
        .iter()
        .map(|f| format!("  at {} ({}:{})", f.name, f.file.display(), f.line))
        .collect::<Vec<_>>()
        .join("\n")
}
