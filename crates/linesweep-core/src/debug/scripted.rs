//! Deterministic in-process debug backend for orchestrator tests.
//!
//! The "program" is a pre-recorded trace of positions, each a full call
//! stack. Continue and step requests walk the trace synchronously and latch
//! the resulting stop, so waits never block unless a hang is scripted.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;

use crate::debug::{
    BreakpointStatus, DebugBackend, DebugFailure, DebugResult, DebugSessionInfo, ExecutionState,
    Scope, StackFrame, StopReason, StopSignal, Variable,
};

#[derive(Debug, Clone)]
pub(crate) struct Position {
    pub stack: Vec<StackFrame>,
    pub exception: Option<String>,
}

impl Position {
    fn top(&self) -> Option<&StackFrame> {
        self.stack.first()
    }
}

#[derive(Default)]
struct ScriptState {
    trace: Vec<Position>,
    cursor: Option<usize>,
    state: Option<ExecutionState>,
    last_stop: Option<StopReason>,
    breakpoints: HashMap<PathBuf, Vec<u32>>,
    breakpoint_requests: Vec<(PathBuf, Vec<u32>)>,
    unverified: HashSet<u32>,
    continue_calls: usize,
    fail_continue_from: Option<usize>,
    hang_on_continue: HashSet<usize>,
    variables: Vec<Variable>,
    calls: Vec<String>,
}

pub(crate) struct ScriptedBackend {
    session_id: String,
    inner: Mutex<ScriptState>,
    signal: StopSignal,
}

pub(crate) fn frame(id: i64, file: &Path, line: u32) -> StackFrame {
    StackFrame {
        id,
        name: format!("frame{id}"),
        file: file.to_path_buf(),
        line,
    }
}

impl ScriptedBackend {
    pub fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            inner: Mutex::new(ScriptState {
                state: Some(ExecutionState::Paused),
                last_stop: Some(StopReason::Entry),
                ..ScriptState::default()
            }),
            signal: StopSignal::new(),
        }
    }

    /// Append a top-level position.
    pub fn line(self, file: &Path, line: u32) -> Self {
        self.position(vec![frame(1, file, line)], None)
    }

    /// Append a position with an explicit stack, innermost first.
    pub fn nested(self, stack: Vec<StackFrame>) -> Self {
        self.position(stack, None)
    }

    /// Append a position where the program raises.
    pub fn raise(self, file: &Path, line: u32, message: &str) -> Self {
        self.position(vec![frame(1, file, line)], Some(message.to_string()))
    }

    /// Append a stop that reports no stack at all.
    pub fn vanish(self) -> Self {
        self.position(Vec::new(), None)
    }

    fn position(self, stack: Vec<StackFrame>, exception: Option<String>) -> Self {
        self.inner.lock().trace.push(Position { stack, exception });
        self
    }

    /// Every continue from the `n`th call (1-based) onwards fails.
    pub fn fail_continue_from(self, n: usize) -> Self {
        self.inner.lock().fail_continue_from = Some(n);
        self
    }

    /// The `n`th continue (1-based) resumes but never reports a stop.
    pub fn hang_on_continue(self, n: usize) -> Self {
        self.inner.lock().hang_on_continue.insert(n);
        self
    }

    pub fn unverified(self, line: u32) -> Self {
        self.inner.lock().unverified.insert(line);
        self
    }

    pub fn variable(self, name: &str, value: &str) -> Self {
        self.inner.lock().variables.push(Variable {
            name: name.to_string(),
            value: value.to_string(),
            type_name: None,
        });
        self
    }

    pub fn breakpoint_requests(&self) -> Vec<(PathBuf, Vec<u32>)> {
        self.inner.lock().breakpoint_requests.clone()
    }

    pub fn armed(&self, file: &Path) -> Vec<u32> {
        self.inner
            .lock()
            .breakpoints
            .get(file)
            .cloned()
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().calls.clone()
    }

    fn check_session(&self, session_id: &str) -> DebugResult<()> {
        if session_id == self.session_id {
            Ok(())
        } else {
            Err(DebugFailure::new(format!("unknown session {session_id}")))
        }
    }

    /// Walk forward to the first position satisfying `stop_here`,
    /// stopping early on an exception and terminating past the end.
    fn advance(&self, reason: StopReason, stop_here: impl Fn(&ScriptState, usize) -> bool) {
        let mut st = self.inner.lock();
        let start = st.cursor.map_or(0, |c| c + 1);
        let mut stop = StopReason::Terminated;
        let mut landed = st.trace.len();
        for i in start..st.trace.len() {
            if let Some(message) = &st.trace[i].exception {
                stop = StopReason::Exception {
                    description: message.clone(),
                };
                landed = i;
                break;
            }
            if stop_here(&*st, i) {
                stop = reason.clone();
                landed = i;
                break;
            }
        }
        st.cursor = Some(landed);
        st.state = Some(if stop == StopReason::Terminated {
            ExecutionState::Terminated
        } else {
            ExecutionState::Paused
        });
        st.last_stop = Some(stop.clone());
        drop(st);
        self.signal.notify(stop);
    }

    fn current_depth(st: &ScriptState) -> usize {
        st.cursor
            .and_then(|c| st.trace.get(c))
            .map_or(0, |p| p.stack.len())
    }
}

impl DebugBackend for ScriptedBackend {
    fn session(&self, session_id: &str) -> Option<DebugSessionInfo> {
        if session_id != self.session_id {
            return None;
        }
        let st = self.inner.lock();
        Some(DebugSessionInfo {
            id: self.session_id.clone(),
            execution_state: st.state.unwrap_or(ExecutionState::Paused),
            last_stop: st.last_stop.clone(),
        })
    }

    fn set_breakpoints(
        &self,
        session_id: &str,
        file: &Path,
        lines: &[u32],
    ) -> DebugResult<Vec<BreakpointStatus>> {
        self.check_session(session_id)?;
        let mut st = self.inner.lock();
        st.calls.push(format!("set_breakpoints {}", lines.len()));
        st.breakpoint_requests
            .push((file.to_path_buf(), lines.to_vec()));
        if lines.is_empty() {
            st.breakpoints.remove(file);
        } else {
            st.breakpoints.insert(file.to_path_buf(), lines.to_vec());
        }
        Ok(lines
            .iter()
            .map(|&line| BreakpointStatus {
                line,
                verified: !st.unverified.contains(&line),
            })
            .collect())
    }

    fn continue_execution(&self, session_id: &str) -> DebugResult<()> {
        self.check_session(session_id)?;
        self.signal.reset();
        {
            let mut st = self.inner.lock();
            st.calls.push("continue".to_string());
            st.continue_calls += 1;
            let call = st.continue_calls;
            if st.fail_continue_from.is_some_and(|n| call >= n) {
                return Err(DebugFailure::new("continue rejected: target crashed"));
            }
            if st.hang_on_continue.contains(&call) {
                st.state = Some(ExecutionState::Running);
                st.last_stop = None;
                return Ok(());
            }
        }
        self.advance(StopReason::Breakpoint, |st, i| match st.trace[i].top() {
            Some(top) => st
                .breakpoints
                .get(&top.file)
                .is_some_and(|lines| lines.contains(&top.line)),
            None => true,
        });
        Ok(())
    }

    fn step_over(&self, session_id: &str) -> DebugResult<()> {
        self.check_session(session_id)?;
        self.signal.reset();
        let depth = {
            let mut st = self.inner.lock();
            st.calls.push("step_over".to_string());
            Self::current_depth(&st)
        };
        self.advance(StopReason::Step, move |st, i| st.trace[i].stack.len() <= depth);
        Ok(())
    }

    fn step_into(&self, session_id: &str) -> DebugResult<()> {
        self.check_session(session_id)?;
        self.signal.reset();
        self.inner.lock().calls.push("step_into".to_string());
        self.advance(StopReason::Step, |_, _| true);
        Ok(())
    }

    fn step_out(&self, session_id: &str) -> DebugResult<()> {
        self.check_session(session_id)?;
        self.signal.reset();
        let depth = {
            let mut st = self.inner.lock();
            st.calls.push("step_out".to_string());
            Self::current_depth(&st)
        };
        self.advance(StopReason::Step, move |st, i| st.trace[i].stack.len() < depth);
        Ok(())
    }

    fn stack_trace(&self, session_id: &str) -> DebugResult<Vec<StackFrame>> {
        self.check_session(session_id)?;
        let st = self.inner.lock();
        Ok(st
            .cursor
            .and_then(|c| st.trace.get(c))
            .map(|p| p.stack.clone())
            .unwrap_or_default())
    }

    fn scopes(&self, session_id: &str, frame_id: i64) -> DebugResult<Vec<Scope>> {
        self.check_session(session_id)?;
        Ok(vec![Scope {
            name: "Locals".to_string(),
            variables_reference: frame_id + 1000,
        }])
    }

    fn variables(&self, session_id: &str, _variables_reference: i64) -> DebugResult<Vec<Variable>> {
        self.check_session(session_id)?;
        Ok(self.inner.lock().variables.clone())
    }

    fn wait_for_stopped(&self, _session_id: &str, timeout: Duration) -> Option<StopReason> {
        self.signal.wait(timeout)
    }
}
