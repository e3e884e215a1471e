//! Validation sessions: creation, the start/pause lifecycle, statistics,
//! and teardown.
//!
//! Each session owns a clearance store and points at one external debug
//! session. Starting a session runs the breakpoint sweep on the calling
//! thread until the program ends, the session is paused, or the sweep gives
//! up. Pausing is a flag the running loop checks between iterations, so
//! `pause_validation` is safe to call from any other thread. The session
//! reads as running until the loop has actually stopped.

pub mod narration;
mod sweep;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::classifier::{LineClassifier, PythonLineClassifier};
use crate::config::EngineSettings;
use crate::debug::DebugBackend;
use crate::errors::{LineSweepError, LineSweepResult};
use crate::models::{
    now_millis, now_rfc3339, SessionState, SessionStatistics, SessionSummary, ValidationConfig,
    ValidationResult, ValidationSession,
};
use crate::store::fingerprint::resolve_path;
use crate::store::ClearanceStore;

pub use narration::{Narrator, TracingNarrator};
use sweep::{Sweep, SweepExit};

/// Live state for one registered session.
pub(crate) struct SessionSlot {
    pub session: Mutex<ValidationSession>,
    pub pause_requested: AtomicBool,
    pub loop_active: AtomicBool,
}

/// Move `session` to `next` if the lifecycle allows it.
fn transition(session: &mut ValidationSession, next: SessionState) -> bool {
    if !session.state.can_transition_to(next) {
        warn!(
            session_id = %session.id,
            from = session.state.as_str(),
            to = next.as_str(),
            "rejected session state change"
        );
        return false;
    }
    session.state = next;
    true
}

/// Clears the loop flag however the run ends.
struct LoopGuard<'a>(&'a AtomicBool);

impl Drop for LoopGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct ValidationOrchestrator {
    backend: Arc<dyn DebugBackend>,
    classifier: Arc<dyn LineClassifier>,
    narrator: Arc<dyn Narrator>,
    settings: EngineSettings,
    sessions: Mutex<IndexMap<String, Arc<SessionSlot>>>,
    stores: Mutex<IndexMap<String, Arc<ClearanceStore>>>,
}

impl ValidationOrchestrator {
    /// Orchestrator with the Python classifier and tracing narration.
    pub fn new(backend: Arc<dyn DebugBackend>, settings: EngineSettings) -> Self {
        Self::with_parts(
            backend,
            Arc::new(PythonLineClassifier::new()),
            Arc::new(TracingNarrator),
            settings,
        )
    }

    pub fn with_parts(
        backend: Arc<dyn DebugBackend>,
        classifier: Arc<dyn LineClassifier>,
        narrator: Arc<dyn Narrator>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            backend,
            classifier,
            narrator,
            settings,
            sessions: Mutex::new(IndexMap::new()),
            stores: Mutex::new(IndexMap::new()),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    // -- lifecycle -----------------------------------------------------------

    /// Register a new session and open its clearance store. The session
    /// starts out paused; nothing runs until [`Self::start_validation`].
    pub fn create_session(&self, config: ValidationConfig) -> LineSweepResult<ValidationSession> {
        config.validate()?;
        let store_path: PathBuf = config
            .persistence_path
            .clone()
            .unwrap_or_else(|| self.settings.default_store_path.clone());
        let store = ClearanceStore::open(&store_path, self.settings.flush_interval)?;

        let id = Uuid::new_v4().to_string();
        let session = ValidationSession::new(id.clone(), config, now_rfc3339()?);
        info!(
            session_id = %id,
            debug_session_id = %session.debug_session_id,
            store = %store.db_path().display(),
            "validation session created"
        );

        let snapshot = session.clone();
        self.stores.lock().insert(id.clone(), Arc::new(store));
        self.sessions.lock().insert(
            id,
            Arc::new(SessionSlot {
                session: Mutex::new(session),
                pause_requested: AtomicBool::new(false),
                loop_active: AtomicBool::new(false),
            }),
        );
        Ok(snapshot)
    }

    /// Run (or resume) the sweep for `session_id` on the calling thread.
    ///
    /// Failures of the program under validation are reported inside the
    /// result; `Err` is reserved for orchestration and infrastructure
    /// problems.
    pub fn start_validation(&self, session_id: &str) -> LineSweepResult<ValidationResult> {
        let slot = self.slot(session_id)?;
        let store = self
            .stores
            .lock()
            .get(session_id)
            .cloned()
            .ok_or_else(|| LineSweepError::StoreNotFound(session_id.to_string()))?;

        let (debug_session_id, config) = {
            let session = slot.session.lock();
            if session.state.is_terminal() {
                return Err(LineSweepError::InvalidState {
                    session_id: session_id.to_string(),
                    state: session.state.to_string(),
                });
            }
            (session.debug_session_id.clone(), session.config.clone())
        };
        if self.backend.session(&debug_session_id).is_none() {
            return Err(LineSweepError::DebugSessionNotFound(debug_session_id));
        }
        let start_file = resolve_path(&config.start_file);
        if !start_file.is_file() {
            return Err(LineSweepError::InvalidConfig(format!(
                "start file {} is not a readable file",
                start_file.display()
            )));
        }

        if slot
            .loop_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(LineSweepError::AlreadyRunning(session_id.to_string()));
        }
        let _guard = LoopGuard(&slot.loop_active);
        slot.pause_requested.store(false, Ordering::SeqCst);

        let started_ms = now_millis();
        {
            let mut session = slot.session.lock();
            if session.state != SessionState::Running {
                transition(&mut session, SessionState::Running);
            }
            session.started_at_ms = Some(started_ms);
        }
        info!(
            session_id,
            file = %start_file.display(),
            line = config.effective_start_line(),
            mode = ?config.mode,
            "validation started"
        );
        if config.is_narrated() {
            self.narrator.speak(
                &format!("Starting validation of {}", start_file.display()),
                config.narration_rate,
            );
        }

        let clock = Instant::now();
        let mut sweep = Sweep {
            backend: self.backend.as_ref(),
            classifier: self.classifier.as_ref(),
            narrator: self.narrator.as_ref(),
            settings: &self.settings,
            slot: &slot,
            store: &store,
            config: &config,
            debug_session_id: &debug_session_id,
            started_ms,
            iterations: 0,
            breakpoints_verified: 0,
        };
        let outcome = sweep.run(&start_file, config.effective_start_line());
        let breakpoints_verified = sweep.breakpoints_verified;
        let iterations = sweep.iterations;

        if let Err(e) = store.flush() {
            warn!("Failed to flush clearance store for {}: {}", session_id, e);
        }

        let exit = match outcome {
            Ok(exit) => exit,
            Err(e) => {
                transition(&mut slot.session.lock(), SessionState::Error);
                warn!("Validation of {} failed: {}", session_id, e);
                return Err(e);
            }
        };
        // A requested pause keeps the session resumable unless the program
        // has ended.
        let pause_requested = slot.pause_requested.load(Ordering::SeqCst);
        let target = match exit {
            SweepExit::Terminated => SessionState::Completed,
            _ if pause_requested => SessionState::Paused,
            SweepExit::Paused => SessionState::Paused,
            SweepExit::Aborted => SessionState::Error,
            SweepExit::CeilingReached | SweepExit::Returned(_) => SessionState::Completed,
        };

        let result = {
            let mut session = slot.session.lock();
            transition(&mut session, target);
            ValidationResult {
                success: true,
                session_id: session_id.to_string(),
                state: Some(session.state),
                total_lines_validated: session.total_lines_validated,
                errors_found: session.errors_found.clone(),
                breakpoints_verified,
                elapsed_ms: clock.elapsed().as_millis() as u64,
                message: None,
            }
        };
        let final_state = result.state.unwrap_or(target);
        info!(
            session_id,
            state = final_state.as_str(),
            lines = result.total_lines_validated,
            errors = result.errors_found.len(),
            iterations,
            elapsed_ms = result.elapsed_ms,
            "validation finished"
        );
        if config.is_narrated() && final_state == SessionState::Completed {
            self.narrator.speak(
                &format!(
                    "Validation complete. {} lines validated, {} errors found",
                    result.total_lines_validated,
                    result.errors_found.len()
                ),
                config.narration_rate,
            );
        }
        Ok(result)
    }

    /// [`Self::start_validation`], with orchestration failures folded into
    /// an unsuccessful result.
    pub fn start_validation_report(&self, session_id: &str) -> ValidationResult {
        match self.start_validation(session_id) {
            Ok(result) => result,
            Err(e) => {
                if e.is_orchestration() {
                    info!(session_id, "start rejected: {e}");
                }
                ValidationResult::orchestration_failure(session_id, &e)
            }
        }
    }

    /// Ask a running sweep to stop at its next iteration. Sessions that are
    /// not running are left as they are. Returns the state the session is
    /// headed for; a running session reports `Paused` here while its loop
    /// winds down.
    pub fn pause_validation(&self, session_id: &str) -> LineSweepResult<SessionState> {
        let slot = self.slot(session_id)?;
        let session = slot.session.lock();
        if session.state != SessionState::Running {
            return Ok(session.state);
        }
        if slot.pause_requested.swap(true, Ordering::SeqCst) {
            return Ok(SessionState::Paused);
        }
        let narrated = session.config.is_narrated();
        let rate = session.config.narration_rate;
        drop(session);

        info!(session_id, "validation pause requested");
        if narrated {
            self.narrator.speak("Validation paused", rate);
        }
        Ok(SessionState::Paused)
    }

    /// Flush and forget a session. Closing an unknown or already closed
    /// session is a no-op that returns `false`.
    pub fn close_validation_session(&self, session_id: &str) -> LineSweepResult<bool> {
        let slot = self.sessions.lock().get(session_id).cloned();
        let store = self.stores.lock().get(session_id).cloned();
        if slot.is_none() && store.is_none() {
            return Ok(false);
        }
        if let Some(slot) = &slot {
            slot.pause_requested.store(true, Ordering::SeqCst);
        }
        if let Some(store) = &store {
            store.close()?;
        }

        self.sessions.lock().shift_remove(session_id);
        self.stores.lock().shift_remove(session_id);
        info!(session_id, "validation session closed");
        Ok(true)
    }

    // -- queries -------------------------------------------------------------

    pub fn get_session(&self, session_id: &str) -> Option<ValidationSession> {
        let slot = self.sessions.lock().get(session_id).cloned()?;
        let session = slot.session.lock().clone();
        Some(session)
    }

    pub fn get_statistics(&self, session_id: &str) -> LineSweepResult<SessionStatistics> {
        let slot = self.slot(session_id)?;
        let store = self
            .stores
            .lock()
            .get(session_id)
            .cloned()
            .ok_or_else(|| LineSweepError::StoreNotFound(session_id.to_string()))?;
        let store_stats = store.get_statistics()?;

        let session = slot.session.lock();
        Ok(SessionStatistics {
            session_id: session.id.clone(),
            state: session.state,
            total_lines_validated: session.total_lines_validated,
            errors_found: session.errors_found.len(),
            files_processed: session.processed_files.len(),
            current_file: session.current_file.clone(),
            current_line: session.current_line,
            store: store_stats,
        })
    }

    /// Summaries of every registered session, oldest first.
    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        let slots: Vec<Arc<SessionSlot>> = self.sessions.lock().values().cloned().collect();
        slots
            .iter()
            .map(|slot| slot.session.lock().summary())
            .collect()
    }

    fn slot(&self, session_id: &str) -> LineSweepResult<Arc<SessionSlot>> {
        self.sessions
            .lock()
            .get(session_id)
            .cloned()
            .ok_or_else(|| LineSweepError::SessionNotFound(session_id.to_string()))
    }
}
