//! Linesweep core library: line-by-line runtime validation driven through an
//! external debugger.
//!
//! A validation session sweeps a source file: every executable line gets a
//! breakpoint, the target runs, and each line is marked cleared the first
//! time execution reaches it. Cleared lines are kept in a SQLite-backed
//! clearance store keyed by file content hash, so later runs can skip work
//! that is still valid. Runtime failures are recorded against the line they
//! occurred on.

pub mod classifier;
pub mod config;
pub mod debug;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod store;

pub use classifier::{LineClassifier, PythonLineClassifier};
pub use config::EngineSettings;
pub use debug::DebugBackend;
pub use errors::{LineSweepError, LineSweepResult};
pub use orchestrator::{Narrator, TracingNarrator, ValidationOrchestrator};
pub use store::ClearanceStore;
