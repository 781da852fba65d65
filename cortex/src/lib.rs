//! Delegation-and-sequencing engine for staged reasoning runs.
//!
//! A task first goes to a planner stage whose free-text reply is parsed into
//! an ordered delegation plan of analyzers, always ending with an integrator.
//! The driver then walks that plan exactly once per stage, tolerating
//! individual stage failures, until the sequencer reports completion.
//!
//! - **[`core`]**: Pure, deterministic logic (parsing, sequencing, progress,
//!   digests, feedback). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (config, child processes, feedback
//!   store, session log, run archive). Isolated behind traits for tests.
//!
//! Orchestration modules ([`stage`], [`driver`]) coordinate core logic with
//! I/O to implement CLI commands.

pub mod cancel;
pub mod core;
pub mod driver;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod stage;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
