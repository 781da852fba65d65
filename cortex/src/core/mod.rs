//! Deterministic, pure logic shared by the delegation engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod delegation;
pub mod digest;
pub mod feedback;
pub mod invariants;
pub mod progress;
pub mod sequencer;
pub mod state;
pub mod types;
