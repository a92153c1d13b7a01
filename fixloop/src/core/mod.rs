//! Deterministic, pure logic shared by the repair loop.
//!
//! Core modules must be free of I/O side effects. They operate on tool output
//! and in-memory records and return deterministic results suitable for tests.

pub mod fence;
pub mod junit;
pub mod lint;
pub mod rules;
pub mod selector;
pub mod state;
pub mod taxonomy;
pub mod types;
