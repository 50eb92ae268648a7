//! Deterministic, pure logic shared by the convergence engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests; randomness enters
//! only through an injected generator.

pub mod conflict;
pub mod report;
pub mod sampler;
pub mod slug;
pub mod state;
pub mod tail;
pub mod types;
