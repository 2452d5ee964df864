//! Deterministic, pure logic shared by the fix loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod invariants;
pub mod lint;
pub mod machine;
pub mod parse;
pub mod safety;
pub mod salvage;
pub mod syntax;
pub mod text;
pub mod types;
