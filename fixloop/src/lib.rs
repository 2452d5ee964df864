//! Review, fix and execute loop for small Python scripts.
//!
//! A script is reviewed by a chat model, repaired, run in a time-bounded
//! child process after a static safety check, and retried with the failure
//! fed back until it runs cleanly or the retry budget is spent.
//!
//! - **[`core`]**: Pure, deterministic logic (safety gate, lint, response
//!   parsing, state transitions). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (config, child processes, model
//!   service, prompts, run records). Isolated behind traits for tests.
//!
//! [`orchestrator`] ties the two together for one run.

pub mod cancel;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrator;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
