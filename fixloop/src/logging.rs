//! Diagnostic tracing for fixloop runs.
//!
//! Spans wrap runs, model calls and sandbox executions; events carry attempt,
//! status and timing as fields. What shows up at each level:
//!
//! - `warn`: unparseable model answers, killed or interrupted scripts,
//!   truncated output, an unreachable model service.
//! - `info`: safety-gate rejections, salvaged fixes, how a run ended.
//! - `debug`: state transitions, which parse strategy recovered a record,
//!   child process lifecycle.
//!
//! None of this is product output. Summaries go to stdout, `--json` prints
//! machine-readable results, and `--record` writes the terminal run state
//! through `io::run_log`; `RUST_LOG` changes none of them.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the stderr subscriber. `RUST_LOG` overrides the `warn` default,
/// e.g. `RUST_LOG=fixloop::io::sandbox=debug fixloop exec script.py`.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
