//! Run state and the pure transitions of the review/fix/execute loop.
//!
//! ```text
//! Reviewing -> Fixing -> Executing -> Evaluating -+-> Success
//!                ^                                |
//!                +------------ retry -------------+-> Failed
//! ```
//!
//! Every function here takes the state by value and returns the next state.
//! Side effects (model calls, sandbox runs) happen in the orchestrator, which
//! feeds their results in.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::types::{ExecutionResult, FixResult, Review};

/// Loop phase. `Success` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Reviewing,
    Fixing,
    Executing,
    Evaluating,
    Success,
    Failed,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Success | Status::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Reviewing => "reviewing",
            Status::Fixing => "fixing",
            Status::Executing => "executing",
            Status::Evaluating => "evaluating",
            Status::Success => "success",
            Status::Failed => "failed",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a run ended in [`Status::Failed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// Every allowed attempt ran and failed.
    RetriesExhausted { attempts: u32 },
    /// Too many model answers could not be parsed.
    ParseFailureBudget { parse_failures: u32 },
    /// Retries kept running the unchanged original code.
    NoProgress { attempts: u32 },
    /// The caller aborted the run.
    Cancelled,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::RetriesExhausted { attempts } => {
                write!(f, "max retries reached after {attempts} attempt(s)")
            }
            FailureReason::ParseFailureBudget { parse_failures } => write!(
                f,
                "stuck: {parse_failures} model responses could not be parsed"
            ),
            FailureReason::NoProgress { attempts } => write!(
                f,
                "stuck: code unchanged from the original after {attempts} attempt(s)"
            ),
            FailureReason::Cancelled => f.write_str("run cancelled"),
        }
    }
}

/// Retry policy handed to the loop for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_retries: u32,
    pub execution_timeout: Duration,
}

impl Limits {
    /// Parse failures tolerated before the fix phase gives up.
    pub fn parse_failure_budget(&self) -> u32 {
        self.max_retries.saturating_mul(2)
    }
}

/// Evolving state of one run. Owned by the orchestrator alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub original_code: String,
    pub current_code: String,
    pub review: Option<Review>,
    pub fix_result: Option<FixResult>,
    pub execution_result: Option<ExecutionResult>,
    pub attempt: u32,
    pub parse_failures: u32,
    pub error_history: Vec<String>,
    pub status: Status,
    pub failure: Option<FailureReason>,
}

impl RunState {
    pub fn new(code: impl Into<String>) -> Self {
        let code = code.into();
        Self {
            original_code: code.clone(),
            current_code: code,
            review: None,
            fix_result: None,
            execution_result: None,
            attempt: 0,
            parse_failures: 0,
            error_history: Vec::new(),
            status: Status::Reviewing,
            failure: None,
        }
    }

    /// Error from the most recent execution, if it failed.
    pub fn last_error(&self) -> Option<&str> {
        self.execution_result
            .as_ref()
            .filter(|result| !result.success)
            .and_then(|result| result.error.as_deref())
    }

    fn fail(mut self, reason: FailureReason) -> Self {
        self.status = Status::Failed;
        self.failure = Some(reason);
        self
    }
}

/// What the fix phase obtained from the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixOutcome {
    /// The response parsed into a fix record.
    Parsed(FixResult),
    /// Parsing failed but code was salvaged from the raw text.
    Salvaged(String),
    /// Nothing usable, or salvage produced the code already in place.
    Unusable,
}

/// `Reviewing -> Fixing`. A missing review counts as a parse failure and is
/// replaced by a placeholder.
pub fn apply_review(mut state: RunState, review: Option<Review>) -> RunState {
    debug_assert_eq!(state.status, Status::Reviewing);
    state.review = Some(review.unwrap_or_else(|| {
        state.parse_failures += 1;
        Review::placeholder()
    }));
    state.status = Status::Fixing;
    state
}

/// `Fixing -> Executing`, or `Failed` once the parse-failure budget is spent.
pub fn apply_fix(mut state: RunState, outcome: FixOutcome, limits: &Limits) -> RunState {
    debug_assert_eq!(state.status, Status::Fixing);
    match outcome {
        FixOutcome::Parsed(fix) => {
            state.current_code = fix.code.clone();
            state.fix_result = Some(fix);
        }
        FixOutcome::Salvaged(code) => {
            state.current_code = code.clone();
            state.fix_result = Some(FixResult {
                code,
                explanation: "Recovered code from an unstructured response".to_string(),
                changes_made: Vec::new(),
            });
        }
        FixOutcome::Unusable => {
            state.parse_failures += 1;
            state.fix_result = Some(FixResult {
                code: state.current_code.clone(),
                explanation: "Could not parse model response".to_string(),
                changes_made: Vec::new(),
            });
        }
    }

    if state.parse_failures >= limits.parse_failure_budget() {
        let parse_failures = state.parse_failures;
        return state.fail(FailureReason::ParseFailureBudget { parse_failures });
    }
    state.status = Status::Executing;
    state
}

/// `Executing -> Evaluating`.
pub fn apply_execution(mut state: RunState, result: ExecutionResult) -> RunState {
    debug_assert_eq!(state.status, Status::Executing);
    state.execution_result = Some(result);
    state.status = Status::Evaluating;
    state
}

/// `Evaluating -> Success | Fixing | Failed`.
///
/// The failed execution's error joins the history in the same step that
/// bumps `attempt`, so the history never outgrows the attempt count.
pub fn evaluate(mut state: RunState, limits: &Limits) -> RunState {
    debug_assert_eq!(state.status, Status::Evaluating);
    let succeeded = state
        .execution_result
        .as_ref()
        .is_some_and(|result| result.success);
    if succeeded {
        state.status = Status::Success;
        return state;
    }

    state.attempt += 1;
    if let Some(error) = state.last_error().map(str::to_string) {
        state.error_history.push(error);
    }

    let attempts = state.attempt;
    if state.parse_failures > 0 && attempts > 1 && state.current_code == state.original_code {
        return state.fail(FailureReason::NoProgress { attempts });
    }
    if attempts >= limits.max_retries {
        return state.fail(FailureReason::RetriesExhausted { attempts });
    }
    state.status = Status::Fixing;
    state
}

/// Terminal cancellation from any non-terminal phase.
pub fn cancel(state: RunState) -> RunState {
    if state.status.is_terminal() {
        return state;
    }
    state.fail(FailureReason::Cancelled)
}
