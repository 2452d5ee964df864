//! Run-state invariants not expressible through the type system.

use crate::core::machine::{Limits, RunState, Status};

/// Check invariants every observable [`RunState`] must satisfy:
/// - `error_history.len() <= attempt`
/// - `attempt <= max_retries`
/// - `failure` is set exactly when the status is `Failed`
/// - a successful run ended on a successful execution
/// - an execution flagged as blocked never reports success
pub fn validate_invariants(state: &RunState, limits: &Limits) -> Vec<String> {
    let mut errors = Vec::new();

    if state.error_history.len() > state.attempt as usize {
        errors.push(format!(
            "error_history has {} entries but attempt is {}",
            state.error_history.len(),
            state.attempt
        ));
    }

    if state.attempt > limits.max_retries {
        errors.push(format!(
            "attempt {} exceeds max_retries {}",
            state.attempt, limits.max_retries
        ));
    }

    match (state.status, &state.failure) {
        (Status::Failed, None) => errors.push("failed run has no failure reason".to_string()),
        (status, Some(reason)) if status != Status::Failed => {
            errors.push(format!("{status} run carries failure reason '{reason}'"));
        }
        _ => {}
    }

    if state.status == Status::Success
        && !state
            .execution_result
            .as_ref()
            .is_some_and(|result| result.success)
    {
        errors.push("success without a successful execution".to_string());
    }

    if let Some(result) = &state.execution_result {
        if result.blocked_import_detected && result.success {
            errors.push("blocked execution reported success".to_string());
        }
        if result.success && result.error.is_some() {
            errors.push("successful execution carries an error".to_string());
        }
    }

    errors
}
