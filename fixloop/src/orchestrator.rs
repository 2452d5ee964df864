//! Drives one run through the review/fix/execute loop.
//!
//! The pure transitions live in [`crate::core::machine`]; this module performs
//! the effects each phase needs (model calls, sandbox runs) and feeds their
//! results in. Recoverable failures end up in the [`RunState`]; only model
//! service errors and rendering bugs come back as `Err`.

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelToken;
use crate::core::invariants::validate_invariants;
use crate::core::machine::{self, FixOutcome, Limits, RunState, Status};
use crate::core::parse::{parse_fix, parse_review, salvage_fix_code};
use crate::core::text::format_code;
use crate::io::model::ModelService;
use crate::io::prompt::{FixInputs, PromptEngine};
use crate::io::sandbox::Sandbox;

pub struct Orchestrator<M, S> {
    model: M,
    sandbox: S,
    prompts: PromptEngine,
    limits: Limits,
    cancel: CancelToken,
}

impl<M: ModelService, S: Sandbox> Orchestrator<M, S> {
    pub fn new(model: M, sandbox: S, limits: Limits) -> Self {
        Self {
            model,
            sandbox,
            prompts: PromptEngine::new(),
            limits,
            cancel: CancelToken::new(),
        }
    }

    /// Share `cancel` with the caller; it is checked before every transition.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Run `code` to a terminal state.
    #[instrument(skip_all, fields(max_retries = self.limits.max_retries))]
    pub fn run(&self, code: &str) -> Result<RunState> {
        let mut state = RunState::new(format_code(code));
        while !state.status.is_terminal() {
            state = self.step(state)?;
        }
        info!(
            status = %state.status,
            attempt = state.attempt,
            parse_failures = state.parse_failures,
            "run finished"
        );
        Ok(state)
    }

    /// Iterate over the state after each transition, ending with the terminal one.
    pub fn steps(&self, code: &str) -> Steps<'_, M, S> {
        Steps {
            orchestrator: self,
            state: Some(RunState::new(format_code(code))),
        }
    }

    /// Perform exactly one transition. Terminal states are returned unchanged.
    pub fn step(&self, state: RunState) -> Result<RunState> {
        if state.status.is_terminal() {
            return Ok(state);
        }
        if self.cancel.is_cancelled() {
            warn!(status = %state.status, "run cancelled");
            return Ok(machine::cancel(state));
        }

        let from = state.status;
        let next = match from {
            Status::Reviewing => self.review(state)?,
            Status::Fixing => self.fix(state)?,
            Status::Executing => {
                let result = self
                    .sandbox
                    .execute(&state.current_code, self.limits.execution_timeout);
                machine::apply_execution(state, result)
            }
            Status::Evaluating => machine::evaluate(state, &self.limits),
            Status::Success | Status::Failed => state,
        };

        debug_assert!(
            validate_invariants(&next, &self.limits).is_empty(),
            "{:?}",
            validate_invariants(&next, &self.limits)
        );
        debug!(
            from = %from,
            to = %next.status,
            attempt = next.attempt,
            parse_failures = next.parse_failures,
            "transition"
        );
        if let Some(reason) = &next.failure {
            info!(reason = %reason, "run failed");
        }
        Ok(next)
    }

    fn review(&self, state: RunState) -> Result<RunState> {
        let prompt = self.prompts.review(&state.current_code)?;
        let raw = self.model.invoke(prompt.system, &prompt.user)?;
        let review = parse_review(&raw);
        if review.is_none() {
            warn!("review response could not be parsed, using placeholder");
        }
        Ok(machine::apply_review(state, review))
    }

    fn fix(&self, state: RunState) -> Result<RunState> {
        let prompt = self.prompts.fix(&FixInputs {
            code: &state.current_code,
            review: state.review.as_ref(),
            error: state.last_error(),
            history: &state.error_history,
        })?;
        let raw = self.model.invoke(prompt.system, &prompt.user)?;

        let outcome = match parse_fix(&raw) {
            Some(fix) => FixOutcome::Parsed(fix),
            None => match salvage_fix_code(&raw) {
                Some(code) if code.trim() != state.current_code.trim() => {
                    info!("fix response unparseable, salvaged code from raw text");
                    FixOutcome::Salvaged(code)
                }
                _ => {
                    warn!("fix response unparseable, keeping current code");
                    FixOutcome::Unusable
                }
            },
        };
        Ok(machine::apply_fix(state, outcome, &self.limits))
    }
}

/// Iterator returned by [`Orchestrator::steps`].
///
/// Yields after every transition. Stops after the terminal state or the first
/// error.
pub struct Steps<'a, M, S> {
    orchestrator: &'a Orchestrator<M, S>,
    state: Option<RunState>,
}

impl<M: ModelService, S: Sandbox> Iterator for Steps<'_, M, S> {
    type Item = Result<RunState>;

    fn next(&mut self) -> Option<Self::Item> {
        let state = self.state.take()?;
        if state.status.is_terminal() {
            return None;
        }
        match self.orchestrator.step(state) {
            Ok(next) => {
                self.state = Some(next.clone());
                Some(Ok(next))
            }
            Err(err) => Some(Err(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::core::machine::FailureReason;
    use crate::core::types::ExecutionResult;
    use crate::test_support::{ScriptedModel, ScriptedSandbox};

    const REVIEW_OK: &str =
        r#"{"issues":["Line 1: ZeroDivisionError"],"suggestions":["guard"],"severity":"high","summary":"crash"}"#;

    fn limits(max_retries: u32) -> Limits {
        Limits {
            max_retries,
            execution_timeout: Duration::from_secs(1),
        }
    }

    fn fix_json(code: &str) -> String {
        serde_json::json!({"code": code, "explanation": "fixed", "changes_made": ["c"]}).to_string()
    }

    #[test]
    fn clean_fix_succeeds_on_first_execution() {
        let model = ScriptedModel::new([REVIEW_OK.to_string(), fix_json("print(1)")]);
        let sandbox = ScriptedSandbox::new(vec![ExecutionResult::succeeded(Some("1".into()), 0.01)]);
        let orchestrator = Orchestrator::new(&model, &sandbox, limits(3));

        let state = orchestrator.run("print(1/0)\n\n").expect("run");
        assert_eq!(state.status, Status::Success);
        assert_eq!(state.attempt, 0);
        assert_eq!(state.original_code, "print(1/0)");
        assert_eq!(state.current_code, "print(1)");
        assert_eq!(sandbox.executed(), vec!["print(1)".to_string()]);
    }

    #[test]
    fn fix_prompt_receives_latest_error_and_history() {
        let model = ScriptedModel::new([
            REVIEW_OK.to_string(),
            fix_json("x = 1/0"),
            fix_json("x = 1/1"),
        ]);
        let sandbox = ScriptedSandbox::new(vec![
            ExecutionResult::failed(None, "ZeroDivisionError: division by zero".into(), 0.01),
            ExecutionResult::succeeded(None, 0.01),
        ]);
        let state = Orchestrator::new(&model, &sandbox, limits(3))
            .run("x = 1/0")
            .expect("run");
        assert_eq!(state.status, Status::Success);
        assert_eq!(state.attempt, 1);
        assert_eq!(state.error_history.len(), 1);

        let calls = model.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[2].1.contains("## Execution error"));
        assert!(calls[2].1.contains("1. ZeroDivisionError: division by zero"));
    }

    #[test]
    fn repeated_unparseable_fixes_halt_before_retry_budget() {
        let model = ScriptedModel::new([
            REVIEW_OK.to_string(),
            "sorry, cannot help".to_string(),
            "still nothing".to_string(),
        ]);
        let sandbox = ScriptedSandbox::repeating(ExecutionResult::failed(
            None,
            "ZeroDivisionError".into(),
            0.01,
        ));
        let state = Orchestrator::new(&model, &sandbox, limits(5))
            .run("x = 1/0")
            .expect("run");
        assert_eq!(state.status, Status::Failed);
        assert_eq!(state.failure, Some(FailureReason::NoProgress { attempts: 2 }));
        assert!(state.attempt < 5);
        assert_eq!(state.parse_failures, 2);
    }

    #[test]
    fn salvaged_code_counts_as_progress() {
        let model = ScriptedModel::new([
            REVIEW_OK.to_string(),
            "Here you go:\n```python\nx = 1/1\nprint(x)\n```".to_string(),
        ]);
        let sandbox = ScriptedSandbox::new(vec![ExecutionResult::succeeded(Some("1.0".into()), 0.01)]);
        let state = Orchestrator::new(&model, &sandbox, limits(3))
            .run("x = 1/0\nprint(x)")
            .expect("run");
        assert_eq!(state.status, Status::Success);
        assert_eq!(state.parse_failures, 0);
        assert_eq!(state.current_code, "x = 1/1\nprint(x)");
    }

    #[test]
    fn retries_exhaust_with_changing_code() {
        let model = ScriptedModel::new([
            REVIEW_OK.to_string(),
            fix_json("a = 1"),
            fix_json("a = 2"),
        ]);
        let sandbox =
            ScriptedSandbox::repeating(ExecutionResult::failed(None, "boom".into(), 0.01));
        let state = Orchestrator::new(&model, &sandbox, limits(2))
            .run("a = 0")
            .expect("run");
        assert_eq!(state.status, Status::Failed);
        assert_eq!(
            state.failure,
            Some(FailureReason::RetriesExhausted { attempts: 2 })
        );
        assert_eq!(state.attempt, 2);
        assert_eq!(state.error_history, vec!["boom", "boom"]);
    }

    #[test]
    fn steps_yield_every_phase_in_order() {
        let model = ScriptedModel::new([REVIEW_OK.to_string(), fix_json("print(1)")]);
        let sandbox = ScriptedSandbox::new(vec![ExecutionResult::succeeded(None, 0.01)]);
        let orchestrator = Orchestrator::new(&model, &sandbox, limits(3));
        let statuses: Vec<Status> = orchestrator
            .steps("print(1)")
            .map(|state| state.expect("step").status)
            .collect();
        assert_eq!(
            statuses,
            vec![
                Status::Fixing,
                Status::Executing,
                Status::Evaluating,
                Status::Success
            ]
        );
    }

    #[test]
    fn cancelled_run_stops_before_any_call() {
        let model = ScriptedModel::new(Vec::<String>::new());
        let sandbox = ScriptedSandbox::new(Vec::new());
        let cancel = CancelToken::new();
        cancel.cancel();
        let state = Orchestrator::new(&model, &sandbox, limits(3))
            .with_cancel(cancel)
            .run("print(1)")
            .expect("run");
        assert_eq!(state.failure, Some(FailureReason::Cancelled));
        assert!(model.calls().is_empty());
    }

    #[test]
    fn model_errors_propagate() {
        let model = crate::test_support::UnreachableModel::default();
        let sandbox = ScriptedSandbox::new(Vec::new());
        let err = Orchestrator::new(&model, &sandbox, limits(3))
            .run("print(1)")
            .expect_err("should fail");
        assert!(
            err.downcast_ref::<crate::io::model::ServiceUnavailableError>()
                .is_some()
        );
    }
}
