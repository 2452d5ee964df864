//! Scripted doubles for the model service and the sandbox.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Result, anyhow};

use crate::core::types::ExecutionResult;
use crate::io::model::{ModelService, ServiceUnavailableError};
use crate::io::sandbox::Sandbox;

/// Answers each call with the next canned response, recording the prompts.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    responses: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedModel {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// `(system, user)` prompt pairs in call order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().expect("calls lock").clone()
    }
}

impl ModelService for ScriptedModel {
    fn invoke(&self, system: &str, user: &str) -> Result<String> {
        self.calls
            .lock()
            .expect("calls lock")
            .push((system.to_string(), user.to_string()));
        self.responses
            .lock()
            .expect("responses lock")
            .pop_front()
            .ok_or_else(|| anyhow!("scripted model has no responses left"))
    }
}

/// Always fails as if the service were down.
#[derive(Debug, Default)]
pub struct UnreachableModel;

impl ModelService for UnreachableModel {
    fn invoke(&self, _system: &str, _user: &str) -> Result<String> {
        Err(ServiceUnavailableError {
            base_url: "http://127.0.0.1:9".to_string(),
            detail: "connection refused".to_string(),
        }
        .into())
    }
}

/// Returns canned execution results and records the code it was given.
#[derive(Debug, Default)]
pub struct ScriptedSandbox {
    results: Mutex<VecDeque<ExecutionResult>>,
    fallback: Option<ExecutionResult>,
    executed: Mutex<Vec<String>>,
}

impl ScriptedSandbox {
    pub fn new(results: Vec<ExecutionResult>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            ..Self::default()
        }
    }

    /// Return `result` for every call.
    pub fn repeating(result: ExecutionResult) -> Self {
        Self {
            fallback: Some(result),
            ..Self::default()
        }
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().expect("executed lock").clone()
    }
}

impl Sandbox for ScriptedSandbox {
    fn execute(&self, code: &str, _timeout: Duration) -> ExecutionResult {
        self.executed
            .lock()
            .expect("executed lock")
            .push(code.to_string());
        self.results
            .lock()
            .expect("results lock")
            .pop_front()
            .or_else(|| self.fallback.clone())
            .unwrap_or_else(|| {
                ExecutionResult::failed(None, "scripted sandbox has no results left".into(), 0.0)
            })
    }
}
