//! Shared record types for the review/fix/execute loop.
//!
//! Records are created per call and never mutated after they are returned.
//! The only evolving value is [`crate::core::machine::RunState`], which the
//! orchestrator owns.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Overall severity reported by a review.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured review of a script.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Review {
    pub issues: Vec<String>,
    pub suggestions: Vec<String>,
    pub severity: Severity,
    pub summary: String,
}

impl Review {
    /// Stand-in review used when the model's answer could not be parsed.
    pub fn placeholder() -> Self {
        Self {
            issues: vec!["Could not parse model response".to_string()],
            suggestions: vec!["Please try again".to_string()],
            severity: Severity::Medium,
            summary: "Review parsing failed".to_string(),
        }
    }
}

/// Structured answer to a fix request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixResult {
    pub code: String,
    #[serde(default)]
    pub explanation: String,
    #[serde(default, alias = "changesMade")]
    pub changes_made: Vec<String>,
}

/// Outcome of running a script in the sandbox.
///
/// `success == true` implies `error == None`; `blocked_import_detected == true`
/// implies `success == false`. The constructors keep both true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
    pub execution_time_secs: f64,
    pub blocked_import_detected: bool,
}

impl ExecutionResult {
    pub fn succeeded(output: Option<String>, execution_time_secs: f64) -> Self {
        Self {
            success: true,
            output,
            error: None,
            execution_time_secs,
            blocked_import_detected: false,
        }
    }

    pub fn failed(output: Option<String>, error: String, execution_time_secs: f64) -> Self {
        Self {
            success: false,
            output,
            error: Some(error),
            execution_time_secs,
            blocked_import_detected: false,
        }
    }

    /// Rejected by the safety gate; no process was spawned.
    pub fn blocked(reason: &str) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(format!("Security Error: {reason}")),
            execution_time_secs: 0.0,
            blocked_import_detected: true,
        }
    }
}

/// Verdict of the static safety gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SafetyVerdict {
    pub safe: bool,
    pub reason: Option<String>,
    pub blocked_references: BTreeSet<String>,
}

impl SafetyVerdict {
    pub fn safe() -> Self {
        Self {
            safe: true,
            reason: None,
            blocked_references: BTreeSet::new(),
        }
    }

    pub fn unsafe_because(reason: String, blocked_references: BTreeSet<String>) -> Self {
        Self {
            safe: false,
            reason: Some(reason),
            blocked_references,
        }
    }
}

/// Which record the parser is asked to recover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Review,
    Fix,
}

/// A record recovered from a model response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Review(Review),
    Fix(FixResult),
}
