//! Prompt rendering for the review and fix calls.

use anyhow::Result;
use minijinja::{Environment, context};

use crate::core::text::truncate_output;
use crate::core::types::Review;

const REVIEW_SYSTEM_PROMPT: &str = include_str!("prompts/review_system.md");
const FIX_SYSTEM_PROMPT: &str = include_str!("prompts/fix_system.md");
const REVIEW_TEMPLATE: &str = include_str!("prompts/review.md");
const FIX_TEMPLATE: &str = include_str!("prompts/fix.md");

/// Bounds for error text embedded in a fix prompt.
const ERROR_MAX_LINES: usize = 40;
const ERROR_MAX_CHARS: usize = 4_000;
const HISTORY_MAX_LINES: usize = 3;
const HISTORY_MAX_CHARS: usize = 300;

/// A system + user prompt pair ready for the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: &'static str,
    pub user: String,
}

/// Everything the fix prompt can draw on.
#[derive(Debug, Clone, Copy)]
pub struct FixInputs<'a> {
    pub code: &'a str,
    pub review: Option<&'a Review>,
    pub error: Option<&'a str>,
    pub history: &'a [String],
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("review", REVIEW_TEMPLATE)
            .expect("review template should be valid");
        env.add_template("fix", FIX_TEMPLATE)
            .expect("fix template should be valid");
        Self { env }
    }

    pub fn review(&self, code: &str) -> Result<Prompt> {
        let template = self.env.get_template("review")?;
        let user = template.render(context! { code => code })?;
        Ok(Prompt {
            system: REVIEW_SYSTEM_PROMPT,
            user,
        })
    }

    pub fn fix(&self, input: &FixInputs<'_>) -> Result<Prompt> {
        let error = input
            .error
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(|e| truncate_output(e, ERROR_MAX_LINES, ERROR_MAX_CHARS));
        let history: Vec<String> = input
            .history
            .iter()
            .map(|e| truncate_output(e.trim(), HISTORY_MAX_LINES, HISTORY_MAX_CHARS))
            .collect();

        let template = self.env.get_template("fix")?;
        let user = template.render(context! {
            code => input.code,
            review => input.review,
            error => error,
            history => history,
        })?;
        Ok(Prompt {
            system: FIX_SYSTEM_PROMPT,
            user,
        })
    }
}
