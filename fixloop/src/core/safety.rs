//! Static safety gate run before any script is executed.
//!
//! Two passes feed one verdict:
//!
//! - a structural pass over the tree-sitter parse, collecting the root module
//!   of every `import`/`from` statement and the literal argument of every
//!   `__import__(...)` call;
//! - a textual pass over the raw source that repeats the import search with
//!   regexes (so syntactically broken code is still covered) and looks for
//!   direct calls to `eval`, `exec` and `compile`.
//!
//! Dynamic evaluation wins over import findings when choosing the reason.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::debug;

use crate::core::syntax::{node_text, parse_python, string_literal_value, walk};
use crate::core::types::SafetyVerdict;

/// Builtins that turn strings into running code, in reporting order.
const DYNAMIC_EVAL_BUILTINS: [&str; 3] = ["eval", "exec", "compile"];

/// Receivers through which the dynamic-evaluation builtins stay reachable.
const BUILTINS_RECEIVERS: [&str; 2] = ["__builtins__", "builtins"];

static DYNAMIC_EVAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(eval|exec|compile)\s*\(").unwrap());

/// Denylist-driven safety checker.
#[derive(Debug, Clone)]
pub struct SafetyGate {
    denied: BTreeSet<String>,
    textual: Vec<(String, Regex)>,
}

impl SafetyGate {
    /// Build a gate for the given denied module names.
    pub fn new<I, S>(denied: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let denied: BTreeSet<String> = denied
            .into_iter()
            .map(Into::into)
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect();

        let mut textual = Vec::with_capacity(denied.len());
        for module in &denied {
            let escaped = regex::escape(module);
            let pattern = format!(
                r#"\bimport\s+{escaped}\b|\bfrom\s+{escaped}\b|__import__\s*\(\s*["']{escaped}\b"#
            );
            let re = Regex::new(&pattern)
                .with_context(|| format!("compile import pattern for '{module}'"))?;
            textual.push((module.clone(), re));
        }

        Ok(Self { denied, textual })
    }

    pub fn denied_modules(&self) -> &BTreeSet<String> {
        &self.denied
    }

    /// Decide whether `code` may run.
    pub fn check(&self, code: &str) -> SafetyVerdict {
        let mut found: BTreeSet<String> = structural_imports(code)
            .into_iter()
            .filter(|module| self.denied.contains(module))
            .collect();
        for (module, re) in &self.textual {
            if re.is_match(code) {
                found.insert(module.clone());
            }
        }

        if let Some(builtin) = dynamic_eval_reference(code) {
            debug!(builtin, blocked = ?found, "dynamic evaluation rejected");
            return SafetyVerdict::unsafe_because(format!("{builtin}() is not allowed"), found);
        }

        if found.is_empty() {
            return SafetyVerdict::safe();
        }

        let listed = found.iter().cloned().collect::<Vec<_>>().join(", ");
        debug!(blocked = %listed, "denied imports rejected");
        SafetyVerdict::unsafe_because(format!("Blocked import(s) detected: {listed}"), found)
    }
}

/// Root module names referenced by import statements and `__import__` calls.
///
/// Parse errors are tolerated: whatever tree-sitter recovered is inspected and
/// the textual pass covers the rest.
pub fn structural_imports(code: &str) -> BTreeSet<String> {
    let mut modules = BTreeSet::new();
    let Some(tree) = parse_python(code) else {
        debug!("structural pass skipped: parser returned no tree");
        return modules;
    };

    walk(tree.root_node(), |node| match node.kind() {
        "import_statement" => {
            let mut cursor = node.walk();
            for name in node.children_by_field_name("name", &mut cursor) {
                let dotted = if name.kind() == "aliased_import" {
                    name.child_by_field_name("name")
                } else {
                    Some(name)
                };
                if let Some(dotted) = dotted {
                    insert_root(&mut modules, node_text(&dotted, code));
                }
            }
        }
        "import_from_statement" => {
            if let Some(module) = node.child_by_field_name("module_name")
                && module.kind() == "dotted_name"
            {
                insert_root(&mut modules, node_text(&module, code));
            }
        }
        "call" => {
            let is_dynamic_import = node
                .child_by_field_name("function")
                .is_some_and(|func| {
                    func.kind() == "identifier" && node_text(&func, code) == "__import__"
                });
            if !is_dynamic_import {
                return;
            }
            let first_arg = node
                .child_by_field_name("arguments")
                .and_then(|args| args.named_child(0));
            if let Some(arg) = first_arg
                && arg.kind() == "string"
            {
                insert_root(&mut modules, string_literal_value(node_text(&arg, code)));
            }
        }
        _ => {}
    });

    modules
}

fn insert_root(modules: &mut BTreeSet<String>, dotted: &str) {
    let root = dotted.split('.').next().unwrap_or("").trim();
    if !root.is_empty() {
        modules.insert(root.to_string());
    }
}

/// First dynamic-evaluation builtin called directly in `code`, if any.
///
/// Attribute calls such as `re.compile(...)` are not the builtins and are
/// ignored, unless the receiver is the builtins module itself
/// (`__builtins__.exec(...)`, `builtins.eval(...)`).
pub fn dynamic_eval_reference(code: &str) -> Option<&'static str> {
    let mut seen = BTreeSet::new();
    for caps in DYNAMIC_EVAL_RE.captures_iter(code) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let before = code[..whole.start()].trim_end();
        if let Some(receiver) = before.strip_suffix('.')
            && !BUILTINS_RECEIVERS.contains(&trailing_identifier(receiver))
        {
            continue;
        }
        seen.insert(name.as_str());
    }
    DYNAMIC_EVAL_BUILTINS
        .into_iter()
        .find(|builtin| seen.contains(builtin))
}

/// Identifier ending `text`, ignoring whitespace before the attribute dot.
fn trailing_identifier(text: &str) -> &str {
    let text = text.trim_end();
    let start = text
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_alphanumeric() || *c == '_')
        .last()
        .map_or(text.len(), |(idx, _)| idx);
    &text[start..]
}
