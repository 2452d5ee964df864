//! Lightweight lint and syntax checks over the tree-sitter parse.

use serde::Serialize;

use crate::core::syntax::{node_text, parse_python, walk};

/// Location of the first syntax error found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyntaxErrorDetail {
    /// 1-based line.
    pub line: usize,
    /// 1-based column.
    pub column: usize,
    pub message: String,
    /// Source line containing the error.
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LintReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// First syntax error in `code`, or `None` when it parses cleanly.
pub fn syntax_error(code: &str) -> Option<SyntaxErrorDetail> {
    let Some(tree) = parse_python(code) else {
        return Some(SyntaxErrorDetail {
            line: 1,
            column: 1,
            message: "source could not be parsed".to_string(),
            text: code.lines().next().unwrap_or("").to_string(),
        });
    };
    if !tree.root_node().has_error() {
        return None;
    }

    let mut found = None;
    walk(tree.root_node(), |node| {
        if found.is_some() || !(node.is_error() || node.is_missing()) {
            return;
        }
        let position = node.start_position();
        let message = if node.is_missing() {
            format!("missing '{}'", node.kind())
        } else {
            "invalid syntax".to_string()
        };
        found = Some(SyntaxErrorDetail {
            line: position.row + 1,
            column: position.column + 1,
            message,
            text: code.lines().nth(position.row).unwrap_or("").to_string(),
        });
    });
    found
}

/// Syntax check plus a couple of cheap structural warnings.
pub fn lint(code: &str) -> LintReport {
    if let Some(err) = syntax_error(code) {
        return LintReport {
            valid: false,
            errors: vec![format!("Syntax error at line {}: {}", err.line, err.message)],
            warnings: Vec::new(),
        };
    }
    let Some(tree) = parse_python(code) else {
        return LintReport::default();
    };

    let mut warnings = Vec::new();
    walk(tree.root_node(), |node| match node.kind() {
        "except_clause" => {
            let mut cursor = node.walk();
            let bare = node
                .named_children(&mut cursor)
                .all(|child| matches!(child.kind(), "block" | "comment"));
            if bare {
                warnings.push(format!(
                    "Line {}: Bare 'except:' clause - consider catching specific exceptions",
                    node.start_position().row + 1
                ));
            }
        }
        "function_definition" => {
            let Some(params) = node.child_by_field_name("parameters") else {
                return;
            };
            let name = node
                .child_by_field_name("name")
                .map(|n| node_text(&n, code))
                .unwrap_or("<anonymous>");
            let mut cursor = params.walk();
            let mutable_default = params.named_children(&mut cursor).any(|param| {
                matches!(param.kind(), "default_parameter" | "typed_default_parameter")
                    && param
                        .child_by_field_name("value")
                        .is_some_and(|value| {
                            matches!(value.kind(), "list" | "dictionary" | "set")
                        })
            });
            if mutable_default {
                warnings.push(format!(
                    "Line {}: Function '{}' has mutable default argument",
                    node.start_position().row + 1,
                    name
                ));
            }
        }
        _ => {}
    });

    LintReport {
        valid: true,
        errors: Vec::new(),
        warnings,
    }
}
