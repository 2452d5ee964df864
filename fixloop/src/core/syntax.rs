//! Tree-sitter access to Python source.
//!
//! Parsers are costly to build, so each thread keeps one configured for
//! Python and reuses it across calls.

use std::cell::RefCell;

use tree_sitter::{Node, Parser, Tree};

thread_local! {
    static PYTHON_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        // A language mismatch surfaces as `None` from `parse`.
        let _ = p.set_language(&tree_sitter_python::LANGUAGE.into());
        p
    });
}

/// Parse Python source. Returns `None` only if the parser itself gave up;
/// syntax errors still yield a tree containing `ERROR`/`MISSING` nodes.
pub fn parse_python(code: &str) -> Option<Tree> {
    PYTHON_PARSER.with(|p| p.borrow_mut().parse(code, None))
}

/// Source text covered by `node`.
pub fn node_text<'a>(node: &Node, source: &'a str) -> &'a str {
    source.get(node.byte_range()).unwrap_or("")
}

/// Depth-first, pre-order walk over every node under `root`.
pub fn walk<'t, F: FnMut(Node<'t>)>(root: Node<'t>, mut visit: F) {
    let mut cursor = root.walk();
    loop {
        visit(cursor.node());

        if cursor.goto_first_child() {
            continue;
        }

        while !cursor.goto_next_sibling() {
            if !cursor.goto_parent() {
                return;
            }
        }
    }
}

/// Strip prefix letters and quotes from a Python string literal.
///
/// Only plain literals are meaningful here; f-strings come back with their
/// placeholders intact.
pub fn string_literal_value(literal: &str) -> &str {
    let body = literal
        .trim_start_matches(|c: char| matches!(c, 'r' | 'R' | 'b' | 'B' | 'u' | 'U' | 'f' | 'F'));
    for quote in ["\"\"\"", "'''", "\"", "'"] {
        if let Some(inner) = body
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    body
}
