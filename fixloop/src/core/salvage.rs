//! Best-effort text repair and extraction for model responses.
//!
//! Everything here is lossy and heuristic. A `None` or unchanged result is
//! the normal "nothing recoverable" outcome, not an error.

use std::sync::LazyLock;

use regex::Regex;

static KEY_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*"((?:[^"\\]|\\.)*)"\s*:"#).unwrap());

static TRAILING_COMMA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",(\s*[}\]])").unwrap());

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```([A-Za-z0-9_+.-]*)[ \t]*\r?\n?(.*?)```").unwrap());

static REASONING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(?:think|thinking|reasoning)>.*?</(?:think|thinking|reasoning)>").unwrap()
});

static DANGLING_CLOSE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)^.*</(?:think|thinking|reasoning)>").unwrap());

static CODE_SHAPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^\s*(?:(?:async\s+)?def\s+\w+|class\s+\w+|import\s+\w|from\s+[\w.]+\s+import\b|[A-Za-z_]\w*(?:\s*,\s*[A-Za-z_]\w*)*\s*(?:[-+*/%&|^]|//|\*\*)?=[^=])",
    )
    .unwrap()
});

static CODE_FIELD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""code"\s*:\s*"((?:[^"\\]|\\.)*)""#).unwrap());

/// A fenced markdown block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FencedBlock<'a> {
    /// Language tag after the opening fence (may be empty).
    pub lang: &'a str,
    pub body: &'a str,
}

/// Drop a line when the next line declares the same key.
///
/// Models sometimes "correct themselves" mid-answer and leave both
/// assignments behind; the later one wins.
pub fn drop_duplicate_keys(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let keys: Vec<Option<&str>> = lines
        .iter()
        .map(|line| {
            KEY_LINE_RE
                .captures(line)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str())
        })
        .collect();

    let mut kept = Vec::with_capacity(lines.len());
    for (idx, line) in lines.iter().enumerate() {
        let duplicated_by_next = match (keys[idx], keys.get(idx + 1).copied().flatten()) {
            (Some(key), Some(next)) => key == next,
            _ => false,
        };
        if !duplicated_by_next {
            kept.push(*line);
        }
    }
    kept.join("\n")
}

/// Remove commas directly before a closing bracket or brace.
///
/// Operates on raw text, so a literal `,}` inside a string is also rewritten.
pub fn strip_trailing_commas(text: &str) -> String {
    TRAILING_COMMA_RE.replace_all(text, "$1").into_owned()
}

/// Every fenced block in order of appearance.
pub fn fenced_blocks(text: &str) -> Vec<FencedBlock<'_>> {
    FENCE_RE
        .captures_iter(text)
        .filter_map(|caps| {
            Some(FencedBlock {
                lang: caps.get(1)?.as_str(),
                body: caps.get(2)?.as_str(),
            })
        })
        .collect()
}

/// Substring from the first `{` to the last `}`, inclusive.
pub fn brace_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if start <= end {
        Some(&text[start..=end])
    } else {
        None
    }
}

/// Remove `<think>`-style reasoning regions (case-insensitive).
///
/// A close tag without a matching open tag drops everything before it.
pub fn strip_reasoning(text: &str) -> String {
    let stripped = REASONING_RE.replace_all(text, "");
    DANGLING_CLOSE_RE.replace(&stripped, "").into_owned()
}

/// Heuristic: does `body` contain a def/class/import or an assignment?
pub fn looks_like_code(body: &str) -> bool {
    CODE_SHAPE_RE.is_match(body)
}

/// First fenced block that looks like Python code rather than JSON.
///
/// Python-tagged blocks are preferred over untagged or other-language ones.
pub fn salvage_fenced_code(text: &str) -> Option<String> {
    let candidates: Vec<FencedBlock<'_>> = fenced_blocks(text)
        .into_iter()
        .filter(|block| !block.lang.eq_ignore_ascii_case("json"))
        .filter(|block| !block.body.trim_start().starts_with('{'))
        .filter(|block| looks_like_code(block.body))
        .collect();

    let is_python = |block: &FencedBlock<'_>| {
        matches!(
            block.lang.to_ascii_lowercase().as_str(),
            "python" | "py" | "python3"
        )
    };
    candidates
        .iter()
        .find(|block| is_python(block))
        .or_else(|| candidates.first())
        .map(|block| block.body.trim().to_string())
        .filter(|code| !code.is_empty())
}

/// Value of the first `"code": "..."` pair, unescaped.
pub fn salvage_code_field(text: &str) -> Option<String> {
    let escaped = CODE_FIELD_RE.captures(text)?.get(1)?.as_str();
    let code = serde_json::from_str::<String>(&format!("\"{escaped}\""))
        .unwrap_or_else(|_| unescape_loosely(escaped));
    let code = code.trim().to_string();
    (!code.is_empty()).then_some(code)
}

/// Fenced code first, then a bare `"code"` field.
pub fn salvage_code(text: &str) -> Option<String> {
    salvage_fenced_code(text).or_else(|| salvage_code_field(text))
}

fn unescape_loosely(escaped: &str) -> String {
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
