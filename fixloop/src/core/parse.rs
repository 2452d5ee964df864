//! Recovery of structured records from free-text model responses.
//!
//! Responses may wrap JSON in prose, fences or reasoning tags, repeat keys,
//! or use objects where plain strings are expected. Parsing never fails
//! loudly: a `None` means nothing usable was found.
//!
//! Strategies, first success wins:
//!
//! 1. the trimmed response as a whole;
//! 2. each fenced block, in order;
//! 3. the span from the first `{` to the last `}`;
//! 4. after stripping reasoning regions, (1) and (3) again.
//!
//! Each candidate goes through duplicate-key repair, JSON decoding into a
//! generic tree, normalization, schema validation and finally binding to the
//! typed record.

use std::sync::LazyLock;

use jsonschema::Validator;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

use crate::core::salvage::{
    brace_span, drop_duplicate_keys, fenced_blocks, salvage_code, strip_reasoning,
    strip_trailing_commas,
};
use crate::core::types::{FixResult, Record, RecordKind, Review};

const REVIEW_SCHEMA: &str = include_str!("../../schemas/review.schema.json");
const FIX_SCHEMA: &str = include_str!("../../schemas/fix.schema.json");

static REVIEW_VALIDATOR: LazyLock<Validator> =
    LazyLock::new(|| compile_schema(REVIEW_SCHEMA, "review"));
static FIX_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| compile_schema(FIX_SCHEMA, "fix"));

fn compile_schema(raw: &str, name: &str) -> Validator {
    let schema: Value = serde_json::from_str(raw)
        .unwrap_or_else(|err| panic!("embedded {name} schema is not JSON: {err}"));
    jsonschema::validator_for(&schema)
        .unwrap_or_else(|err| panic!("embedded {name} schema is invalid: {err}"))
}

const ALLOWED_SEVERITIES: [&str; 3] = ["low", "medium", "high"];
const FALLBACK_SEVERITY: &str = "medium";

/// Object keys tried, in order, when a list item is an object.
const DESCRIPTION_KEYS: [&str; 8] = [
    "description",
    "desc",
    "detail",
    "details",
    "issue",
    "problem",
    "suggestion",
    "fix",
];
const MESSAGE_KEYS: [&str; 3] = ["message", "msg", "error"];
const TEXT_KEYS: [&str; 4] = ["text", "content", "summary", "title"];
const LINE_KEYS: [&str; 4] = ["line", "line_number", "lineno", "line_no"];

/// A record the parser knows how to normalize and validate.
pub trait ResponseRecord: DeserializeOwned {
    fn validator() -> &'static Validator;
    /// Reshape the decoded object in place before validation.
    fn normalize(map: &mut Map<String, Value>);
}

impl ResponseRecord for Review {
    fn validator() -> &'static Validator {
        &REVIEW_VALIDATOR
    }

    fn normalize(map: &mut Map<String, Value>) {
        for key in ["issues", "suggestions"] {
            if let Some(value) = map.get_mut(key) {
                *value = to_string_array(value);
            }
        }
        if let Some(value) = map.get_mut("severity") {
            *value = Value::String(normalize_severity(value));
        }
        if let Some(value) = map.get_mut("summary") {
            *value = Value::String(coerce_to_string(value));
        }
    }
}

impl ResponseRecord for FixResult {
    fn validator() -> &'static Validator {
        &FIX_VALIDATOR
    }

    fn normalize(map: &mut Map<String, Value>) {
        if map.get("code").is_some_and(Value::is_null) {
            map.remove("code");
        }
        if let Some(value) = map.get_mut("code") {
            *value = Value::String(coerce_to_string(value));
        }
        if let Some(value) = map.get_mut("explanation") {
            *value = Value::String(coerce_to_string(value));
        }
        if !map.contains_key("changes_made") {
            let alias = map.remove("changesMade").or_else(|| map.remove("changes"));
            if let Some(value) = alias {
                map.insert("changes_made".to_string(), value);
            }
        }
        if let Some(value) = map.get_mut("changes_made") {
            *value = to_string_array(value);
        }
    }
}

/// Recover a record of the requested kind from `raw`.
pub fn parse_response(raw: &str, kind: RecordKind) -> Option<Record> {
    match kind {
        RecordKind::Review => parse_record::<Review>(raw).map(Record::Review),
        RecordKind::Fix => parse_record::<FixResult>(raw).map(Record::Fix),
    }
}

pub fn parse_review(raw: &str) -> Option<Review> {
    parse_record(raw)
}

pub fn parse_fix(raw: &str) -> Option<FixResult> {
    parse_record(raw)
}

/// Last-resort code extraction for fix responses that failed to parse.
///
/// Looks for a code-shaped fenced block, then for a lone `"code"` field.
pub fn salvage_fix_code(raw: &str) -> Option<String> {
    salvage_code(raw)
}

/// Run the recovery strategies for `T` in order.
pub fn parse_record<T: ResponseRecord>(raw: &str) -> Option<T> {
    if let Some(record) = try_candidate(raw.trim()) {
        debug!(strategy = "direct", "parsed model response");
        return Some(record);
    }

    for (idx, block) in fenced_blocks(raw).iter().enumerate() {
        if let Some(record) = try_candidate(block.body.trim()) {
            debug!(strategy = "fenced", block = idx, "parsed model response");
            return Some(record);
        }
    }

    if let Some(record) = brace_span(raw).and_then(try_candidate) {
        debug!(strategy = "braces", "parsed model response");
        return Some(record);
    }

    let stripped = strip_reasoning(raw);
    if stripped != raw {
        if let Some(record) = try_candidate(stripped.trim()) {
            debug!(strategy = "reasoning-stripped", "parsed model response");
            return Some(record);
        }
        if let Some(record) = brace_span(&stripped).and_then(try_candidate) {
            debug!(strategy = "reasoning-stripped-braces", "parsed model response");
            return Some(record);
        }
    }

    debug!(len = raw.len(), "no strategy recovered a record");
    None
}

fn try_candidate<T: ResponseRecord>(text: &str) -> Option<T> {
    if text.is_empty() {
        return None;
    }
    let repaired = drop_duplicate_keys(text);
    let value = serde_json::from_str::<Value>(&repaired)
        .or_else(|_| serde_json::from_str::<Value>(&strip_trailing_commas(&repaired)))
        .ok()?;
    bind(value)
}

fn bind<T: ResponseRecord>(value: Value) -> Option<T> {
    let Value::Object(mut map) = value else {
        return None;
    };
    T::normalize(&mut map);
    let value = Value::Object(map);
    if !T::validator().is_valid(&value) {
        return None;
    }
    serde_json::from_value(value).ok()
}

/// Normalize a list-ish value to an array of plain strings.
///
/// A bare string becomes a one-element list; `null` becomes empty.
pub fn to_string_array(value: &Value) -> Value {
    let items: Vec<String> = match value {
        Value::Array(items) => items.iter().filter_map(item_to_text).collect(),
        Value::Null => Vec::new(),
        Value::String(s) if s.trim().is_empty() => Vec::new(),
        other => item_to_text(other).into_iter().collect(),
    };
    Value::Array(items.into_iter().map(Value::String).collect())
}

/// Flatten list items to plain strings, dropping nulls.
pub fn normalize_string_list(items: &[Value]) -> Vec<String> {
    items.iter().filter_map(item_to_text).collect()
}

fn item_to_text(item: &Value) -> Option<String> {
    match item {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => Some(object_to_text(map)),
        other => Some(other.to_string()),
    }
}

/// Pick a human-readable field from a structured list item.
///
/// Description-like keys win over message-like keys, which win over
/// text-like keys; otherwise the whole object is rendered as JSON. A line
/// number, when present, is prefixed as `Line N: `.
fn object_to_text(map: &Map<String, Value>) -> String {
    let text = DESCRIPTION_KEYS
        .iter()
        .chain(MESSAGE_KEYS.iter())
        .chain(TEXT_KEYS.iter())
        .find_map(|key| map.get(*key).filter(|v| !v.is_null()))
        .map(coerce_to_string);

    let Some(text) = text else {
        return Value::Object(map.clone()).to_string();
    };

    let line = LINE_KEYS.iter().find_map(|key| match map.get(*key)? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    });
    match line {
        Some(line) => format!("Line {line}: {text}"),
        None => text,
    }
}

/// Case-fold a severity; anything outside the allowed set becomes `medium`.
pub fn normalize_severity(value: &Value) -> String {
    let Value::String(raw) = value else {
        return FALLBACK_SEVERITY.to_string();
    };
    let folded = raw.trim().to_lowercase();
    if ALLOWED_SEVERITIES.contains(&folded.as_str()) {
        folded
    } else {
        FALLBACK_SEVERITY.to_string()
    }
}

/// String conversion used when a scalar field has the wrong JSON type.
pub fn coerce_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Severity;
    use serde_json::json;

    const REVIEW_JSON: &str = r#"{
    "issues": ["Line 5: potential IndexError"],
    "suggestions": ["Add bounds checking"],
    "severity": "high",
    "summary": "Found potential crash bug"
}"#;

    #[test]
    fn parses_bare_json() {
        let review = parse_review(REVIEW_JSON).expect("review");
        assert_eq!(review.severity, Severity::High);
        assert_eq!(review.issues, vec!["Line 5: potential IndexError"]);
    }

    #[test]
    fn fenced_json_with_prose_matches_bare_json() {
        let wrapped = format!(
            "Here's my analysis of your code.\n\n```json\n{REVIEW_JSON}\n```\n\nLet me know!"
        );
        assert_eq!(parse_review(&wrapped), parse_review(REVIEW_JSON));
        assert!(parse_review(&wrapped).is_some());
    }

    #[test]
    fn later_fenced_block_is_tried() {
        let text = format!("```\nnot json\n```\nand\n```\n{REVIEW_JSON}\n```");
        assert!(parse_review(&text).is_some());
    }

    #[test]
    fn json_embedded_in_prose_is_found() {
        let text = "After analyzing the code, here are my findings:\n{\"issues\": [\"test\"], \"suggestions\": [], \"severity\": \"low\", \"summary\": \"done\"}\nThat's all I found.";
        let review = parse_review(text).expect("review");
        assert_eq!(review.issues, vec!["test"]);
    }

    #[test]
    fn thinking_region_with_braces_is_stripped() {
        let text = "<think>\nMaybe {\"issues\": oops} ...\n</think>\n{\"issues\": [], \"suggestions\": [\"Code looks good\"], \"severity\": \"low\", \"summary\": \"No issues found\"}";
        let review = parse_review(text).expect("review");
        assert_eq!(review.summary, "No issues found");
    }

    #[test]
    fn plain_text_yields_none() {
        assert_eq!(parse_review("This is not JSON at all, just plain text."), None);
        assert_eq!(parse_fix("This is not JSON at all, just plain text."), None);
    }

    #[test]
    fn unrelated_object_is_not_a_review() {
        assert_eq!(parse_review("{\"weather\": \"sunny\"}"), None);
    }

    #[test]
    fn structured_issues_become_strings() {
        let text = r#"{"issues": [{"line": 5, "description": "IndexError possible"}, {"message": "msg only"}, {"code": 7}, 123, null], "severity": "HIGH"}"#;
        let review = parse_review(text).expect("review");
        assert_eq!(
            review.issues,
            vec![
                "Line 5: IndexError possible".to_string(),
                "msg only".to_string(),
                "{\"code\":7}".to_string(),
                "123".to_string(),
            ]
        );
        assert_eq!(review.severity, Severity::High);
    }

    #[test]
    fn unknown_severity_defaults_to_medium() {
        let review = parse_review(r#"{"summary": "s", "severity": "critical"}"#).expect("review");
        assert_eq!(review.severity, Severity::Medium);
        let review = parse_review(r#"{"summary": "s", "severity": 3}"#).expect("review");
        assert_eq!(review.severity, Severity::Medium);
    }

    #[test]
    fn mistyped_scalars_are_coerced() {
        let review = parse_review(r#"{"summary": 42, "issues": "single issue"}"#).expect("review");
        assert_eq!(review.summary, "42");
        assert_eq!(review.issues, vec!["single issue"]);
    }

    #[test]
    fn fix_requires_non_empty_code() {
        assert_eq!(parse_fix(r#"{"explanation": "no code"}"#), None);
        assert_eq!(parse_fix(r#"{"code": "   "}"#), None);
        assert_eq!(parse_fix(r#"{"code": null}"#), None);
    }

    #[test]
    fn fix_with_duplicate_code_key_keeps_last() {
        let text = "{\n\"code\": \"print(1/0)\",\n\"code\": \"print(1)\",\n\"explanation\": \"guard\",\n\"changes\": [{\"description\": \"removed division\"}]\n}";
        let fix = parse_fix(text).expect("fix");
        assert_eq!(fix.code, "print(1)");
        assert_eq!(fix.changes_made, vec!["removed division"]);
    }

    #[test]
    fn trailing_commas_are_tolerated() {
        let fix = parse_fix("{\"code\": \"x = 1\", \"changes_made\": [\"a\",],}").expect("fix");
        assert_eq!(fix.changes_made, vec!["a"]);
    }

    #[test]
    fn parse_response_dispatches_by_kind() {
        let raw = r#"{"code": "print('fixed')", "explanation": "Fixed the bug", "changes_made": ["Changed X to Y"]}"#;
        match parse_response(raw, RecordKind::Fix) {
            Some(Record::Fix(fix)) => assert_eq!(fix.code, "print('fixed')"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(parse_response(raw, RecordKind::Review), None);
    }

    #[test]
    fn parsing_is_repeatable() {
        let raw = "<think>hmm</think>```json\n{\"code\": \"x = 2\"}\n```";
        let first = parse_response(raw, RecordKind::Fix);
        let second = parse_response(raw, RecordKind::Fix);
        assert!(first.is_some());
        assert_eq!(first, second);
    }

    #[test]
    fn salvage_recovers_code_from_unparseable_fix() {
        let raw = "Sure! Here is the fix:\n```python\ndef safe_div(a, b):\n    return a / b if b else 0\n```\n{broken json";
        assert_eq!(parse_fix(raw), None);
        assert_eq!(
            salvage_fix_code(raw).as_deref(),
            Some("def safe_div(a, b):\n    return a / b if b else 0")
        );
    }

    #[test]
    fn string_list_normalization_handles_mixed_items() {
        let items = vec![
            json!("plain string issue"),
            json!({"description": "dict issue"}),
            json!(123),
        ];
        assert_eq!(
            normalize_string_list(&items),
            vec!["plain string issue", "dict issue", "123"]
        );
    }
}
