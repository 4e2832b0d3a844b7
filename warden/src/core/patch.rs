//! Structured patch representation and model-response parsing.
//!
//! A patch is a batch of named file contents. It is data only: the sole way it
//! reaches the live tree is stage -> validate -> swap.

use jsonschema::validator_for;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::fault::Fault;
use crate::core::types::Diagnostic;

pub const PATCH_RESPONSE_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/patch_response.schema.json"
));

/// Pseudo file name used for diagnostics about the model response itself.
pub const RESPONSE_FILE: &str = "<response>";

/// One proposed file change. `content: None` deletes the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub content: Option<String>,
}

impl FileChange {
    pub fn write(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: Some(content.into()),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: None,
        }
    }

    pub fn is_delete(&self) -> bool {
        self.content.is_none()
    }
}

/// A batch of proposed changes not yet committed to the live tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    pub summary: String,
    pub changes: Vec<FileChange>,
}

impl Patch {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Content the batch assigns to `path`: `Some(Some(_))` written,
    /// `Some(None)` deleted, `None` untouched. The first mention wins.
    pub fn change_for(&self, path: &str) -> Option<Option<&str>> {
        self.changes
            .iter()
            .find(|change| change.path == path)
            .map(|change| change.content.as_deref())
    }
}

/// Parse a raw completion into a [`Patch`].
///
/// Accepts bare JSON, JSON inside a ```json fence, or JSON surrounded by prose.
/// Malformed or schema-violating responses are reported as [`Fault::Validation`]
/// so they follow the rollback path; nothing is staged from them.
pub fn parse_patch_response(raw: &str) -> Result<Patch, Fault> {
    let body = extract_json_body(raw);
    let value: Value = serde_json::from_str(body).map_err(|err| {
        Fault::Validation(vec![Diagnostic::new(
            RESPONSE_FILE,
            format!("response is not valid JSON: {err}"),
        )])
    })?;

    let schema: Value = serde_json::from_str(PATCH_RESPONSE_SCHEMA)
        .map_err(|err| Fault::logic(format!("embedded patch schema is invalid JSON: {err}")))?;
    let validator = validator_for(&schema)
        .map_err(|err| Fault::logic(format!("embedded patch schema does not compile: {err}")))?;
    let violations: Vec<Diagnostic> = validator
        .iter_errors(&value)
        .map(|err| Diagnostic::new(RESPONSE_FILE, format!("schema violation: {err}")))
        .collect();
    if !violations.is_empty() {
        return Err(Fault::Validation(violations));
    }

    serde_json::from_value(value).map_err(|err| {
        Fault::Validation(vec![Diagnostic::new(
            RESPONSE_FILE,
            format!("response does not describe a patch: {err}"),
        )])
    })
}

fn extract_json_body(raw: &str) -> &str {
    let trimmed = raw.trim();
    if let Some(fenced) = first_fenced_block(trimmed) {
        return fenced;
    }
    if trimmed.starts_with('{') {
        return trimmed;
    }
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}

fn first_fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after_fence = &text[open + 3..];
    // Skip the info string (e.g. `json`) on the opening line.
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let close = body.find("```")?;
    Some(body[..close].trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diagnostics(fault: Fault) -> Vec<Diagnostic> {
        match fault {
            Fault::Validation(diags) => diags,
            other => panic!("expected validation fault, got {other:?}"),
        }
    }

    #[test]
    fn parses_bare_json_patch() {
        let raw = r#"{"summary":"add helper","changes":[{"path":"src/a.rs","content":"fn a() {}\n"},{"path":"old.txt","content":null}]}"#;
        let patch = parse_patch_response(raw).expect("parse");
        assert_eq!(patch.summary, "add helper");
        assert_eq!(patch.changes.len(), 2);
        assert!(patch.changes[1].is_delete());
        assert_eq!(patch.change_for("old.txt"), Some(None));
        assert_eq!(patch.change_for("missing"), None);
    }

    #[test]
    fn parses_fenced_json_with_prose() {
        let raw = "Here is the change:\n```json\n{\"summary\":\"s\",\"changes\":[]}\n```\nDone.";
        let patch = parse_patch_response(raw).expect("parse");
        assert!(patch.is_empty());
    }

    #[test]
    fn prose_wrapped_object_is_extracted() {
        let raw = "Sure. {\"summary\":\"s\",\"changes\":[]} hope that helps";
        assert!(parse_patch_response(raw).is_ok());
    }

    #[test]
    fn malformed_json_is_a_validation_fault() {
        let diags = diagnostics(parse_patch_response("{not json").unwrap_err());
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].file, RESPONSE_FILE);
        assert!(diags[0].reason.contains("not valid JSON"));
    }

    #[test]
    fn schema_violations_are_reported() {
        let raw = r#"{"summary":"s","changes":[{"path":"a.rs"}],"exec":"rm -rf /"}"#;
        let diags = diagnostics(parse_patch_response(raw).unwrap_err());
        assert!(!diags.is_empty());
        assert!(diags.iter().all(|d| d.reason.starts_with("schema violation")));
    }
}
