//! Error types and failure-response interpretation.
//!
//! # Design
//! The service reports failures in two shapes: a JSON envelope with
//! `success: false` and a field-keyed `error` mapping (ordinary validation
//! problems), or a bare HTML fault page (gateway/server-level faults on the
//! upload endpoints). Interpretation branches on response shape with a
//! deterministic order: an HTML document marker at the start of the body is
//! checked first, then structured JSON parsing; a body that is neither
//! surfaces as [`CkanError::Decode`], which signals a client/server contract
//! mismatch rather than a validation failure.
//!
//! Error mappings are walked as dynamic `serde_json::Value` trees — their
//! shape varies per action and is not a fixed schema.

use serde_json::Value;
use thiserror::Error;

/// Errors returned by client operations.
#[derive(Debug, Error)]
pub enum CkanError {
    /// Network-level failure; no usable response body was received.
    #[error("transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// The upload file could not be read.
    #[error("upload file error: {0}")]
    Io(#[from] std::io::Error),

    /// The outbound payload could not be serialized.
    #[error("payload serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    /// The response body does not match the expected envelope shape.
    #[error("unexpected response while performing {action}: {detail}")]
    Decode { action: String, detail: String },

    /// The server reported the action as failed. Retry-exhausted datastore
    /// writes surface with this same shape.
    #[error(transparent)]
    Action(#[from] ActionError),

    /// A datastore field was built with an empty column identifier.
    #[error("datastore field id must not be empty")]
    EmptyFieldId,
}

/// A failed action as reported by the server: the action label plus one
/// human-readable message per surfaced error field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionError {
    pub action: String,
    pub messages: Vec<String>,
}

impl ActionError {
    /// Interpret the `error` mapping of an already-parsed failure envelope.
    ///
    /// Every entry whose key does not start with `_` contributes a
    /// `"<key> - <value>"` message, in the mapping's own order; `_`-prefixed
    /// keys are internal to the service and skipped. The error always
    /// carries the action label, even when no field survives the filter.
    pub fn from_document(doc: &Value, action: &str) -> Self {
        let mut messages = Vec::new();
        if let Some(fields) = doc.get("error").and_then(Value::as_object) {
            for (key, value) in fields {
                if key.starts_with('_') {
                    continue;
                }
                messages.push(format!("{key} - {}", render_value(value)));
            }
        }
        Self {
            action: action.to_string(),
            messages,
        }
    }

    /// Interpret an HTML fault page: the single message is the trimmed text
    /// of the page's first `<h1>` heading, if one exists.
    pub fn from_html(body: &str, action: &str) -> Self {
        Self {
            action: action.to_string(),
            messages: first_h1_text(body).into_iter().collect(),
        }
    }
}

impl std::fmt::Display for ActionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "errors occurred performing {}", self.action)?;
        if !self.messages.is_empty() {
            write!(f, ": {}", self.messages.join("; "))?;
        }
        Ok(())
    }
}

impl std::error::Error for ActionError {}

/// Whether the body begins with an HTML document marker (`<html` or
/// `<!doctype`, any case, leading whitespace ignored).
pub(crate) fn is_html(body: &str) -> bool {
    let body = body.trim_start();
    let starts_with_ci = |prefix: &str| {
        body.get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
    };
    starts_with_ci("<html") || starts_with_ci("<!doctype")
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Text of the first `<h1>` element, with nested inline tags stripped.
fn first_h1_text(html: &str) -> Option<String> {
    let open = find_ascii_ci(html, "<h1")?;
    let rest = &html[open..];
    let content_start = open + rest.find('>')? + 1;
    let content = &html[content_start..];
    let content_end = find_ascii_ci(content, "</h1").unwrap_or(content.len());
    let mut text = String::new();
    let mut in_tag = false;
    for c in content[..content_end].chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => text.push(c),
            _ => {}
        }
    }
    Some(text.trim().to_string())
}

/// Byte offset of the first case-insensitive occurrence of an ASCII needle.
fn find_ascii_ci(haystack: &str, needle: &str) -> Option<usize> {
    let haystack = haystack.as_bytes();
    let needle = needle.as_bytes();
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    (0..=haystack.len() - needle.len())
        .find(|&i| haystack[i..i + needle.len()].eq_ignore_ascii_case(needle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn structured_error_formats_one_message_per_field() {
        let doc = json!({
            "success": false,
            "error": {
                "name": "Missing value",
                "resources": "Package resource(s) invalid"
            }
        });
        let err = ActionError::from_document(&doc, "create_dataset");
        assert_eq!(err.action, "create_dataset");
        assert_eq!(
            err.messages,
            vec![
                "name - Missing value",
                "resources - Package resource(s) invalid"
            ]
        );
    }

    #[test]
    fn structured_error_skips_underscore_fields() {
        let doc = json!({
            "error": {
                "__type": "Validation Error",
                "name": "Missing value",
                "_internal": "ignored"
            }
        });
        let err = ActionError::from_document(&doc, "create_dataset");
        assert_eq!(err.messages, vec!["name - Missing value"]);
    }

    #[test]
    fn all_underscore_fields_still_carry_the_action_label() {
        let doc = json!({
            "error": {"__type": "Authorization Error", "_message": "Access denied"}
        });
        let err = ActionError::from_document(&doc, "delete_dataset");
        assert!(err.messages.is_empty());
        assert_eq!(err.action, "delete_dataset");
        assert_eq!(err.to_string(), "errors occurred performing delete_dataset");
    }

    #[test]
    fn non_string_values_render_as_compact_json() {
        let doc = json!({"error": {"name": ["Missing value", "Too short"]}});
        let err = ActionError::from_document(&doc, "create_dataset");
        assert_eq!(err.messages, vec![r#"name - ["Missing value","Too short"]"#]);
    }

    #[test]
    fn missing_error_mapping_yields_no_messages() {
        let err = ActionError::from_document(&json!({"success": false}), "get_group");
        assert!(err.messages.is_empty());
    }

    #[test]
    fn html_error_extracts_first_h1() {
        let err = ActionError::from_html(
            "<html><body><h1>Bad Gateway</h1></body></html>",
            "upload_create_resource",
        );
        assert_eq!(err.messages, vec!["Bad Gateway"]);
    }

    #[test]
    fn html_error_strips_nested_tags_and_attributes() {
        let body = r#"<html><body><h1 class="err">502 <em>Bad</em> Gateway</h1><h1>second</h1></body></html>"#;
        let err = ActionError::from_html(body, "upload_create_resource");
        assert_eq!(err.messages, vec!["502 Bad Gateway"]);
    }

    #[test]
    fn html_without_h1_yields_no_messages() {
        let err = ActionError::from_html("<html><body>nope</body></html>", "x");
        assert!(err.messages.is_empty());
        assert_eq!(err.action, "x");
    }

    #[test]
    fn html_detection_checks_the_document_marker() {
        assert!(is_html("<html><body></body></html>"));
        assert!(is_html("  \n<HTML>"));
        assert!(is_html("<!DOCTYPE html><html>"));
        assert!(!is_html(r#"{"success": true}"#));
        assert!(!is_html(""));
        assert!(!is_html("<h1>not a document</h1>"));
    }

    #[test]
    fn display_joins_messages() {
        let err = ActionError {
            action: "create_datastore".to_string(),
            messages: vec!["a - b".to_string(), "c - d".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "errors occurred performing create_datastore: a - b; c - d"
        );
    }
}
