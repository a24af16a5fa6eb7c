//! Task candidate schema and validation
//!
//! Validation is independent of the transport: it takes whatever JSON the
//! model produced and either returns a well-formed candidate or says why not.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// A task as extracted from free text, before date resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCandidate {
    /// Concise task title, never empty
    pub title: String,

    /// Names or role labels mentioned in the text
    pub participants: Vec<String>,

    /// Verbatim date/time expression, if the text had one
    pub due_date_text: Option<String>,
}

/// Why model output was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("model output is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("model output is not a JSON object")]
    NotAnObject,

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' must be {expected}")]
    WrongType { field: &'static str, expected: &'static str },

    #[error("title must not be empty")]
    EmptyTitle,

    #[error("unusable provider response: {0}")]
    Envelope(String),
}

/// Parse and validate the raw content string returned by the model
pub fn parse_candidate(content: &str) -> Result<TaskCandidate, ValidationError> {
    debug!(content_len = content.len(), "parse_candidate: called");
    let value: Value = serde_json::from_str(content).map_err(|e| ValidationError::InvalidJson(e.to_string()))?;
    validate(&value)
}

/// Validate a JSON value against the candidate schema
///
/// - `title`: required string, trimmed, must be non-empty
/// - `participants`: list of strings; absent or null means empty, blanks are dropped
/// - `due_date_text`: string or null; absent, null or blank means no date
pub fn validate(value: &Value) -> Result<TaskCandidate, ValidationError> {
    let obj = value.as_object().ok_or(ValidationError::NotAnObject)?;

    let title = match obj.get("title") {
        None | Some(Value::Null) => return Err(ValidationError::MissingField("title")),
        Some(Value::String(s)) => s.trim(),
        Some(_) => {
            return Err(ValidationError::WrongType {
                field: "title",
                expected: "a string",
            });
        }
    };
    if title.is_empty() {
        return Err(ValidationError::EmptyTitle);
    }

    let participants = match obj.get("participants") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::trim).ok_or(ValidationError::WrongType {
                    field: "participants",
                    expected: "a list of strings",
                })
            })
            .filter(|item| !matches!(item, Ok("")))
            .map(|item| item.map(str::to_string))
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => {
            return Err(ValidationError::WrongType {
                field: "participants",
                expected: "a list of strings",
            });
        }
    };

    let due_date_text = match obj.get("due_date_text") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(Value::String(s)) => Some(s.trim().to_string()),
        Some(_) => {
            return Err(ValidationError::WrongType {
                field: "due_date_text",
                expected: "a string or null",
            });
        }
    };

    Ok(TaskCandidate {
        title: title.to_string(),
        participants,
        due_date_text,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_full_candidate() {
        let candidate = validate(&json!({
            "title": "Lunch with Mara",
            "participants": ["Mara"],
            "due_date_text": "next Friday at noon"
        }))
        .unwrap();

        assert_eq!(candidate.title, "Lunch with Mara");
        assert_eq!(candidate.participants, vec!["Mara".to_string()]);
        assert_eq!(candidate.due_date_text.as_deref(), Some("next Friday at noon"));
    }

    #[test]
    fn test_participants_default_to_empty() {
        let candidate = validate(&json!({ "title": "Water plants", "due_date_text": null })).unwrap();
        assert!(candidate.participants.is_empty());
        assert!(candidate.due_date_text.is_none());

        let candidate = validate(&json!({ "title": "Water plants", "participants": null })).unwrap();
        assert!(candidate.participants.is_empty());
    }

    #[test]
    fn test_empty_title_rejected() {
        assert_eq!(validate(&json!({ "title": "" })), Err(ValidationError::EmptyTitle));
        assert_eq!(validate(&json!({ "title": "   " })), Err(ValidationError::EmptyTitle));
    }

    #[test]
    fn test_missing_title_rejected() {
        assert_eq!(
            validate(&json!({ "participants": ["Dad"] })),
            Err(ValidationError::MissingField("title"))
        );
        assert_eq!(validate(&json!({ "title": null })), Err(ValidationError::MissingField("title")));
    }

    #[test]
    fn test_wrong_types_rejected() {
        assert!(matches!(
            validate(&json!({ "title": 42 })),
            Err(ValidationError::WrongType { field: "title", .. })
        ));
        assert!(matches!(
            validate(&json!({ "title": "x", "participants": "Mom, Dad" })),
            Err(ValidationError::WrongType { field: "participants", .. })
        ));
        assert!(matches!(
            validate(&json!({ "title": "x", "participants": ["Mom", 7] })),
            Err(ValidationError::WrongType { field: "participants", .. })
        ));
        assert!(matches!(
            validate(&json!({ "title": "x", "due_date_text": { "day": "tuesday" } })),
            Err(ValidationError::WrongType { field: "due_date_text", .. })
        ));
    }

    #[test]
    fn test_not_an_object() {
        assert_eq!(validate(&json!(["title"])), Err(ValidationError::NotAnObject));
        assert_eq!(validate(&json!("title")), Err(ValidationError::NotAnObject));
    }

    #[test]
    fn test_trimming_and_blanks() {
        let candidate = validate(&json!({
            "title": "  Take out recycling ",
            "participants": [" Kid ", "", "  "],
            "due_date_text": "   "
        }))
        .unwrap();
        assert_eq!(candidate.title, "Take out recycling");
        assert_eq!(candidate.participants, vec!["Kid".to_string()]);
        assert!(candidate.due_date_text.is_none());
    }

    #[test]
    fn test_extra_fields_ignored() {
        let candidate = validate(&json!({ "title": "Vet", "priority": "high" })).unwrap();
        assert_eq!(candidate.title, "Vet");
    }

    #[test]
    fn test_parse_candidate_invalid_json() {
        assert!(matches!(
            parse_candidate("Sure! Here is your task: {"),
            Err(ValidationError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_parse_candidate_ok() {
        let candidate =
            parse_candidate(r#"{"title":"Dentist","participants":["Ivy"],"due_date_text":"Tuesday"}"#).unwrap();
        assert_eq!(candidate.due_date_text.as_deref(), Some("Tuesday"));
    }
}
