//! Task domain type
//!
//! A Task is one household to-do item, created either by natural-language
//! ingest or by manual entry, and scoped to a family group.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use taskstore::{IndexValue, Record};

use crate::dates::iso_millis;

/// How a task entered the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskSource {
    /// Extracted from free text by the language model
    Ai,
    /// Entered through the form / CLI
    Manual,
}

impl std::fmt::Display for TaskSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ai => write!(f, "ai"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// A household task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Store-assigned identifier (e.g., "01943a-task-lunch-with-mara")
    #[serde(default)]
    pub id: String,

    /// Concise title, never empty
    pub title: String,

    /// Names or role labels, in the order given
    #[serde(default)]
    pub participants: Vec<String>,

    /// Absolute due time, if one was resolved or supplied
    pub due_instant: Option<DateTime<Utc>>,

    /// `due_instant` as `YYYY-MM-DDTHH:MM:SS.mmmZ`
    pub due_iso: Option<String>,

    /// The date phrase as extracted, resolvable or not
    pub due_text_raw: Option<String>,

    pub source: TaskSource,

    /// Family the task belongs to
    pub group_key: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create an unsaved task; the store assigns the ID
    pub fn new(title: impl Into<String>, group_key: impl Into<String>, source: TaskSource, now: DateTime<Utc>) -> Self {
        Self {
            id: String::new(),
            title: title.into(),
            participants: Vec::new(),
            due_instant: None,
            due_iso: None,
            due_text_raw: None,
            source,
            group_key: group_key.into(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_participants(mut self, participants: Vec<String>) -> Self {
        self.participants = participants;
        self
    }

    /// Set the due instant and its canonical text together
    pub fn with_due(mut self, instant: DateTime<Utc>) -> Self {
        self.due_iso = Some(iso_millis(&instant));
        self.due_instant = Some(instant);
        self
    }

    pub fn with_due_text(mut self, text: Option<String>) -> Self {
        self.due_text_raw = text;
        self
    }

    /// Due and already past at `now`
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.due_instant.is_some_and(|due| due < now)
    }
}

impl Record for Task {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at.timestamp_millis()
    }

    fn collection_name() -> &'static str {
        "tasks"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("group_key".to_string(), IndexValue::String(self.group_key.clone()));
        fields.insert("source".to_string(), IndexValue::String(self.source.to_string()));
        fields
    }
}

/// Manual task input, as submitted by a form or the CLI
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ManualTask {
    pub title: String,

    #[serde(default)]
    pub participants: Participants,

    /// RFC 3339 or local `YYYY-MM-DDTHH:MM`
    #[serde(default)]
    pub due: Option<String>,
}

/// Participants as a list, or as one comma-separated string
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Participants {
    List(Vec<String>),
    Text(String),
}

impl Default for Participants {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

impl Participants {
    /// Trimmed, non-blank names in order
    pub fn into_names(self) -> Vec<String> {
        let raw = match self {
            Self::List(names) => names,
            Self::Text(text) => text.split(',').map(str::to_string).collect(),
        };
        raw.into_iter()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect()
    }
}
