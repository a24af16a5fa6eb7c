//! Family membership
//!
//! Maps a user id to the family (group key) whose tasks they see.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use taskstore::{IndexValue, Record, now_ms};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub user_id: String,
    pub group_key: String,
    /// Last update timestamp (Unix milliseconds)
    pub updated_at: i64,
}

impl Member {
    pub fn new(user_id: impl Into<String>, group_key: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            group_key: group_key.into(),
            updated_at: now_ms(),
        }
    }
}

impl Record for Member {
    fn id(&self) -> &str {
        &self.user_id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "members"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("group_key".to_string(), IndexValue::String(self.group_key.clone()));
        fields
    }
}
