//! Request context
//!
//! Every service operation runs on behalf of a family. The context is built
//! by the caller (HTTP layer or CLI) and passed explicitly.

use crate::error::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Authenticated user, when the caller knows one
    pub user_id: Option<String>,
    /// Family whose tasks are read and written
    pub group_key: String,
}

impl RequestContext {
    /// Context for a family; blank keys are rejected
    pub fn for_family(group_key: &str) -> Result<Self, Error> {
        let group_key = group_key.trim();
        if group_key.is_empty() {
            return Err(Error::InvalidRequest("family is required".to_string()));
        }
        Ok(Self {
            user_id: None,
            group_key: group_key.to_string(),
        })
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}
