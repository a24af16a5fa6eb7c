//! State manager messages
//!
//! Commands and responses for the actor pattern.

use thiserror::Error;
use tokio::sync::oneshot;

use crate::domain::{Member, Task};

/// Errors from state operations
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Channel error")]
    ChannelError,
}

/// Response from state operations
pub type StateResponse<T> = Result<T, StateError>;

/// Event broadcast after a change to a family's tasks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateEvent {
    TaskCreated { id: String, group_key: String },
    TaskDeleted { id: String, group_key: String },
}

impl StateEvent {
    /// The family whose task list changed
    pub fn group_key(&self) -> &str {
        match self {
            Self::TaskCreated { group_key, .. } | Self::TaskDeleted { group_key, .. } => group_key,
        }
    }
}

/// Commands sent to the StateManager actor
#[derive(Debug)]
pub enum StateCommand {
    // Task operations
    CreateTask {
        task: Task,
        reply: oneshot::Sender<StateResponse<Task>>,
    },
    GetTask {
        id: String,
        reply: oneshot::Sender<StateResponse<Option<Task>>>,
    },
    ListTasks {
        group_key: String,
        reply: oneshot::Sender<StateResponse<Vec<Task>>>,
    },
    DeleteTask {
        id: String,
        reply: oneshot::Sender<StateResponse<Option<Task>>>,
    },

    // Membership operations
    GetMember {
        user_id: String,
        reply: oneshot::Sender<StateResponse<Option<Member>>>,
    },
    SetMember {
        member: Member,
        reply: oneshot::Sender<StateResponse<()>>,
    },

    // Shutdown
    Shutdown,
}
