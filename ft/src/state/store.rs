//! TaskStore - the persistence seam used by the ingest service

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::domain::{Member, Task};

use super::messages::{StateEvent, StateResponse};

/// Document store operations on tasks and memberships
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a new task, assigning its ID; returns the stored record
    async fn create_task(&self, task: Task) -> StateResponse<Task>;

    async fn get_task(&self, id: &str) -> StateResponse<Option<Task>>;

    /// All tasks of one family, in no particular order
    async fn list_tasks(&self, group_key: &str) -> StateResponse<Vec<Task>>;

    /// Remove a task; `None` if it did not exist
    async fn delete_task(&self, id: &str) -> StateResponse<Option<Task>>;

    /// Change events for every family
    fn subscribe(&self) -> broadcast::Receiver<StateEvent>;

    async fn get_member(&self, user_id: &str) -> StateResponse<Option<Member>>;

    async fn set_member(&self, member: Member) -> StateResponse<()>;
}
