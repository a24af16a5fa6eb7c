//! StateManager - actor that owns the taskstore
//!
//! Processes commands via channels for thread-safe access to persistent state.

use std::path::Path;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::domain::{Filter, Member, Store, Task, generate_id};

use super::messages::{StateCommand, StateError, StateEvent, StateResponse};
use super::store::TaskStore;

/// Attempts at finding an unused generated ID before giving up
const ID_ATTEMPTS: usize = 4;

/// Handle to send commands to the StateManager
#[derive(Clone)]
pub struct StateManager {
    tx: mpsc::Sender<StateCommand>,
    /// Broadcast sender for task change notifications
    event_tx: broadcast::Sender<StateEvent>,
}

impl StateManager {
    /// Spawn a new StateManager actor over the store in `store_dir`
    pub fn spawn(store_dir: impl AsRef<Path>) -> eyre::Result<Self> {
        debug!(store_dir = %store_dir.as_ref().display(), "spawn: called");
        let store = Store::open(store_dir.as_ref())?;
        Self::spawn_with_store(store)
    }

    /// Spawn over an already opened store
    pub fn spawn_with_store(mut store: Store) -> eyre::Result<Self> {
        debug!("spawn_with_store: called");
        // Indexes back the per-family queries
        let task_count = store.rebuild_indexes::<Task>()?;
        let member_count = store.rebuild_indexes::<Member>()?;
        info!(task_count, member_count, "Rebuilt indexes for Task and Member records");

        let (tx, rx) = mpsc::channel(256);
        let (event_tx, _) = broadcast::channel(64);

        tokio::spawn(actor_loop(store, rx));

        info!("StateManager spawned");
        Ok(Self { tx, event_tx })
    }

    /// Subscribe to task change events
    pub fn subscribe_events(&self) -> broadcast::Receiver<StateEvent> {
        self.event_tx.subscribe()
    }

    fn notify(&self, event: StateEvent) {
        debug!(?event, "notify: called");
        // No receivers is fine: nobody is watching
        let _ = self.event_tx.send(event);
    }

    async fn request<T>(&self, command: StateCommand, reply_rx: oneshot::Receiver<StateResponse<T>>) -> StateResponse<T> {
        self.tx.send(command).await.map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }

    // === Task operations ===

    /// Create a task, assigning an ID if it has none; returns the stored record
    pub async fn create_task(&self, task: Task) -> StateResponse<Task> {
        debug!(title = %task.title, group_key = %task.group_key, "create_task: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        let stored = self
            .request(StateCommand::CreateTask { task, reply: reply_tx }, reply_rx)
            .await?;

        self.notify(StateEvent::TaskCreated {
            id: stored.id.clone(),
            group_key: stored.group_key.clone(),
        });
        Ok(stored)
    }

    /// Get a task by ID
    pub async fn get_task(&self, id: &str) -> StateResponse<Option<Task>> {
        debug!(%id, "get_task: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.request(
            StateCommand::GetTask {
                id: id.to_string(),
                reply: reply_tx,
            },
            reply_rx,
        )
        .await
    }

    /// List all tasks of a family
    pub async fn list_tasks(&self, group_key: &str) -> StateResponse<Vec<Task>> {
        debug!(%group_key, "list_tasks: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.request(
            StateCommand::ListTasks {
                group_key: group_key.to_string(),
                reply: reply_tx,
            },
            reply_rx,
        )
        .await
    }

    /// Delete a task by ID, returning the removed record if it existed
    pub async fn delete_task(&self, id: &str) -> StateResponse<Option<Task>> {
        debug!(%id, "delete_task: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        let removed = self
            .request(
                StateCommand::DeleteTask {
                    id: id.to_string(),
                    reply: reply_tx,
                },
                reply_rx,
            )
            .await?;

        if let Some(ref task) = removed {
            self.notify(StateEvent::TaskDeleted {
                id: task.id.clone(),
                group_key: task.group_key.clone(),
            });
        }
        Ok(removed)
    }

    // === Membership operations ===

    /// Look up a user's family membership
    pub async fn get_member(&self, user_id: &str) -> StateResponse<Option<Member>> {
        debug!(%user_id, "get_member: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.request(
            StateCommand::GetMember {
                user_id: user_id.to_string(),
                reply: reply_tx,
            },
            reply_rx,
        )
        .await
    }

    /// Create or replace a user's family membership
    pub async fn set_member(&self, member: Member) -> StateResponse<()> {
        debug!(user_id = %member.user_id, group_key = %member.group_key, "set_member: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.request(StateCommand::SetMember { member, reply: reply_tx }, reply_rx)
            .await
    }

    /// Shutdown the StateManager
    pub async fn shutdown(&self) -> Result<(), StateError> {
        debug!("shutdown: called");
        self.tx
            .send(StateCommand::Shutdown)
            .await
            .map_err(|_| StateError::ChannelError)
    }
}

#[async_trait]
impl TaskStore for StateManager {
    async fn create_task(&self, task: Task) -> StateResponse<Task> {
        StateManager::create_task(self, task).await
    }

    async fn get_task(&self, id: &str) -> StateResponse<Option<Task>> {
        StateManager::get_task(self, id).await
    }

    async fn list_tasks(&self, group_key: &str) -> StateResponse<Vec<Task>> {
        StateManager::list_tasks(self, group_key).await
    }

    async fn delete_task(&self, id: &str) -> StateResponse<Option<Task>> {
        StateManager::delete_task(self, id).await
    }

    fn subscribe(&self) -> broadcast::Receiver<StateEvent> {
        self.subscribe_events()
    }

    async fn get_member(&self, user_id: &str) -> StateResponse<Option<Member>> {
        StateManager::get_member(self, user_id).await
    }

    async fn set_member(&self, member: Member) -> StateResponse<()> {
        StateManager::set_member(self, member).await
    }
}

fn store_error(e: eyre::Report) -> StateError {
    StateError::StoreError(e.to_string())
}

/// Persist a new task, generating an unused ID when none is set
fn insert_task(store: &mut Store, mut task: Task) -> StateResponse<Task> {
    if task.id.is_empty() {
        let mut attempts = 0;
        task.id = loop {
            let id = generate_id("task", &task.title);
            if store.get::<Task>(&id).map_err(store_error)?.is_none() {
                break id;
            }
            attempts += 1;
            if attempts >= ID_ATTEMPTS {
                return Err(StateError::StoreError(format!("no free id for task '{}'", task.title)));
            }
        };
    }
    store.create(task.clone()).map_err(store_error)?;
    Ok(task)
}

fn remove_task(store: &mut Store, id: &str) -> StateResponse<Option<Task>> {
    let Some(task) = store.get::<Task>(id).map_err(store_error)? else {
        return Ok(None);
    };
    store.delete::<Task>(id).map_err(store_error)?;
    Ok(Some(task))
}

fn upsert_member(store: &mut Store, member: Member) -> StateResponse<()> {
    let exists = store.get::<Member>(&member.user_id).map_err(store_error)?.is_some();
    if exists {
        store.update(member).map_err(store_error)
    } else {
        store.create(member).map(|_| ()).map_err(store_error)
    }
}

/// The actor loop that owns the Store and processes commands
async fn actor_loop(mut store: Store, mut rx: mpsc::Receiver<StateCommand>) {
    debug!("actor_loop: called");
    debug!("StateManager actor started");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            StateCommand::CreateTask { task, reply } => {
                debug!(title = %task.title, "actor_loop: CreateTask command");
                let result = insert_task(&mut store, task);
                if let Err(ref e) = result {
                    warn!(error = %e, "actor_loop: CreateTask failed");
                }
                let _ = reply.send(result);
            }

            StateCommand::GetTask { id, reply } => {
                debug!(%id, "actor_loop: GetTask command");
                let result: StateResponse<Option<Task>> = store.get(&id).map_err(store_error);
                let _ = reply.send(result);
            }

            StateCommand::ListTasks { group_key, reply } => {
                debug!(%group_key, "actor_loop: ListTasks command");
                let filters = [Filter::eq("group_key", group_key)];
                let result: StateResponse<Vec<Task>> = store.list(&filters).map_err(store_error);
                let _ = reply.send(result);
            }

            StateCommand::DeleteTask { id, reply } => {
                debug!(%id, "actor_loop: DeleteTask command");
                let result = remove_task(&mut store, &id);
                let _ = reply.send(result);
            }

            StateCommand::GetMember { user_id, reply } => {
                debug!(%user_id, "actor_loop: GetMember command");
                let result: StateResponse<Option<Member>> = store.get(&user_id).map_err(store_error);
                let _ = reply.send(result);
            }

            StateCommand::SetMember { member, reply } => {
                debug!(user_id = %member.user_id, "actor_loop: SetMember command");
                let result = upsert_member(&mut store, member);
                let _ = reply.send(result);
            }

            StateCommand::Shutdown => {
                info!("StateManager shutting down");
                break;
            }
        }
    }

    debug!("StateManager actor stopped");
}
