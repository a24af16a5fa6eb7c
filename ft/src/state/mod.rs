//! State management with actor pattern
//!
//! StateManager owns the taskstore and processes messages via channels,
//! providing thread-safe access to persistent state. Services depend on the
//! [`TaskStore`] trait rather than on the actor directly.

mod manager;
mod messages;
mod store;

pub use manager::StateManager;
pub use messages::{StateCommand, StateError, StateEvent, StateResponse};
pub use store::TaskStore;

#[cfg(test)]
pub use store::fake;
