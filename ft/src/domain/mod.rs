//! Domain types for famtasks
//!
//! Task and Member implement the Record trait for taskstore persistence.

mod context;
mod id;
mod member;
mod task;

pub use context::RequestContext;
pub use id::{generate_id, resolve_reference};
pub use member::Member;
pub use task::{ManualTask, Participants, Task, TaskSource};

// Re-export taskstore types for convenience
pub use taskstore::{Filter, FilterOp, IndexValue, Record, Store};
