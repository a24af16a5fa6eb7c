//! TaskStore - generic persistent record storage
//!
//! Records are stored as JSON documents in SQLite, grouped by collection.
//! Each record publishes a set of indexed fields which `Store::list` can
//! filter on without deserializing every document.
//!
//! # Example
//!
//! ```no_run
//! use taskstore::{Filter, FilterOp, IndexValue, Store};
//!
//! # fn main() -> eyre::Result<()> {
//! let store = Store::open("/tmp/my-store")?;
//! let filters = vec![Filter {
//!     field: "group_key".to_string(),
//!     op: FilterOp::Eq,
//!     value: IndexValue::String("smiths".to_string()),
//! }];
//! # let _ = (store, filters);
//! # Ok(())
//! # }
//! ```

mod filter;
mod record;
mod store;

pub use filter::{Filter, FilterOp};
pub use record::{IndexValue, Record};
pub use store::Store;

/// File name of the SQLite database inside a store directory
pub const DB_FILE: &str = "taskstore.db";

/// Current time as Unix milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
