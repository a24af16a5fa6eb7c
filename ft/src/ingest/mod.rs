//! Task ingest
//!
//! The service that turns a family member's request into stored tasks.

mod service;

pub use service::{IngestService, Snapshot};
