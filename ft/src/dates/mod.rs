//! Date phrase resolution
//!
//! Turns fragments like "next Friday at noon" or "in 2 hours" into absolute
//! instants, relative to a reference "now" in household local time.
//!
//! - [`vocab`] - word tables and token patterns
//! - [`parser`] - tokens to recognized components
//! - [`resolver`] - components anchored to a reference instant

pub mod parser;
mod resolver;
pub mod vocab;

pub use resolver::{DateResolver, ResolvedDate, iso_millis};
