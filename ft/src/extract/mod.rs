//! Task extraction from natural language
//!
//! - [`candidate`] - the candidate schema and a pure `validate` over JSON
//! - [`extractor`] - one LLM round trip producing a validated candidate

pub mod candidate;
mod extractor;

pub use candidate::{TaskCandidate, ValidationError, parse_candidate, validate};
pub use extractor::{DEFAULT_MAX_TOKENS, ExtractionError, Extractor};
