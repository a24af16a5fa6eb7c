//! famtasks - shared family task list
//!
//! Family members type free text such as "dentist for Ava next Tuesday at
//! 3pm"; a language model extracts a structured task, the date phrase is
//! resolved locally against the current time, and the task is stored in a
//! list shared by everyone in the family.
//!
//! # Modules
//!
//! - [`llm`] - LLM client trait and the OpenAI-compatible implementation
//! - [`extract`] - candidate schema, validation and the extraction round trip
//! - [`dates`] - relative date phrase resolution
//! - [`ingest`] - the ingest service tying extraction, dates and storage together
//! - [`state`] - store actor and the `TaskStore` seam
//! - [`server`] - HTTP API
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod cli;
pub mod config;
pub mod dates;
pub mod domain;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod llm;
pub mod prompts;
pub mod server;
pub mod state;

// Re-export commonly used types
pub use config::{Config, LlmConfig};
pub use dates::{DateResolver, ResolvedDate};
pub use domain::{ManualTask, Member, RequestContext, Task, TaskSource};
pub use error::{Error, Result};
pub use extract::{ExtractionError, Extractor, TaskCandidate, ValidationError};
pub use ingest::IngestService;
pub use llm::{CompletionRequest, CompletionResponse, LlmClient, LlmError, OpenAIClient, create_client};
pub use prompts::PromptLoader;
pub use server::{AppState, router};
pub use state::{StateError, StateEvent, StateManager, TaskStore};
