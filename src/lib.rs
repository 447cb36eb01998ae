//! # mq-batch
//!
//! Concurrent batch-query engine for LLM text-generation providers.
//!
//! Feed it a stream of newline-delimited JSON records (each with at least a
//! `prompt` field) and it dispatches every record as an independent request
//! to a provider, bounding concurrency, retrying transient failures, and
//! writing completed results incrementally — one JSON line per row, in
//! completion order. Individual rows may fail without aborting the run;
//! failed rows are present in the output with an `error` field and are
//! reflected in the final run status.
//!
//! ## Design Philosophy
//!
//! - **Library-first** - No CLI or UI; embedders map [`RunSummary`] to an
//!   exit status themselves
//! - **Partial failure is data** - Per-row provider failures land in the
//!   output stream, never as a run error
//! - **Streaming end to end** - Input is never materialized in memory, and
//!   every result is flushed as soon as it completes
//! - **Unordered by contract** - Output order is completion order; no
//!   re-sequencing is attempted
//!
//! ## Quick Start
//!
//! ```no_run
//! use mq_batch::{BatchConfig, BatchInput, BatchOutput, BatchRunner, ModelRegistry};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = ModelRegistry::load_default()?;
//!     let config = BatchConfig {
//!         workers: 8,
//!         extract_tags: true,
//!         ..Default::default()
//!     };
//!
//!     let runner = BatchRunner::from_registry(&registry, "gpt", config)?;
//!     let summary = runner
//!         .run(BatchInput::File("rows.ndjson".into()), BatchOutput::Stdout)
//!         .await?;
//!
//!     std::process::exit(summary.exit_code());
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Batch engine: runner, reader, writer, progress
pub mod batch;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Tag extraction from response text
pub mod extract;
/// Provider client trait and HTTP implementation
pub mod provider;
/// Read-only model-shortname registry
pub mod registry;
/// Retry policy for provider calls
pub mod retry;
/// Core types
pub mod types;

// Re-export commonly used types
pub use batch::{BatchInput, BatchOutput, BatchRunner, ResolvedModel};
pub use batch::progress::{ProgressSnapshot, RunCounters};
pub use config::BatchConfig;
pub use error::{Error, Result};
pub use extract::{TAG_PREFIX, TagValue, extract_tags};
pub use provider::{
    ChatMessage, ChatProvider, ChatRequest, ChatResponse, HttpChatProvider, ProviderError,
};
pub use registry::{ModelEntry, ModelRegistry};
pub use retry::{IsRetryable, chat_with_retry};
pub use types::{InputRecord, Job, RowOutcome, RowResult, RunSummary, SamplingParams};
