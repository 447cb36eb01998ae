//! Batch engine — transforms a stream of input records into a stream of
//! query results by dispatching each record as an independent provider
//! request with bounded concurrency, per-row retries, incremental output,
//! and live progress reporting.
//!
//! The engine tolerates individual-row failure without aborting the run:
//! failed rows appear in the output with an `error` field, and only the
//! final [`RunSummary`] (or the process exit status derived from it)
//! reveals that anything went wrong. Output order is completion order —
//! explicitly unspecified relative to input order.

use crate::config::BatchConfig;
use crate::error::Result;
use crate::provider::{ChatProvider, HttpChatProvider};
use crate::registry::{ModelEntry, ModelRegistry};
use crate::types::{RunSummary, SamplingParams};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

pub mod progress;
pub mod reader;
pub mod writer;

mod dispatcher;

#[cfg(test)]
pub(crate) mod test_support;

#[cfg(test)]
mod tests;

use dispatcher::DispatchContext;
use progress::{RunCounters, spawn_progress_reporter};
use reader::RowReader;
use writer::OutputWriter;

/// A model resolved for one run: registry defaults with run-level overrides
/// already applied.
#[derive(Clone, Debug)]
pub struct ResolvedModel {
    /// Provider name, used for error detail
    pub provider: String,
    /// Full model identifier sent on every request
    pub model: String,
    /// Effective system prompt (run override wins over the saved one)
    pub sysprompt: Option<String>,
    /// Effective sampling parameters (run overrides merged over defaults)
    pub sampling: SamplingParams,
}

impl ResolvedModel {
    /// Apply run-level overrides from `config` over a registry entry.
    pub fn resolve(entry: &ModelEntry, config: &BatchConfig) -> Self {
        Self {
            provider: entry.provider.clone(),
            model: entry.model.clone(),
            sysprompt: config.sysprompt.clone().or_else(|| entry.sysprompt.clone()),
            sampling: config.sampling.merged_over(entry.sampling),
        }
    }
}

/// Where input rows come from.
pub enum BatchInput {
    /// NDJSON file (strict records, known length, ETA available)
    File(PathBuf),
    /// Standard input (lenient records, unknown length)
    Stdin,
    /// Arbitrary non-seekable reader (lenient records, unknown length)
    Reader(Box<dyn AsyncRead + Send + Unpin>),
}

/// Where result rows go.
pub enum BatchOutput {
    /// Standard output
    Stdout,
    /// Create (truncate) a file
    File(PathBuf),
    /// Arbitrary async sink
    Writer(Box<dyn AsyncWrite + Send + Unpin>),
}

/// The batch run entry point.
pub struct BatchRunner {
    provider: Arc<dyn ChatProvider>,
    model: ResolvedModel,
    config: BatchConfig,
}

impl BatchRunner {
    /// Build a runner from an explicit provider and an already-resolved
    /// model. Validates the configuration.
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        model: ResolvedModel,
        config: BatchConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            provider,
            model,
            config,
        })
    }

    /// Build a runner by resolving a model shortname against the registry
    /// and constructing the HTTP provider from the entry's endpoint and
    /// API-key environment variable.
    pub fn from_registry(
        registry: &ModelRegistry,
        shortname: &str,
        config: BatchConfig,
    ) -> Result<Self> {
        let entry = registry.resolve(shortname)?;
        let base_url = entry.resolved_base_url()?;
        let provider = HttpChatProvider::from_env(&base_url, &entry.resolved_api_key_env())?;
        let model = ResolvedModel::resolve(entry, &config);
        Self::new(Arc::new(provider), model, config)
    }

    /// Run one batch to completion.
    ///
    /// Reads rows until end-of-stream, keeps `workers` provider calls in
    /// flight (submitting up to `submit_buffer` jobs ahead), writes each
    /// result as it completes, and reports progress on the configured
    /// interval. Returns the frozen counters; per-row failures are *data*
    /// (the summary's `failed` count and the rows' `error` fields), while a
    /// returned `Err` means the run itself aborted — pre-flight validation,
    /// a malformed record, or a sink failure.
    pub async fn run(&self, input: BatchInput, output: BatchOutput) -> Result<RunSummary> {
        let reader = match input {
            BatchInput::File(path) => RowReader::file(&path, self.config.extract_tags).await?,
            BatchInput::Stdin => RowReader::stdin(self.config.extract_tags),
            BatchInput::Reader(r) => RowReader::from_reader(r, self.config.extract_tags),
        };
        let writer = Arc::new(match output {
            BatchOutput::Stdout => OutputWriter::stdout(),
            BatchOutput::File(path) => OutputWriter::create(&path).await?,
            BatchOutput::Writer(w) => OutputWriter::new(w),
        });

        let counters = Arc::new(RunCounters::new(reader.bytes_total()));
        let cancel_token = CancellationToken::new();
        let progress_task = spawn_progress_reporter(
            Arc::clone(&counters),
            self.config.progress_interval,
            cancel_token.child_token(),
        );

        let ctx = DispatchContext {
            provider: Arc::clone(&self.provider),
            model: Arc::new(self.model.clone()),
            config: Arc::new(self.config.clone()),
            counters: Arc::clone(&counters),
            writer,
            worker_slots: Arc::new(tokio::sync::Semaphore::new(self.config.workers)),
        };

        let outcome = dispatcher::dispatch_all(reader, ctx).await;

        // Stop the reporter before surfacing the outcome so no timer is left
        // behind on either path
        cancel_token.cancel();
        if let Some(task) = progress_task
            && let Err(e) = task.await
        {
            tracing::error!(error = %e, "Progress reporter task panicked");
        }

        outcome?;
        let summary = counters.freeze();
        tracing::info!(
            submitted = summary.submitted,
            completed = summary.completed,
            failed = summary.failed,
            elapsed_secs = summary.elapsed.as_secs_f64(),
            "Batch run finished"
        );
        Ok(summary)
    }
}
