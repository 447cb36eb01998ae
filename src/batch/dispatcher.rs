//! Worker Pool / Dispatcher — reads rows, fans jobs out to a bounded pool,
//! and feeds results to the writer and counters.
//!
//! The row stream is consumed from a single path and mapped into job
//! futures; `try_buffer_unordered` keeps `workers + submit_buffer` jobs in
//! flight so workers stay busy while new rows are read, and a semaphore of
//! `workers` permits bounds the provider calls themselves. A reader error
//! (malformed record, reserved-key collision) short-circuits the whole
//! fan-out, dropping in-flight jobs: fail-fast abort. Provider failures
//! never take that path — they resolve to per-row failure output.

use crate::config::BatchConfig;
use crate::error::Result;
use crate::extract::extract_tags;
use crate::provider::{ChatMessage, ChatProvider, ChatRequest};
use crate::retry::chat_with_retry;
use crate::types::{InputRecord, Job, RowOutcome, RowResult};
use futures::TryStreamExt;
use serde_json::Map;
use std::sync::Arc;
use tokio::sync::Semaphore;

use super::ResolvedModel;
use super::progress::RunCounters;
use super::reader::RowReader;
use super::writer::OutputWriter;

/// Shared context for one run's job processing, cloned into each job future.
#[derive(Clone)]
pub(crate) struct DispatchContext {
    pub provider: Arc<dyn ChatProvider>,
    pub model: Arc<ResolvedModel>,
    pub config: Arc<BatchConfig>,
    pub counters: Arc<RunCounters>,
    pub writer: Arc<OutputWriter>,
    pub worker_slots: Arc<Semaphore>,
}

/// Drive the whole run: read rows until end-of-stream, keep up to
/// `workers + submit_buffer` jobs outstanding, and return once every
/// submitted job has resolved and been written.
pub(crate) async fn dispatch_all(reader: RowReader, ctx: DispatchContext) -> Result<()> {
    let capacity = ctx.config.workers + ctx.config.effective_submit_buffer();

    let counters = Arc::clone(&ctx.counters);
    let rows = futures::stream::try_unfold(reader, move |mut reader| {
        let counters = Arc::clone(&counters);
        async move {
            let next = reader.next().await?;
            counters.set_bytes_read(reader.bytes_read());
            Ok(next.map(|record| (record, reader)))
        }
    });

    rows.map_ok(|record| process_row(ctx.clone(), record))
        .try_buffer_unordered(capacity)
        .try_for_each(|()| futures::future::ready(Ok(())))
        .await
}

/// Process one row end to end: build the job, run the provider call under a
/// worker slot with the retry policy, extract tags, write the result, and
/// update the counters. Provider errors are recovered into failure rows
/// here; only writer/serialization errors propagate (and abort the run).
async fn process_row(ctx: DispatchContext, record: InputRecord) -> Result<()> {
    ctx.counters.record_submitted();

    let final_prompt = match &ctx.config.prompt_prefix {
        Some(prefix) => format!("{prefix}{}", record.prompt()),
        None => record.prompt().to_string(),
    };
    let job = Job {
        final_prompt,
        sysprompt: ctx.model.sysprompt.clone(),
        sampling: ctx.model.sampling,
        record,
    };

    let mut messages = Vec::with_capacity(2);
    if let Some(sysprompt) = &job.sysprompt
        && !sysprompt.trim().is_empty()
    {
        messages.push(ChatMessage::system(sysprompt.clone()));
    }
    messages.push(ChatMessage::user(job.final_prompt.clone()));

    let request = ChatRequest {
        model: ctx.model.model.clone(),
        messages,
        sampling: job.sampling,
        timeout: ctx.config.timeout,
    };

    let result = {
        let permit = ctx.worker_slots.acquire().await;
        let Ok(_permit) = permit else {
            // The pool semaphore is never closed while a run is live
            return Ok(());
        };
        chat_with_retry(ctx.provider.as_ref(), &request, ctx.config.max_retries).await
    };

    let outcome = match result {
        Ok(response) => {
            let tags = if ctx.config.extract_tags {
                extract_tags(&response.content)
            } else {
                Map::new()
            };
            RowOutcome::Success {
                response: response.content,
                reasoning: response.reasoning,
                tags,
            }
        }
        Err(e) => {
            tracing::warn!(
                line = job.record.line_number(),
                error = %e,
                "Row failed after retry policy resolved"
            );
            let error_info = e.error_info(&ctx.model.provider, &ctx.model.model);
            RowOutcome::Failure {
                error: e.to_string(),
                error_info: Some(error_info),
            }
        }
    };

    let succeeded = outcome.is_success();
    ctx.writer.write(&RowResult { job, outcome }).await?;
    if succeeded {
        ctx.counters.record_completed();
    } else {
        ctx.counters.record_failed();
    }
    Ok(())
}
