//! Output Writer — one encoded result row per line, in completion order.
//!
//! Concurrent workers call [`OutputWriter::write`] directly; the full
//! serialize-write-flush of one record happens under a single lock so
//! records never interleave mid-line. Flushing per record means a killed
//! process loses at most the in-flight record. No re-sequencing is done:
//! output order is completion order by contract.

use crate::error::Result;
use crate::types::{
    ERROR_FIELD, ERROR_INFO_FIELD, INPUT_PROMPT_FIELD, PROMPT_FIELD, REASONING_FIELD,
    RESPONSE_FIELD, RowOutcome, RowResult, SYSPROMPT_FIELD,
};
use serde_json::{Map, Value};
use std::path::Path;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

/// Serialized sink for completed or failed results.
pub struct OutputWriter {
    sink: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
}

impl OutputWriter {
    /// Wrap an arbitrary async sink.
    pub fn new(sink: Box<dyn AsyncWrite + Send + Unpin>) -> Self {
        Self {
            sink: Mutex::new(sink),
        }
    }

    /// Write results to standard output.
    pub fn stdout() -> Self {
        Self::new(Box::new(tokio::io::stdout()))
    }

    /// Create (truncate) a file and write results to it.
    pub async fn create(path: &Path) -> Result<Self> {
        let file = tokio::fs::File::create(path).await?;
        Ok(Self::new(Box::new(file)))
    }

    /// Append one result row and flush it.
    pub async fn write(&self, result: &RowResult) -> Result<()> {
        let record = build_output_record(result);
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let mut sink = self.sink.lock().await;
        sink.write_all(&line).await?;
        sink.flush().await?;
        Ok(())
    }
}

/// Merge a result into its originating record's fields.
///
/// The output row is the input row plus `prompt` (exact text sent, prefix
/// included), `mq_input_prompt` (the untouched input prompt), `sysprompt`
/// when one was in effect, and either the success fields (`response`,
/// optional `reasoning`, `tag:*` extractions) or the failure fields
/// (`error`, optional `error_info`).
pub fn build_output_record(result: &RowResult) -> Map<String, Value> {
    let job = &result.job;
    let mut out = job.record.fields().clone();

    out.insert(
        INPUT_PROMPT_FIELD.to_string(),
        Value::String(job.record.prompt().to_string()),
    );
    out.insert(
        PROMPT_FIELD.to_string(),
        Value::String(job.final_prompt.clone()),
    );
    if let Some(sysprompt) = &job.sysprompt
        && !sysprompt.trim().is_empty()
    {
        out.insert(
            SYSPROMPT_FIELD.to_string(),
            Value::String(sysprompt.clone()),
        );
    }

    match &result.outcome {
        RowOutcome::Success {
            response,
            reasoning,
            tags,
        } => {
            out.insert(RESPONSE_FIELD.to_string(), Value::String(response.clone()));
            if let Some(reasoning) = reasoning
                && !reasoning.trim().is_empty()
            {
                out.insert(
                    REASONING_FIELD.to_string(),
                    Value::String(reasoning.clone()),
                );
            }
            for (key, value) in tags {
                out.insert(key.clone(), value.clone());
            }
        }
        RowOutcome::Failure { error, error_info } => {
            out.insert(ERROR_FIELD.to_string(), Value::String(error.clone()));
            if let Some(info) = error_info {
                out.insert(ERROR_INFO_FIELD.to_string(), info.clone());
            }
        }
    }

    out
}
