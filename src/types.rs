//! Core types for mq-batch

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// Field name holding the prompt text in every input record.
pub const PROMPT_FIELD: &str = "prompt";

/// Output field holding the provider response text on success.
pub const RESPONSE_FIELD: &str = "response";

/// Output field holding the error message on per-row failure.
pub const ERROR_FIELD: &str = "error";

/// Output field holding structured error detail, when available.
pub const ERROR_INFO_FIELD: &str = "error_info";

/// Output field holding the original, unmodified prompt from the input row.
pub const INPUT_PROMPT_FIELD: &str = "mq_input_prompt";

/// Output field holding the system prompt that was in effect, if any.
pub const SYSPROMPT_FIELD: &str = "sysprompt";

/// Output field holding the provider's reasoning trace, if one was supplied.
pub const REASONING_FIELD: &str = "reasoning";

/// One row of batch input: an ordered, unique-keyed mapping of fields.
///
/// Invariant: the `prompt` field is present and is a string. The Row Reader
/// enforces this at construction (file sources fail fast on violation; stdin
/// sources synthesize the field from the raw line), so accessors here never
/// need to report absence.
#[derive(Clone, Debug, PartialEq)]
pub struct InputRecord {
    fields: Map<String, Value>,
    line_number: u64,
}

impl InputRecord {
    /// Build a record from an already-validated field map.
    ///
    /// Callers must guarantee the `prompt` invariant; both construction
    /// sites live in the Row Reader.
    pub(crate) fn new(fields: Map<String, Value>, line_number: u64) -> Self {
        debug_assert!(
            fields.get(PROMPT_FIELD).is_some_and(Value::is_string),
            "InputRecord constructed without a string prompt field"
        );
        Self {
            fields,
            line_number,
        }
    }

    /// The prompt text from the input row.
    pub fn prompt(&self) -> &str {
        self.fields
            .get(PROMPT_FIELD)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// 1-based line number this record was read from.
    pub fn line_number(&self) -> u64 {
        self.line_number
    }

    /// All fields of the record, in input order.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Consume the record, yielding its field map for output merging.
    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }
}

/// Sampling parameters for a provider request.
///
/// All fields are optional; `None` means "provider default". Run-level
/// overrides are merged over the registry entry's defaults with
/// [`SamplingParams::merged_over`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    /// Sampling temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    /// Nucleus sampling cutoff
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,

    /// Top-k sampling cutoff
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
}

impl SamplingParams {
    /// Merge `self` over `defaults`: a field set here wins, an unset field
    /// falls back to the default.
    pub fn merged_over(self, defaults: SamplingParams) -> SamplingParams {
        SamplingParams {
            temperature: self.temperature.or(defaults.temperature),
            top_p: self.top_p.or(defaults.top_p),
            top_k: self.top_k.or(defaults.top_k),
        }
    }

    /// Whether no parameter is set.
    pub fn is_empty(&self) -> bool {
        self.temperature.is_none() && self.top_p.is_none() && self.top_k.is_none()
    }
}

/// The in-flight unit of work derived from one [`InputRecord`].
///
/// Created by the dispatcher when a submission slot frees up; destroyed once
/// its result has been written.
#[derive(Clone, Debug)]
pub struct Job {
    /// Final prompt text sent to the provider (prefix template applied)
    pub final_prompt: String,

    /// System prompt in effect for this job, if any
    pub sysprompt: Option<String>,

    /// Resolved sampling parameters (run overrides over registry defaults)
    pub sampling: SamplingParams,

    /// The originating input record
    pub record: InputRecord,
}

/// How a single row resolved.
#[derive(Clone, Debug)]
pub enum RowOutcome {
    /// The provider returned a response
    Success {
        /// Response text
        response: String,
        /// Reasoning trace, when the provider supplied one
        reasoning: Option<String>,
        /// Tag-extracted auxiliary fields (`tag:*` keys), empty when tag
        /// extraction is disabled or nothing matched
        tags: Map<String, Value>,
    },
    /// All attempts failed; the row is surfaced as data, not as a run error
    Failure {
        /// Error message
        error: String,
        /// Structured error detail (provider, model, status code, snippet)
        error_info: Option<Value>,
    },
}

impl RowOutcome {
    /// Whether this outcome is a success.
    pub fn is_success(&self) -> bool {
        matches!(self, RowOutcome::Success { .. })
    }
}

/// Result of one row: outcome plus the originating record, so the Output
/// Writer can merge the input fields into the output row.
#[derive(Clone, Debug)]
pub struct RowResult {
    /// The job this result belongs to (carries the originating record)
    pub job: Job,
    /// How the row resolved
    pub outcome: RowOutcome,
}

/// Final, frozen counters for a completed run.
#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    /// Rows submitted as jobs
    pub submitted: u64,

    /// Rows that resolved successfully
    pub completed: u64,

    /// Rows that resolved as failures
    pub failed: u64,

    /// Input bytes consumed
    pub bytes_read: u64,

    /// Total input bytes, when the source length was known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_total: Option<u64>,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// Wall-clock duration of the run
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
}

impl RunSummary {
    /// A run succeeds only if every row succeeded.
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Process exit code for embedders: 0 on success, 1 if any row failed.
    pub fn exit_code(&self) -> i32 {
        if self.is_success() { 0 } else { 1 }
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}
