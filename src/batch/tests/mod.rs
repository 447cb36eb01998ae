//! End-to-end batch engine tests with scripted providers.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::test_support::{ScriptedProvider, SharedSink, echo_provider};
use super::{BatchInput, BatchOutput, BatchRunner, ResolvedModel};
use crate::config::BatchConfig;
use crate::error::Error;
use crate::provider::{ChatProvider, ChatResponse, ProviderError};
use crate::types::{RunSummary, SamplingParams};
use serde_json::{Value, json};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

fn stub_model() -> ResolvedModel {
    ResolvedModel {
        provider: "stub".to_string(),
        model: "stub-model".to_string(),
        sysprompt: None,
        sampling: SamplingParams::default(),
    }
}

fn quiet_config() -> BatchConfig {
    BatchConfig {
        // Keep tests silent and timers out of the picture
        progress_interval: Duration::ZERO,
        timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

fn transient() -> ProviderError {
    ProviderError::Server {
        status: 503,
        message: "unavailable".to_string(),
    }
}

fn non_retryable() -> ProviderError {
    ProviderError::Auth {
        status: 401,
        message: "bad key".to_string(),
    }
}

/// Run a batch over an NDJSON temp file, returning the summary result and
/// the parsed output rows.
async fn run_over_file(
    provider: Arc<dyn ChatProvider>,
    config: BatchConfig,
    ndjson: &str,
) -> (crate::error::Result<RunSummary>, Vec<Value>) {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(ndjson.as_bytes()).unwrap();

    let sink = SharedSink::default();
    let runner = BatchRunner::new(provider, stub_model(), config).unwrap();
    let result = runner
        .run(
            BatchInput::File(file.path().to_path_buf()),
            BatchOutput::Writer(Box::new(sink.clone())),
        )
        .await;

    let rows = sink
        .lines()
        .iter()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    (result, rows)
}

fn row_for<'a>(rows: &'a [Value], input_prompt: &str) -> &'a Value {
    rows.iter()
        .find(|r| r["mq_input_prompt"] == json!(input_prompt))
        .unwrap_or_else(|| panic!("no output row for prompt {input_prompt:?}"))
}

// --- no loss, no duplication ---

#[tokio::test]
async fn every_row_produces_exactly_one_result() {
    for workers in [1, 2, 8] {
        let ndjson: String = (0..25)
            .map(|i| format!("{{\"prompt\":\"q{i}\",\"i\":{i}}}\n"))
            .collect();
        let config = BatchConfig {
            workers,
            ..quiet_config()
        };

        let (result, rows) = run_over_file(Arc::new(echo_provider()), config, &ndjson).await;
        let summary = result.unwrap();

        assert_eq!(rows.len(), 25, "workers={workers}: no loss, no duplication");
        assert_eq!(summary.submitted, 25);
        assert_eq!(summary.completed, 25);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.exit_code(), 0);

        // Every input index appears exactly once, in whatever order
        let mut seen: Vec<i64> = rows.iter().map(|r| r["i"].as_i64().unwrap()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..25).collect::<Vec<_>>());
    }
}

#[tokio::test]
async fn result_count_holds_under_a_failure_mix() {
    // Odd-numbered prompts fail non-retryably, evens succeed
    let provider = ScriptedProvider::new(|prompt, _| {
        let n: u32 = prompt.trim_start_matches('q').parse().unwrap();
        if n % 2 == 1 {
            Err(non_retryable())
        } else {
            Ok(ChatResponse {
                content: "ok".to_string(),
                reasoning: None,
            })
        }
    });
    let ndjson: String = (0..10).map(|i| format!("{{\"prompt\":\"q{i}\"}}\n")).collect();

    let (result, rows) = run_over_file(Arc::new(provider), quiet_config(), &ndjson).await;
    let summary = result.unwrap();

    assert_eq!(rows.len(), 10, "failed rows still produce output rows");
    assert_eq!(summary.completed, 5);
    assert_eq!(summary.failed, 5);
    assert_eq!(
        summary.exit_code(),
        1,
        "any row failure yields a non-zero exit code"
    );
}

// --- field passthrough ---

#[tokio::test]
async fn output_preserves_all_input_fields() {
    let ndjson = "{\"prompt\":\"q\",\"id\":42,\"labels\":[\"x\",\"y\"],\"nested\":{\"a\":1}}\n";
    let (result, rows) = run_over_file(Arc::new(echo_provider()), quiet_config(), ndjson).await;
    result.unwrap();

    let row = &rows[0];
    assert_eq!(row["id"], json!(42));
    assert_eq!(row["labels"], json!(["x", "y"]));
    assert_eq!(row["nested"], json!({"a": 1}));
    assert_eq!(row["response"], json!("echo:q"));
    assert_eq!(row["prompt"], json!("q"));
    assert_eq!(row["mq_input_prompt"], json!("q"));
}

// --- retry budget ---

#[tokio::test]
async fn retry_budget_is_never_exceeded() {
    // Would succeed on attempt 4, but max_retries=2 allows only 3 attempts
    let provider = ScriptedProvider::new(|_, attempt| {
        if attempt <= 3 {
            Err(transient())
        } else {
            Ok(ChatResponse {
                content: "too late".to_string(),
                reasoning: None,
            })
        }
    });
    let config = BatchConfig {
        max_retries: 2,
        ..quiet_config()
    };

    let (result, rows) = run_over_file(Arc::new(provider), config, "{\"prompt\":\"q\"}\n").await;
    let summary = result.unwrap();

    assert_eq!(summary.failed, 1, "the row must surface as a failure");
    assert!(rows[0].get("response").is_none());
    assert!(rows[0]["error"].as_str().unwrap().contains("503"));
}

// --- transient failures recover within budget ---

#[tokio::test]
async fn flaky_row_recovers_within_retry_budget() {
    let provider = ScriptedProvider::new(|prompt, attempt| {
        if prompt == "a" && attempt <= 2 {
            Err(transient())
        } else {
            Ok(ChatResponse {
                content: format!("r:{prompt}"),
                reasoning: None,
            })
        }
    });
    let config = BatchConfig {
        workers: 2,
        max_retries: 2,
        ..quiet_config()
    };

    let (result, rows) =
        run_over_file(Arc::new(provider), config, "{\"prompt\":\"a\"}\n{\"prompt\":\"b\"}\n").await;
    let summary = result.unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(row_for(&rows, "a")["response"], json!("r:a"));
    assert_eq!(row_for(&rows, "b")["response"], json!("r:b"));
    assert!(rows.iter().all(|r| r.get("error").is_none()));
    assert_eq!(summary.exit_code(), 0);
}

// --- per-row failure isolation ---

#[tokio::test]
async fn non_retryable_failure_is_isolated_to_its_row() {
    let provider = ScriptedProvider::new(|prompt, _| {
        if prompt == "a" {
            Err(non_retryable())
        } else {
            Ok(ChatResponse {
                content: format!("r:{prompt}"),
                reasoning: None,
            })
        }
    });
    let config = BatchConfig {
        workers: 2,
        ..quiet_config()
    };

    let (result, rows) =
        run_over_file(Arc::new(provider), config, "{\"prompt\":\"a\"}\n{\"prompt\":\"b\"}\n").await;
    let summary = result.unwrap();

    let failed = row_for(&rows, "a");
    assert!(failed.get("response").is_none());
    assert!(failed["error"].as_str().unwrap().contains("authentication"));
    assert_eq!(
        failed["error_info"]["type"],
        json!("auth"),
        "structured detail must classify the failure"
    );
    assert_eq!(failed["error_info"]["provider"], json!("stub"));

    let ok = row_for(&rows, "b");
    assert_eq!(ok["response"], json!("r:b"));
    assert!(ok.get("error").is_none());

    assert_eq!(summary.exit_code(), 1);
}

// --- reserved tag namespace pre-flight ---

#[tokio::test]
async fn reserved_key_collision_produces_zero_rows() {
    let config = BatchConfig {
        extract_tags: true,
        ..quiet_config()
    };
    let ndjson = "{\"prompt\":\"a\"}\n{\"prompt\":\"b\",\"tag:mood\":\"calm\"}\n";

    let (result, rows) = run_over_file(Arc::new(echo_provider()), config, ndjson).await;

    let err = result.unwrap_err();
    assert!(
        matches!(err, Error::ReservedKeyCollision { line_number: 2, .. }),
        "got: {err}"
    );
    assert!(
        rows.is_empty(),
        "pre-flight failure must produce zero output rows, even for the clean first row"
    );
}

#[tokio::test]
async fn reserved_keys_are_allowed_when_extraction_is_disabled() {
    let ndjson = "{\"prompt\":\"a\",\"tag:mood\":\"calm\"}\n";
    let (result, rows) = run_over_file(Arc::new(echo_provider()), quiet_config(), ndjson).await;

    result.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0]["tag:mood"],
        json!("calm"),
        "without extraction the namespace is ordinary data"
    );
}

// --- tag extraction ---

#[tokio::test]
async fn tag_extraction_yields_string_or_list() {
    let provider = ScriptedProvider::new(|prompt, _| {
        let content = if prompt == "double" {
            "<tag>x</tag><tag>y</tag>"
        } else {
            "<tag>x</tag>"
        };
        Ok(ChatResponse {
            content: content.to_string(),
            reasoning: None,
        })
    });
    let config = BatchConfig {
        extract_tags: true,
        ..quiet_config()
    };

    let (result, rows) = run_over_file(
        Arc::new(provider),
        config,
        "{\"prompt\":\"double\"}\n{\"prompt\":\"single\"}\n",
    )
    .await;
    result.unwrap();

    assert_eq!(row_for(&rows, "double")["tag:tag"], json!(["x", "y"]));
    assert_eq!(row_for(&rows, "single")["tag:tag"], json!("x"));
}

// --- fail-fast on malformed input ---

#[tokio::test]
async fn malformed_record_aborts_the_run() {
    let ndjson = "{\"prompt\":\"ok\"}\nnot json at all\n{\"prompt\":\"never read\"}\n";
    let (result, _rows) = run_over_file(Arc::new(echo_provider()), quiet_config(), ndjson).await;

    let err = result.unwrap_err();
    assert!(
        matches!(err, Error::MalformedRecord { line_number: 2, .. }),
        "got: {err}"
    );
}

#[tokio::test]
async fn missing_prompt_in_file_source_aborts_the_run() {
    let ndjson = "{\"question\":\"no prompt field\"}\n";
    let (result, rows) = run_over_file(Arc::new(echo_provider()), quiet_config(), ndjson).await;

    assert!(matches!(result.unwrap_err(), Error::MalformedRecord { .. }));
    assert!(rows.is_empty());
}

// --- prompt prefix and sysprompt resolution ---

#[tokio::test]
async fn prompt_prefix_is_applied_and_recorded() {
    let provider = ScriptedProvider::new(|prompt, _| {
        Ok(ChatResponse {
            content: format!("saw:{prompt}"),
            reasoning: None,
        })
    });
    let config = BatchConfig {
        prompt_prefix: Some("Translate to French: ".to_string()),
        ..quiet_config()
    };

    let (result, rows) = run_over_file(Arc::new(provider), config, "{\"prompt\":\"hello\"}\n").await;
    result.unwrap();

    let row = &rows[0];
    assert_eq!(
        row["prompt"],
        json!("Translate to French: hello"),
        "output prompt is the exact text sent"
    );
    assert_eq!(row["mq_input_prompt"], json!("hello"));
    assert_eq!(row["response"], json!("saw:Translate to French: hello"));
}

#[tokio::test]
async fn sysprompt_is_sent_and_recorded() {
    let provider = ScriptedProvider::new(|_, _| {
        Ok(ChatResponse {
            content: "ok".to_string(),
            reasoning: None,
        })
    });
    let model = ResolvedModel {
        sysprompt: Some("be brief".to_string()),
        ..stub_model()
    };

    let sink = SharedSink::default();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"{\"prompt\":\"q\"}\n").unwrap();

    let runner = BatchRunner::new(Arc::new(provider), model, quiet_config()).unwrap();
    runner
        .run(
            BatchInput::File(file.path().to_path_buf()),
            BatchOutput::Writer(Box::new(sink.clone())),
        )
        .await
        .unwrap();

    let row: Value = serde_json::from_str(&sink.lines()[0]).unwrap();
    assert_eq!(row["sysprompt"], json!("be brief"));
}

// --- reasoning passthrough ---

#[tokio::test]
async fn reasoning_trace_lands_in_the_output_row() {
    let provider = ScriptedProvider::new(|_, _| {
        Ok(ChatResponse {
            content: "answer".to_string(),
            reasoning: Some("step 1, step 2".to_string()),
        })
    });

    let (result, rows) =
        run_over_file(Arc::new(provider), quiet_config(), "{\"prompt\":\"q\"}\n").await;
    result.unwrap();
    assert_eq!(rows[0]["reasoning"], json!("step 1, step 2"));
}

// --- byte-offset accounting ---

#[tokio::test]
async fn known_length_input_is_fully_read_by_run_end() {
    let ndjson = "{\"prompt\":\"a\"}\n{\"prompt\":\"b\"}\n{\"prompt\":\"c\"}\n";
    let (result, _rows) = run_over_file(Arc::new(echo_provider()), quiet_config(), ndjson).await;
    let summary = result.unwrap();

    assert_eq!(summary.bytes_total, Some(ndjson.len() as u64));
    assert_eq!(
        summary.bytes_read,
        ndjson.len() as u64,
        "input_read must reach 100% no later than the last row resolving"
    );
}

// --- stream (stdin-like) sources ---

#[tokio::test]
async fn plain_line_stream_input_works_end_to_end() {
    let input = "first question\nsecond question\n";
    let sink = SharedSink::default();

    let runner =
        BatchRunner::new(Arc::new(echo_provider()), stub_model(), quiet_config()).unwrap();
    let summary = runner
        .run(
            BatchInput::Reader(Box::new(std::io::Cursor::new(input.as_bytes().to_vec()))),
            BatchOutput::Writer(Box::new(sink.clone())),
        )
        .await
        .unwrap();

    assert_eq!(summary.completed, 2);
    assert_eq!(
        summary.bytes_total, None,
        "non-seekable sources have no total length"
    );

    let rows: Vec<Value> = sink
        .lines()
        .iter()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(row_for(&rows, "first question")["response"], json!("echo:first question"));
}

#[tokio::test]
async fn stream_reserved_key_fails_before_the_offending_row_is_submitted() {
    let input = "{\"prompt\":\"ok\"}\n{\"prompt\":\"bad\",\"tag:x\":1}\n";
    let sink = SharedSink::default();
    let config = BatchConfig {
        extract_tags: true,
        workers: 1,
        submit_buffer: Some(0),
        ..quiet_config()
    };

    let runner = BatchRunner::new(Arc::new(echo_provider()), stub_model(), config).unwrap();
    let err = runner
        .run(
            BatchInput::Reader(Box::new(std::io::Cursor::new(input.as_bytes().to_vec()))),
            BatchOutput::Writer(Box::new(sink.clone())),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ReservedKeyCollision { .. }));
}

// --- concurrency bound ---

#[tokio::test]
async fn in_flight_provider_calls_never_exceed_worker_count() {
    use std::sync::atomic::{AtomicU32, Ordering};

    struct GaugeProvider {
        in_flight: AtomicU32,
        peak: AtomicU32,
    }

    #[async_trait::async_trait]
    impl ChatProvider for GaugeProvider {
        async fn chat(
            &self,
            _request: &crate::provider::ChatRequest,
        ) -> Result<ChatResponse, ProviderError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(ChatResponse {
                content: "ok".to_string(),
                reasoning: None,
            })
        }
    }

    let provider = Arc::new(GaugeProvider {
        in_flight: AtomicU32::new(0),
        peak: AtomicU32::new(0),
    });
    let config = BatchConfig {
        workers: 3,
        submit_buffer: Some(8),
        ..quiet_config()
    };
    let ndjson: String = (0..30).map(|i| format!("{{\"prompt\":\"q{i}\"}}\n")).collect();

    let (result, rows) = run_over_file(provider.clone(), config, &ndjson).await;
    result.unwrap();

    assert_eq!(rows.len(), 30);
    let peak = provider.peak.load(std::sync::atomic::Ordering::SeqCst);
    assert!(
        peak <= 3,
        "provider calls in flight must be bounded by the worker count, saw {peak}"
    );
    assert!(peak >= 2, "the pool should actually run concurrently");
}
