//! Basic batch example
//!
//! This example demonstrates the core functionality of mq-batch:
//! - Resolving a model shortname from the registry
//! - Configuring a batch run
//! - Streaming an NDJSON file through the engine
//! - Mapping the run summary to a process exit code
//!
//! Usage: `cargo run --example batch_file -- <shortname> <input.ndjson>`

use mq_batch::{BatchConfig, BatchInput, BatchOutput, BatchRunner, ModelRegistry};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let shortname = args.next().unwrap_or_else(|| "gpt".to_string());
    let input = args.next().unwrap_or_else(|| "rows.ndjson".to_string());

    // Resolve the shortname against ~/.mq/config.json (or $MQ_HOME)
    let registry = ModelRegistry::load_default()?;

    let config = BatchConfig {
        workers: 8,
        max_retries: 3,
        timeout: Duration::from_secs(600),
        progress_interval: Duration::from_secs(5),
        extract_tags: true,
        ..Default::default()
    };

    let runner = BatchRunner::from_registry(&registry, &shortname, config)?;

    // Results stream to stdout, one JSON line per row in completion order;
    // progress lines go to stderr
    let summary = runner
        .run(BatchInput::File(input.into()), BatchOutput::Stdout)
        .await?;

    eprintln!(
        "done: {} completed, {} failed in {:.1}s",
        summary.completed,
        summary.failed,
        summary.elapsed.as_secs_f64()
    );

    // Zero only if every row succeeded
    std::process::exit(summary.exit_code());
}
