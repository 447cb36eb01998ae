//! Run counters and the periodic progress reporter.
//!
//! Workers mutate the shared [`RunCounters`] atomically; the reporter task
//! only ever reads them, so it can never block worker progress. The ETA uses
//! the byte-read fraction as a proxy for the row-count fraction — accurate
//! only for roughly uniform row sizes, and `input_read` can reach 100% while
//! jobs are still outstanding, because reading is far cheaper than
//! completing a request.

use crate::types::RunSummary;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Shared mutable counters for one batch run.
///
/// Initialized at run start, frozen into a [`RunSummary`] at run end.
pub struct RunCounters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    bytes_read: AtomicU64,
    bytes_total: Option<u64>,
    started: Instant,
    started_at: DateTime<Utc>,
}

impl RunCounters {
    /// Fresh counters; `bytes_total` is known only for seekable sources.
    pub fn new(bytes_total: Option<u64>) -> Self {
        Self {
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            bytes_total,
            started: Instant::now(),
            started_at: Utc::now(),
        }
    }

    /// A job was submitted to the pool.
    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// A job resolved successfully and its result was written.
    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    /// A job resolved as a per-row failure and its result was written.
    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Publish the reader's consumed byte offset.
    ///
    /// The offset only ever grows; `fetch_max` keeps the published value
    /// monotone even if an update is delayed.
    pub fn set_bytes_read(&self, bytes: u64) {
        self.bytes_read.fetch_max(bytes, Ordering::Relaxed);
    }

    /// Point-in-time view of the counters.
    pub fn snapshot(&self) -> ProgressSnapshot {
        let submitted = self.submitted.load(Ordering::Relaxed);
        let completed = self.completed.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let bytes_read = self.bytes_read.load(Ordering::Relaxed);

        ProgressSnapshot {
            submitted,
            outstanding: submitted.saturating_sub(completed + failed),
            completed,
            failed,
            bytes_read,
            bytes_total: self.bytes_total,
            elapsed: self.started.elapsed(),
        }
    }

    /// Freeze the counters into a final summary.
    pub fn freeze(&self) -> RunSummary {
        let snapshot = self.snapshot();
        RunSummary {
            submitted: snapshot.submitted,
            completed: snapshot.completed,
            failed: snapshot.failed,
            bytes_read: snapshot.bytes_read,
            bytes_total: snapshot.bytes_total,
            started_at: self.started_at,
            elapsed: snapshot.elapsed,
        }
    }
}

/// One reporter tick's view of the run.
#[derive(Clone, Debug)]
pub struct ProgressSnapshot {
    /// Jobs submitted so far
    pub submitted: u64,
    /// Jobs submitted but not yet resolved
    pub outstanding: u64,
    /// Jobs resolved successfully
    pub completed: u64,
    /// Jobs resolved as failures
    pub failed: u64,
    /// Input bytes consumed
    pub bytes_read: u64,
    /// Total input bytes, when known
    pub bytes_total: Option<u64>,
    /// Wall-clock time since run start
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    /// Fraction of the input consumed, as a percentage, when the total is
    /// known. Capped at 100.
    pub fn input_read_percent(&self) -> Option<f64> {
        let total = self.bytes_total?;
        if total == 0 {
            return Some(100.0);
        }
        Some((self.bytes_read as f64 / total as f64 * 100.0).min(100.0))
    }

    /// Estimated time remaining.
    ///
    /// Completion rate is `completed / elapsed`; the total row count is
    /// projected from the byte fraction (`completed × bytes_total /
    /// bytes_read`), recomputed each tick. `None` until at least one row has
    /// completed or when the input length is unknown.
    pub fn eta(&self) -> Option<Duration> {
        let total = self.bytes_total?;
        if self.completed == 0 || self.bytes_read == 0 || self.elapsed.is_zero() {
            return None;
        }

        let rate = self.completed as f64 / self.elapsed.as_secs_f64();
        let estimated_total_rows = self.completed as f64 * total as f64 / self.bytes_read as f64;
        let remaining_rows = (estimated_total_rows - self.completed as f64).max(0.0);
        Some(Duration::from_secs_f64(remaining_rows / rate))
    }

    /// Render the progress line emitted on the reporting channel.
    pub fn render(&self) -> String {
        let mut line = format!(
            "progress: submitted={} outstanding={} completed={} failed={}",
            self.submitted, self.outstanding, self.completed, self.failed
        );
        if let Some(percent) = self.input_read_percent() {
            line.push_str(&format!(" input_read={percent:.1}%"));
            if let Some(eta) = self.eta() {
                line.push_str(&format!(" eta={}", format_eta(eta)));
            }
        }
        line
    }
}

fn format_eta(eta: Duration) -> String {
    let secs = eta.as_secs();
    if secs >= 3600 {
        format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{secs}s")
    }
}

/// Spawn the periodic progress reporter.
///
/// Returns `None` when `interval` is zero (reporting disabled — no timer is
/// created at all). The task reads only the shared counters, emits one line
/// per tick to stderr, and stops when `cancel_token` fires.
pub fn spawn_progress_reporter(
    counters: Arc<RunCounters>,
    interval: Duration,
    cancel_token: CancellationToken,
) -> Option<tokio::task::JoinHandle<()>> {
    if interval.is_zero() {
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so the first line lands
        // one full interval into the run
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    eprintln!("{}", counters.snapshot().render());
                }
                _ = cancel_token.cancelled() => {
                    break;
                }
            }
        }
    }))
}
