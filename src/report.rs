//! C11: Report Sink — the human-readable window summary, plus the
//! `WindowReport`/`WindowRow` types the rest of the pipeline hands it.
//!
//! `PrintSink` mirrors `infra/sinks.py::PrintSink`'s layout line for line,
//! logged (not printed) via the `log` crate: full-microsecond timestamp and
//! comma-grouped counters, same as the original's `{value:,}` formatting.

use log::info;

use crate::time_format::format_epoch_utc_micros;
use crate::window_stats::WindowRow;

/// Comma-grouped thousands, e.g. `1,234,567`. Mirrors Python's `f"{n:,}"`
/// used throughout `infra/sinks.py::PrintSink`.
fn grouped(n: u64) -> String {
    let s = n.to_string();
    let mut out = String::with_capacity(s.len() + s.len() / 3);
    for (i, ch) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out.chars().rev().collect()
}

#[derive(Debug, Clone)]
pub struct WindowReport {
    pub window_sec: f64,
    pub stamp_epoch: f64,
    pub batch_size_last: usize,
    pub shards: usize,
    pub total_enqueued: u64,
    pub total_processed: u64,
    pub total_dropped: u64,
    pub rows: Vec<WindowRow>,
}

pub trait ReportSink: Send + Sync {
    fn handle(&self, report: &WindowReport);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PrintSink;

impl ReportSink for PrintSink {
    fn handle(&self, report: &WindowReport) {
        let stamp = format_epoch_utc_micros(report.stamp_epoch);
        let backlog = report.total_enqueued.saturating_sub(report.total_processed);

        let mut block = format!(
            "[{stamp}] window={:.3}s total_enqueued={} total_processed={} \
             backlog={} dropped={} batch={} shards={}",
            report.window_sec,
            grouped(report.total_enqueued),
            grouped(report.total_processed),
            grouped(backlog),
            grouped(report.total_dropped),
            report.batch_size_last,
            report.shards,
        );

        if report.rows.is_empty() {
            block.push_str("\nNo events in this window.");
        } else {
            block.push_str("\nTOP window max latency (ms): key | count | mean | max | last | dropped");
            for r in &report.rows {
                block.push_str(&format!(
                    "\n  {:>6} | {:>5} | {:>8.3} | {:>8.3} | {:>8.3} | {}",
                    r.key, r.count, r.mean_ms, r.max_ms, r.last_ms, grouped(r.dropped)
                ));
            }
        }

        info!("{block}");
    }
}
