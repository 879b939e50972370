//! C6: Latency Pipeline — owns aligned-window boundaries, per-window
//! per-key latency-sum/frame-count, drives flushes, fans out to the report
//! sink and the tick sink.
//!
//! Grounded on `app/pipeline.py::LatencyPipeline` for the overall shape
//! (`on_batch_received`/`submit`/`maybe_flush`) and `infra/window_buffer.py`
//! for whole-second alignment; the catch-up loop and tick-publication-per-key
//! are the synthesis this module canonicalizes (§9: "richest variant").

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::clock::Clock;
use crate::ppa_mapper::PpaMapper;
use crate::report::{ReportSink, WindowReport};
use crate::sharded_processor::{LatencyEvent, ShardedWindowProcessor};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WriteJob {
    pub ppa: i64,
    pub indicator: f64,
    pub tempo_epoch: f64,
}

pub trait TickSink: Send + Sync {
    fn publish(&self, job: WriteJob) -> bool;
}

#[derive(Debug, Clone, Copy)]
pub struct WindowPolicy {
    pub window_sec: f64,
    pub top_n: usize,
}

#[derive(Default)]
struct PerWindow {
    sum_latency_ms: HashMap<i64, f64>,
    count_frames: HashMap<i64, u64>,
}

struct Started {
    start_epoch: f64,
    next_flush: f64,
}

pub struct LatencyPipeline {
    processor: ShardedWindowProcessor,
    clock: Box<dyn Clock>,
    report_sink: Box<dyn ReportSink>,
    tick_sink: Option<Box<dyn TickSink>>,
    mapper: Box<dyn PpaMapper>,
    policy: WindowPolicy,

    started: Mutex<Option<Started>>,
    window: Mutex<PerWindow>,
    last_batch_size: Mutex<usize>,
}

impl LatencyPipeline {
    pub fn new(
        processor: ShardedWindowProcessor,
        clock: Box<dyn Clock>,
        report_sink: Box<dyn ReportSink>,
        tick_sink: Option<Box<dyn TickSink>>,
        mapper: Box<dyn PpaMapper>,
        policy: WindowPolicy,
    ) -> Self {
        Self {
            processor,
            clock,
            report_sink,
            tick_sink,
            mapper,
            policy,
            started: Mutex::new(None),
            window: Mutex::new(PerWindow::default()),
            last_batch_size: Mutex::new(0),
        }
    }

    /// `UNSTARTED -> STARTED` on the first call; irreversible for this instance.
    pub fn on_batch_received(&self, batch_size: usize) {
        let mut started = self.started.lock();
        if started.is_none() {
            let now = self.clock.now_epoch();
            let start_epoch = now.floor() + 1.0;
            *started = Some(Started {
                start_epoch,
                next_flush: start_epoch + self.policy.window_sec,
            });
        }
        *self.last_batch_size.lock() = batch_size;
    }

    /// Silently drops events that predate `start_epoch` (not counted as
    /// dropped — they predate the aligned window, they were never admitted).
    pub fn submit(&self, ev: LatencyEvent) {
        let start_epoch = match self.started.lock().as_ref() {
            Some(s) => s.start_epoch,
            None => return,
        };
        if ev.t_arrival_epoch < start_epoch {
            return;
        }

        let lat_ms = (ev.t_arrival_epoch - ev.t_meas_epoch) * 1000.0;
        {
            let mut w = self.window.lock();
            *w.sum_latency_ms.entry(ev.key).or_insert(0.0) += lat_ms;
            *w.count_frames.entry(ev.key).or_insert(0) += 1;
        }
        self.processor.submit(ev);
    }

    /// Shuts down the underlying sharded processor's worker threads. Exposed
    /// so callers can sequence shutdown precisely (processor, then tick
    /// sink, then violation writer) rather than relying on drop order.
    pub fn shutdown_processor(&self) {
        self.processor.shutdown();
    }

    /// Catch-up loop: emits one report per missed boundary on the fixed
    /// grid. `next_flush` is only ever advanced by `+= window_sec`, never
    /// recomputed from `now`, so the grid survives scheduler delay.
    pub fn maybe_flush(&self) {
        loop {
            let now = self.clock.now_epoch();
            let boundary = {
                let started = self.started.lock();
                match started.as_ref() {
                    Some(s) if now >= s.next_flush => s.next_flush,
                    _ => return,
                }
            };

            if let Some(tick_sink) = &self.tick_sink {
                let mut w = self.window.lock();
                for (key, frames) in w.count_frames.iter() {
                    if *frames == 0 {
                        continue;
                    }
                    let sum_ms = w.sum_latency_ms.get(key).copied().unwrap_or(0.0);
                    let mean_ms = sum_ms / *frames as f64;
                    if let Some(dests) = self.mapper.try_map(*key) {
                        tick_sink.publish(WriteJob {
                            ppa: dests.latency_ppa,
                            indicator: mean_ms,
                            tempo_epoch: boundary,
                        });
                        tick_sink.publish(WriteJob {
                            ppa: dests.frames_ppa,
                            indicator: *frames as f64,
                            tempo_epoch: boundary,
                        });
                    }
                }
                w.sum_latency_ms.clear();
                w.count_frames.clear();
            } else {
                let mut w = self.window.lock();
                w.sum_latency_ms.clear();
                w.count_frames.clear();
            }

            let mut rows = self.processor.snapshot_and_reset();
            rows.sort_by(|a, b| b.max_ms.partial_cmp(&a.max_ms).unwrap_or(std::cmp::Ordering::Equal));
            if self.policy.top_n > 0 {
                rows.truncate(self.policy.top_n);
            }

            let (enqueued, processed, dropped) = self.processor.totals();
            let report = WindowReport {
                window_sec: self.policy.window_sec,
                stamp_epoch: boundary,
                batch_size_last: *self.last_batch_size.lock(),
                shards: self.processor.shard_count(),
                total_enqueued: enqueued,
                total_processed: processed,
                total_dropped: dropped,
                rows,
            };
            self.report_sink.handle(&report);

            let mut started = self.started.lock();
            if let Some(s) = started.as_mut() {
                s.next_flush += self.policy.window_sec;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::ppa_mapper::{DictPpaMapper, NullPpaMapper};
    use crate::report::tests::CapturingSink;
    use std::collections::HashMap as StdHashMap;
    use std::sync::Arc;

    fn new_pipeline(
        clock: Arc<FakeClock>,
        sink: Arc<CapturingSink>,
        mapper: Box<dyn PpaMapper>,
        tick_sink: Option<Box<dyn TickSink>>,
        policy: WindowPolicy,
    ) -> LatencyPipeline {
        let processor = ShardedWindowProcessor::new(4, 1024);
        processor.start();
        LatencyPipeline::new(
            processor,
            Box::new(ArcClock(clock)),
            Box::new(ArcSink(sink)),
            tick_sink,
            mapper,
            policy,
        )
    }

    struct ArcClock(Arc<FakeClock>);
    impl Clock for ArcClock {
        fn now_epoch(&self) -> f64 {
            self.0.now_epoch()
        }
    }

    struct ArcSink(Arc<CapturingSink>);
    impl ReportSink for ArcSink {
        fn handle(&self, report: &WindowReport) {
            self.0.handle(report)
        }
    }

    #[test]
    fn s1_empty_window_emits_one_empty_report() {
        let clock = Arc::new(FakeClock::new(1000.0));
        let sink = Arc::new(CapturingSink::default());
        let pipeline = new_pipeline(
            clock.clone(),
            sink.clone(),
            Box::new(NullPpaMapper),
            None,
            WindowPolicy {
                window_sec: 1.0,
                top_n: 10,
            },
        );
        pipeline.on_batch_received(0);
        clock.set(1001.0);
        pipeline.maybe_flush();

        let reports = sink.reports.lock();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].stamp_epoch, 1001.0);
        assert!(reports[0].rows.is_empty());
        assert_eq!(reports[0].total_enqueued, 0);
    }

    #[test]
    fn s2_single_event_produces_row_and_two_write_jobs() {
        let clock = Arc::new(FakeClock::new(1000.0));
        let sink = Arc::new(CapturingSink::default());
        let lat = StdHashMap::from([(477, 1477)]);
        let frm = StdHashMap::from([(477, 2477)]);
        let mapper = Box::new(DictPpaMapper::new(lat, frm));
        let jobs = Arc::new(Mutex::new(Vec::new()));
        struct CapturingTickSink(Arc<Mutex<Vec<WriteJob>>>);
        impl TickSink for CapturingTickSink {
            fn publish(&self, job: WriteJob) -> bool {
                self.0.lock().push(job);
                true
            }
        }
        let pipeline = new_pipeline(
            clock.clone(),
            sink.clone(),
            mapper,
            Some(Box::new(CapturingTickSink(jobs.clone()))),
            WindowPolicy {
                window_sec: 1.0,
                top_n: 10,
            },
        );

        clock.set(1000.2);
        pipeline.on_batch_received(1);
        pipeline.submit(LatencyEvent {
            key: 477,
            t_meas_epoch: 1000.100,
            t_arrival_epoch: 1000.200,
        });

        clock.set(1001.05);
        std::thread::sleep(std::time::Duration::from_millis(20));
        pipeline.maybe_flush();

        let reports = sink.reports.lock();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].stamp_epoch, 1001.0);
        assert_eq!(reports[0].rows.len(), 1);
        let row = reports[0].rows[0];
        assert_eq!(row.key, 477);
        assert_eq!(row.count, 1);
        assert!((row.mean_ms - 100.0).abs() < 1e-9);

        let jobs = jobs.lock();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].ppa, 1477);
        assert!((jobs[0].indicator - 100.0).abs() < 1e-9);
        assert_eq!(jobs[1].ppa, 2477);
        assert_eq!(jobs[1].indicator, 1.0);
    }

    #[test]
    fn s3_catch_up_emits_three_reports_in_order() {
        let clock = Arc::new(FakeClock::new(1000.0));
        let sink = Arc::new(CapturingSink::default());
        let pipeline = new_pipeline(
            clock.clone(),
            sink.clone(),
            Box::new(NullPpaMapper),
            None,
            WindowPolicy {
                window_sec: 1.0,
                top_n: 10,
            },
        );
        pipeline.on_batch_received(0);
        clock.set(1003.4);
        pipeline.maybe_flush();

        let reports = sink.reports.lock();
        assert_eq!(reports.len(), 3);
        assert_eq!(reports[0].stamp_epoch, 1001.0);
        assert_eq!(reports[1].stamp_epoch, 1002.0);
        assert_eq!(reports[2].stamp_epoch, 1003.0);

        let started = pipeline.started.lock();
        assert_eq!(started.as_ref().unwrap().next_flush, 1004.0);
    }

    #[test]
    fn events_before_start_epoch_are_silently_dropped() {
        let clock = Arc::new(FakeClock::new(999.9));
        let sink = Arc::new(CapturingSink::default());
        let pipeline = new_pipeline(
            clock.clone(),
            sink.clone(),
            Box::new(NullPpaMapper),
            None,
            WindowPolicy {
                window_sec: 1.0,
                top_n: 10,
            },
        );
        pipeline.on_batch_received(1); // start_epoch = floor(999.9)+1 = 1000.0
        pipeline.submit(LatencyEvent {
            key: 1,
            t_meas_epoch: 999.8,
            t_arrival_epoch: 999.9,
        });
        clock.set(1001.0);
        pipeline.maybe_flush();
        let reports = sink.reports.lock();
        assert!(reports[0].rows.is_empty());
        assert_eq!(reports[0].total_enqueued, 0);
    }
}
