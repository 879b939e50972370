//! Entry point: loads config, wires C1–C11 together, runs the transport
//! loop, shuts down in the same order `main.py`'s `finally` chain does
//! (processor -> tick publisher -> violation writer).

use std::path::PathBuf;
use std::sync::Arc;

use log::info;

use latency_telemetry_core::clock::SystemClock;
use latency_telemetry_core::config::Config;
use latency_telemetry_core::ingress::{IngressDispatcher, Measurement};
use latency_telemetry_core::pipeline::{LatencyPipeline, TickSink, WindowPolicy, WriteJob};
use latency_telemetry_core::ppa_mapper::{DictPpaMapper, NullPpaMapper, PpaMapper};
use latency_telemetry_core::report::PrintSink;
use latency_telemetry_core::sharded_processor::ShardedWindowProcessor;
use latency_telemetry_core::threshold::ThresholdMonitor;
use latency_telemetry_core::tick_publisher::{AsyncTickPublisher, TickPublisherConfig};
use latency_telemetry_core::transport::{StdinTransport, Transport};
use latency_telemetry_core::violation_writer::{AsyncViolationWriter, ViolationWriterConfig};

struct ArcTickSink(Arc<AsyncTickPublisher>);

impl TickSink for ArcTickSink {
    fn publish(&self, job: WriteJob) -> bool {
        self.0.publish(job)
    }
}

fn main() {
    env_logger::init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let cfg = match Config::load_from_file(&PathBuf::from(&config_path)) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("failed to load config from {config_path}: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = cfg.validate() {
        eprintln!("config invalid: {e}");
        std::process::exit(1);
    }

    info!(
        "resolved config: hostname={} port={} shards={} queue_size={} window_sec={} \
         subscription=\"{}\" tick_write={} threshold_monitor={}",
        cfg.hostname,
        cfg.port,
        cfg.shards,
        cfg.queue_size,
        cfg.window_sec,
        cfg.effective_subscription(),
        cfg.tick_write.is_some(),
        cfg.threshold_monitor.as_ref().is_some_and(|t| t.enabled),
    );

    let processor = ShardedWindowProcessor::new(cfg.shards, cfg.queue_size);
    processor.start();

    let policy = WindowPolicy {
        window_sec: cfg.window_sec,
        top_n: cfg.top_n,
    };

    let (tick_publisher, mapper): (Option<Arc<AsyncTickPublisher>>, Box<dyn PpaMapper>) =
        match &cfg.tick_write {
            Some(tw) => {
                let publisher = Arc::new(AsyncTickPublisher::start(TickPublisherConfig {
                    url: tw.url.clone(),
                    server_ip: tw.server_ip.clone(),
                    workers: tw.workers,
                    queue_max: tw.queue_max,
                    timeout_sec: tw.timeout_sec,
                    max_retries: tw.max_retries,
                    drop_on_full: tw.drop_on_full,
                }));
                let mapper = Box::new(DictPpaMapper::new(
                    tw.ppa_map_latency.clone(),
                    tw.ppa_map_frames.clone(),
                ));
                (Some(publisher), mapper as Box<dyn PpaMapper>)
            }
            None => (None, Box::new(NullPpaMapper) as Box<dyn PpaMapper>),
        };

    let tick_sink: Option<Box<dyn TickSink>> = tick_publisher
        .as_ref()
        .map(|p| Box::new(ArcTickSink(p.clone())) as Box<dyn TickSink>);

    let pipeline = LatencyPipeline::new(
        processor,
        Box::new(SystemClock),
        Box::new(PrintSink),
        tick_sink,
        mapper,
        policy,
    );

    let (threshold_monitor, violation_writer) = match cfg.threshold_monitor.as_ref() {
        Some(tm_cfg) if tm_cfg.enabled => {
            let monitor = ThresholdMonitor::new(cfg.rules_by_ppa(), tm_cfg.cooldown_sec);
            let writer = AsyncViolationWriter::start(ViolationWriterConfig {
                csv_path: PathBuf::from(&tm_cfg.csv_path),
                queue_max: tm_cfg.queue_max,
                drop_on_full: tm_cfg.drop_on_full,
                flush_every_n: tm_cfg.flush_every_n,
                flush_every_sec: tm_cfg.flush_every_sec,
            });
            info!("[violations] enabled=true csv={}", tm_cfg.csv_path);
            (Some(monitor), Some(writer))
        }
        _ => {
            info!("[violations] enabled=false");
            (None, None)
        }
    };

    let stats_keys = cfg.stats_keys();
    let dispatcher = IngressDispatcher::new(
        Box::new(SystemClock),
        pipeline,
        stats_keys,
        threshold_monitor,
        violation_writer,
    );

    let transport = StdinTransport::default();
    transport.run_forever(&mut |measurements: &[Measurement]| {
        let batch_dupes = dispatcher.on_batch(measurements);
        if batch_dupes > 0 {
            info!("dropped_dupes={batch_dupes} (total={})", dispatcher.dropped_dupes());
        }
    });

    dispatcher.shutdown_processor();
    if let Some(p) = tick_publisher {
        p.stop();
    }
    dispatcher.shutdown_violation_writer();
}
