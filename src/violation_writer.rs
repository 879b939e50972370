//! C9: Async Violation Writer — bounded queue, single writer thread, batches
//! on count or time, appends CSV rows.
//!
//! Grounded on `infra/violations_csv_sink.py::AsyncCsvViolationWriter`: same
//! batch trigger (`flush_every_n` OR `flush_every_sec`, whichever first),
//! same header-once-if-file-empty-or-absent rule, same per-flush file open
//! in append mode (§5: "keep failure blast radius small").

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_queue::ArrayQueue;
use log::error;
use parking_lot::Mutex;

use crate::threshold::ViolationEvent;
use crate::time_format::format_epoch_utc_millis;

pub struct ViolationWriterConfig {
    pub csv_path: PathBuf,
    pub queue_max: usize,
    pub drop_on_full: bool,
    pub flush_every_n: usize,
    pub flush_every_sec: f64,
}

enum Job {
    Event(ViolationEvent),
    Stop,
}

pub struct AsyncViolationWriter {
    queue: Arc<ArrayQueue<Job>>,
    drop_on_full: bool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl AsyncViolationWriter {
    pub fn start(cfg: ViolationWriterConfig) -> Self {
        let queue: Arc<ArrayQueue<Job>> = Arc::new(ArrayQueue::new(cfg.queue_max));

        let worker_queue = queue.clone();
        let csv_path = cfg.csv_path;
        let flush_every_n = cfg.flush_every_n;
        let flush_every_sec = cfg.flush_every_sec;

        let handle = thread::spawn(move || {
            Self::worker_loop(worker_queue, csv_path, flush_every_n, flush_every_sec)
        });

        Self {
            queue,
            drop_on_full: cfg.drop_on_full,
            handle: Mutex::new(Some(handle)),
        }
    }

    fn worker_loop(queue: Arc<ArrayQueue<Job>>, csv_path: PathBuf, flush_every_n: usize, flush_every_sec: f64) {
        let mut batch: Vec<ViolationEvent> = Vec::new();
        let mut last_flush = Instant::now();

        loop {
            match queue.pop() {
                Some(Job::Stop) => {
                    if !batch.is_empty() {
                        Self::flush(&csv_path, &batch);
                    }
                    return;
                }
                Some(Job::Event(ev)) => batch.push(ev),
                None => thread::sleep(Duration::from_millis(20)),
            }

            let due = batch.len() >= flush_every_n
                || last_flush.elapsed().as_secs_f64() >= flush_every_sec;
            if !batch.is_empty() && due {
                Self::flush(&csv_path, &batch);
                batch.clear();
                last_flush = Instant::now();
            }
        }
    }

    fn ensure_header(csv_path: &PathBuf) -> std::io::Result<()> {
        let needs_header = std::fs::metadata(csv_path).map(|m| m.len() == 0).unwrap_or(true);
        if needs_header {
            let file = OpenOptions::new().create(true).append(true).open(csv_path)?;
            let mut wtr = csv::Writer::from_writer(file);
            wtr.write_record(["utc_time", "ppa", "value", "rule_id", "rule"])?;
            wtr.flush()?;
        }
        Ok(())
    }

    fn flush(csv_path: &PathBuf, batch: &[ViolationEvent]) {
        if batch.is_empty() {
            return;
        }
        if let Err(e) = Self::ensure_header(csv_path) {
            error!("failed to write violations csv header: {e}");
            return;
        }
        let file = match OpenOptions::new().create(true).append(true).open(csv_path) {
            Ok(f) => f,
            Err(e) => {
                error!("failed to open violations csv for append: {e}");
                return;
            }
        };
        let mut wtr = csv::Writer::from_writer(file);
        for ev in batch {
            let row = (
                format_epoch_utc_millis(ev.t_epoch),
                ev.ppa,
                ev.value,
                ev.rule_id.clone(),
                ev.rule_label.clone(),
            );
            if let Err(e) = wtr.serialize(row) {
                error!("failed to write violation row: {e}");
            }
        }
        if let Err(e) = wtr.flush() {
            error!("failed to flush violations csv: {e}");
        }
    }

    /// Mirrors C8's policy: non-blocking try-enqueue when `drop_on_full`,
    /// otherwise block until there is room.
    pub fn publish(&self, ev: ViolationEvent) {
        if self.drop_on_full {
            let _ = self.queue.push(Job::Event(ev));
        } else {
            let mut item = Job::Event(ev);
            loop {
                match self.queue.push(item) {
                    Ok(()) => return,
                    Err(rejected) => {
                        item = rejected;
                        thread::sleep(Duration::from_millis(1));
                    }
                }
            }
        }
    }

    pub fn stop(&self) {
        let _ = self.queue.push(Job::Stop);
        if let Some(h) = self.handle.lock().take() {
            let _ = h.join();
        }
    }
}

impl Drop for AsyncViolationWriter {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn writes_header_once_and_appends_rows() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("violations_test_{:?}.csv", thread::current().id()));
        let _ = std::fs::remove_file(&path);

        let writer = AsyncViolationWriter::start(ViolationWriterConfig {
            csv_path: path.clone(),
            queue_max: 16,
            drop_on_full: true,
            flush_every_n: 2,
            flush_every_sec: 60.0,
        });

        writer.publish(ViolationEvent {
            t_epoch: 1001.0,
            ppa: 9999,
            value: 1.0,
            rule_id: "R".into(),
            rule_label: "> 0".into(),
        });
        writer.publish(ViolationEvent {
            t_epoch: 1002.0,
            ppa: 9999,
            value: 2.0,
            rule_id: "R".into(),
            rule_label: "> 0".into(),
        });

        thread::sleep(Duration::from_millis(100));
        writer.stop();

        let mut contents = String::new();
        std::fs::File::open(&path).unwrap().read_to_string(&mut contents).unwrap();
        let mut lines = contents.lines();
        assert_eq!(lines.next().unwrap(), "utc_time,ppa,value,rule_id,rule");
        assert!(lines.next().unwrap().contains("9999"));

        let _ = std::fs::remove_file(&path);
    }
}
