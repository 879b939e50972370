//! C8: Async Tick Publisher — bounded queue, worker pool, HTTP POST with
//! capped exponential backoff retry.
//!
//! Grounded on `infra/http_tick_sink.py::HttpTickSink` (worker pool shape,
//! retry/backoff formula, sentinel-based `stop`) ported onto the
//! `crossbeam_queue::ArrayQueue` + `parking_lot::Mutex<Vec<JoinHandle>>`
//! idiom from `component_a/sync_manager.rs`. `reqwest`'s blocking client
//! plays the role `httpx.Client` plays in the original.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_queue::ArrayQueue;
use log::warn;
use parking_lot::Mutex;
use serde::Serialize;

use crate::pipeline::{TickSink, WriteJob};
use crate::time_format::format_epoch_utc_millis;

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("tick publisher queue is full")]
    QueueFull,
}

#[derive(Debug, Serialize)]
struct TickPayload {
    server_ip: String,
    tempo: String,
    ppa: i64,
    indicator: f64,
}

enum Job {
    Write(WriteJob),
    Stop,
}

pub struct TickPublisherConfig {
    pub url: String,
    pub server_ip: String,
    pub workers: usize,
    pub queue_max: usize,
    pub timeout_sec: f64,
    pub max_retries: u32,
    pub drop_on_full: bool,
}

pub struct AsyncTickPublisher {
    queue: Arc<ArrayQueue<Job>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    drop_on_full: bool,

    published: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
    sent: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
}

impl AsyncTickPublisher {
    pub fn start(cfg: TickPublisherConfig) -> Self {
        let queue: Arc<ArrayQueue<Job>> = Arc::new(ArrayQueue::new(cfg.queue_max));
        let published = Arc::new(AtomicU64::new(0));
        let dropped = Arc::new(AtomicU64::new(0));
        let sent = Arc::new(AtomicU64::new(0));
        let failed = Arc::new(AtomicU64::new(0));

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs_f64(cfg.timeout_sec))
            .build()
            .unwrap_or_else(|_| reqwest::blocking::Client::new());

        let mut handles = Vec::with_capacity(cfg.workers);
        for _ in 0..cfg.workers {
            let queue = queue.clone();
            let client = client.clone();
            let url = cfg.url.clone();
            let server_ip = cfg.server_ip.clone();
            let max_retries = cfg.max_retries;
            let sent = sent.clone();
            let failed = failed.clone();
            handles.push(thread::spawn(move || {
                Self::worker_loop(queue, client, url, server_ip, max_retries, sent, failed)
            }));
        }

        Self {
            queue,
            handles: Mutex::new(handles),
            drop_on_full: cfg.drop_on_full,
            published,
            dropped,
            sent,
            failed,
        }
    }

    fn worker_loop(
        queue: Arc<ArrayQueue<Job>>,
        client: reqwest::blocking::Client,
        url: String,
        server_ip: String,
        max_retries: u32,
        sent: Arc<AtomicU64>,
        failed: Arc<AtomicU64>,
    ) {
        loop {
            match queue.pop() {
                Some(Job::Stop) => return,
                Some(Job::Write(job)) => {
                    let payload = TickPayload {
                        server_ip: server_ip.clone(),
                        tempo: format_epoch_utc_millis(job.tempo_epoch),
                        ppa: job.ppa,
                        indicator: job.indicator,
                    };

                    let mut attempt: u32 = 0;
                    loop {
                        let result = client.post(&url).json(&payload).send().and_then(|r| r.error_for_status());
                        match result {
                            Ok(_) => {
                                sent.fetch_add(1, Ordering::Relaxed);
                                break;
                            }
                            Err(e) => {
                                attempt += 1;
                                if attempt > max_retries {
                                    warn!("tick publish failed after {attempt} attempts: {e}");
                                    failed.fetch_add(1, Ordering::Relaxed);
                                    break;
                                }
                                let backoff = (0.25 * 2f64.powi(attempt as i32 - 1)).min(2.0);
                                thread::sleep(Duration::from_secs_f64(backoff));
                            }
                        }
                    }
                }
                None => thread::sleep(Duration::from_millis(5)),
            }
        }
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        let handles = self.handles.lock();
        for _ in handles.iter() {
            let _ = self.queue.push(Job::Stop);
        }
        drop(handles);
        let mut handles = self.handles.lock();
        for h in handles.drain(..) {
            let _ = h.join();
        }
    }
}

impl TickSink for AsyncTickPublisher {
    fn publish(&self, job: WriteJob) -> bool {
        self.published.fetch_add(1, Ordering::Relaxed);

        if self.drop_on_full {
            match self.queue.push(Job::Write(job)) {
                Ok(()) => true,
                Err(_) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    false
                }
            }
        } else {
            let mut item = Job::Write(job);
            loop {
                match self.queue.push(item) {
                    Ok(()) => return true,
                    Err(rejected) => {
                        item = rejected;
                        thread::sleep(Duration::from_millis(1));
                    }
                }
            }
        }
    }
}

impl Drop for AsyncTickPublisher {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_formula_is_capped_at_two_seconds() {
        let steps: Vec<f64> = (1..=6)
            .map(|attempt| (0.25 * 2f64.powi(attempt - 1)).min(2.0))
            .collect();
        assert_eq!(steps, vec![0.25, 0.5, 1.0, 2.0, 2.0, 2.0]);
    }
}
