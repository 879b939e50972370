//! Transport (external collaborator, consumed via interface only).
//!
//! `spec.md` scopes the streaming client itself out of the core; this trait
//! is the seam the Ingress Dispatcher is driven through. `StdinTransport`
//! exists so `main` is runnable without an actual measurement-bus client,
//! mirroring how `infra/sttp_client.py::SttpLatencySubscriber` is a thin
//! adapter around a `new_measurements(list)` callback.

use std::io::BufRead;
use std::time::{Duration, Instant};

use log::warn;
use serde::Deserialize;

use crate::ingress::Measurement;

pub trait Transport {
    /// Runs until the input source is exhausted or the process is signaled to
    /// stop, invoking `on_batch` once per grouped batch of measurements.
    fn run_forever(self, on_batch: &mut dyn FnMut(&[Measurement]));
}

/// Maps an opaque measurement-metadata id string to the numeric PPA key,
/// mirroring `infra/key_extractors.py::PpaKeyExtractor`: parse as an integer,
/// falling back to the digits-only substring (`"0"` if none).
pub fn key_for(measurement_id: &str) -> i64 {
    measurement_id.parse().unwrap_or_else(|_| {
        let digits: String = measurement_id.chars().filter(|c| c.is_ascii_digit()).collect();
        digits.parse().unwrap_or(0)
    })
}

#[derive(Debug, Deserialize)]
struct WireMeasurement {
    ppa: String,
    value: f64,
    t_meas_epoch: f64,
}

/// Reads newline-delimited JSON measurements from stdin, grouping lines that
/// arrive within `poll_interval` into one batch.
pub struct StdinTransport {
    pub poll_interval: Duration,
}

impl Default for StdinTransport {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
        }
    }
}

impl Transport for StdinTransport {
    fn run_forever(self, on_batch: &mut dyn FnMut(&[Measurement])) {
        let stdin = std::io::stdin();
        let mut batch = Vec::new();
        let mut last_flush = Instant::now();

        for line in stdin.lock().lines() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    warn!("stdin read error: {e}");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<WireMeasurement>(&line) {
                Ok(wm) => batch.push(Measurement {
                    key: key_for(&wm.ppa),
                    value: wm.value,
                    t_meas_epoch: wm.t_meas_epoch,
                }),
                Err(e) => warn!("skipping unparseable measurement line: {e}"),
            }

            if !batch.is_empty() && last_flush.elapsed() >= self.poll_interval {
                on_batch(&batch);
                batch.clear();
                last_flush = Instant::now();
            }
        }

        if !batch.is_empty() {
            on_batch(&batch);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_for_parses_plain_integer() {
        assert_eq!(key_for("477"), 477);
    }

    #[test]
    fn key_for_extracts_digits_from_mixed_string() {
        assert_eq!(key_for("PPA-477b"), 477);
    }

    #[test]
    fn key_for_defaults_to_zero_when_no_digits() {
        assert_eq!(key_for("none"), 0);
    }
}
