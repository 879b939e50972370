//! Error types for the telemetry core.
//!
//! Per the propagation policy: `ConfigError` is the only error that ever
//! surfaces out of this crate's public API (at startup, from
//! [`crate::config::Config::validate`]). Everything on the hot path —
//! `submit`, `check`, `maybe_flush`, `publish` — is infallible by
//! construction; back-pressure and publish failures are accounted via
//! counters instead of `Result`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required config field: {0}")]
    MissingField(&'static str),

    #[error("port {0} out of range [1,65535]")]
    PortOutOfRange(u32),

    #[error("window_sec must be > 0, got {0}")]
    InvalidWindowSec(f64),

    #[error("shards must be >= 1, got {0}")]
    InvalidShards(usize),

    #[error("queue_size must be >= 1, got {0}")]
    InvalidQueueSize(usize),

    #[error(
        "ppa_map_latency and ppa_map_frames must share identical key sets: \
         lat_only={lat_only:?} frames_only={frames_only:?}"
    )]
    MismatchedPpaMapKeys {
        lat_only: Vec<i64>,
        frames_only: Vec<i64>,
    },

    #[error("unrecognized threshold operator {op:?} for rule {rule_id} on ppa {ppa}")]
    InvalidRuleOp { ppa: i64, rule_id: String, op: String },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
