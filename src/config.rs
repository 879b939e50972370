//! §6 configuration schema and validation.
//!
//! Field set and defaults grounded on `config.py::load_config` (window_sec,
//! top_n, the `max(4, min(32, cpu_count()*2))` shard heuristic, queue_size)
//! plus the `tick_write`/`threshold_monitor` objects spec.md adds on top,
//! deserialized with `serde` the way the rest of the pack configures itself
//! (TOML via the `toml` crate, matching the ecosystem default for CLI tools).

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::Deserialize;

use crate::errors::ConfigError;
use crate::ppa_mapper::DictPpaMapper;
use crate::threshold::{CompareOp, ThresholdRule};

fn default_window_sec() -> f64 {
    1.0
}
fn default_top_n() -> usize {
    10
}
fn default_shards() -> usize {
    (num_cpus::get() * 2).clamp(4, 32)
}
fn default_queue_size() -> usize {
    100_000
}
fn default_subscription() -> String {
    String::new()
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub hostname: String,
    pub port: u32,
    #[serde(default = "default_window_sec")]
    pub window_sec: f64,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    #[serde(default = "default_shards")]
    pub shards: usize,
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    #[serde(default = "default_subscription")]
    pub subscription: String,
    pub tick_write: Option<TickWriteConfig>,
    pub threshold_monitor: Option<ThresholdMonitorConfig>,
}

#[derive(Debug, Deserialize)]
pub struct TickWriteConfig {
    pub url: String,
    pub server_ip: String,
    #[serde(default = "default_tick_workers")]
    pub workers: usize,
    #[serde(default = "default_tick_queue_max")]
    pub queue_max: usize,
    #[serde(default = "default_tick_timeout_sec")]
    pub timeout_sec: f64,
    #[serde(default = "default_tick_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub drop_on_full: bool,
    pub ppa_map_latency: HashMap<i64, i64>,
    pub ppa_map_frames: HashMap<i64, i64>,
}

fn default_tick_workers() -> usize {
    4
}
fn default_tick_queue_max() -> usize {
    5000
}
fn default_tick_timeout_sec() -> f64 {
    2.0
}
fn default_tick_max_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize)]
pub struct RawRule {
    pub op: String,
    pub value: f64,
    pub rule_id: String,
    #[serde(default)]
    pub atol: f64,
}

#[derive(Debug, Deserialize)]
pub struct ThresholdMonitorConfig {
    #[serde(default)]
    pub enabled: bool,
    pub csv_path: String,
    #[serde(default = "default_violation_queue_max")]
    pub queue_max: usize,
    #[serde(default = "default_violation_drop_on_full")]
    pub drop_on_full: bool,
    #[serde(default = "default_flush_every_n")]
    pub flush_every_n: usize,
    #[serde(default = "default_flush_every_sec")]
    pub flush_every_sec: f64,
    #[serde(default)]
    pub cooldown_sec: f64,
    #[serde(default)]
    pub rules: HashMap<i64, Vec<RawRule>>,
}

fn default_violation_queue_max() -> usize {
    20_000
}
fn default_violation_drop_on_full() -> bool {
    true
}
fn default_flush_every_n() -> usize {
    200
}
fn default_flush_every_sec() -> f64 {
    2.0
}

impl Config {
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port < 1 || self.port > 65535 {
            return Err(ConfigError::PortOutOfRange(self.port));
        }
        if !(self.window_sec > 0.0) {
            return Err(ConfigError::InvalidWindowSec(self.window_sec));
        }
        if self.shards < 1 {
            return Err(ConfigError::InvalidShards(self.shards));
        }
        if self.queue_size < 1 {
            return Err(ConfigError::InvalidQueueSize(self.queue_size));
        }

        if let Some(tw) = &self.tick_write {
            let (lat_only, frames_only) =
                DictPpaMapper::mismatched_keys(&tw.ppa_map_latency, &tw.ppa_map_frames);
            if !lat_only.is_empty() || !frames_only.is_empty() {
                return Err(ConfigError::MismatchedPpaMapKeys {
                    lat_only,
                    frames_only,
                });
            }
        }

        if let Some(tm) = &self.threshold_monitor {
            for (ppa, rules) in &tm.rules {
                for r in rules {
                    if parse_op(&r.op).is_none() {
                        return Err(ConfigError::InvalidRuleOp {
                            ppa: *ppa,
                            rule_id: r.rule_id.clone(),
                            op: r.op.clone(),
                        });
                    }
                }
            }
        }

        Ok(())
    }

    /// `stats_keys`: populated only when `tick_write` is present (threshold-only
    /// deployments never feed the pipeline).
    pub fn stats_keys(&self) -> HashSet<i64> {
        self.tick_write
            .as_ref()
            .map(|tw| tw.ppa_map_latency.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn monitor_keys(&self) -> HashSet<i64> {
        match &self.threshold_monitor {
            Some(tm) if tm.enabled => tm.rules.keys().copied().collect(),
            _ => HashSet::new(),
        }
    }

    /// Builds `"PPA:<k1>; PPA:<k2>; ..."` sorted ascending over the union of
    /// stats and monitor keys, used when the config leaves `subscription` empty.
    pub fn effective_subscription(&self) -> String {
        let trimmed = self.subscription.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
        let mut keys: Vec<i64> = self.stats_keys().union(&self.monitor_keys()).copied().collect();
        keys.sort_unstable();
        keys.iter()
            .map(|k| format!("PPA:{k}"))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Callers must call [`Config::validate`] first: every rule's `op` is
    /// assumed already checked there, so an unrecognized operator here falls
    /// back to `!=` rather than panicking.
    pub fn rules_by_ppa(&self) -> HashMap<i64, Vec<ThresholdRule>> {
        let Some(tm) = &self.threshold_monitor else {
            return HashMap::new();
        };
        tm.rules
            .iter()
            .map(|(ppa, rules)| {
                let parsed = rules
                    .iter()
                    .map(|r| {
                        ThresholdRule::new(
                            parse_op(&r.op).unwrap_or(CompareOp::Ne),
                            r.value,
                            r.rule_id.clone(),
                            r.atol,
                        )
                    })
                    .collect();
                (*ppa, parsed)
            })
            .collect()
    }
}

fn parse_op(op: &str) -> Option<CompareOp> {
    match op {
        ">" => Some(CompareOp::Gt),
        "<" => Some(CompareOp::Lt),
        ">=" => Some(CompareOp::Ge),
        "<=" => Some(CompareOp::Le),
        "==" => Some(CompareOp::Eq),
        "!=" => Some(CompareOp::Ne),
        _ => None,
    }
}
