//! C2: PPA Mapper — routes an input PPA to its two output PPAs (latency
//! destination, frames destination), or reports "not routed".
//!
//! Grounded on `infra/ppa_mapper.py::DictPpaMapper`: two maps, `try_map`
//! returns `None` unless the key is present in both.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PpaDestinations {
    pub latency_ppa: i64,
    pub frames_ppa: i64,
}

pub trait PpaMapper: Send + Sync {
    fn try_map(&self, ppa_in: i64) -> Option<PpaDestinations>;
}

/// Configuration invariant (§4.7): `latency_map` and `frames_map` must share
/// an identical key set. Validated at construction, not at lookup time.
#[derive(Debug, Clone)]
pub struct DictPpaMapper {
    latency_map: HashMap<i64, i64>,
    frames_map: HashMap<i64, i64>,
}

impl DictPpaMapper {
    /// Returns the keys present in only one of the two maps, for callers
    /// (config validation) that want to report a precise mismatch.
    pub fn mismatched_keys(
        latency_map: &HashMap<i64, i64>,
        frames_map: &HashMap<i64, i64>,
    ) -> (Vec<i64>, Vec<i64>) {
        let mut lat_only: Vec<i64> = latency_map
            .keys()
            .filter(|k| !frames_map.contains_key(*k))
            .copied()
            .collect();
        let mut frames_only: Vec<i64> = frames_map
            .keys()
            .filter(|k| !latency_map.contains_key(*k))
            .copied()
            .collect();
        lat_only.sort_unstable();
        frames_only.sort_unstable();
        (lat_only, frames_only)
    }

    /// Construct the mapper. Callers are expected to have already validated
    /// key-set equality (e.g. via `Config::validate`); this is not re-checked
    /// here to keep the hot-path type infallible.
    pub fn new(latency_map: HashMap<i64, i64>, frames_map: HashMap<i64, i64>) -> Self {
        Self {
            latency_map,
            frames_map,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &i64> {
        self.latency_map.keys()
    }
}

impl PpaMapper for DictPpaMapper {
    fn try_map(&self, ppa_in: i64) -> Option<PpaDestinations> {
        let lat = self.latency_map.get(&ppa_in)?;
        let frm = self.frames_map.get(&ppa_in)?;
        Some(PpaDestinations {
            latency_ppa: *lat,
            frames_ppa: *frm,
        })
    }
}

/// Used when no `tick_write` config is present (threshold-only deployments):
/// routes nothing, mirroring `main.py`'s `IdentityPpaMapper`/no-tick-sink path
/// (which never calls `try_map` at all because `stats_keys` is empty — this
/// type exists so the pipeline always has a mapper to hold, with no special
/// casing in the flush path).
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPpaMapper;

impl PpaMapper for NullPpaMapper {
    fn try_map(&self, _ppa_in: i64) -> Option<PpaDestinations> {
        None
    }
}
