//! One-shot memory-based tuning estimator.
//!
//! Derives recommended server parameters from the host's total memory.
//! Sizes are binary-rounded to four significant bits so recommendations
//! stay stable across small memory differences. Consumed by the
//! reconciliation policy as one input among several; owns no file.

use std::fs;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Connection budget the estimates are sized against.
pub const MAX_CONNECTIONS: u64 = 80;

/// Minimum supported host memory (KiB): 255 MiB.
const MIN_MEMORY_KIB: u64 = 0xff * 1024;

/// 1 GiB expressed in KiB; cap for `maintenance_work_mem`.
const GIB_IN_KIB: u64 = 0x10_0000;

/// Error variants for tuning estimation.
#[derive(Debug, Error)]
pub enum TuneError {
    /// Total host memory could not be determined.
    #[error("cannot determine total memory of this system")]
    MemoryUnavailable,

    /// The host has too little memory to be tuned by this profile.
    #[error("low memory system ({total_kib} KiB) is not supported")]
    LowMemory {
        /// Detected total memory in KiB.
        total_kib: u64,
    },
}

/// Derived, read-only mapping of tuning parameter to recommended value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TuningProfile {
    settings: Vec<(String, String)>,
}

impl TuningProfile {
    /// Estimates a profile for a host with `total_memory_bytes` of RAM.
    pub fn estimate(total_memory_bytes: u64) -> Result<Self, TuneError> {
        let mem = total_memory_bytes / 1024;
        if mem < MIN_MEMORY_KIB {
            return Err(TuneError::LowMemory { total_kib: mem });
        }

        let checkpoint_segments: u64 = 8;
        let maintenance = (mem / 0x10).min(GIB_IN_KIB);

        let settings = vec![
            ("shared_buffers".into(), to_mb(binary_round(mem / 4))),
            (
                "effective_cache_size".into(),
                to_mb(binary_round(mem * 3 / 4)),
            ),
            ("work_mem".into(), to_mb(binary_round(mem / MAX_CONNECTIONS))),
            ("maintenance_work_mem".into(), to_mb(binary_round(maintenance))),
            ("checkpoint_segments".into(), checkpoint_segments.to_string()),
            ("checkpoint_completion_target".into(), "0.7".into()),
            ("wal_buffers".into(), to_mb(0x200 * checkpoint_segments)),
            ("constraint_exclusion".into(), "off".into()),
            ("default_statistics_target".into(), "10".into()),
            ("max_connections".into(), MAX_CONNECTIONS.to_string()),
        ];
        Ok(Self { settings })
    }

    /// Estimates a profile from this host's total memory.
    pub fn from_host() -> Result<Self, TuneError> {
        let meminfo =
            fs::read_to_string("/proc/meminfo").map_err(|_| TuneError::MemoryUnavailable)?;
        let total = total_memory_bytes(&meminfo).ok_or(TuneError::MemoryUnavailable)?;
        Self::estimate(total)
    }

    /// Iterates over parameter/value recommendations.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.settings.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Recommended value for `key`, if the profile carries one.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.settings
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Binary rounding: keep 4 significant bits, truncate the rest.
fn binary_round(mut value: u64) -> u64 {
    let mut multiplier = 1;
    while value > 0x10 {
        value /= 2;
        multiplier *= 2;
    }
    multiplier * value
}

/// Renders a KiB quantity as whole megabytes.
fn to_mb(kib: u64) -> String {
    format!("{}MB", kib / 1024)
}

/// Extracts total memory in bytes from `/proc/meminfo` text.
fn total_memory_bytes(meminfo: &str) -> Option<u64> {
    let line = meminfo.lines().find(|l| l.starts_with("MemTotal:"))?;
    let kib: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kib * 1024)
}
