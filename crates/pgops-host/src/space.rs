//! Filesystem and space oracle: directory sizes, partitions, partition
//! occupancy.
//!
//! Delegates to the host `du`/`df` utilities through the typed process
//! runner and parses their output against explicit column contracts. Any
//! non-zero exit or deviation from the expected shape surfaces as
//! [`OracleError`]; callers must treat that as fatal to the enclosing
//! workflow rather than defaulting to zero.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::process::{CommandSpec, ExecError, Runner};

/// Occupancy of one partition, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionStats {
    /// Total partition size.
    pub total_bytes: u64,
    /// Bytes in use.
    pub used_bytes: u64,
    /// Bytes available to unprivileged writers.
    pub available_bytes: u64,
    /// Used percentage as reported by the utility (0..=100).
    pub used_percent: u8,
}

/// Error variants for space and partition queries ("oracle unavailable").
#[derive(Debug, Error)]
pub enum OracleError {
    /// The underlying utility failed or could not be launched.
    #[error(transparent)]
    Exec(#[from] ExecError),

    /// The utility ran but its output did not match the column contract.
    #[error("cannot parse output of [{command}]: {output:?}")]
    Unparsable {
        /// The command whose output was rejected.
        command: String,
        /// The offending output, verbatim.
        output: String,
    },
}

/// Pure disk-usage queries over the host utilities.
pub struct SpaceOracle<'r> {
    runner: &'r dyn Runner,
}

impl<'r> SpaceOracle<'r> {
    /// Creates an oracle issuing queries through `runner`.
    pub fn new(runner: &'r dyn Runner) -> Self {
        Self { runner }
    }

    /// Total bytes consumed by `path`, hard links counted once
    /// (`du -bc` semantics).
    pub fn directory_size_bytes(&self, path: &Path) -> Result<u64, OracleError> {
        let spec = CommandSpec::new("du")
            .arg("-bc")
            .arg(path.display().to_string());
        let out = self.runner.run_checked(&spec)?;
        parse_du_total(&out.stdout).ok_or_else(|| OracleError::Unparsable {
            command: spec.display(),
            output: out.stdout,
        })
    }

    /// Device identifier of the partition `path` resides on
    /// (`df -lP` device column).
    pub fn partition_of(&self, path: &Path) -> Result<String, OracleError> {
        let spec = CommandSpec::new("df")
            .arg("-lP")
            .arg(path.display().to_string());
        let out = self.runner.run_checked(&spec)?;
        parse_df_device(&out.stdout).ok_or_else(|| OracleError::Unparsable {
            command: spec.display(),
            output: out.stdout,
        })
    }

    /// Occupancy of the partition `path` resides on (`df -lPB1`, byte
    /// blocks).
    pub fn partition_stats(&self, path: &Path) -> Result<PartitionStats, OracleError> {
        let spec = CommandSpec::new("df")
            .arg("-lPB1")
            .arg(path.display().to_string());
        let out = self.runner.run_checked(&spec)?;
        parse_df_stats(&out.stdout).ok_or_else(|| OracleError::Unparsable {
            command: spec.display(),
            output: out.stdout,
        })
    }
}

/// Extracts the TOTAL row of `du -bc` output: last non-empty line, first
/// column.
fn parse_du_total(stdout: &str) -> Option<u64> {
    let line = stdout.lines().rev().find(|l| !l.trim().is_empty())?;
    line.split_whitespace().next()?.parse().ok()
}

/// Extracts the device column of the last data row of `df -lP` output.
fn parse_df_device(stdout: &str) -> Option<String> {
    let line = stdout.lines().rev().find(|l| !l.trim().is_empty())?;
    let device = line.split_whitespace().next()?;
    // The header row starts with "Filesystem"; a single-row answer means
    // the path did not resolve.
    if device == "Filesystem" {
        return None;
    }
    Some(device.to_string())
}

/// Parses the data row of POSIX `df -P` output with 1-byte blocks.
///
/// Column contract: device, total, used, available, use%, mountpoint.
fn parse_df_stats(stdout: &str) -> Option<PartitionStats> {
    let line = stdout.lines().rev().find(|l| !l.trim().is_empty())?;
    let columns: Vec<&str> = line.split_whitespace().collect();
    if columns.len() < 6 || columns[0] == "Filesystem" {
        return None;
    }
    Some(PartitionStats {
        total_bytes: columns[1].parse().ok()?,
        used_bytes: columns[2].parse().ok()?,
        available_bytes: columns[3].parse().ok()?,
        used_percent: columns[4].strip_suffix('%')?.parse().ok()?,
    })
}

/// Renders a byte count for operators: binary units, one decimal.
pub fn size_pretty(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes}{}", UNITS[0])
    } else {
        format!("{value:.1}{}", UNITS[unit])
    }
}
