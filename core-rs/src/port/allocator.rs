//! Deterministic replacement-port selection
//!
//! The scan is strictly ascending from the low end of the range and
//! stateless across invocations; the only cross-conflict state is the
//! reserved set the caller accumulates, which must contain every host
//! port declared anywhere in the inventory plus reassignments already
//! made in the current run. Repeated runs against an unchanged occupancy
//! snapshot therefore produce the same assignments.

use std::collections::BTreeSet;
use std::str::FromStr;
use tracing::debug;

use crate::compose::Protocol;
use crate::errors::{DcpError, Result};
use crate::occupancy::PortProbe;

/// Inclusive range candidates are drawn from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub low: u16,
    pub high: u16,
}

impl PortRange {
    /// # Errors
    /// `DcpError::InvalidPortRange` when `low` is 0 or above `high`.
    pub fn new(low: u16, high: u16) -> Result<Self> {
        if low == 0 || low >= high {
            return Err(DcpError::InvalidPortRange(format!(
                "{}-{} (expected 1 <= low < high <= 65535)",
                low, high
            )));
        }
        Ok(PortRange { low, high })
    }
}

impl Default for PortRange {
    fn default() -> Self {
        PortRange {
            low: 8000,
            high: 65535,
        }
    }
}

impl FromStr for PortRange {
    type Err = DcpError;

    /// Accepts `"8000-9000"` or a bare `"8000"` (high defaults to 65535)
    fn from_str(s: &str) -> Result<Self> {
        let parse = |part: &str| {
            part.trim()
                .parse::<u16>()
                .map_err(|_| DcpError::InvalidPortRange(format!("'{}' in '{}'", part, s)))
        };

        match s.split_once('-') {
            Some((low, high)) => Self::new(parse(low)?, parse(high)?),
            None => Self::new(parse(s)?, 65535),
        }
    }
}

/// Find a replacement for a conflicting port
///
/// Candidates are scanned in ascending order; a candidate is rejected if
/// it appears in `reserved` (any declared host port, plus ports already
/// handed out this run) or if the probe reports it occupied. The first
/// survivor wins.
///
/// # Errors
/// `DcpError::NoAvailablePort` when the scan exhausts the range. The
/// caller records this against the conflicting binding and continues with
/// the others.
pub fn allocate(
    conflicting_port: u16,
    range: &PortRange,
    reserved: &BTreeSet<u16>,
    probe: &dyn PortProbe,
    protocol: Protocol,
) -> Result<u16> {
    for candidate in range.low..=range.high {
        if reserved.contains(&candidate) {
            continue;
        }
        if probe.probe(candidate, protocol).in_use {
            continue;
        }
        debug!(from = conflicting_port, to = candidate, "allocated replacement port");
        return Ok(candidate);
    }

    Err(DcpError::NoAvailablePort(format!(
        "range {}-{} exhausted while replacing {}",
        range.low, range.high, conflicting_port
    )))
}
