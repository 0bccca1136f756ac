//! Log positions (LSNs) on the replication stream.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A 64-bit offset into the source's change stream.
///
/// Positions are totally ordered. [`LogPosition::INVALID`] (zero) stands for
/// "unknown" in status reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogPosition(u64);

impl LogPosition {
    pub const INVALID: LogPosition = LogPosition(0);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl From<u64> for LogPosition {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<LogPosition> for u64 {
    fn from(lsn: LogPosition) -> Self {
        lsn.0
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_lsn(self.0))
    }
}

impl FromStr for LogPosition {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_lsn(s).map(LogPosition)
    }
}

/// Parse LSN from "X/Y" format to u64.
pub fn parse_lsn(lsn: &str) -> Result<u64> {
    let (high, low) = lsn
        .split_once('/')
        .ok_or_else(|| Error::InvalidLsn(lsn.to_string()))?;

    let high = u32::from_str_radix(high, 16).map_err(|_| Error::InvalidLsn(lsn.to_string()))?;
    let low = u32::from_str_radix(low, 16).map_err(|_| Error::InvalidLsn(lsn.to_string()))?;

    Ok((u64::from(high) << 32) | u64::from(low))
}

/// Format u64 LSN to "X/Y" format.
pub fn format_lsn(lsn: u64) -> String {
    let high = lsn >> 32;
    let low = lsn & 0xFFFFFFFF;
    format!("{:X}/{:X}", high, low)
}
