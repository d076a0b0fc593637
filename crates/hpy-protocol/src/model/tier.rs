//! Firmware capability tiers derived from the version string.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Capability class of the running firmware. Ordered: `Tier0 < Tier1 < Tier2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FirmwareTier {
    /// Bootloader or manufacturing firmware. No application command set.
    Tier0,
    /// Legacy application firmware (2.4.x.x).
    Tier1,
    /// Current application firmware (2.5.x.x and later).
    Tier2,
}

impl FirmwareTier {
    /// Classify a `PROJECT.MAJOR.MINOR.BUILD` version string.
    ///
    /// Anything unparseable is treated as `Tier0`.
    pub fn from_version(version: &str) -> FirmwareTier {
        let mut parts = version.trim().split('.');
        let project = parts.next().and_then(|p| p.parse::<u32>().ok());
        let major = parts.next().and_then(|p| p.parse::<u32>().ok());
        let (Some(project), Some(major)) = (project, major) else {
            return FirmwareTier::Tier0;
        };

        match (project, major) {
            (0, _) => FirmwareTier::Tier0,
            (1, 5) => FirmwareTier::Tier0,
            (2, 4) => FirmwareTier::Tier1,
            (2, m) if m >= 5 => FirmwareTier::Tier2,
            (p, _) if p >= 3 => FirmwareTier::Tier2,
            _ => FirmwareTier::Tier0,
        }
    }
}

impl fmt::Display for FirmwareTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = match self {
            FirmwareTier::Tier0 => 0,
            FirmwareTier::Tier1 => 1,
            FirmwareTier::Tier2 => 2,
        };
        write!(f, "TIER_{}", n)
    }
}

/// First firmware build with L2CAP frame download.
const L2CAP_MIN_VERSION: (u32, u32, u32, u32) = (2, 5, 0, 54);

/// Whether the firmware can serve frames over L2CAP.
///
/// Needs all four version components. Any version at or above 2.5.0.54
/// qualifies, which includes the 2.5.1.x release line.
pub fn supports_l2cap_download(version: &str) -> bool {
    let parsed: Vec<u32> = match version
        .trim()
        .split('.')
        .map(|p| p.parse::<u32>())
        .collect::<Result<Vec<_>, _>>()
    {
        Ok(parts) => parts,
        Err(_) => return false,
    };
    if parsed.len() < 4 {
        return false;
    }
    (parsed[0], parsed[1], parsed[2], parsed[3]) >= L2CAP_MIN_VERSION
}
