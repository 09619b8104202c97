//! File modification-time fingerprints.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A file modification time in nanoseconds since the Unix epoch.
///
/// Stored as a plain integer so it serializes identically to TOML and JSON.
/// Times before the epoch clamp to zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Mtime(pub u64);

impl Mtime {
    /// The zero timestamp, used for files that could not be stat'ed.
    pub const ZERO: Mtime = Mtime(0);

    /// Converts a [`SystemTime`] into an `Mtime`.
    pub fn from_system_time(time: SystemTime) -> Self {
        let nanos = time
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_nanos();
        Mtime(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    /// Converts back into a [`SystemTime`].
    pub fn to_system_time(self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.0)
    }
}

impl fmt::Display for Mtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reads the modification time of `path`, or `None` if it cannot be stat'ed.
pub fn mtime_of(path: &Path) -> Option<Mtime> {
    let meta = std::fs::metadata(path).ok()?;
    meta.modified().ok().map(Mtime::from_system_time)
}
