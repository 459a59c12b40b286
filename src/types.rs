//! Shared value types: 128-bit identifiers and entry timestamps.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AtlasError, Result};

/// A 128-bit identifier (file id, machine id, boot id, stream id)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Id128([u8; 16]);

impl Id128 {
    pub const NIL: Id128 = Id128([0u8; 16]);

    pub fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Fresh random id
    pub fn random() -> Self {
        Self(Uuid::new_v4().into_bytes())
    }

    /// Random id generated once per process, used as the default boot id
    pub fn process_boot() -> Self {
        static BOOT: OnceLock<Id128> = OnceLock::new();
        *BOOT.get_or_init(Id128::random)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn is_nil(&self) -> bool {
        self.0 == [0u8; 16]
    }

    pub(crate) fn from_slice(bytes: &[u8]) -> Self {
        let mut out = [0u8; 16];
        out.copy_from_slice(&bytes[..16]);
        Self(out)
    }
}

impl fmt::Display for Id128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Uuid::from_bytes(self.0).simple())
    }
}

impl FromStr for Id128 {
    type Err = AtlasError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(|u| Id128(u.into_bytes()))
            .map_err(|e| AtlasError::Config(format!("invalid 128-bit id {:?}: {}", s, e)))
    }
}

/// Timestamps attached to one entry, both in microseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamps {
    /// Wall clock, microseconds since the Unix epoch
    pub realtime: u64,
    /// Monotonic clock, microseconds since an arbitrary per-boot origin
    pub monotonic: u64,
}

impl Timestamps {
    pub fn new(realtime: u64, monotonic: u64) -> Self {
        Self {
            realtime,
            monotonic,
        }
    }

    /// Current wall clock plus process-relative monotonic time
    pub fn now() -> Self {
        static ORIGIN: OnceLock<Instant> = OnceLock::new();
        let origin = ORIGIN.get_or_init(Instant::now);
        Self {
            realtime: realtime_now(),
            monotonic: origin.elapsed().as_micros() as u64,
        }
    }
}

/// Wall clock in microseconds since the Unix epoch
pub fn realtime_now() -> u64 {
    chrono::Utc::now().timestamp_micros().max(0) as u64
}
