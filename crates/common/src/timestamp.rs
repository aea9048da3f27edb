//! Physical timestamps
//!
//! Microseconds since the Unix epoch. Used for the created/updated columns of
//! persisted handles; event ordering always uses the dense event number, never
//! wall-clock time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Physical timestamp in microseconds since the Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Current wall-clock time
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros() as u64;
        Self(micros)
    }

    /// Construct from raw microseconds
    pub fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    /// Raw microseconds since the epoch
    pub fn as_micros(&self) -> u64 {
        self.0
    }

    /// This timestamp advanced by the given number of microseconds
    pub fn add_micros(&self, micros: u64) -> Self {
        Self(self.0.saturating_add(micros))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}us", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering() {
        let a = Timestamp::from_micros(1_000);
        let b = Timestamp::from_micros(2_000);
        assert!(a < b);
        assert_eq!(a.add_micros(1_000), b);
    }

    #[test]
    fn test_now_is_monotonic_enough() {
        let a = Timestamp::now();
        let b = Timestamp::now();
        assert!(a <= b);
    }

    #[test]
    fn test_add_saturates() {
        let t = Timestamp::from_micros(u64::MAX);
        assert_eq!(t.add_micros(1), t);
    }
}
