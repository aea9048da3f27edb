//! Durable handle cursors
//!
//! A handle names a subscription group and records the highest event number
//! its tracked subscribers have collectively acknowledged. Handles persist
//! across restarts; position is monotonically non-decreasing by convention
//! (enforced by the broker, not by storage).

use crate::Timestamp;
use serde::{Deserialize, Serialize};

/// Persisted cursor for a subscription group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handle {
    /// Handle identity (primary key)
    pub id: String,

    /// Highest acknowledged event number among tracked subscribers
    pub position: u64,

    /// When the handle row was first written
    pub created_at: Timestamp,

    /// When the position was last advanced
    pub updated_at: Timestamp,
}

impl Handle {
    /// A fresh, not-yet-persisted handle at position 0
    pub fn new(id: impl Into<String>) -> Self {
        let now = Timestamp::now();
        Self {
            id: id.into(),
            position: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Copy of this handle advanced to the given position
    pub fn at_position(&self, position: u64) -> Self {
        Self {
            id: self.id.clone(),
            position,
            created_at: self.created_at,
            updated_at: Timestamp::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_starts_at_zero() {
        let handle = Handle::new("projector");
        assert_eq!(handle.id, "projector");
        assert_eq!(handle.position, 0);
    }

    #[test]
    fn test_at_position_preserves_identity() {
        let handle = Handle::new("projector");
        let advanced = handle.at_position(42);
        assert_eq!(advanced.id, "projector");
        assert_eq!(advanced.position, 42);
        assert_eq!(advanced.created_at, handle.created_at);
    }
}
