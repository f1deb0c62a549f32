//! Serializable delivering-port identity.
//!
//! Payload provenance is recorded as names, not object references, so it
//! survives persistence of the payload and resolves lazily against whatever
//! graph is live when someone asks. Resolution misses (renamed or deleted
//! operators) are a normal outcome, not an error.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Subprocess index marking a port on the operator's own banks rather than
/// on one of its subprocess units.
pub const OUTER_PORT: i32 = -1;

/// Stable address of a port: owning operator name, port name, and the
/// subprocess index the port belongs to ([`OUTER_PORT`] for the operator's
/// own input/output banks).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortRef {
    pub operator: String,
    pub port: String,
    pub subprocess: i32,
}

impl PortRef {
    /// Address of a port on the operator's own banks.
    pub fn outer(operator: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            operator: operator.into(),
            port: port.into(),
            subprocess: OUTER_PORT,
        }
    }

    /// Address of a port on one of the operator's subprocess units
    /// (its inner sources/sinks).
    pub fn inner(operator: impl Into<String>, subprocess: usize, port: impl Into<String>) -> Self {
        Self {
            operator: operator.into(),
            port: port.into(),
            subprocess: subprocess as i32,
        }
    }

    #[inline]
    pub fn is_outer(&self) -> bool {
        self.subprocess == OUTER_PORT
    }
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_outer() {
            write!(f, "{}.{}", self.operator, self.port)
        } else {
            write!(f, "{}[{}].{}", self.operator, self.subprocess, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outer_marker() {
        let r = PortRef::outer("Join", "left");
        assert!(r.is_outer());
        assert_eq!(r.subprocess, OUTER_PORT);
        assert_eq!(r.to_string(), "Join.left");
    }

    #[test]
    fn test_inner_display() {
        let r = PortRef::inner("Loop", 0, "out 1");
        assert!(!r.is_outer());
        assert_eq!(r.to_string(), "Loop[0].out 1");
    }

    #[test]
    fn test_json_round_trip() {
        let r = PortRef::inner("Loop", 2, "result 1");
        let json = serde_json::to_string(&r).unwrap();
        let back: PortRef = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }
}
