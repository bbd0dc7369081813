//! Error type for ZBDD operations.

use std::fmt;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ZbddError>;

/// Error type for ZBDD operations.
///
/// Every public engine entry point validates its arguments and surfaces one
/// of these kinds; failures are deterministic given identical inputs and
/// capacity-advisor policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZbddError {
    /// Variable outside `1..=last_var`, or the variable counter is exhausted.
    InvalidVar { var: u32, last_var: u32 },
    /// Node id outside `0..capacity`, or referring to a freed slot.
    InvalidNode { node: u32, capacity: usize },
    /// Garbage collection and growth both failed to yield a usable slot.
    CapacityExhausted { capacity: usize },
    /// The operation is not available through this wrapper type.
    UnsupportedOperation(&'static str),
}

impl fmt::Display for ZbddError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZbddError::InvalidVar { var, last_var } => {
                write!(f, "invalid variable {} (registered range 1..={})", var, last_var)
            }
            ZbddError::InvalidNode { node, capacity } => {
                write!(f, "invalid node {} (capacity {})", node, capacity)
            }
            ZbddError::CapacityExhausted { capacity } => {
                write!(f, "node capacity exhausted at {} slots", capacity)
            }
            ZbddError::UnsupportedOperation(what) => {
                write!(f, "unsupported operation: {}", what)
            }
        }
    }
}

impl std::error::Error for ZbddError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let e = ZbddError::InvalidVar { var: 9, last_var: 3 };
        assert_eq!(e.to_string(), "invalid variable 9 (registered range 1..=3)");

        let e = ZbddError::InvalidNode { node: 500, capacity: 128 };
        assert_eq!(e.to_string(), "invalid node 500 (capacity 128)");

        let e = ZbddError::CapacityExhausted { capacity: 128 };
        assert_eq!(e.to_string(), "node capacity exhausted at 128 slots");
    }
}
