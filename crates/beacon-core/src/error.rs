use std::fmt;

use thiserror::Error;

/// Why the event buffer refused an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The buffer has not been initialized (or was shut down).
    NotInitialized,
    /// A listener rejected the event before it reached the buffer.
    Vetoed,
    /// The buffer was full and the overflow listener asked to drop it.
    Overflow,
    /// The buffer was full and the reservoir draw did not select it.
    Sampled,
    /// The buffer was full and the listener refused to evict the chosen victim.
    EvictionDeclined,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            DropReason::NotInitialized => "buffer not initialized",
            DropReason::Vetoed => "rejected by listener",
            DropReason::Overflow => "buffer overflow",
            DropReason::Sampled => "not selected by sampling",
            DropReason::EvictionDeclined => "eviction declined",
        };
        f.write_str(reason)
    }
}

/// Top-level error type for the Beacon telemetry core.
///
/// Validation helpers report through booleans; everything that mutates
/// registry or buffer state reports through this type so that callers can
/// tell a capacity rejection from a persistence failure.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BeaconError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Attribute limit reached: {limit} user attributes")]
    CapacityExceeded { limit: usize },

    #[error("Event dropped: {reason}")]
    EventDropped { reason: DropReason },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Not initialized")]
    NotInitialized,

    #[error("Analytics collection disabled")]
    Disabled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for BeaconError {
    fn from(err: toml::de::Error) -> Self {
        BeaconError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for BeaconError {
    fn from(err: toml::ser::Error) -> Self {
        BeaconError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for BeaconError {
    fn from(err: serde_json::Error) -> Self {
        BeaconError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Beacon operations.
pub type Result<T> = std::result::Result<T, BeaconError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BeaconError::Config("missing field".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing field");
    }

    #[test]
    fn test_event_dropped_display() {
        let err = BeaconError::EventDropped {
            reason: DropReason::Sampled,
        };
        assert_eq!(err.to_string(), "Event dropped: not selected by sampling");
    }

    #[test]
    fn test_capacity_display() {
        let err = BeaconError::CapacityExceeded { limit: 128 };
        assert_eq!(err.to_string(), "Attribute limit reached: 128 user attributes");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: BeaconError = io_err.into();
        assert!(matches!(err, BeaconError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_error_from_toml_de() {
        let err: std::result::Result<toml::Value, _> = toml::from_str("invalid = [[[");
        let beacon_err: BeaconError = err.unwrap_err().into();
        assert!(matches!(beacon_err, BeaconError::Config(_)));
    }

    #[test]
    fn test_error_from_serde_json() {
        let err: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope }");
        let beacon_err: BeaconError = err.unwrap_err().into();
        assert!(matches!(beacon_err, BeaconError::Serialization(_)));
    }

    #[test]
    fn test_result_type_with_question_mark() {
        fn inner() -> Result<String> {
            let io_result: std::result::Result<i32, std::io::Error> = Ok(42);
            let _value = io_result?;
            Ok("success".to_string())
        }

        assert_eq!(inner().unwrap(), "success");
    }
}
