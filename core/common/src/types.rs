//! Common types used throughout EPG sync.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Milliseconds since the Unix epoch, UTC.
pub type UtcMillis = i64;

/// One hour in milliseconds.
pub const HOUR_MS: i64 = 60 * 60 * 1000;

/// Identity of a TV input whose guide data is synchronized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InputId(String);

impl InputId {
    /// Create a new InputId from a string.
    ///
    /// # Errors
    /// - Returns error if id is empty or only whitespace
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(crate::Error::InvalidInput(
                "InputId cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Store-assigned channel row id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(pub i64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Store-assigned program row id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProgramId(pub i64);

impl fmt::Display for ProgramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_id_creation() {
        let id = InputId::new("com.example.tv/.SampleInput").unwrap();
        assert_eq!(id.as_str(), "com.example.tv/.SampleInput");
        assert_eq!(id.to_string(), "com.example.tv/.SampleInput");
    }

    #[test]
    fn test_input_id_empty_fails() {
        assert!(InputId::new("").is_err());
        assert!(InputId::new("   ").is_err());
    }

    #[test]
    fn test_input_id_serialization() {
        let id = InputId::new("input").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"input\"");
    }
}
