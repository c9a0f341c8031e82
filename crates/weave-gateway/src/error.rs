//! Gateway errors and failure classification

use serde::{Deserialize, Serialize};

/// Coarse failure class reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureClass {
    /// Call exceeded its deadline
    Timeout,
    /// Any other backend failure
    Other,
}

/// Generation gateway errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// Call exceeded its timeout
    #[error("generation call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Backend asked us to slow down
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Backend returned a non-success status
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Transport failure
    #[error("network error: {0}")]
    Network(String),

    /// Response body could not be decoded
    #[error("failed to parse response: {0}")]
    Parse(String),

    /// Missing key or invalid backend settings
    #[error("invalid gateway configuration: {0}")]
    Config(String),

    /// Every attempt failed
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<GatewayError>,
    },
}

impl GatewayError {
    /// Classify for callers that only care about timeout vs. anything else
    #[must_use]
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Timeout { .. } => FailureClass::Timeout,
            Self::RetriesExhausted { last, .. } => last.class(),
            _ => FailureClass::Other,
        }
    }

    /// Check if another attempt could succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::RateLimited(_) | Self::Network(_) => true,
            Self::Api { status, .. } => *status >= 500 || *status == 408,
            Self::Parse(_) | Self::Config(_) | Self::RetriesExhausted { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert_eq!(GatewayError::Timeout { timeout_ms: 10 }.class(), FailureClass::Timeout);
        assert_eq!(GatewayError::Network("reset".into()).class(), FailureClass::Other);
        let exhausted = GatewayError::RetriesExhausted {
            attempts: 3,
            last: Box::new(GatewayError::Timeout { timeout_ms: 10 }),
        };
        assert_eq!(exhausted.class(), FailureClass::Timeout);
        assert!(!exhausted.is_retryable());
    }

    #[test]
    fn retryable_statuses() {
        let api = |status| GatewayError::Api {
            status,
            message: String::new(),
        };
        assert!(api(529).is_retryable());
        assert!(api(500).is_retryable());
        assert!(!api(400).is_retryable());
        assert!(!api(401).is_retryable());
        assert!(GatewayError::RateLimited("slow down".into()).is_retryable());
        assert!(!GatewayError::Config("no key".into()).is_retryable());
    }
}
