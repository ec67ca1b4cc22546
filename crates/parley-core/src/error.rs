//! Unified error type for the cache layer and its collaborators.

use std::fmt::Debug;
use thiserror::Error;

/// Unified error type for Parley.
///
/// Cache-tier variants (`CacheUnavailable`, `PartialInvalidation`) never leave
/// the cache layer: the gateway converts them into misses or no-ops and hands
/// them to observability. Store-tier variants are returned to callers
/// unchanged.
#[derive(Error, Debug)]
pub enum ParleyError {
    // ============ Key Errors ============
    /// A field of an entity reference cannot be encoded into a cache key.
    #[error("Invalid key field: {kind}.{field} {reason}")]
    InvalidKeyField {
        kind: &'static str,
        field: &'static str,
        reason: String,
    },

    // ============ Cache Tier Errors ============
    /// The cache tier could not be reached or rejected the operation.
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    /// Some but not all keys of an invalidation set were deleted.
    #[error("Partial invalidation: {failed} of {total} targets failed")]
    PartialInvalidation { failed: usize, total: usize },

    // ============ Store Errors ============
    /// The relational store failed.
    #[error("Store error: {0}")]
    Store(String),

    /// Resource not found
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound {
        resource_type: &'static str,
        id: String,
    },

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    // ============ Infrastructure Errors ============
    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Timeout error
    #[error("Operation timed out: {0}")]
    Timeout(String),

    // ============ Internal Errors ============
    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ParleyError {
    /// Returns a machine-readable error code.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidKeyField { .. } => "INVALID_KEY_FIELD",
            Self::CacheUnavailable(_) => "CACHE_UNAVAILABLE",
            Self::PartialInvalidation { .. } => "PARTIAL_INVALIDATION",
            Self::Store(_) => "STORE_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::Internal(_) | Self::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Creates an invalid key field error.
    #[must_use]
    pub fn invalid_key_field<T: Into<String>>(
        kind: &'static str,
        field: &'static str,
        reason: T,
    ) -> Self {
        Self::InvalidKeyField {
            kind,
            field,
            reason: reason.into(),
        }
    }

    /// Creates a cache unavailable error.
    #[must_use]
    pub fn cache_unavailable<T: Into<String>>(message: T) -> Self {
        Self::CacheUnavailable(message.into())
    }

    /// Creates a store error.
    #[must_use]
    pub fn store<T: Into<String>>(message: T) -> Self {
        Self::Store(message.into())
    }

    /// Creates a not found error for a resource.
    #[must_use]
    pub fn not_found<T: ToString>(resource_type: &'static str, id: T) -> Self {
        Self::NotFound {
            resource_type,
            id: id.to_string(),
        }
    }

    /// Creates a validation error.
    #[must_use]
    pub fn validation<T: Into<String>>(message: T) -> Self {
        Self::Validation(message.into())
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal<T: Into<String>>(message: T) -> Self {
        Self::Internal(message.into())
    }

    /// Checks if this error is retriable.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::CacheUnavailable(_)
                | Self::PartialInvalidation { .. }
                | Self::Store(_)
                | Self::Timeout(_)
        )
    }

    /// Checks if this error belongs to the cache tier and must be contained
    /// inside the cache layer.
    #[must_use]
    pub const fn is_cache_tier(&self) -> bool {
        matches!(
            self,
            Self::CacheUnavailable(_) | Self::PartialInvalidation { .. } | Self::Timeout(_)
        )
    }

    /// Checks if this error counts towards degrading the cache tier.
    #[must_use]
    pub const fn should_degrade_cache(&self) -> bool {
        matches!(self, Self::CacheUnavailable(_) | Self::Timeout(_))
    }
}

impl From<serde_json::Error> for ParleyError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("JSON serialization error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            ParleyError::invalid_key_field("user_username", "username", "contains ':'").error_code(),
            "INVALID_KEY_FIELD"
        );
        assert_eq!(ParleyError::cache_unavailable("down").error_code(), "CACHE_UNAVAILABLE");
        assert_eq!(
            ParleyError::PartialInvalidation { failed: 1, total: 3 }.error_code(),
            "PARTIAL_INVALIDATION"
        );
        assert_eq!(ParleyError::store("deadlock").error_code(), "STORE_ERROR");
        assert_eq!(ParleyError::not_found("User", 1).error_code(), "NOT_FOUND");
        assert_eq!(ParleyError::internal("oops").error_code(), "INTERNAL_ERROR");
    }

    #[test]
    fn test_retriable_errors() {
        assert!(ParleyError::cache_unavailable("refused").is_retriable());
        assert!(ParleyError::store("connection reset").is_retriable());
        assert!(ParleyError::Timeout("slow".to_string()).is_retriable());
        assert!(!ParleyError::invalid_key_field("message", "message_id", "bad").is_retriable());
        assert!(!ParleyError::not_found("Message", 7).is_retriable());
    }

    #[test]
    fn test_cache_tier_classification() {
        assert!(ParleyError::cache_unavailable("refused").is_cache_tier());
        assert!(ParleyError::PartialInvalidation { failed: 2, total: 5 }.is_cache_tier());
        assert!(!ParleyError::store("down").is_cache_tier());
        assert!(!ParleyError::validation("empty content").is_cache_tier());
    }

    #[test]
    fn test_degrade_classification() {
        assert!(ParleyError::cache_unavailable("refused").should_degrade_cache());
        assert!(ParleyError::Timeout("ping".to_string()).should_degrade_cache());
        assert!(!ParleyError::internal("decode").should_degrade_cache());
        assert!(!ParleyError::store("down").should_degrade_cache());
    }

    #[test]
    fn test_error_display() {
        let err = ParleyError::invalid_key_field("user_email", "email", "contains ':'");
        assert_eq!(err.to_string(), "Invalid key field: user_email.email contains ':'");

        let err = ParleyError::PartialInvalidation { failed: 1, total: 8 };
        assert!(err.to_string().contains("1 of 8"));
    }

    #[test]
    fn test_from_serde_json() {
        let err: ParleyError = serde_json::from_str::<u32>("not json").unwrap_err().into();
        assert!(matches!(err, ParleyError::Internal(_)));
    }
}
