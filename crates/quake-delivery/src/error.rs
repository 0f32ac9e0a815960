//! Delivery error classification

use std::time::Duration;

/// Failure of one outbound platform call
///
/// Classified into permanent (recipient unreachable for good), benign
/// (nothing to do) and transient (everything else, retried naturally by the
/// next qualifying event).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// Recipient blocked the bot
    #[error("recipient blocked the bot")]
    Blocked,

    /// Recipient account was deleted
    #[error("recipient account is deactivated")]
    Deactivated,

    /// Chat no longer exists
    #[error("chat not found")]
    ChatNotFound,

    /// Edit carried the text the message already has
    #[error("message is not modified")]
    NotModified,

    /// Platform throttled the call
    #[error("rate limited by platform, retry after {retry_after_secs}s")]
    RateLimited {
        /// Platform-suggested back-off
        retry_after_secs: u64,
    },

    /// Call exceeded the request timeout
    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),

    /// Transport failure
    #[error("network error: {0}")]
    Network(String),

    /// Any other platform response
    #[error("platform error {code}: {description}")]
    Platform {
        /// Platform error code
        code: i32,
        /// Platform description
        description: String,
    },
}

impl DeliveryError {
    /// Classify a platform error response
    #[must_use]
    pub fn from_platform(code: i32, description: impl Into<String>) -> Self {
        let description = description.into();
        let lower = description.to_ascii_lowercase();
        match code {
            403 if lower.contains("blocked") => Self::Blocked,
            403 if lower.contains("deactivated") => Self::Deactivated,
            400 if lower.contains("chat not found") => Self::ChatNotFound,
            400 if lower.contains("message is not modified") => Self::NotModified,
            429 => Self::RateLimited {
                retry_after_secs: 1,
            },
            _ => Self::Platform { code, description },
        }
    }

    /// Recipient is unreachable for good; deactivate, never retry
    #[inline]
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Blocked | Self::Deactivated | Self::ChatNotFound)
    }

    /// Nothing went wrong from the caller's point of view
    #[inline]
    #[must_use]
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::NotModified)
    }

    /// Worth retrying on the next qualifying event
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        !self.is_permanent() && !self.is_benign()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_responses_are_classified() {
        let blocked = DeliveryError::from_platform(403, "Forbidden: bot was blocked by the user");
        assert_eq!(blocked, DeliveryError::Blocked);
        assert!(blocked.is_permanent());

        let gone = DeliveryError::from_platform(403, "Forbidden: user is deactivated");
        assert_eq!(gone, DeliveryError::Deactivated);

        let same = DeliveryError::from_platform(400, "Bad Request: message is not modified");
        assert!(same.is_benign());
        assert!(!same.is_transient());

        let busy = DeliveryError::from_platform(429, "Too Many Requests");
        assert!(busy.is_transient());

        let other = DeliveryError::from_platform(500, "Internal Server Error");
        assert!(matches!(other, DeliveryError::Platform { code: 500, .. }));
        assert!(other.is_transient());
    }

    #[test]
    fn timeouts_are_transient() {
        assert!(DeliveryError::Timeout(Duration::from_secs(10)).is_transient());
        assert!(DeliveryError::Network("reset".into()).is_transient());
    }
}
