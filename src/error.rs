//! # Error Handling for fetchgate
//!
//! A single error enum ([`Error`]) covers every failure an engine operation
//! can report. Two things are deliberately *not* errors:
//!
//! - A query whose Args are skipped (`should_skip`) resolves to
//!   [`QueryOutcome::Skipped`](crate::types::QueryOutcome::Skipped).
//! - A dispatch vetoed by the admission controller resolves to
//!   [`QueryOutcome::Aborted`](crate::types::QueryOutcome::Aborted).
//!
//! ## Error Categories
//!
//! | Category | Examples | Recorded in history? | Typical Response |
//! |----------|----------|----------------------|------------------|
//! | Execution | Transport failure, bad payload | Yes (Rejected) | Backoff retries |
//! | Configuration | Missing base URL | No | Fix the query definition |
//! | Subscription | Lagged receiver, closed bus | No | Re-read state |

use thiserror::Error;

use crate::transport::TransportError;

// =============================================================================
// Error Type
// =============================================================================

/// All errors that can occur in fetchgate operations.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Execution Errors (recorded as Rejected, retried under backoff)
    // =========================================================================

    /// A physical request failed at the transport.
    ///
    /// When a demand fans out into several sub-requests, the first failure
    /// fails the whole logical operation; nothing is merged into the cache.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A response could not be decoded into the query's response type.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// A custom (non-transport) query function failed.
    #[error("custom query failed: {0}")]
    CustomQuery(String),

    // =========================================================================
    // Configuration Errors (programmer error, never retried)
    // =========================================================================

    /// The query cannot be dispatched as configured.
    ///
    /// # When This Happens
    ///
    /// - The base URL is empty and the query has no custom query function
    /// - No transport was supplied to the engine
    /// - `prepare_request_config` produced no request configs
    ///
    /// No history entry is created for the request.
    #[error("configuration error: {0}")]
    Config(String),

    // =========================================================================
    // Subscription Errors
    // =========================================================================

    /// A subscriber fell behind the event bus and missed `n` events.
    #[error("subscription lagged by {0} events")]
    SubscriptionLagged(u64),

    /// The middleware is already running.
    #[error("middleware '{0}' is already running")]
    AlreadyRunning(String),

    /// The task running an admitted request panicked or was aborted.
    ///
    /// The request is recorded Rejected like any other execution failure.
    #[error("closed: {0}")]
    Closed(String),
}

impl Error {
    /// Returns true for failures that are recorded in history and retried
    /// under backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::Decode(_) | Error::CustomQuery(_) | Error::Closed(_)
        )
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// A `Result` type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let transport = Error::Transport(TransportError::new("connection refused"));
        assert_eq!(transport.to_string(), "transport error: connection refused");

        let with_status = Error::Transport(TransportError::with_status(503, "unavailable"));
        assert_eq!(with_status.to_string(), "transport error: status 503: unavailable");

        let config = Error::Config("missing base URL".to_string());
        assert_eq!(config.to_string(), "configuration error: missing base URL");

        let lagged = Error::SubscriptionLagged(7);
        assert_eq!(lagged.to_string(), "subscription lagged by 7 events");
    }

    #[test]
    fn test_decode_error_conversion() {
        let json_err = serde_json::from_str::<u32>("not a number").unwrap_err();
        let our_err: Error = json_err.into();
        assert!(matches!(our_err, Error::Decode(_)));
        assert!(our_err.to_string().starts_with("decode error"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::Transport(TransportError::new("x")).is_retryable());
        assert!(Error::CustomQuery("x".to_string()).is_retryable());
        assert!(!Error::Config("x".to_string()).is_retryable());
        assert!(!Error::SubscriptionLagged(1).is_retryable());
        assert!(Error::Closed("request task panicked".to_string()).is_retryable());
    }
}
