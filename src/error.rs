//! Error taxonomy for the polling and delivery paths
//!
//! Fetch failures are classified because the scheduler treats them very
//! differently: not-found results accumulate toward auto-removal of the
//! tracked item, while transport problems and timeouts are retried on the
//! next tick without touching the failure counter.

use thiserror::Error;

/// Classified failure from the GitHub resource client.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The resource (repo, release endpoint, user) no longer exists.
    /// Counts toward the consecutive not-found threshold.
    #[error("resource not found")]
    NotFound,

    /// The credential was rejected by GitHub.
    #[error("authentication rejected")]
    Unauthorized,

    /// The request did not complete within the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// Network or protocol-level failure. Transient, never escalated.
    #[error("request failed: {0}")]
    Transport(String),
}

/// Failure to deliver a notification to a single destination.
///
/// Logged and skipped by the dispatcher; never escalates the item and never
/// unsubscribes the destination.
#[derive(Debug, Error)]
#[error("delivery failed: {0}")]
pub struct DeliveryError(pub String);
