use thiserror::Error;

/// Failures of the stamp issuance/redemption protocol as seen by a client.
///
/// None of these are retried automatically. `NetworkError` is the only one a
/// caller may retry, and only as an explicit operator action that reuses the
/// same token (and therefore the same idempotency key).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StampError {
    #[error("invalid code: {0}")]
    MalformedToken(String),

    #[error("code expired, ask the customer for a fresh one")]
    Expired,

    #[error("could not reach the stamp service: {0}")]
    NetworkError(String),

    #[error("stamp refused: {0}")]
    RejectedByBackend(String),

    #[error("a stamp submission is already in progress")]
    SubmissionInProgress,
}

impl StampError {
    /// Stable tag for logs and machine consumers.
    pub fn kind(&self) -> &'static str {
        match self {
            StampError::MalformedToken(_) => "malformed_token",
            StampError::Expired => "expired",
            StampError::NetworkError(_) => "network_error",
            StampError::RejectedByBackend(_) => "rejected_by_backend",
            StampError::SubmissionInProgress => "submission_in_progress",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, StampError::NetworkError(_))
    }
}
