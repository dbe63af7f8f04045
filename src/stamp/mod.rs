use sha2::{Digest, Sha256};
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use crate::{
    backend::{BackendError, StampBackend, StampPayload},
    card::StampApplicationResult,
    error::StampError,
    session::Clock,
    token::ProofOfPresenceToken,
};

/// Identifies one logical redemption attempt across network retries.
///
/// Derived from the token itself, so resubmitting the same scan always carries
/// the same key and the backend can no-op the duplicate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn for_token(token: &ProofOfPresenceToken) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"carimbai-stamp:");
        hasher.update(token.card_ref.to_string().as_bytes());
        hasher.update(b":");
        hasher.update(token.nonce.as_bytes());
        let digest = hasher.finalize();

        Self(format!("{}-{}", token.card_ref, hex::encode(&digest[..16])))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StampApplicationRequest {
    pub payload: StampPayload,
    pub idempotency_key: IdempotencyKey,
}

impl StampApplicationRequest {
    pub fn for_token(token: &ProofOfPresenceToken) -> Self {
        Self {
            payload: StampPayload::from(token),
            idempotency_key: IdempotencyKey::for_token(token),
        }
    }
}

impl From<BackendError> for StampError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::Transport(reason) => StampError::NetworkError(reason),
            BackendError::Server { status, reason } => {
                StampError::NetworkError(format!("backend error {}: {}", status, reason))
            }
            BackendError::Rejected { reason, .. } => StampError::RejectedByBackend(reason),
        }
    }
}

/// Held for the lifetime of one submission; releases the slot on every exit
/// path, including cancellation of the submitting future.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Turns one guarded scan into exactly one outstanding stamp request.
pub struct StampSubmitter {
    backend: Arc<dyn StampBackend>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
    in_flight: AtomicBool,
}

impl StampSubmitter {
    pub fn new(backend: Arc<dyn StampBackend>, clock: Arc<dyn Clock>, timeout: Duration) -> Self {
        Self {
            backend,
            clock,
            timeout,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Submit one stamp application for `token`. Never retries on its own.
    pub async fn submit(
        &self,
        token: &ProofOfPresenceToken,
    ) -> Result<StampApplicationResult, StampError> {
        let _in_flight = InFlight::acquire(&self.in_flight).ok_or(StampError::SubmissionInProgress)?;

        token.validate(self.clock.now())?;
        self.send(token).await
    }

    /// Submit again a token whose previous attempt failed on the network.
    ///
    /// Expiry is not checked locally: that attempt may have been applied, and
    /// the backend answers a known idempotency key with the stored outcome even
    /// after the token expired.
    pub async fn resubmit(
        &self,
        token: &ProofOfPresenceToken,
    ) -> Result<StampApplicationResult, StampError> {
        let _in_flight = InFlight::acquire(&self.in_flight).ok_or(StampError::SubmissionInProgress)?;
        self.send(token).await
    }

    async fn send(&self, token: &ProofOfPresenceToken) -> Result<StampApplicationResult, StampError> {
        let request = StampApplicationRequest::for_token(token);
        tracing::info!(
            card_id = %token.card_ref,
            idempotency_key = %request.idempotency_key,
            "Submitting stamp"
        );

        let response = match tokio::time::timeout(self.timeout, self.backend.apply_stamp(&request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                tracing::warn!(card_id = %token.card_ref, error = %e, "Stamp submission failed");
                return Err(e.into());
            }
            Err(_) => {
                tracing::warn!(card_id = %token.card_ref, "Stamp submission timed out");
                return Err(StampError::NetworkError(format!(
                    "no answer within {}s",
                    self.timeout.as_secs()
                )));
            }
        };

        if !response.ok {
            return Err(StampError::RejectedByBackend(
                "backend did not confirm the stamp".to_string(),
            ));
        }
        if response.card_id != token.card_ref {
            return Err(StampError::RejectedByBackend(format!(
                "answer for card {} does not match scanned card {}",
                response.card_id, token.card_ref
            )));
        }

        tracing::info!(
            card_id = %response.card_id,
            stamps = response.stamps,
            needed = response.needed,
            reward_issued = response.reward_issued,
            "Stamp applied"
        );

        Ok(StampApplicationResult {
            card_id: response.card_id,
            stamps_count: response.stamps,
            stamps_needed: response.needed,
            reward_issued: response.reward_issued,
            applied_at: self.clock.now(),
        })
    }
}
