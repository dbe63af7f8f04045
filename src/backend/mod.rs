use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    card::{CardId, LoyaltyCard},
    stamp::StampApplicationRequest,
    token::ProofOfPresenceToken,
};

#[cfg(test)]
pub(crate) mod fake;
pub mod http;

pub use http::HttpBackend;

/// Header carrying the client's idempotency key on `POST /stamp`
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerCardsResponse {
    pub cards: Vec<LoyaltyCard>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StampPayload {
    pub card_id: CardId,
    pub nonce: String,
    pub exp: i64,
    pub sig: String,
}

impl From<&ProofOfPresenceToken> for StampPayload {
    fn from(token: &ProofOfPresenceToken) -> Self {
        Self {
            card_id: token.card_ref,
            nonce: token.nonce.clone(),
            exp: token.exp,
            sig: token.sig.clone(),
        }
    }
}

/// Body of `POST /stamp`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StampRequestBody {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: StampPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StampResponse {
    pub ok: bool,
    pub card_id: CardId,
    pub stamps: u32,
    pub needed: u32,
    pub reward_issued: bool,
}

/// Error body returned by the backend on any non-2xx answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub status: String,
    pub reason: String,
}

impl ErrorBody {
    pub fn new(reason: &str) -> Self {
        Self {
            status: "ERROR".to_string(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Request did not complete: connection failure, timeout, unreadable answer
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("backend error {status}: {reason}")]
    Server { status: u16, reason: String },

    #[error("rejected ({status}): {reason}")]
    Rejected { status: u16, reason: String },
}

/// The loyalty backend as seen from a device.
#[async_trait]
pub trait StampBackend: Send + Sync {
    async fn customer_cards(&self, customer_id: i64) -> Result<Vec<LoyaltyCard>, BackendError>;

    /// Ask for a fresh proof-of-presence token for a card
    async fn card_token(&self, card_id: CardId) -> Result<ProofOfPresenceToken, BackendError>;

    /// Submit one stamp application. Must be safe to repeat with the same key.
    async fn apply_stamp(
        &self,
        request: &StampApplicationRequest,
    ) -> Result<StampResponse, BackendError>;

    async fn redeem_card(&self, card_id: CardId) -> Result<LoyaltyCard, BackendError>;
}
