use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{card::CardId, error::StampError};

/// Token kind displayed by the customer app and accepted by `/stamp`.
pub const CUSTOMER_QR: &str = "CUSTOMER_QR";

/// Proof-of-presence token as issued by the backend and carried over the QR channel.
///
/// Field names on the wire follow the backend (`idRef` is the card reference).
/// The signature is opaque here: it is produced and verified server side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProofOfPresenceToken {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "idRef")]
    pub card_ref: CardId,
    pub nonce: String,
    /// Absolute expiry, unix seconds
    pub exp: i64,
    pub sig: String,
}

impl ProofOfPresenceToken {
    /// Canonical transport string: compact JSON with keys in sorted order.
    pub fn encode(&self) -> String {
        serde_json::json!({
            "type": self.kind,
            "idRef": self.card_ref,
            "nonce": self.nonce,
            "exp": self.exp,
            "sig": self.sig,
        })
        .to_string()
    }

    /// Parse a scanned payload. Only the shape is judged here; expiry and
    /// signature are checked later.
    pub fn decode(transport: &str) -> Result<Self, StampError> {
        let token: Self = serde_json::from_str(transport.trim())
            .map_err(|e| StampError::MalformedToken(format!("unreadable payload: {}", e)))?;

        if token.kind.is_empty() {
            return Err(StampError::MalformedToken("empty token type".to_string()));
        }
        if token.nonce.is_empty() {
            return Err(StampError::MalformedToken("empty nonce".to_string()));
        }
        if token.sig.is_empty() {
            return Err(StampError::MalformedToken("empty signature".to_string()));
        }

        Ok(token)
    }

    /// Local admission check before anything goes on the network.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), StampError> {
        if self.kind != CUSTOMER_QR {
            return Err(StampError::MalformedToken(format!(
                "unsupported token type {}",
                self.kind
            )));
        }
        if self.is_expired(now) {
            return Err(StampError::Expired);
        }
        Ok(())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.exp
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }

    /// Bytes covered by `sig`.
    pub fn signing_message(&self) -> String {
        format!("{}|{}|{}|{}", self.kind, self.card_ref, self.nonce, self.exp)
    }
}

impl fmt::Display for ProofOfPresenceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} card={} nonce={}", self.kind, self.card_ref, self.nonce)
    }
}
