use anyhow::Result;

use crate::{
    card::CardStatus,
    crypto::{AesKey, cmac_tag, verify_cmac},
    db::models::{Card, CardToken},
    token::ProofOfPresenceToken,
};

/// Result of stamp validation
#[derive(Debug, PartialEq)]
pub enum ValidationResult {
    Success {
        card: Card,
    },
    Error(String),
    /// Could not decide; the client may retry with the same key
    Unavailable(String),
}

/// Trait for database operations needed for validation
#[async_trait::async_trait]
pub trait StampRepository {
    async fn get_card(&self, card_id: i64) -> Result<Option<Card>>;
    async fn get_issued_token(&self, nonce: &str) -> Result<Option<CardToken>>;
}

/// Trait for token authentication
pub trait TokenSigner {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>>;
    fn verify(&self, message: &[u8], tag: &[u8]) -> Result<bool>;
}

/// AES-CMAC signer holding the server key
#[derive(Debug, Clone)]
pub struct CmacSigner {
    key: AesKey,
}

impl CmacSigner {
    pub fn new(key: AesKey) -> Self {
        Self { key }
    }

    /// Hex tag for a token's canonical message
    pub fn sign_token(&self, token: &ProofOfPresenceToken) -> Result<String> {
        Ok(hex::encode(self.sign(token.signing_message().as_bytes())?))
    }
}

impl TokenSigner for CmacSigner {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        Ok(cmac_tag(&self.key, message)?.to_vec())
    }

    fn verify(&self, message: &[u8], tag: &[u8]) -> Result<bool> {
        verify_cmac(&self.key, message, tag)
    }
}

/// Stamp validation service
pub struct StampValidator<S: TokenSigner> {
    signer: S,
}

impl<S: TokenSigner> StampValidator<S> {
    pub fn new(signer: S) -> Self {
        Self { signer }
    }

    /// Decide whether `token` may be redeemed for one stamp at `now` (unix seconds)
    pub async fn validate_stamp<R: StampRepository>(
        &self,
        repo: &R,
        token: &ProofOfPresenceToken,
        now: i64,
    ) -> ValidationResult {
        // Shape, signature and expiry
        if let Err(reason) = validate_token_pure(&self.signer, token, now) {
            return ValidationResult::Error(reason);
        }

        // Look up the issued token
        let issued = match repo.get_issued_token(&token.nonce).await {
            Ok(Some(issued)) => issued,
            Ok(None) => return ValidationResult::Error("Unknown token".to_string()),
            Err(_) => return ValidationResult::Unavailable("Database error".to_string()),
        };

        if issued.card_id != token.card_ref.0 || issued.exp != token.exp {
            return ValidationResult::Error("Token does not match issued token".to_string());
        }

        // Replay protection
        if issued.redeemed {
            return ValidationResult::Error("Token already used".to_string());
        }

        // Look up the card
        let card = match repo.get_card(issued.card_id).await {
            Ok(Some(card)) => card,
            Ok(None) => return ValidationResult::Error("Card not found".to_string()),
            Err(_) => return ValidationResult::Unavailable("Database error".to_string()),
        };

        match card.status() {
            CardStatus::Active => {}
            CardStatus::Inactive => return ValidationResult::Error("Card is not active".to_string()),
            CardStatus::Redeemed => return ValidationResult::Error("Card already redeemed".to_string()),
        }

        if card.stamps_count >= card.stamps_needed {
            return ValidationResult::Error("Reward pending redemption".to_string());
        }

        ValidationResult::Success { card }
    }
}

pub mod db_repository;
pub mod pure;

pub use pure::validate_token_pure;
