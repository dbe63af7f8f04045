//! In-memory backend honouring idempotency keys, with failure injection.

use async_trait::async_trait;
use chrono::Utc;
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};
use tokio::sync::Notify;

use super::{BackendError, StampBackend, StampResponse};
use crate::{
    card::{CardId, CardStatus, LoyaltyCard},
    stamp::StampApplicationRequest,
    token::{CUSTOMER_QR, ProofOfPresenceToken},
};

#[derive(Default)]
struct FakeState {
    cards: HashMap<CardId, LoyaltyCard>,
    by_key: HashMap<String, StampResponse>,
    redeemed_nonces: HashSet<String>,
    requests: Vec<StampApplicationRequest>,
    issued: u64,
    fail_before_apply: u32,
    lose_responses: u32,
}

#[derive(Default)]
pub(crate) struct FakeBackend {
    state: Mutex<FakeState>,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeBackend {
    pub(crate) fn with_cards(cards: Vec<LoyaltyCard>) -> Self {
        let backend = Self::default();
        backend.state.lock().unwrap().cards = cards.into_iter().map(|c| (c.card_id, c)).collect();
        backend
    }

    /// Park every stamp request until the returned handle is notified.
    pub(crate) fn hold_responses(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Fail before the stamp is applied, like a refused connection.
    pub(crate) fn fail_next_before_apply(&self, n: u32) {
        self.state.lock().unwrap().fail_before_apply = n;
    }

    /// Apply the stamp, then lose the answer on the way back.
    pub(crate) fn lose_next_responses(&self, n: u32) {
        self.state.lock().unwrap().lose_responses = n;
    }

    pub(crate) fn requests(&self) -> Vec<StampApplicationRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub(crate) fn card(&self, card_id: CardId) -> Option<LoyaltyCard> {
        self.state.lock().unwrap().cards.get(&card_id).cloned()
    }
}

#[async_trait]
impl StampBackend for FakeBackend {
    async fn customer_cards(&self, _customer_id: i64) -> Result<Vec<LoyaltyCard>, BackendError> {
        let mut cards: Vec<_> = self.state.lock().unwrap().cards.values().cloned().collect();
        cards.sort_by_key(|c| c.card_id);
        Ok(cards)
    }

    async fn card_token(&self, card_id: CardId) -> Result<ProofOfPresenceToken, BackendError> {
        let mut state = self.state.lock().unwrap();
        if !state.cards.contains_key(&card_id) {
            return Err(BackendError::Rejected {
                status: 404,
                reason: "Card not found".to_string(),
            });
        }
        state.issued += 1;
        Ok(ProofOfPresenceToken {
            kind: CUSTOMER_QR.to_string(),
            card_ref: card_id,
            nonce: format!("nonce-{}", state.issued),
            exp: Utc::now().timestamp() + 300,
            sig: "00".repeat(8),
        })
    }

    async fn apply_stamp(
        &self,
        request: &StampApplicationRequest,
    ) -> Result<StampResponse, BackendError> {
        {
            let mut state = self.state.lock().unwrap();
            state.requests.push(request.clone());
            if state.fail_before_apply > 0 {
                state.fail_before_apply -= 1;
                return Err(BackendError::Transport("connection refused".to_string()));
            }
        }

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let mut state = self.state.lock().unwrap();
        let key = request.idempotency_key.to_string();

        let response = match state.by_key.get(&key).cloned() {
            Some(previous) => previous,
            None => {
                if request.payload.exp <= Utc::now().timestamp() {
                    return Err(BackendError::Rejected {
                        status: 400,
                        reason: "Token expired".to_string(),
                    });
                }
                if state.redeemed_nonces.contains(&request.payload.nonce) {
                    return Err(BackendError::Rejected {
                        status: 409,
                        reason: "Token already used".to_string(),
                    });
                }
                let card = state
                    .cards
                    .get_mut(&request.payload.card_id)
                    .ok_or_else(|| BackendError::Rejected {
                        status: 404,
                        reason: "Card not found".to_string(),
                    })?;

                let before = card.stamps_count;
                card.stamps_count = (before + 1).min(card.stamps_needed);
                card.has_reward = card.stamps_count == card.stamps_needed;
                let response = StampResponse {
                    ok: true,
                    card_id: card.card_id,
                    stamps: card.stamps_count,
                    needed: card.stamps_needed,
                    reward_issued: before < card.stamps_needed && card.has_reward,
                };

                state.redeemed_nonces.insert(request.payload.nonce.clone());
                state.by_key.insert(key, response.clone());
                response
            }
        };

        if state.lose_responses > 0 {
            state.lose_responses -= 1;
            return Err(BackendError::Transport("connection reset".to_string()));
        }
        Ok(response)
    }

    async fn redeem_card(&self, card_id: CardId) -> Result<LoyaltyCard, BackendError> {
        let mut state = self.state.lock().unwrap();
        let card = state.cards.get_mut(&card_id).ok_or_else(|| BackendError::Rejected {
            status: 404,
            reason: "Card not found".to_string(),
        })?;
        if !card.has_reward || card.status == CardStatus::Redeemed {
            return Err(BackendError::Rejected {
                status: 409,
                reason: "No reward available".to_string(),
            });
        }
        card.status = CardStatus::Redeemed;
        card.has_reward = false;
        Ok(card.clone())
    }
}
