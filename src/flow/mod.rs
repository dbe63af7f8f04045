use std::{collections::HashMap, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::sync::watch;

use crate::{
    backend::{BackendError, StampBackend},
    card::{CardId, CardProjection, LoyaltyCard, Projection, StampApplicationResult},
    error::StampError,
    history::{Confirmation, HistoryEntry, HistoryLedger},
    scan::ScanGuard,
    session::{Clock, SessionState, SessionTimer},
    stamp::StampSubmitter,
    token::ProofOfPresenceToken,
};

#[derive(Debug, Error)]
pub enum CustomerError {
    #[error("no loyalty card found")]
    NoCard,
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// A token on display together with its countdown
pub struct ShownToken {
    pub transport: String,
    pub state: watch::Receiver<SessionState>,
}

/// Customer-side device state: the current card and at most one live token.
pub struct CustomerSession {
    backend: Arc<dyn StampBackend>,
    customer_id: i64,
    card: Option<CardProjection>,
    timer: SessionTimer,
}

impl CustomerSession {
    pub fn new(backend: Arc<dyn StampBackend>, clock: Arc<dyn Clock>, customer_id: i64) -> Self {
        Self {
            backend,
            customer_id,
            card: None,
            timer: SessionTimer::new(clock),
        }
    }

    /// Fetch the customer's cards and keep the first one.
    pub async fn load_card(&mut self) -> Result<&LoyaltyCard, CustomerError> {
        let cards = self.backend.customer_cards(self.customer_id).await?;
        let card = cards.into_iter().next().ok_or(CustomerError::NoCard)?;
        Ok(self.card.insert(CardProjection::new(card)).card())
    }

    pub fn card(&self) -> Option<&LoyaltyCard> {
        self.card.as_ref().map(|p| p.card())
    }

    /// Request a fresh token for the current card. Any token already shown is
    /// discarded first, even if the request then fails.
    pub async fn show_token(&mut self) -> Result<ShownToken, CustomerError> {
        self.timer.stop();
        let card_id = self.card().ok_or(CustomerError::NoCard)?.card_id;

        let token = self.backend.card_token(card_id).await?;
        let transport = token.encode();
        let state = self.timer.start(token);

        Ok(ShownToken { transport, state })
    }

    pub fn close_token(&mut self) -> bool {
        self.timer.stop()
    }

    pub fn token(&self) -> Option<&ProofOfPresenceToken> {
        self.timer.token()
    }

    pub fn token_state(&self) -> Option<SessionState> {
        self.timer.state()
    }

    /// Fold a stamp result for this customer's card into the local view.
    pub fn apply_result(&mut self, result: &StampApplicationResult) -> Option<Projection> {
        self.card.as_mut().map(|p| p.apply(result))
    }
}

/// What the operator sees after one processed scan
#[derive(Debug, Clone)]
pub struct StampReceipt {
    pub result: StampApplicationResult,
    pub entry: HistoryEntry,
    /// `None` when the card is not tracked on this device
    pub projection: Option<Projection>,
}

/// Merchant-side device state. All mutation goes through these methods.
pub struct MerchantSession {
    backend: Arc<dyn StampBackend>,
    guard: ScanGuard,
    submitter: StampSubmitter,
    cards: HashMap<CardId, CardProjection>,
    ledger: HistoryLedger,
    last_result: Option<StampApplicationResult>,
    retryable: Option<ProofOfPresenceToken>,
}

impl MerchantSession {
    pub fn new(backend: Arc<dyn StampBackend>, clock: Arc<dyn Clock>, timeout: Duration) -> Self {
        Self {
            submitter: StampSubmitter::new(backend.clone(), clock, timeout),
            backend,
            guard: ScanGuard::new(),
            cards: HashMap::new(),
            ledger: HistoryLedger::new(),
            last_result: None,
            retryable: None,
        }
    }

    pub fn start_scanning(&mut self) {
        self.guard.arm();
    }

    pub fn stop_scanning(&mut self) {
        self.guard.disarm();
    }

    pub fn is_scanning(&self) -> bool {
        self.guard.is_armed()
    }

    pub fn track_card(&mut self, card: LoyaltyCard) {
        self.cards.insert(card.card_id, CardProjection::new(card));
    }

    pub fn card(&self, card_id: CardId) -> Option<&LoyaltyCard> {
        self.cards.get(&card_id).map(|p| p.card())
    }

    pub fn history(&self) -> &HistoryLedger {
        &self.ledger
    }

    pub fn clear_history(&mut self, confirmation: Confirmation) -> usize {
        self.ledger.clear(confirmation)
    }

    pub fn last_result(&self) -> Option<&StampApplicationResult> {
        self.last_result.as_ref()
    }

    pub fn can_retry(&self) -> bool {
        self.retryable.is_some()
    }

    /// Handle one recognition event from the capture channel. `None` means
    /// the event was swallowed by the scan guard.
    pub async fn on_code_recognized(&mut self, raw: &str) -> Option<Result<StampReceipt, StampError>> {
        let code = self.guard.on_recognized(raw)?;
        let outcome = match ProofOfPresenceToken::decode(&code) {
            Ok(token) => self.submit(token, false).await,
            Err(e) => {
                tracing::warn!(error = %e, "Scanned code rejected");
                Err(e)
            }
        };
        Some(outcome)
    }

    /// Resubmit the last attempt that failed on the network. Same token, so
    /// same idempotency key, and no local expiry check since the backend may
    /// already hold its outcome. `None` if there is nothing to retry.
    pub async fn retry_last(&mut self) -> Option<Result<StampReceipt, StampError>> {
        let token = self.retryable.take()?;
        tracing::info!(card_id = %token.card_ref, "Operator retrying stamp");
        Some(self.submit(token, true).await)
    }

    async fn submit(
        &mut self,
        token: ProofOfPresenceToken,
        retry: bool,
    ) -> Result<StampReceipt, StampError> {
        let outcome = if retry {
            self.submitter.resubmit(&token).await
        } else {
            self.submitter.submit(&token).await
        };

        // The pending retry belongs to one token; other scans leave it alone.
        let same_attempt = self
            .retryable
            .as_ref()
            .is_some_and(|pending| pending.card_ref == token.card_ref && pending.nonce == token.nonce);

        match outcome {
            Ok(result) => {
                if same_attempt {
                    self.retryable = None;
                }
                Ok(self.complete(result))
            }
            Err(e) => {
                if e.is_retryable() {
                    self.retryable = Some(token);
                } else if same_attempt {
                    self.retryable = None;
                }
                Err(e)
            }
        }
    }

    fn complete(&mut self, result: StampApplicationResult) -> StampReceipt {
        let projection = self.cards.get_mut(&result.card_id).map(|p| p.apply(&result));
        let entry = self.ledger.record(&result);
        self.last_result = Some(result.clone());

        StampReceipt {
            result,
            entry,
            projection,
        }
    }

    /// Hand out the reward of a full card.
    pub async fn redeem(&mut self, card_id: CardId) -> Result<LoyaltyCard, BackendError> {
        let card = self.backend.redeem_card(card_id).await?;
        tracing::info!(card_id = %card_id, "Reward redeemed");

        if let Some(projection) = self.cards.get_mut(&card_id) {
            if let Err(e) = projection.mark_redeemed() {
                tracing::warn!(card_id = %card_id, error = %e, "Local card out of date, replacing");
                *projection = CardProjection::new(card.clone());
            }
        }
        Ok(card)
    }
}
