use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Backend identifier of a loyalty card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CardId(pub i64);

impl fmt::Display for CardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CardStatus {
    Active,
    Inactive,
    Redeemed,
}

impl CardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CardStatus::Active => "ACTIVE",
            CardStatus::Inactive => "INACTIVE",
            CardStatus::Redeemed => "REDEEMED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(CardStatus::Active),
            "INACTIVE" => Some(CardStatus::Inactive),
            "REDEEMED" => Some(CardStatus::Redeemed),
            _ => None,
        }
    }
}

/// One customer's enrollment in one merchant program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoyaltyCard {
    pub card_id: CardId,
    pub program_id: i64,
    pub program_name: String,
    pub merchant_name: String,
    pub reward_name: String,
    pub stamps_count: u32,
    pub stamps_needed: u32,
    pub status: CardStatus,
    pub has_reward: bool,
}

impl LoyaltyCard {
    pub fn progress_percent(&self) -> f64 {
        progress_percent(self.stamps_count, self.stamps_needed)
    }
}

/// Backend's authoritative answer to one stamp application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StampApplicationResult {
    pub card_id: CardId,
    pub stamps_count: u32,
    pub stamps_needed: u32,
    pub reward_issued: bool,
    pub applied_at: DateTime<Utc>,
}

/// Displayed progress toward the reward, clamped to `[0, 100]`.
pub fn progress_percent(stamps_count: u32, stamps_needed: u32) -> f64 {
    if stamps_needed == 0 {
        return 0.0;
    }
    let pct = f64::from(stamps_count) / f64::from(stamps_needed) * 100.0;
    pct.clamp(0.0, 100.0)
}

/// Outcome of projecting a result onto the held card
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    Applied { reward_available: bool },
    /// Result was older than what is already held
    Stale,
    /// Result belongs to a different card
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RedeemError {
    #[error("card has no reward available")]
    NoReward,
    #[error("card is already redeemed")]
    AlreadyRedeemed,
}

/// Local view of a card's lifecycle. Mutated only through stamp results and
/// the redemption transition.
#[derive(Debug, Clone)]
pub struct CardProjection {
    card: LoyaltyCard,
}

impl CardProjection {
    pub fn new(mut card: LoyaltyCard) -> Self {
        card.stamps_count = card.stamps_count.min(card.stamps_needed);
        card.has_reward = reward_available(&card);
        Self { card }
    }

    pub fn card(&self) -> &LoyaltyCard {
        &self.card
    }

    pub fn apply(&mut self, result: &StampApplicationResult) -> Projection {
        if result.card_id != self.card.card_id {
            return Projection::Ignored;
        }
        // Counts only move forward; late or reordered results are dropped.
        if result.stamps_count < self.card.stamps_count {
            tracing::debug!(
                card_id = %self.card.card_id,
                held = self.card.stamps_count,
                received = result.stamps_count,
                "Dropping stale stamp result"
            );
            return Projection::Stale;
        }

        self.card.stamps_count = result.stamps_count.min(self.card.stamps_needed);
        self.card.has_reward = reward_available(&self.card);

        Projection::Applied {
            reward_available: self.card.has_reward,
        }
    }

    /// ACTIVE/INACTIVE with a reward available -> REDEEMED (terminal).
    pub fn mark_redeemed(&mut self) -> Result<(), RedeemError> {
        if self.card.status == CardStatus::Redeemed {
            return Err(RedeemError::AlreadyRedeemed);
        }
        if !self.card.has_reward {
            return Err(RedeemError::NoReward);
        }
        self.card.status = CardStatus::Redeemed;
        self.card.has_reward = false;
        Ok(())
    }
}

fn reward_available(card: &LoyaltyCard) -> bool {
    card.stamps_count == card.stamps_needed && card.status != CardStatus::Redeemed
}
