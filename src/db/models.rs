use serde::{Deserialize, Serialize};

use crate::{
    backend::StampResponse,
    card::{CardId, CardStatus, LoyaltyCard},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Card {
    pub card_id: i64,
    pub customer_id: i64,
    pub program_id: i64,
    pub program_name: String,
    pub merchant_name: String,
    pub reward_name: String,
    pub stamps_count: i64,
    pub stamps_needed: i64,
    pub status: String,
    pub created_at: Option<String>,
}

impl Card {
    pub fn status(&self) -> CardStatus {
        CardStatus::parse(&self.status).unwrap_or(CardStatus::Inactive)
    }

    pub fn has_reward(&self) -> bool {
        self.stamps_count == self.stamps_needed && self.status() != CardStatus::Redeemed
    }

    pub fn into_loyalty_card(self) -> LoyaltyCard {
        LoyaltyCard {
            card_id: CardId(self.card_id),
            program_id: self.program_id,
            has_reward: self.has_reward(),
            status: self.status(),
            stamps_count: to_u32(self.stamps_count),
            stamps_needed: to_u32(self.stamps_needed),
            program_name: self.program_name,
            merchant_name: self.merchant_name,
            reward_name: self.reward_name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CardToken {
    pub nonce: String,
    pub card_id: i64,
    pub exp: i64,
    pub redeemed: bool,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct StampRecord {
    pub idempotency_key: String,
    pub card_id: i64,
    pub nonce: String,
    pub stamps: i64,
    pub needed: i64,
    pub reward_issued: bool,
    pub created_at: Option<String>,
}

impl StampRecord {
    pub fn to_response(&self) -> StampResponse {
        StampResponse {
            ok: true,
            card_id: CardId(self.card_id),
            stamps: to_u32(self.stamps),
            needed: to_u32(self.needed),
            reward_issued: self.reward_issued,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollRequest {
    pub customer_id: i64,
    pub program_id: i64,
    pub program_name: String,
    pub merchant_name: String,
    pub reward_name: String,
    pub stamps_needed: u32,
}

fn to_u32(value: i64) -> u32 {
    u32::try_from(value).unwrap_or_default()
}
