use anyhow::Result;
use sqlx::{Pool, Sqlite};

use crate::db::models::{Card, CardToken, EnrollRequest, StampRecord};

pub async fn insert_card(pool: &Pool<Sqlite>, req: &EnrollRequest) -> Result<i64> {
    let result = sqlx::query(
        "INSERT INTO cards (customer_id, program_id, program_name, merchant_name,
         reward_name, stamps_needed)
         VALUES (?, ?, ?, ?, ?, ?)"
    )
    .bind(req.customer_id)
    .bind(req.program_id)
    .bind(&req.program_name)
    .bind(&req.merchant_name)
    .bind(&req.reward_name)
    .bind(i64::from(req.stamps_needed))
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

pub async fn get_card(pool: &Pool<Sqlite>, card_id: i64) -> Result<Option<Card>> {
    let card = sqlx::query_as::<_, Card>(
        "SELECT * FROM cards WHERE card_id = ?"
    )
    .bind(card_id)
    .fetch_optional(pool)
    .await?;

    Ok(card)
}

pub async fn get_cards_by_customer(pool: &Pool<Sqlite>, customer_id: i64) -> Result<Vec<Card>> {
    let cards = sqlx::query_as::<_, Card>(
        "SELECT * FROM cards WHERE customer_id = ? ORDER BY card_id"
    )
    .bind(customer_id)
    .fetch_all(pool)
    .await?;

    Ok(cards)
}

pub async fn insert_token(pool: &Pool<Sqlite>, nonce: &str, card_id: i64, exp: i64) -> Result<()> {
    sqlx::query(
        "INSERT INTO card_tokens (nonce, card_id, exp) VALUES (?, ?, ?)"
    )
    .bind(nonce)
    .bind(card_id)
    .bind(exp)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_token(pool: &Pool<Sqlite>, nonce: &str) -> Result<Option<CardToken>> {
    let token = sqlx::query_as::<_, CardToken>(
        "SELECT * FROM card_tokens WHERE nonce = ?"
    )
    .bind(nonce)
    .fetch_optional(pool)
    .await?;

    Ok(token)
}

pub async fn get_stamp_request(pool: &Pool<Sqlite>, idempotency_key: &str) -> Result<Option<StampRecord>> {
    let record = sqlx::query_as::<_, StampRecord>(
        "SELECT * FROM stamp_requests WHERE idempotency_key = ?"
    )
    .bind(idempotency_key)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

/// Consume the token, add one stamp and remember the outcome under the
/// idempotency key, all or nothing. `None` if the token was consumed or the
/// card changed state in the meantime.
pub async fn apply_stamp(
    pool: &Pool<Sqlite>,
    idempotency_key: &str,
    card_id: i64,
    nonce: &str,
) -> Result<Option<StampRecord>> {
    let mut tx = pool.begin().await?;

    let consumed = sqlx::query(
        "UPDATE card_tokens SET redeemed = 1 WHERE nonce = ? AND card_id = ? AND redeemed = 0"
    )
    .bind(nonce)
    .bind(card_id)
    .execute(&mut *tx)
    .await?;

    if consumed.rows_affected() == 0 {
        return Ok(None);
    }

    let stamped = sqlx::query(
        "UPDATE cards SET stamps_count = stamps_count + 1
         WHERE card_id = ? AND status = 'ACTIVE' AND stamps_count < stamps_needed"
    )
    .bind(card_id)
    .execute(&mut *tx)
    .await?;

    if stamped.rows_affected() == 0 {
        return Ok(None);
    }

    let (stamps, needed): (i64, i64) = sqlx::query_as(
        "SELECT stamps_count, stamps_needed FROM cards WHERE card_id = ?"
    )
    .bind(card_id)
    .fetch_one(&mut *tx)
    .await?;

    // Only the stamp that fills the card issues the reward.
    let reward_issued = stamps == needed;

    sqlx::query(
        "INSERT INTO stamp_requests (idempotency_key, card_id, nonce, stamps, needed, reward_issued)
         VALUES (?, ?, ?, ?, ?, ?)"
    )
    .bind(idempotency_key)
    .bind(card_id)
    .bind(nonce)
    .bind(stamps)
    .bind(needed)
    .bind(reward_issued)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    get_stamp_request(pool, idempotency_key).await
}

pub async fn redeem_card(pool: &Pool<Sqlite>, card_id: i64) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE cards SET status = 'REDEEMED'
         WHERE card_id = ? AND status = 'ACTIVE' AND stamps_count = stamps_needed"
    )
    .bind(card_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}
