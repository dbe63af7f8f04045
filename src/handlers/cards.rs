use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;

use crate::{
    app_state::AppState,
    backend::CustomerCardsResponse,
    card::{CardId, CardStatus, LoyaltyCard},
    crypto::new_nonce,
    db::{models::EnrollRequest, queries},
    handlers::{HandlerResult, database_error, error_response},
    token::{CUSTOMER_QR, ProofOfPresenceToken},
};

/// POST /api/cards
/// Enrolls a customer in a program with an empty card
pub async fn enroll(
    State(state): State<AppState>,
    Json(req): Json<EnrollRequest>,
) -> HandlerResult<LoyaltyCard> {
    if req.stamps_needed == 0 {
        return Err(error_response(StatusCode::BAD_REQUEST, "stampsNeeded must be positive"));
    }

    let card_id = queries::insert_card(&state.pool, &req)
        .await
        .map_err(database_error)?;

    let card = queries::get_card(&state.pool, card_id)
        .await
        .map_err(database_error)?
        .ok_or_else(|| error_response(StatusCode::INTERNAL_SERVER_ERROR, "Card vanished"))?;

    tracing::info!(card_id, customer_id = req.customer_id, "Card enrolled");

    Ok(Json(card.into_loyalty_card()))
}

/// GET /api/cards/customer/{customer_id}
pub async fn customer_cards(
    Path(customer_id): Path<i64>,
    State(state): State<AppState>,
) -> HandlerResult<CustomerCardsResponse> {
    let cards = queries::get_cards_by_customer(&state.pool, customer_id)
        .await
        .map_err(database_error)?;

    Ok(Json(CustomerCardsResponse {
        cards: cards.into_iter().map(|c| c.into_loyalty_card()).collect(),
    }))
}

/// GET /api/cards/{card_id}/qr
/// Issues a fresh signed proof-of-presence token
pub async fn card_qr(
    Path(card_id): Path<i64>,
    State(state): State<AppState>,
) -> HandlerResult<ProofOfPresenceToken> {
    let card = queries::get_card(&state.pool, card_id)
        .await
        .map_err(database_error)?
        .ok_or_else(|| error_response(StatusCode::NOT_FOUND, "Card not found"))?;

    if card.status() != CardStatus::Active {
        return Err(error_response(StatusCode::BAD_REQUEST, "Card is not active"));
    }

    let ttl = i64::try_from(state.token_ttl.as_secs()).unwrap_or(i64::MAX);
    let mut token = ProofOfPresenceToken {
        kind: CUSTOMER_QR.to_string(),
        card_ref: CardId(card.card_id),
        nonce: new_nonce(),
        exp: Utc::now().timestamp().saturating_add(ttl),
        sig: String::new(),
    };
    token.sig = state
        .signer
        .sign_token(&token)
        .map_err(|_| error_response(StatusCode::INTERNAL_SERVER_ERROR, "Signing failed"))?;

    queries::insert_token(&state.pool, &token.nonce, card.card_id, token.exp)
        .await
        .map_err(database_error)?;

    tracing::debug!(card_id, exp = token.exp, "Token issued");

    Ok(Json(token))
}

/// POST /api/cards/{card_id}/redeem
/// Hands out the reward of a full card; the card becomes REDEEMED for good
pub async fn redeem(
    Path(card_id): Path<i64>,
    State(state): State<AppState>,
) -> HandlerResult<LoyaltyCard> {
    let card = queries::get_card(&state.pool, card_id)
        .await
        .map_err(database_error)?
        .ok_or_else(|| error_response(StatusCode::NOT_FOUND, "Card not found"))?;

    if card.status() == CardStatus::Redeemed {
        return Err(error_response(StatusCode::CONFLICT, "Card already redeemed"));
    }
    if !card.has_reward() {
        return Err(error_response(StatusCode::CONFLICT, "No reward available"));
    }

    let updated = queries::redeem_card(&state.pool, card_id)
        .await
        .map_err(database_error)?;

    if !updated {
        return Err(error_response(StatusCode::CONFLICT, "Card cannot be redeemed"));
    }

    let card = queries::get_card(&state.pool, card_id)
        .await
        .map_err(database_error)?
        .ok_or_else(|| error_response(StatusCode::NOT_FOUND, "Card not found"))?;

    tracing::info!(card_id, "Reward redeemed");

    Ok(Json(card.into_loyalty_card()))
}
