use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;

use crate::{
    app_state::AppState,
    backend::{IDEMPOTENCY_KEY_HEADER, StampRequestBody, StampResponse},
    db::{models::StampRecord, queries},
    handlers::{HandlerResult, database_error, error_response},
    token::ProofOfPresenceToken,
    validation::{StampValidator, ValidationResult, db_repository::DatabaseStampRepository},
};

const MAX_KEY_LEN: usize = 128;

/// POST /api/stamp
/// Redeems a scanned token for one stamp. Repeating a request with the same
/// Idempotency-Key returns the first outcome without applying anything.
pub async fn apply_stamp(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<StampRequestBody>,
) -> HandlerResult<StampResponse> {
    let key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty() && k.len() <= MAX_KEY_LEN)
        .ok_or_else(|| error_response(StatusCode::BAD_REQUEST, "Missing or invalid Idempotency-Key header"))?;

    if let Some(previous) = queries::get_stamp_request(&state.pool, key)
        .await
        .map_err(database_error)?
    {
        return replay(previous, &body);
    }

    let token = ProofOfPresenceToken {
        kind: body.kind.clone(),
        card_ref: body.payload.card_id,
        nonce: body.payload.nonce.clone(),
        exp: body.payload.exp,
        sig: body.payload.sig.clone(),
    };

    let repo = DatabaseStampRepository::new(state.pool.clone());
    let validator = StampValidator::new(state.signer.clone());

    match validator.validate_stamp(&repo, &token, Utc::now().timestamp()).await {
        ValidationResult::Success { .. } => {}
        ValidationResult::Error(reason) => {
            // A concurrent request with the same key may have consumed the token first.
            if let Some(previous) = queries::get_stamp_request(&state.pool, key)
                .await
                .map_err(database_error)?
            {
                return replay(previous, &body);
            }
            tracing::warn!(card_id = %token.card_ref, reason = %reason, "Stamp rejected");
            return Err(error_response(StatusCode::BAD_REQUEST, &reason));
        }
        ValidationResult::Unavailable(reason) => {
            return Err(error_response(StatusCode::INTERNAL_SERVER_ERROR, &reason));
        }
    }

    let applied = queries::apply_stamp(&state.pool, key, token.card_ref.0, &token.nonce)
        .await
        .map_err(database_error)?;

    match applied {
        Some(record) => {
            tracing::info!(
                card_id = record.card_id,
                stamps = record.stamps,
                needed = record.needed,
                reward_issued = record.reward_issued,
                "Stamp applied"
            );
            Ok(Json(record.to_response()))
        }
        None => {
            // A concurrent request with the same key may have won the race.
            match queries::get_stamp_request(&state.pool, key)
                .await
                .map_err(database_error)?
            {
                Some(previous) => replay(previous, &body),
                None => Err(error_response(StatusCode::BAD_REQUEST, "Token already used")),
            }
        }
    }
}

fn replay(
    previous: StampRecord,
    body: &StampRequestBody,
) -> HandlerResult<StampResponse> {
    if previous.nonce != body.payload.nonce || previous.card_id != body.payload.card_id.0 {
        return Err(error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            "Idempotency-Key already used for another token",
        ));
    }
    tracing::debug!(idempotency_key = %previous.idempotency_key, "Replaying stored stamp outcome");
    Ok(Json(previous.to_response()))
}
