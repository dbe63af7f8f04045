use axum::{
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use crate::{app_state::AppState, backend::ErrorBody};

pub mod cards;
pub mod stamp;

pub type HandlerResult<T> = Result<Json<T>, (StatusCode, Json<ErrorBody>)>;

/// Backend API, mounted under `/api`
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/cards", post(cards::enroll))
        .route("/cards/customer/{customer_id}", get(cards::customer_cards))
        .route("/cards/{card_id}/qr", get(cards::card_qr))
        .route("/cards/{card_id}/redeem", post(cards::redeem))
        .route("/stamp", post(stamp::apply_stamp));

    Router::new().nest("/api", api).with_state(state)
}

pub fn error_response(status: StatusCode, reason: &str) -> (StatusCode, Json<ErrorBody>) {
    (status, Json(ErrorBody::new(reason)))
}

pub fn database_error(e: anyhow::Error) -> (StatusCode, Json<ErrorBody>) {
    tracing::error!(error = %e, "Database error");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "Database error")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::{BackendError, HttpBackend, StampBackend, StampRequestBody, StampPayload},
        card::{CardId, CardStatus, LoyaltyCard, Projection},
        crypto::AesKey,
        db::{init_pool, models::EnrollRequest},
        error::StampError,
        flow::{CustomerError, CustomerSession, MerchantSession},
        session::SystemClock,
        stamp::StampApplicationRequest,
        token::{CUSTOMER_QR, ProofOfPresenceToken},
        validation::CmacSigner,
    };
    use sqlx::{Pool, Sqlite};
    use std::{sync::Arc, time::Duration};

    struct TestServer {
        api: String,
        pool: Pool<Sqlite>,
        backend: Arc<HttpBackend>,
    }

    async fn spawn_server(token_ttl: Duration) -> TestServer {
        let pool = init_pool("sqlite::memory:").await.unwrap();
        let state = AppState {
            pool: pool.clone(),
            signer: CmacSigner::new(AesKey::generate()),
            token_ttl,
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });

        let api = format!("http://{}/api", addr);
        let backend = Arc::new(HttpBackend::new(&api, Duration::from_secs(5)).unwrap());
        TestServer { api, pool, backend }
    }

    async fn enroll(server: &TestServer, customer_id: i64, stamps_needed: u32) -> LoyaltyCard {
        let req = EnrollRequest {
            customer_id,
            program_id: 1,
            program_name: "Café Fidelidade".to_string(),
            merchant_name: "Padaria Central".to_string(),
            reward_name: "Free coffee".to_string(),
            stamps_needed,
        };
        reqwest::Client::new()
            .post(format!("{}/cards", server.api))
            .json(&req)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    async fn set_stamps(server: &TestServer, card_id: CardId, stamps: i64) {
        sqlx::query("UPDATE cards SET stamps_count = ? WHERE card_id = ?")
            .bind(stamps)
            .bind(card_id.0)
            .execute(&server.pool)
            .await
            .unwrap();
    }

    async fn post_stamp(
        server: &TestServer,
        token: &ProofOfPresenceToken,
        key: Option<&str>,
    ) -> (u16, serde_json::Value) {
        let body = StampRequestBody {
            kind: CUSTOMER_QR.to_string(),
            payload: StampPayload::from(token),
        };
        let mut request = reqwest::Client::new()
            .post(format!("{}/stamp", server.api))
            .json(&body);
        if let Some(key) = key {
            request = request.header("Idempotency-Key", key);
        }
        let response = request.send().await.unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap())
    }

    fn merchant(server: &TestServer) -> MerchantSession {
        MerchantSession::new(
            server.backend.clone(),
            Arc::new(SystemClock),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_scan_fills_card_and_issues_reward() {
        let server = spawn_server(Duration::from_secs(300)).await;
        let enrolled = enroll(&server, 7, 5).await;
        assert_eq!(enrolled.status, CardStatus::Active);
        set_stamps(&server, enrolled.card_id, 4).await;

        let mut customer = CustomerSession::new(server.backend.clone(), Arc::new(SystemClock), 7);
        let card = customer.load_card().await.unwrap().clone();
        assert_eq!(card.stamps_count, 4);
        assert!(!card.has_reward);

        let shown = customer.show_token().await.unwrap();
        assert!(!shown.state.borrow().expired);

        let mut merchant = merchant(&server);
        merchant.track_card(card);
        merchant.start_scanning();
        let receipt = merchant
            .on_code_recognized(&shown.transport)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(receipt.result.stamps_count, 5);
        assert_eq!(receipt.result.stamps_needed, 5);
        assert!(receipt.result.reward_issued);
        assert_eq!(receipt.projection, Some(Projection::Applied { reward_available: true }));
        assert!(merchant.card(enrolled.card_id).unwrap().has_reward);

        let first = merchant.history().latest().unwrap();
        assert_eq!(first.card_id, enrolled.card_id);
        assert!(first.reward_earned);

        customer.apply_result(&receipt.result);
        assert!(customer.card().unwrap().has_reward);

        let cards = server.backend.customer_cards(7).await.unwrap();
        assert_eq!(cards[0].stamps_count, 5);
        assert!(cards[0].has_reward);
    }

    #[tokio::test]
    async fn test_same_key_is_applied_once() {
        let server = spawn_server(Duration::from_secs(300)).await;
        let card = enroll(&server, 7, 5).await;

        let token = server.backend.card_token(card.card_id).await.unwrap();
        let request = StampApplicationRequest::for_token(&token);

        let first = server.backend.apply_stamp(&request).await.unwrap();
        let second = server.backend.apply_stamp(&request).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.stamps, 1);
        assert!(!first.reward_issued);
        assert_eq!(server.backend.customer_cards(7).await.unwrap()[0].stamps_count, 1);
    }

    #[tokio::test]
    async fn test_rescan_after_lost_response_does_not_double_stamp() {
        let server = spawn_server(Duration::from_secs(300)).await;
        let card = enroll(&server, 7, 5).await;
        let token = server.backend.card_token(card.card_id).await.unwrap();

        // First attempt reached the backend but the answer never came back.
        server
            .backend
            .apply_stamp(&StampApplicationRequest::for_token(&token))
            .await
            .unwrap();

        let mut merchant = merchant(&server);
        merchant.start_scanning();
        let receipt = merchant
            .on_code_recognized(&token.encode())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(receipt.result.stamps_count, 1);
        assert_eq!(server.backend.customer_cards(7).await.unwrap()[0].stamps_count, 1);
    }

    #[tokio::test]
    async fn test_concurrent_requests_with_same_key_apply_once() {
        let server = spawn_server(Duration::from_secs(300)).await;
        let card = enroll(&server, 7, 5).await;
        let token = server.backend.card_token(card.card_id).await.unwrap();

        let ((status_a, body_a), (status_b, body_b)) = tokio::join!(
            post_stamp(&server, &token, Some("same-visit")),
            post_stamp(&server, &token, Some("same-visit")),
        );

        assert_eq!(status_a, 200);
        assert_eq!(status_b, 200);
        assert_eq!(body_a, body_b);
        assert_eq!(body_a["stamps"], 1);
        assert_eq!(server.backend.customer_cards(7).await.unwrap()[0].stamps_count, 1);
    }

    #[tokio::test]
    async fn test_replay_with_fresh_key_is_rejected() {
        let server = spawn_server(Duration::from_secs(300)).await;
        let card = enroll(&server, 7, 5).await;
        let token = server.backend.card_token(card.card_id).await.unwrap();

        let (status, _) = post_stamp(&server, &token, Some("attempt-1")).await;
        assert_eq!(status, 200);

        let (status, body) = post_stamp(&server, &token, Some("attempt-2")).await;
        assert_eq!(status, 400);
        assert_eq!(body["reason"], "Token already used");
        assert_eq!(server.backend.customer_cards(7).await.unwrap()[0].stamps_count, 1);
    }

    #[tokio::test]
    async fn test_idempotency_key_is_required_and_bound_to_token() {
        let server = spawn_server(Duration::from_secs(300)).await;
        let card = enroll(&server, 7, 5).await;
        let first = server.backend.card_token(card.card_id).await.unwrap();
        let second = server.backend.card_token(card.card_id).await.unwrap();

        let (status, _) = post_stamp(&server, &first, None).await;
        assert_eq!(status, 400);

        let (status, _) = post_stamp(&server, &first, Some("shared")).await;
        assert_eq!(status, 200);
        let (status, body) = post_stamp(&server, &second, Some("shared")).await;
        assert_eq!(status, 422);
        assert_eq!(body["status"], "ERROR");
    }

    #[tokio::test]
    async fn test_tampered_code_is_rejected() {
        let server = spawn_server(Duration::from_secs(300)).await;
        let card = enroll(&server, 7, 5).await;
        let mut token = server.backend.card_token(card.card_id).await.unwrap();
        token.sig = "00".repeat(16);

        let mut merchant = merchant(&server);
        merchant.start_scanning();
        match merchant.on_code_recognized(&token.encode()).await.unwrap() {
            Err(StampError::RejectedByBackend(reason)) => {
                assert_eq!(reason, "Invalid signature - token authentication failed")
            }
            other => panic!("expected rejection, got {:?}", other),
        }
        assert!(!merchant.can_retry());
        assert_eq!(server.backend.customer_cards(7).await.unwrap()[0].stamps_count, 0);
    }

    #[tokio::test]
    async fn test_expired_token_is_refused_on_both_sides() {
        let server = spawn_server(Duration::ZERO).await;
        let card = enroll(&server, 7, 5).await;
        let token = server.backend.card_token(card.card_id).await.unwrap();

        let mut merchant = merchant(&server);
        merchant.start_scanning();
        let outcome = merchant.on_code_recognized(&token.encode()).await.unwrap();
        assert!(matches!(outcome, Err(StampError::Expired)));

        let (status, body) = post_stamp(&server, &token, Some("late")).await;
        assert_eq!(status, 400);
        assert_eq!(body["reason"], "Token expired");
    }

    #[tokio::test]
    async fn test_redeem_is_terminal() {
        let server = spawn_server(Duration::from_secs(300)).await;
        let card = enroll(&server, 7, 1).await;

        let mut merchant = merchant(&server);
        merchant.track_card(card.clone());
        assert!(matches!(
            merchant.redeem(card.card_id).await,
            Err(BackendError::Rejected { status: 409, .. })
        ));

        let token = server.backend.card_token(card.card_id).await.unwrap();
        merchant.start_scanning();
        let receipt = merchant.on_code_recognized(&token.encode()).await.unwrap().unwrap();
        assert!(receipt.result.reward_issued);

        let redeemed = merchant.redeem(card.card_id).await.unwrap();
        assert_eq!(redeemed.status, CardStatus::Redeemed);
        assert!(!redeemed.has_reward);
        assert_eq!(merchant.card(card.card_id).unwrap().status, CardStatus::Redeemed);

        match merchant.redeem(card.card_id).await {
            Err(BackendError::Rejected { status, reason }) => {
                assert_eq!(status, 409);
                assert_eq!(reason, "Card already redeemed");
            }
            other => panic!("expected conflict, got {:?}", other),
        }
        assert!(matches!(
            server.backend.card_token(card.card_id).await,
            Err(BackendError::Rejected { status: 400, .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_customer_has_no_card() {
        let server = spawn_server(Duration::from_secs(300)).await;
        let mut customer = CustomerSession::new(server.backend.clone(), Arc::new(SystemClock), 404);
        assert!(matches!(customer.load_card().await, Err(CustomerError::NoCard)));
        assert!(matches!(
            server.backend.card_token(CardId(999)).await,
            Err(BackendError::Rejected { status: 404, .. })
        ));
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_a_network_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let backend = Arc::new(
            HttpBackend::new(&format!("http://{}/api", addr), Duration::from_secs(2)).unwrap(),
        );
        let mut merchant = MerchantSession::new(backend, Arc::new(SystemClock), Duration::from_secs(2));
        let token = ProofOfPresenceToken {
            kind: CUSTOMER_QR.to_string(),
            card_ref: CardId(42),
            nonce: "abc".to_string(),
            exp: chrono::Utc::now().timestamp() + 300,
            sig: "00".repeat(16),
        };

        merchant.start_scanning();
        let outcome = merchant.on_code_recognized(&token.encode()).await.unwrap();
        assert!(matches!(outcome, Err(StampError::NetworkError(_))));
        assert!(merchant.can_retry());
    }
}
