use anyhow::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::time::Duration;

use super::{
    BackendError, CustomerCardsResponse, ErrorBody, IDEMPOTENCY_KEY_HEADER, StampBackend,
    StampRequestBody, StampResponse,
};
use crate::{
    card::{CardId, LoyaltyCard},
    stamp::StampApplicationRequest,
    token::{CUSTOMER_QR, ProofOfPresenceToken},
};

/// `StampBackend` over the backend's HTTP/JSON API
#[derive(Debug, Clone)]
pub struct HttpBackend {
    base_url: String,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn read<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, BackendError> {
        let status = response.status();

        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| BackendError::Transport(format!("unreadable response: {}", e)));
        }

        let reason = match response.json::<ErrorBody>().await {
            Ok(body) => body.reason,
            Err(_) => status.canonical_reason().unwrap_or("unknown error").to_string(),
        };

        if status.is_server_error() {
            Err(BackendError::Server {
                status: status.as_u16(),
                reason,
            })
        } else {
            Err(BackendError::Rejected {
                status: status.as_u16(),
                reason,
            })
        }
    }
}

fn transport(e: reqwest::Error) -> BackendError {
    BackendError::Transport(e.to_string())
}

#[async_trait]
impl StampBackend for HttpBackend {
    async fn customer_cards(&self, customer_id: i64) -> Result<Vec<LoyaltyCard>, BackendError> {
        let response = self
            .client
            .get(self.url(&format!("/cards/customer/{}", customer_id)))
            .send()
            .await
            .map_err(transport)?;

        Ok(Self::read::<CustomerCardsResponse>(response).await?.cards)
    }

    async fn card_token(&self, card_id: CardId) -> Result<ProofOfPresenceToken, BackendError> {
        let response = self
            .client
            .get(self.url(&format!("/cards/{}/qr", card_id)))
            .send()
            .await
            .map_err(transport)?;

        Self::read(response).await
    }

    async fn apply_stamp(
        &self,
        request: &StampApplicationRequest,
    ) -> Result<StampResponse, BackendError> {
        let body = StampRequestBody {
            kind: CUSTOMER_QR.to_string(),
            payload: request.payload.clone(),
        };

        let response = self
            .client
            .post(self.url("/stamp"))
            .header(IDEMPOTENCY_KEY_HEADER, request.idempotency_key.as_str())
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(transport)?;

        Self::read(response).await
    }

    async fn redeem_card(&self, card_id: CardId) -> Result<LoyaltyCard, BackendError> {
        let response = self
            .client
            .post(self.url(&format!("/cards/{}/redeem", card_id)))
            .send()
            .await
            .map_err(transport)?;

        Self::read(response).await
    }
}
