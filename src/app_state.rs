use sqlx::{Pool, Sqlite};
use std::time::Duration;

use crate::validation::CmacSigner;

#[derive(Clone)]
pub struct AppState {
    pub pool: Pool<Sqlite>,
    pub signer: CmacSigner,
    pub token_ttl: Duration,
}
