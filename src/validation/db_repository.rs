use anyhow::Result;
use sqlx::{Pool, Sqlite};

use crate::{
    db::{
        models::{Card, CardToken},
        queries,
    },
    validation::StampRepository,
};

/// Database implementation of StampRepository
pub struct DatabaseStampRepository {
    pool: Pool<Sqlite>,
}

impl DatabaseStampRepository {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl StampRepository for DatabaseStampRepository {
    async fn get_card(&self, card_id: i64) -> Result<Option<Card>> {
        queries::get_card(&self.pool, card_id).await
    }

    async fn get_issued_token(&self, nonce: &str) -> Result<Option<CardToken>> {
        queries::get_token(&self.pool, nonce).await
    }
}
