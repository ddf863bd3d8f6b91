use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::TokenStore;
use crate::crypto::keys::DigestAlgorithm;
use crate::models::token::{TokenRecord, TokenStatus, TokenType, WindowCounter};

#[derive(Clone)]
pub struct PgTokenStore {
    pool: PgPool,
}

impl PgTokenStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl TokenStore for PgTokenStore {
    async fn find_active_by_access_token(
        &self,
        access_token: &str,
    ) -> anyhow::Result<Option<TokenRecord>> {
        let row = sqlx::query_as::<_, TokenRow>(
            "SELECT id, user_id, status, token_type, access_token, public_key, private_key, api_limit, api_count, window_start, window_seconds, digest, created_at FROM tokens WHERE access_token = $1 AND status = 'active'"
        )
        .bind(access_token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(TokenRecord::from))
    }

    async fn load_counter(&self, id: Uuid) -> anyhow::Result<Option<WindowCounter>> {
        let row = sqlx::query_as::<_, (i64, i64)>(
            "SELECT api_count, window_start FROM tokens WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(api_count, window_start)| WindowCounter {
            api_count,
            window_start,
        }))
    }

    async fn persist_counter(
        &self,
        id: Uuid,
        expected: WindowCounter,
        next: WindowCounter,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"UPDATE tokens SET api_count = $4, window_start = $5, updated_at = NOW()
               WHERE id = $1 AND api_count = $2 AND window_start = $3"#,
        )
        .bind(id)
        .bind(expected.api_count)
        .bind(expected.window_start)
        .bind(next.api_count)
        .bind(next.window_start)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert(&self, record: &TokenRecord) -> anyhow::Result<()> {
        sqlx::query(
            r#"INSERT INTO tokens (id, user_id, status, token_type, access_token, public_key, private_key, api_limit, api_count, window_start, window_seconds, digest, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"#
        )
        .bind(record.id)
        .bind(&record.user_id)
        .bind(record.status.as_str())
        .bind(record.token_type.as_str())
        .bind(&record.access_token)
        .bind(&record.public_key)
        .bind(&record.private_key)
        .bind(record.api_limit)
        .bind(record.api_count)
        .bind(record.window_start)
        .bind(record.window_seconds)
        .bind(record.digest.to_string())
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn deactivate(&self, id: Uuid) -> anyhow::Result<bool> {
        let result =
            sqlx::query("UPDATE tokens SET status = 'inactive', updated_at = NOW() WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[derive(sqlx::FromRow)]
struct TokenRow {
    id: Uuid,
    user_id: String,
    status: String,
    token_type: String,
    access_token: String,
    public_key: String,
    private_key: String,
    api_limit: i64,
    api_count: i64,
    window_start: i64,
    window_seconds: i64,
    digest: String,
    created_at: DateTime<Utc>,
}

impl From<TokenRow> for TokenRecord {
    fn from(row: TokenRow) -> Self {
        TokenRecord {
            id: row.id,
            user_id: row.user_id,
            status: TokenStatus::parse(&row.status),
            token_type: TokenType::parse(&row.token_type),
            access_token: row.access_token,
            public_key: row.public_key,
            private_key: row.private_key,
            api_limit: row.api_limit,
            api_count: row.api_count,
            window_start: row.window_start,
            window_seconds: row.window_seconds,
            digest: row.digest.parse().unwrap_or_else(|_| {
                tracing::warn!(
                    token_id = %row.id,
                    digest = %row.digest,
                    "unknown digest on token, using default"
                );
                DigestAlgorithm::default()
            }),
            created_at: row.created_at,
        }
    }
}
