pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::token::{TokenRecord, WindowCounter};

/// Abstraction over token persistence.
/// Implementations: PgTokenStore (PostgreSQL), MemoryTokenStore (DashMap, dev/tests).
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// The single record with this access token and `status = active`, if any.
    async fn find_active_by_access_token(
        &self,
        access_token: &str,
    ) -> anyhow::Result<Option<TokenRecord>>;

    /// Fresh read of the counter fields, used after a lost compare-and-swap.
    async fn load_counter(&self, id: Uuid) -> anyhow::Result<Option<WindowCounter>>;

    /// Writes `next` only if the stored counter still equals `expected`.
    /// Returns `false` when another writer got there first.
    async fn persist_counter(
        &self,
        id: Uuid,
        expected: WindowCounter,
        next: WindowCounter,
    ) -> anyhow::Result<bool>;

    /// Store a freshly provisioned token. Fails if the access token is already taken.
    async fn insert(&self, record: &TokenRecord) -> anyhow::Result<()>;

    /// Administrative soft-delete. Returns `false` if no such token exists.
    async fn deactivate(&self, id: Uuid) -> anyhow::Result<bool>;
}
