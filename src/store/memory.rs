use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::TokenStore;
use crate::models::token::{TokenRecord, TokenStatus, WindowCounter};

/// In-process token store.
///
/// Counter writes happen under the record's shard lock, so a compare-and-swap
/// is a single atomic step.
#[derive(Clone, Default)]
pub struct MemoryTokenStore {
    records: Arc<DashMap<Uuid, TokenRecord>>,
    by_access_token: Arc<DashMap<String, Uuid>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Snapshot of a record regardless of status.
    pub fn get(&self, id: Uuid) -> Option<TokenRecord> {
        self.records.get(&id).map(|r| r.clone())
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn find_active_by_access_token(
        &self,
        access_token: &str,
    ) -> anyhow::Result<Option<TokenRecord>> {
        let Some(id) = self.by_access_token.get(access_token).map(|r| *r) else {
            return Ok(None);
        };
        Ok(self
            .records
            .get(&id)
            .filter(|r| r.status == TokenStatus::Active)
            .map(|r| r.clone()))
    }

    async fn load_counter(&self, id: Uuid) -> anyhow::Result<Option<WindowCounter>> {
        Ok(self.records.get(&id).map(|r| r.counter()))
    }

    async fn persist_counter(
        &self,
        id: Uuid,
        expected: WindowCounter,
        next: WindowCounter,
    ) -> anyhow::Result<bool> {
        let Some(mut record) = self.records.get_mut(&id) else {
            anyhow::bail!("token {} vanished during counter update", id);
        };
        if record.counter() != expected {
            return Ok(false);
        }
        record.api_count = next.api_count;
        record.window_start = next.window_start;
        Ok(true)
    }

    async fn insert(&self, record: &TokenRecord) -> anyhow::Result<()> {
        match self.by_access_token.entry(record.access_token.clone()) {
            Entry::Occupied(_) => anyhow::bail!("access token already in use"),
            Entry::Vacant(slot) => {
                slot.insert(record.id);
            }
        }
        self.records.insert(record.id, record.clone());
        Ok(())
    }

    async fn deactivate(&self, id: Uuid) -> anyhow::Result<bool> {
        match self.records.get_mut(&id) {
            Some(mut record) => {
                record.status = TokenStatus::Inactive;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
