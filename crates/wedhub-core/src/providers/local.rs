// Offline gateway - same contract as the hosted backend, backed by SQLite
use async_trait::async_trait;
use std::sync::Arc;
use wedhub_store::{LocalStore, SavedRow};

use crate::{
    gateway::SavedItemsGateway,
    models::{ItemKey, ItemPayload, SavedItem},
    Result,
};

/// Keys and payloads are stored as JSON text so any `ItemKey` round-trips
pub struct LocalGateway {
    store: Arc<LocalStore>,
}

impl LocalGateway {
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }
}

fn decode_row<K: ItemKey, P: ItemPayload>(row: SavedRow) -> Result<SavedItem<K, P>> {
    let vendor = row
        .vendor_data
        .as_deref()
        .map(serde_json::from_str)
        .transpose()?;

    Ok(SavedItem {
        id: row.id,
        user_id: row.user_id,
        vendor_id: serde_json::from_str(&row.vendor_id)?,
        created_at: row.created_at,
        vendor,
    })
}

#[async_trait]
impl<K: ItemKey, P: ItemPayload> SavedItemsGateway<K, P> for LocalGateway {
    async fn select_saved(&self, user_id: &str) -> Result<Vec<SavedItem<K, P>>> {
        self.store
            .select_saved(user_id)?
            .into_iter()
            .map(decode_row)
            .collect()
    }

    async fn insert_saved(&self, user_id: &str, vendor_id: &K, snapshot: Option<&P>) -> Result<()> {
        let key = serde_json::to_string(vendor_id)?;
        let data = snapshot.map(serde_json::to_string).transpose()?;
        self.store.insert_saved(user_id, &key, data.as_deref())?;
        Ok(())
    }

    async fn delete_saved(&self, user_id: &str, vendor_id: &K) -> Result<()> {
        let key = serde_json::to_string(vendor_id)?;
        // Missing rows are fine - delete is idempotent
        self.store.delete_saved(user_id, &key)?;
        Ok(())
    }
}
