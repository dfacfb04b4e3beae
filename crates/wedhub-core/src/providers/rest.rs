// Hosted backend gateway - bridges the row API client with SavedItemsGateway
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use wedhub_api::{BackendClient, Filter};

use crate::{
    gateway::SavedItemsGateway,
    models::{ItemKey, ItemPayload, SavedItem},
    Result,
};

pub const DEFAULT_SAVED_TABLE: &str = "saved_vendors";

/// Embedded resource pulling live display fields from the vendors table
pub const DEFAULT_VENDOR_JOIN: &str = "vendor:vendors(name,category,location,logo_url,price_range)";

/// Wrapper around BackendClient that implements SavedItemsGateway
pub struct RestGateway {
    client: BackendClient,
    table: String,
    vendor_join: Option<String>,
}

/// A saved row as selected, with the joined vendor alongside the stored snapshot
#[derive(Deserialize)]
struct SelectedRow<K, P> {
    id: String,
    user_id: String,
    vendor_id: K,
    created_at: DateTime<Utc>,
    vendor_data: Option<P>,
    vendor: Option<P>,
}

impl<K, P> SelectedRow<K, P> {
    /// Joined fields win; the save-time snapshot covers vendors the join can't see
    fn into_item(self) -> SavedItem<K, P> {
        SavedItem {
            id: self.id,
            user_id: self.user_id,
            vendor_id: self.vendor_id,
            created_at: self.created_at,
            vendor: self.vendor.or(self.vendor_data),
        }
    }
}

#[derive(Serialize)]
struct NewSavedRow<'a, K, P> {
    user_id: &'a str,
    vendor_id: &'a K,
    vendor_data: Option<&'a P>,
}

impl RestGateway {
    pub fn new(client: BackendClient) -> Self {
        Self::with_table(client, DEFAULT_SAVED_TABLE)
    }

    pub fn with_table(client: BackendClient, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
            vendor_join: Some(DEFAULT_VENDOR_JOIN.to_string()),
        }
    }

    /// Replace the embedded vendor join; `None` selects the saved rows alone
    pub fn with_vendor_join(mut self, join: Option<String>) -> Self {
        self.vendor_join = join.filter(|j| !j.trim().is_empty());
        self
    }

    fn select_columns(&self) -> String {
        match &self.vendor_join {
            Some(join) => format!("*,{}", join),
            None => "*".to_string(),
        }
    }
}

#[async_trait]
impl<K: ItemKey, P: ItemPayload> SavedItemsGateway<K, P> for RestGateway {
    async fn select_saved(&self, user_id: &str) -> Result<Vec<SavedItem<K, P>>> {
        let rows: Vec<SelectedRow<K, P>> = self
            .client
            .select_rows(
                &self.table,
                &self.select_columns(),
                &[Filter::eq("user_id", user_id)],
                Some("created_at.desc"),
            )
            .await?;
        Ok(rows.into_iter().map(SelectedRow::into_item).collect())
    }

    async fn insert_saved(&self, user_id: &str, vendor_id: &K, snapshot: Option<&P>) -> Result<()> {
        let row = NewSavedRow {
            user_id,
            vendor_id,
            vendor_data: snapshot,
        };
        self.client.insert_row(&self.table, &row).await?;
        debug!("Inserted saved row for vendor {}", vendor_id);
        Ok(())
    }

    async fn delete_saved(&self, user_id: &str, vendor_id: &K) -> Result<()> {
        self.client
            .delete_rows(
                &self.table,
                &[
                    Filter::eq("user_id", user_id),
                    Filter::eq("vendor_id", vendor_id),
                ],
            )
            .await?;
        Ok(())
    }
}
