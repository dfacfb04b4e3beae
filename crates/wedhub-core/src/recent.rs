// Recently viewed vendors, kept on disk per user
use chrono::{DateTime, Utc};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::warn;
use wedhub_store::{LocalStore, RecentRow};

use crate::models::{ItemKey, ItemPayload};
use crate::Result;

pub const DEFAULT_RECENT_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct RecentView<K, P> {
    pub vendor_id: K,
    pub vendor: Option<P>,
    pub viewed_at: DateTime<Utc>,
}

/// Most-recent-first list capped at `limit` entries
///
/// Same fail-soft rules as the saved cache: a broken store means an empty
/// list and a warning, never an error on the vendor page.
pub struct RecentlyViewed<K, P> {
    store: Arc<LocalStore>,
    limit: usize,
    _types: PhantomData<fn() -> (K, P)>,
}

impl<K: ItemKey, P: ItemPayload> RecentlyViewed<K, P> {
    pub fn new(store: Arc<LocalStore>, limit: usize) -> Self {
        Self {
            store,
            limit: limit.max(1),
            _types: PhantomData,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn record_view(&self, user_id: &str, vendor_id: &K, vendor: Option<&P>) -> bool {
        match self.try_record(user_id, vendor_id, vendor) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to record view of vendor {}: {}", vendor_id, e);
                false
            }
        }
    }

    pub fn list(&self, user_id: &str) -> Vec<RecentView<K, P>> {
        match self.try_list(user_id) {
            Ok(views) => views,
            Err(e) => {
                warn!("Failed to load recently viewed vendors: {}", e);
                Vec::new()
            }
        }
    }

    pub fn clear(&self, user_id: &str) -> bool {
        match self.store.clear_recent(user_id) {
            Ok(_) => true,
            Err(e) => {
                warn!("Failed to clear recently viewed vendors: {}", e);
                false
            }
        }
    }

    fn try_record(&self, user_id: &str, vendor_id: &K, vendor: Option<&P>) -> Result<()> {
        let key = serde_json::to_string(vendor_id)?;
        let data = vendor.map(serde_json::to_string).transpose()?;
        self.store
            .record_view(user_id, &key, data.as_deref(), self.limit)?;
        Ok(())
    }

    fn try_list(&self, user_id: &str) -> Result<Vec<RecentView<K, P>>> {
        self.store
            .recent_views(user_id, self.limit)?
            .into_iter()
            .map(decode_view)
            .collect()
    }
}

fn decode_view<K: ItemKey, P: ItemPayload>(row: RecentRow) -> Result<RecentView<K, P>> {
    Ok(RecentView {
        vendor_id: serde_json::from_str(&row.vendor_id)?,
        vendor: row
            .vendor_data
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?,
        viewed_at: row.viewed_at,
    })
}
