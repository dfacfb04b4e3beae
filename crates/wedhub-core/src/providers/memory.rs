// In-memory gateway with knobs for simulating a flaky backend
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::{
    gateway::SavedItemsGateway,
    models::{ItemKey, ItemPayload, SavedItem},
    Error, Result,
};

/// How many times each gateway operation was invoked
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewayCalls {
    pub select: usize,
    pub insert: usize,
    pub delete: usize,
}

impl GatewayCalls {
    pub fn total(&self) -> usize {
        self.select + self.insert + self.delete
    }
}

/// Keeps rows in a Vec, newest first, with the same uniqueness rule as the
/// hosted backend. Handy offline and for exercising the cache's failure paths.
pub struct InMemoryGateway<K, P> {
    rows: Mutex<Vec<SavedItem<K, P>>>,
    offline: AtomicBool,
    fail_next: AtomicU32,
    latency: Mutex<Option<Duration>>,
    selects: AtomicUsize,
    inserts: AtomicUsize,
    deletes: AtomicUsize,
}

impl<K: ItemKey, P: ItemPayload> InMemoryGateway<K, P> {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            offline: AtomicBool::new(false),
            fail_next: AtomicU32::new(0),
            latency: Mutex::new(None),
            selects: AtomicUsize::new(0),
            inserts: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        }
    }

    /// Every call sleeps this long before touching the rows
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = Some(latency);
        self
    }

    /// While offline every call fails
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Fail the next `n` calls, whatever they are
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn calls(&self) -> GatewayCalls {
        GatewayCalls {
            select: self.selects.load(Ordering::SeqCst),
            insert: self.inserts.load(Ordering::SeqCst),
            delete: self.deletes.load(Ordering::SeqCst),
        }
    }

    /// Rows as the backend sees them, bypassing failure injection
    pub fn rows_for(&self, user_id: &str) -> Vec<SavedItem<K, P>> {
        self.rows()
            .iter()
            .filter(|row| row.user_id == user_id)
            .cloned()
            .collect()
    }

    fn rows(&self) -> MutexGuard<'_, Vec<SavedItem<K, P>>> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn enter(&self, counter: &AtomicUsize) -> Result<()> {
        counter.fetch_add(1, Ordering::SeqCst);

        let latency = *self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::ApiError("backend unreachable".into()));
        }

        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(Error::ApiError("simulated backend failure".into()));
        }

        Ok(())
    }
}

impl<K: ItemKey, P: ItemPayload> Default for InMemoryGateway<K, P> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K: ItemKey, P: ItemPayload> SavedItemsGateway<K, P> for InMemoryGateway<K, P> {
    async fn select_saved(&self, user_id: &str) -> Result<Vec<SavedItem<K, P>>> {
        self.enter(&self.selects).await?;
        Ok(self.rows_for(user_id))
    }

    async fn insert_saved(&self, user_id: &str, vendor_id: &K, snapshot: Option<&P>) -> Result<()> {
        self.enter(&self.inserts).await?;

        let mut rows = self.rows();
        if rows
            .iter()
            .any(|row| row.user_id == user_id && &row.vendor_id == vendor_id)
        {
            return Err(Error::Conflict(format!("{} already saved {}", user_id, vendor_id)));
        }

        rows.insert(
            0,
            SavedItem {
                id: uuid::Uuid::new_v4().to_string(),
                user_id: user_id.to_string(),
                vendor_id: vendor_id.clone(),
                created_at: Utc::now(),
                vendor: snapshot.cloned(),
            },
        );
        Ok(())
    }

    async fn delete_saved(&self, user_id: &str, vendor_id: &K) -> Result<()> {
        self.enter(&self.deletes).await?;
        self.rows()
            .retain(|row| !(row.user_id == user_id && &row.vendor_id == vendor_id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VendorSnapshot;

    type Gateway = InMemoryGateway<i64, VendorSnapshot>;

    #[tokio::test]
    async fn test_newest_first_and_per_user() {
        let gw = Gateway::new();
        gw.insert_saved("u1", &1, None).await.unwrap();
        gw.insert_saved("u1", &2, None).await.unwrap();
        gw.insert_saved("u2", &3, None).await.unwrap();

        let ids: Vec<i64> = gw
            .select_saved("u1")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.vendor_id)
            .collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[tokio::test]
    async fn test_fail_next_counts_down() {
        let gw = Gateway::new();
        gw.fail_next(2);

        assert!(gw.select_saved("u1").await.is_err());
        assert!(gw.select_saved("u1").await.is_err());
        assert!(gw.select_saved("u1").await.is_ok());
        assert_eq!(gw.calls().select, 3);
    }

    #[tokio::test]
    async fn test_offline_fails_everything() {
        let gw = Gateway::new();
        gw.set_offline(true);
        assert!(gw.insert_saved("u1", &1, None).await.is_err());
        assert!(gw.rows_for("u1").is_empty());
        assert_eq!(gw.calls().total(), 1);
    }
}
