//! Saved-vendor cache.
//!
//! Holds the signed-in user's saved rows in memory and keeps them in step with
//! the gateway by refetching after every successful write. Nothing in here
//! returns an error: a broken saved-vendors feature must not take the page
//! down with it, so failures end up as `false`, a log line and a tick on the
//! failure guard.
//!
//! Writes to the same vendor id are serialized, and a fetch only lands if no
//! newer fetch has landed first, so "save then immediately unsave" settles on
//! "not saved".

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::gateway::SavedItemsGateway;
use crate::guard::{Clock, FailureGuard, GuardConfig, GuardState, SystemClock};
use crate::models::{AuthChange, AuthEvent, ItemKey, ItemPayload, SavedItem, Session};
use crate::{Error, Result};

struct Snapshot<K, P> {
    user_id: Option<String>,
    items: Vec<SavedItem<K, P>>,
    /// Sequence number of the fetch that produced `items`
    applied_seq: u64,
}

/// Decrements the in-flight counter when dropped
struct Loading<'a>(&'a AtomicUsize);

impl<'a> Loading<'a> {
    fn begin(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for Loading<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct SavedItemCache<K: ItemKey, P: ItemPayload> {
    gateway: Arc<dyn SavedItemsGateway<K, P>>,
    guard: Mutex<FailureGuard>,
    state: RwLock<Snapshot<K, P>>,
    fetch_seq: AtomicU64,
    in_flight: AtomicUsize,
    key_locks: Mutex<HashMap<K, Arc<tokio::sync::Mutex<()>>>>,
    cancel: CancellationToken,
}

impl<K: ItemKey, P: ItemPayload> SavedItemCache<K, P> {
    pub fn new(gateway: Arc<dyn SavedItemsGateway<K, P>>, config: &GuardConfig) -> Self {
        Self::with_clock(gateway, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        gateway: Arc<dyn SavedItemsGateway<K, P>>,
        config: &GuardConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            gateway,
            guard: Mutex::new(FailureGuard::new(config, clock)),
            state: RwLock::new(Snapshot {
                user_id: None,
                items: Vec::new(),
                applied_seq: 0,
            }),
            fetch_seq: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            key_locks: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    // ---- read side, safe to call on every render ----

    pub fn is_item_saved(&self, vendor_id: &K) -> bool {
        self.state().items.iter().any(|item| &item.vendor_id == vendor_id)
    }

    /// Current snapshot, newest first
    pub fn saved_items(&self) -> Vec<SavedItem<K, P>> {
        self.state().items.clone()
    }

    pub fn len(&self) -> usize {
        self.state().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().items.is_empty()
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }

    pub fn current_user(&self) -> Option<String> {
        self.state().user_id.clone()
    }

    pub fn failure_count(&self) -> u32 {
        self.guard().failure_count()
    }

    pub fn guard_state(&self) -> GuardState {
        self.guard().state()
    }

    // ---- session ----

    /// Point the cache at a (possibly different) user
    ///
    /// Returns true if the user changed. A change empties the snapshot and
    /// invalidates any fetch still in flight for the previous user.
    pub fn set_session(&self, session: Option<&Session>) -> bool {
        let user_id = session.map(|s| s.user_id.clone());
        let mut state = self.state_mut();
        if state.user_id == user_id {
            return false;
        }

        state.user_id = user_id;
        state.items.clear();
        state.applied_seq = self.fetch_seq.fetch_add(1, Ordering::SeqCst) + 1;
        true
    }

    pub async fn on_auth_change(&self, change: &AuthChange) {
        match change.event {
            AuthEvent::SignedIn => {
                self.set_session(change.session.as_ref());
                self.fetch_saved_items().await;
            }
            AuthEvent::SignedOut => {
                self.set_session(None);
                debug!("Signed out, saved vendors cleared");
            }
            AuthEvent::TokenRefreshed | AuthEvent::UserUpdated => {
                if self.set_session(change.session.as_ref()) {
                    self.fetch_saved_items().await;
                }
            }
        }
    }

    /// Apply auth changes until the stream closes or the cache is detached
    pub async fn follow_auth(&self, mut events: broadcast::Receiver<AuthChange>) {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                event = events.recv() => match event {
                    Ok(change) => self.on_auth_change(&change).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // We may have missed a sign-in; refetch for whoever is current
                        warn!("Missed {} auth events, resyncing", skipped);
                        self.fetch_saved_items().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    }

    /// Stop applying results; in-flight requests are dropped
    pub fn detach(&self) {
        self.cancel.cancel();
    }

    pub fn is_detached(&self) -> bool {
        self.cancel.is_cancelled()
    }

    // ---- gateway-backed operations ----

    /// Replace the snapshot with what the gateway has
    ///
    /// On failure the snapshot is emptied rather than left half-stale.
    pub async fn fetch_saved_items(&self) -> bool {
        if self.is_detached() {
            return false;
        }

        let Some(user_id) = self.current_user() else {
            debug!("No session, nothing to fetch");
            self.state_mut().items.clear();
            return false;
        };

        if !self.guard().can_attempt() {
            info!("Failure guard open, skipping saved vendors fetch");
            return false;
        }

        let seq = self.fetch_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let _loading = Loading::begin(&self.in_flight);

        let Some(result) = self.unless_detached(self.gateway.select_saved(&user_id)).await else {
            debug!("Detached during fetch, result discarded");
            return false;
        };

        match result {
            Ok(items) => {
                self.guard().on_success();
                let mut state = self.state_mut();
                if state.user_id.as_deref() != Some(user_id.as_str()) || seq <= state.applied_seq {
                    debug!("Discarding stale fetch #{}", seq);
                    return true;
                }
                debug!("Loaded {} saved vendors for {}", items.len(), user_id);
                state.items = items;
                state.applied_seq = seq;
                true
            }
            Err(e) => {
                self.guard().on_failure();
                warn!("Failed to fetch saved vendors: {}", e);
                let mut state = self.state_mut();
                if state.user_id.as_deref() == Some(user_id.as_str()) && seq > state.applied_seq {
                    state.items.clear();
                    state.applied_seq = seq;
                }
                false
            }
        }
    }

    /// Save a vendor, then resync
    ///
    /// Nothing changes locally until the gateway has accepted the row.
    pub async fn save_item(&self, vendor_id: K, snapshot: Option<P>) -> bool {
        self.with_key_lock(&vendor_id, self.insert_and_resync(&vendor_id, snapshot.as_ref()))
            .await
    }

    pub async fn remove_saved_item(&self, vendor_id: &K) -> bool {
        self.with_key_lock(vendor_id, self.delete_and_resync(vendor_id))
            .await
    }

    /// Flip membership; `snapshot` is only used when this ends up saving
    pub async fn toggle_saved_item(&self, vendor_id: K, snapshot: Option<P>) -> bool {
        self.with_key_lock(&vendor_id, async {
            if self.is_item_saved(&vendor_id) {
                self.delete_and_resync(&vendor_id).await
            } else {
                self.insert_and_resync(&vendor_id, snapshot.as_ref()).await
            }
        })
        .await
    }

    async fn insert_and_resync(&self, vendor_id: &K, snapshot: Option<&P>) -> bool {
        let Some(user_id) = self.current_user() else {
            warn!("Cannot save vendor {} without a session", vendor_id);
            return false;
        };

        let outcome = self
            .mutate(
                "save",
                vendor_id,
                Error::is_conflict,
                self.gateway.insert_saved(&user_id, vendor_id, snapshot),
            )
            .await;
        self.finish_mutation(outcome).await
    }

    async fn delete_and_resync(&self, vendor_id: &K) -> bool {
        let Some(user_id) = self.current_user() else {
            warn!("Cannot remove vendor {} without a session", vendor_id);
            return false;
        };

        let outcome = self
            .mutate(
                "remove",
                vendor_id,
                Error::is_not_found,
                self.gateway.delete_saved(&user_id, vendor_id),
            )
            .await;
        self.finish_mutation(outcome).await
    }

    /// Run one guarded write; true when the gateway accepted it
    ///
    /// `already_done` names the single error kind meaning the row is already
    /// in the wanted state: Conflict for an insert, NotFound for a delete.
    async fn mutate<F>(
        &self,
        action: &str,
        vendor_id: &K,
        already_done: fn(&Error) -> bool,
        call: F,
    ) -> bool
    where
        F: Future<Output = Result<()>>,
    {
        if !self.guard().can_attempt() {
            info!("Failure guard open, skipping {} of vendor {}", action, vendor_id);
            return false;
        }

        let _loading = Loading::begin(&self.in_flight);
        match self.unless_detached(call).await {
            None => {
                debug!("Detached during {} of vendor {}", action, vendor_id);
                false
            }
            Some(Ok(())) => {
                self.guard().on_success();
                true
            }
            Some(Err(e)) if already_done(&e) => {
                debug!("{} of vendor {} was a no-op: {}", action, vendor_id, e);
                self.guard().on_success();
                true
            }
            Some(Err(e)) => {
                self.guard().on_failure();
                warn!("Failed to {} vendor {}: {}", action, vendor_id, e);
                false
            }
        }
    }

    async fn finish_mutation(&self, accepted: bool) -> bool {
        if accepted {
            self.fetch_saved_items().await;
        }
        accepted
    }

    async fn unless_detached<T>(&self, call: impl Future<Output = T>) -> Option<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            out = call => Some(out),
        }
    }

    async fn with_key_lock<T>(&self, vendor_id: &K, work: impl Future<Output = T>) -> T {
        let lock = self.key_lock(vendor_id);
        let out = {
            let _held = lock.lock().await;
            work.await
        };
        drop(lock);
        self.release_key_lock(vendor_id);
        out
    }

    fn key_lock(&self, vendor_id: &K) -> Arc<tokio::sync::Mutex<()>> {
        self.key_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(vendor_id.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn release_key_lock(&self, vendor_id: &K) {
        let mut locks = self.key_locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the map's own handle left means nobody is waiting
        if locks
            .get(vendor_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(vendor_id);
        }
    }

    fn guard(&self) -> MutexGuard<'_, FailureGuard> {
        self.guard.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> RwLockReadGuard<'_, Snapshot<K, P>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn state_mut(&self) -> RwLockWriteGuard<'_, Snapshot<K, P>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K: ItemKey, P: ItemPayload> Drop for SavedItemCache<K, P> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::ManualClock;
    use crate::models::{UserRole, VendorSnapshot};
    use crate::providers::InMemoryGateway;

    type Cache = SavedItemCache<i64, VendorSnapshot>;

    fn cache() -> (Arc<InMemoryGateway<i64, VendorSnapshot>>, Cache) {
        let gateway = Arc::new(InMemoryGateway::new());
        let cache = Cache::with_clock(
            gateway.clone(),
            &GuardConfig::default(),
            Arc::new(ManualClock::new()),
        );
        cache.set_session(Some(&Session::new("u1", UserRole::Couple)));
        (gateway, cache)
    }

    #[tokio::test]
    async fn test_save_resyncs_from_gateway() {
        let (gateway, cache) = cache();

        assert!(cache.save_item(7, None).await);
        assert!(cache.is_item_saved(&7));
        assert_eq!(gateway.calls().insert, 1);
        assert_eq!(gateway.calls().select, 1);
    }

    #[tokio::test]
    async fn test_fetch_without_session_makes_no_calls() {
        let gateway = Arc::new(InMemoryGateway::<i64, VendorSnapshot>::new());
        let cache = Cache::new(gateway.clone(), &GuardConfig::default());

        assert!(!cache.fetch_saved_items().await);
        assert!(!cache.save_item(1, None).await);
        assert_eq!(gateway.calls().total(), 0);
    }

    #[tokio::test]
    async fn test_failed_fetch_empties_snapshot() {
        let (gateway, cache) = cache();
        cache.save_item(1, None).await;
        assert_eq!(cache.len(), 1);

        gateway.fail_next(1);
        assert!(!cache.fetch_saved_items().await);
        assert!(cache.is_empty());
        assert_eq!(cache.failure_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_save_leaves_state_alone() {
        let (gateway, cache) = cache();
        cache.save_item(1, None).await;

        gateway.fail_next(1);
        assert!(!cache.save_item(2, None).await);
        assert!(cache.is_item_saved(&1));
        assert!(!cache.is_item_saved(&2));
    }

    #[tokio::test]
    async fn test_duplicate_save_is_not_a_failure() {
        let (gateway, cache) = cache();
        // Another device saved it first
        gateway.insert_saved("u1", &3, None).await.unwrap();

        assert!(cache.save_item(3, None).await);
        assert!(cache.is_item_saved(&3));
        assert_eq!(cache.failure_count(), 0);
    }

    /// Writes fail with whichever error the test picks; reads succeed
    struct RejectingGateway {
        error: fn() -> Error,
        selects: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl SavedItemsGateway<i64, VendorSnapshot> for RejectingGateway {
        async fn select_saved(&self, _user_id: &str) -> Result<Vec<SavedItem<i64, VendorSnapshot>>> {
            self.selects.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }

        async fn insert_saved(
            &self,
            _user_id: &str,
            _vendor_id: &i64,
            _snapshot: Option<&VendorSnapshot>,
        ) -> Result<()> {
            Err((self.error)())
        }

        async fn delete_saved(&self, _user_id: &str, _vendor_id: &i64) -> Result<()> {
            Err((self.error)())
        }
    }

    fn rejecting(error: fn() -> Error) -> (Arc<RejectingGateway>, Cache) {
        let gateway = Arc::new(RejectingGateway {
            error,
            selects: AtomicUsize::new(0),
        });
        let cache = Cache::with_clock(
            gateway.clone(),
            &GuardConfig::default(),
            Arc::new(ManualClock::new()),
        );
        cache.set_session(Some(&Session::new("u1", UserRole::Couple)));
        (gateway, cache)
    }

    #[tokio::test]
    async fn test_insert_not_found_is_a_failed_save() {
        let (gateway, cache) = rejecting(|| Error::NotFound("saved_vendorz".into()));

        assert!(!cache.save_item(42, None).await);
        assert!(!cache.is_item_saved(&42));
        assert_eq!(cache.failure_count(), 1);
        // No resync after a rejected write
        assert_eq!(gateway.selects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_delete_conflict_is_a_failed_remove() {
        let (gateway, cache) = rejecting(|| Error::Conflict("locked".into()));

        assert!(!cache.remove_saved_item(&42).await);
        assert_eq!(cache.failure_count(), 1);
        assert_eq!(gateway.selects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_delete_not_found_is_a_noop_remove() {
        let (gateway, cache) = rejecting(|| Error::NotFound("row".into()));

        assert!(cache.remove_saved_item(&42).await);
        assert_eq!(cache.failure_count(), 0);
        assert_eq!(gateway.selects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_session_change_drops_snapshot() {
        let (_gateway, cache) = cache();
        cache.save_item(1, None).await;

        assert!(cache.set_session(Some(&Session::new("u2", UserRole::Couple))));
        assert!(cache.is_empty());
        assert!(!cache.set_session(Some(&Session::new("u2", UserRole::Couple))));
    }

    #[tokio::test]
    async fn test_detached_cache_ignores_everything() {
        let (gateway, cache) = cache();
        cache.detach();

        assert!(!cache.save_item(1, None).await);
        assert!(!cache.fetch_saved_items().await);
        assert!(gateway.rows_for("u1").is_empty());
        assert!(!cache.is_loading());
    }

    #[tokio::test]
    async fn test_key_locks_are_released() {
        let (_gateway, cache) = cache();
        cache.toggle_saved_item(5, None).await;
        cache.toggle_saved_item(5, None).await;
        assert!(cache.key_locks.lock().unwrap().is_empty());
    }
}
