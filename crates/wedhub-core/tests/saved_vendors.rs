use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use wedhub_core::providers::InMemoryGateway;
use wedhub_core::{
    GuardConfig, GuardState, ManualClock, SavedItemCache, Session, SessionContext, UserRole,
    VendorSnapshot,
};

type Gateway = InMemoryGateway<i64, VendorSnapshot>;
type Cache = SavedItemCache<i64, VendorSnapshot>;

struct Harness {
    gateway: Arc<Gateway>,
    clock: ManualClock,
    cache: Cache,
}

fn harness_with(gateway: Gateway) -> Harness {
    let gateway = Arc::new(gateway);
    let clock = ManualClock::new();
    let cache = Cache::with_clock(
        gateway.clone(),
        &GuardConfig::default(),
        Arc::new(clock.clone()),
    );
    cache.set_session(Some(&Session::new("couple-1", UserRole::Couple)));
    Harness {
        gateway,
        clock,
        cache,
    }
}

fn harness() -> Harness {
    harness_with(Gateway::new())
}

fn snapshot(name: &str) -> VendorSnapshot {
    VendorSnapshot {
        name: name.to_string(),
        category: "Venue".to_string(),
        location: "Napa".to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_membership_tracks_net_effect_of_successful_writes() {
    let h = harness();
    let mut expected = HashSet::new();

    let ops: [(bool, i64); 8] = [
        (true, 1),
        (true, 2),
        (false, 1),
        (true, 3),
        (true, 1),
        (false, 2),
        (false, 2),
        (true, 2),
    ];

    for (save, id) in ops {
        if save {
            assert!(h.cache.save_item(id, Some(snapshot("Vineyard"))).await);
            expected.insert(id);
        } else {
            assert!(h.cache.remove_saved_item(&id).await);
            expected.remove(&id);
        }

        for id in 1..=3 {
            assert_eq!(h.cache.is_item_saved(&id), expected.contains(&id), "vendor {}", id);
        }
    }

    // Newest first
    let order: Vec<i64> = h.cache.saved_items().iter().map(|i| i.vendor_id).collect();
    assert_eq!(order, vec![2, 1, 3]);
}

#[tokio::test]
async fn test_removing_unsaved_vendor_is_a_noop() {
    let h = harness();

    assert!(h.cache.remove_saved_item(&404).await);
    assert!(!h.cache.is_item_saved(&404));
    assert_eq!(h.cache.failure_count(), 0);
    assert!(h.cache.is_empty());
}

#[tokio::test]
async fn test_guard_trips_after_three_failures() {
    let h = harness();
    h.gateway.set_offline(true);

    for _ in 0..3 {
        assert!(!h.cache.save_item(9, None).await);
    }
    assert_eq!(h.cache.failure_count(), 3);
    assert!(matches!(h.cache.guard_state(), GuardState::Open { .. }));

    let calls_before = h.gateway.calls();
    assert!(!h.cache.save_item(9, None).await);
    assert_eq!(h.gateway.calls(), calls_before, "4th attempt must not reach the gateway");
}

#[tokio::test]
async fn test_three_failed_fetches_block_a_fourth_within_cooldown() {
    let h = harness();
    assert!(h.cache.save_item(1, None).await);

    h.gateway.fail_next(3);
    for _ in 0..3 {
        assert!(!h.cache.fetch_saved_items().await);
    }
    assert_eq!(h.cache.failure_count(), 3);

    let snapshot = h.cache.saved_items();
    let selects = h.gateway.calls().select;

    // The backend would answer now, but the guard is still open
    h.clock.advance(Duration::from_secs(29));
    assert!(!h.cache.fetch_saved_items().await);

    assert_eq!(h.gateway.calls().select, selects);
    assert_eq!(h.cache.saved_items(), snapshot);
    assert_eq!(h.cache.failure_count(), 3);
    assert_eq!(h.gateway.rows_for("couple-1").len(), 1);
}

#[tokio::test]
async fn test_success_resets_failure_count() {
    let h = harness();

    h.gateway.fail_next(2);
    assert!(!h.cache.fetch_saved_items().await);
    assert!(!h.cache.fetch_saved_items().await);
    assert_eq!(h.cache.failure_count(), 2);

    assert!(h.cache.fetch_saved_items().await);
    assert_eq!(h.cache.failure_count(), 0);

    h.gateway.fail_next(1);
    assert!(!h.cache.fetch_saved_items().await);
    assert_eq!(h.cache.failure_count(), 1);
    assert_eq!(h.cache.guard_state(), GuardState::Closed);
}

#[tokio::test]
async fn test_cooldown_expiry_lets_next_call_through() {
    let h = harness();
    h.gateway.fail_next(3);
    for _ in 0..3 {
        h.cache.fetch_saved_items().await;
    }

    h.clock.advance(Duration::from_secs(29));
    let selects = h.gateway.calls().select;
    h.cache.fetch_saved_items().await;
    assert_eq!(h.gateway.calls().select, selects);

    h.clock.advance(Duration::from_secs(1));
    // Still three failures on the books, but the window has passed
    assert_eq!(h.cache.failure_count(), 3);
    assert!(h.cache.fetch_saved_items().await);
    assert_eq!(h.gateway.calls().select, selects + 1);
    assert_eq!(h.cache.failure_count(), 0);
}

#[tokio::test]
async fn test_post_cooldown_call_is_full_weight_not_a_probe() {
    let h = harness();
    h.gateway.fail_next(4);
    for _ in 0..3 {
        h.cache.fetch_saved_items().await;
    }
    h.clock.advance(Duration::from_secs(30));

    // That call fails too, and the guard snaps straight back open
    assert!(!h.cache.fetch_saved_items().await);
    assert_eq!(h.cache.failure_count(), 4);
    assert!(matches!(h.cache.guard_state(), GuardState::Open { .. }));
}

#[tokio::test]
async fn test_offline_save_of_vendor_42() {
    let h = harness();
    h.gateway.set_offline(true);

    assert!(!h.cache.toggle_saved_item(42, Some(snapshot("Rose Hall"))).await);
    assert!(!h.cache.is_item_saved(&42));
    assert_eq!(h.cache.failure_count(), 1);
}

#[tokio::test]
async fn test_open_guard_leaves_snapshot_untouched() {
    let h = harness();
    h.cache.save_item(1, None).await;
    h.cache.save_item(2, None).await;

    let before = h.cache.saved_items();

    // Failed writes trip the guard without touching the snapshot
    h.gateway.set_offline(true);
    for _ in 0..3 {
        assert!(!h.cache.save_item(3, None).await);
    }
    assert_eq!(h.cache.saved_items(), before);

    // Backend is back, but we're inside the cooldown
    h.gateway.set_offline(false);
    let calls = h.gateway.calls().total();
    assert!(!h.cache.fetch_saved_items().await);

    assert_eq!(h.gateway.calls().total(), calls);
    assert_eq!(h.cache.saved_items(), before);
    assert_eq!(h.cache.len(), 2);
}

#[tokio::test]
async fn test_save_then_immediate_unsave_settles_on_not_saved() {
    let h = harness_with(Gateway::new().with_latency(Duration::from_millis(20)));

    let (saved, removed) = tokio::join!(
        h.cache.save_item(7, Some(snapshot("Barn 7"))),
        async {
            tokio::time::sleep(Duration::from_millis(1)).await;
            h.cache.remove_saved_item(&7).await
        },
    );

    assert!(saved);
    assert!(removed);
    assert!(!h.cache.is_item_saved(&7));
    assert!(h.gateway.rows_for("couple-1").is_empty());
}

#[tokio::test]
async fn test_double_toggle_race_settles_on_not_saved() {
    let h = harness_with(Gateway::new().with_latency(Duration::from_millis(10)));

    let (first, second) = tokio::join!(
        h.cache.toggle_saved_item(7, None),
        h.cache.toggle_saved_item(7, None),
    );

    assert!(first && second);
    assert!(!h.cache.is_item_saved(&7));
    assert!(h.gateway.rows_for("couple-1").is_empty());
}

#[tokio::test]
async fn test_stale_fetch_never_overwrites_newer_one() {
    let h = harness_with(Gateway::new().with_latency(Duration::from_millis(20)));

    // A slow refresh started before the save must not resurrect the old list
    let (_, saved) = tokio::join!(h.cache.fetch_saved_items(), async {
        tokio::time::sleep(Duration::from_millis(5)).await;
        h.cache.save_item(3, None).await
    });

    assert!(saved);
    assert!(h.cache.is_item_saved(&3));
}

#[tokio::test]
async fn test_loading_flag_while_request_in_flight() {
    let h = harness_with(Gateway::new().with_latency(Duration::from_millis(20)));
    assert!(!h.cache.is_loading());

    let (_, was_loading) = tokio::join!(h.cache.fetch_saved_items(), async {
        tokio::time::sleep(Duration::from_millis(5)).await;
        h.cache.is_loading()
    });

    assert!(was_loading);
    assert!(!h.cache.is_loading());
}

#[tokio::test]
async fn test_detach_discards_in_flight_result() {
    let h = harness_with(Gateway::new().with_latency(Duration::from_millis(50)));

    let (saved, _) = tokio::join!(h.cache.save_item(5, None), async {
        tokio::time::sleep(Duration::from_millis(5)).await;
        h.cache.detach();
    });

    assert!(!saved);
    assert!(!h.cache.is_item_saved(&5));
    // The request was dropped before the backend applied it
    assert!(h.gateway.rows_for("couple-1").is_empty());
    // Teardown is not a backend failure
    assert_eq!(h.cache.failure_count(), 0);
}

#[tokio::test]
async fn test_follows_session_changes() {
    let gateway = Arc::new(Gateway::new());
    let cache = Cache::new(gateway.clone(), &GuardConfig::default());
    let ctx = SessionContext::new();
    let events = ctx.subscribe();

    // Someone saved vendor 12 in an earlier session
    {
        use wedhub_core::SavedItemsGateway;
        gateway.insert_saved("couple-9", &12, None).await.unwrap();
    }

    tokio::join!(cache.follow_auth(events), async {
        ctx.sign_in(Session::new("couple-9", UserRole::Couple));
        wait_until(|| cache.is_item_saved(&12)).await;

        ctx.sign_out();
        wait_until(|| cache.is_empty() && cache.current_user().is_none()).await;

        cache.detach();
    });

    assert!(cache.current_user().is_none());
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}
