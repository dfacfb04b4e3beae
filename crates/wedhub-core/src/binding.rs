// View-facing adapters over the saved-vendor cache
use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use std::sync::Arc;

use crate::models::{ItemKey, ItemPayload, SavedItem, Vendor, VendorSnapshot};
use crate::saved::SavedItemCache;

/// Something a card can hand to the "save" button
pub trait SaveTarget<K, P> {
    fn save_key(&self) -> K;
    fn save_snapshot(&self) -> Option<P>;
}

impl SaveTarget<i64, VendorSnapshot> for Vendor {
    fn save_key(&self) -> i64 {
        self.id
    }

    fn save_snapshot(&self) -> Option<VendorSnapshot> {
        Some(self.snapshot())
    }
}

/// Text a saved row can be searched by
pub trait Searchable {
    fn search_text(&self) -> String;
}

impl Searchable for VendorSnapshot {
    fn search_text(&self) -> String {
        format!("{} {} {}", self.name, self.category, self.location)
    }
}

/// What cards, dashboards and the saved list bind to
///
/// Listing cards pass full vendor objects; older screens only have an id.
/// Both go through the same cache instead of two copies of it.
pub struct SavedVendorsView<K: ItemKey, P: ItemPayload> {
    cache: Arc<SavedItemCache<K, P>>,
}

impl<K: ItemKey, P: ItemPayload> Clone for SavedVendorsView<K, P> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
        }
    }
}

impl<K: ItemKey, P: ItemPayload> SavedVendorsView<K, P> {
    pub fn new(cache: Arc<SavedItemCache<K, P>>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<SavedItemCache<K, P>> {
        &self.cache
    }

    pub fn is_saved(&self, vendor_id: &K) -> bool {
        self.cache.is_item_saved(vendor_id)
    }

    pub fn is_loading(&self) -> bool {
        self.cache.is_loading()
    }

    pub fn items(&self) -> Vec<SavedItem<K, P>> {
        self.cache.saved_items()
    }

    pub fn count(&self) -> usize {
        self.cache.len()
    }

    pub async fn refresh(&self) -> bool {
        self.cache.fetch_saved_items().await
    }

    /// Heart button on a card that has the whole vendor
    pub async fn toggle<T: SaveTarget<K, P>>(&self, target: &T) -> bool {
        self.cache
            .toggle_saved_item(target.save_key(), target.save_snapshot())
            .await
    }

    /// Heart button where all we know is the id
    pub async fn toggle_id(&self, vendor_id: &K) -> bool {
        self.cache.toggle_saved_item(vendor_id.clone(), None).await
    }

    pub async fn save<T: SaveTarget<K, P>>(&self, target: &T) -> bool {
        self.cache
            .save_item(target.save_key(), target.save_snapshot())
            .await
    }

    pub async fn remove(&self, vendor_id: &K) -> bool {
        self.cache.remove_saved_item(vendor_id).await
    }
}

impl<K: ItemKey, P: ItemPayload + Searchable> SavedVendorsView<K, P> {
    /// Saved vendors matching `query`, best match first
    ///
    /// An empty query returns everything in snapshot order. Rows saved
    /// without display fields can't match a non-empty query.
    pub fn filter_saved(&self, query: &str) -> Vec<SavedItem<K, P>> {
        let query = query.trim();
        let items = self.cache.saved_items();
        if query.is_empty() {
            return items;
        }

        let matcher = SkimMatcherV2::default();
        let mut scored: Vec<(i64, SavedItem<K, P>)> = items
            .into_iter()
            .filter_map(|item| {
                let text = item.vendor.as_ref()?.search_text();
                matcher.fuzzy_match(&text, query).map(|score| (score, item))
            })
            .collect();

        // Stable sort keeps newest-first among equal scores
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.into_iter().map(|(_, item)| item).collect()
    }
}
