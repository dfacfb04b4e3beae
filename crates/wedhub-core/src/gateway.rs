use crate::models::{ItemKey, ItemPayload, SavedItem};
use crate::Result;

/// The narrow slice of the backend the saved-vendor cache talks to
///
/// Rows are keyed by `(user, vendor)`; the backend enforces that there is at
/// most one. Implementations map "duplicate row" onto `Error::Conflict` and
/// treat deleting a missing row as success.
#[async_trait::async_trait]
pub trait SavedItemsGateway<K: ItemKey, P: ItemPayload>: Send + Sync {
    /// All rows for `user_id`, newest first, with display fields attached
    async fn select_saved(&self, user_id: &str) -> Result<Vec<SavedItem<K, P>>>;

    async fn insert_saved(&self, user_id: &str, vendor_id: &K, snapshot: Option<&P>) -> Result<()>;

    async fn delete_saved(&self, user_id: &str, vendor_id: &K) -> Result<()>;
}
