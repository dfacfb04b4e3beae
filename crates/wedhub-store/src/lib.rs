// SQLite-backed local store
// Holds saved rows for offline mode and the recently viewed list

pub mod store;

pub use store::{LocalStore, RecentRow, SavedRow, StoreError};
