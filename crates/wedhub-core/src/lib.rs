// Client core for the wedding marketplace: saved vendors, sessions, routing
pub mod binding;
pub mod config;
pub mod error;
pub mod gateway;
pub mod guard;
pub mod models;
pub mod providers;
pub mod recent;
pub mod router;
pub mod saved;
pub mod session;

pub use binding::{SaveTarget, SavedVendorsView, Searchable};
pub use config::Config;
pub use error::Error;
pub use gateway::SavedItemsGateway;
pub use guard::{Clock, FailureGuard, GuardConfig, GuardState, ManualClock, SystemClock};
pub use models::{AuthChange, AuthEvent, SavedItem, Session, UserRole, Vendor, VendorSnapshot};
pub use recent::{RecentView, RecentlyViewed};
pub use router::{resolve_route, AuthRouter, ProfileLookup, ProfileStatus, Route};
pub use saved::SavedItemCache;
pub use session::SessionContext;

/// Result type alias because typing Result<T, Error> everywhere is tedious
pub type Result<T> = std::result::Result<T, Error>;
