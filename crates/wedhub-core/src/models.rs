use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt::{Debug, Display};
use std::hash::Hash;

/// Anything that can identify a vendor in a saved-items row
///
/// The marketplace uses numeric ids in listings and string ids in a few
/// older screens; the cache is generic over both.
pub trait ItemKey:
    Clone + Eq + Hash + Debug + Display + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> ItemKey for T where
    T: Clone + Eq + Hash + Debug + Display + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// Display payload stored alongside a saved row
pub trait ItemPayload: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> ItemPayload for T where T: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{}

/// A user's "heart" on a vendor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SavedItem<K, P> {
    pub id: String,
    pub user_id: String,
    pub vendor_id: K,
    pub created_at: DateTime<Utc>,
    /// Denormalized vendor fields captured at save time
    #[serde(rename = "vendor_data")]
    pub vendor: Option<P>,
}

/// What a vendor card needs to render without a join
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct VendorSnapshot {
    pub name: String,
    pub category: String,
    pub location: String,
    #[serde(default)]
    pub logo_url: Option<String>,
    #[serde(default)]
    pub price_range: Option<String>,
}

/// Marketplace vendor listing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Vendor {
    pub id: i64,
    pub name: String,
    pub category: VendorCategory,
    pub location: String,
    pub logo_url: Option<String>,
    pub price_range: Option<String>,
    pub rating: Option<f32>,
}

impl Vendor {
    pub fn snapshot(&self) -> VendorSnapshot {
        VendorSnapshot {
            name: self.name.clone(),
            category: self.category.to_string(),
            location: self.location.clone(),
            logo_url: self.logo_url.clone(),
            price_range: self.price_range.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VendorCategory {
    Venue,
    Photography,
    Catering,
    Florist,
    Music,
    Attire,
    Planner,
    Other,
}

impl std::fmt::Display for VendorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            VendorCategory::Venue => "Venue",
            VendorCategory::Photography => "Photography",
            VendorCategory::Catering => "Catering",
            VendorCategory::Florist => "Florist",
            VendorCategory::Music => "Music",
            VendorCategory::Attire => "Attire",
            VendorCategory::Planner => "Planner",
            VendorCategory::Other => "Other",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    #[default]
    Couple,
    Vendor,
    Admin,
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UserRole::Couple => write!(f, "couple"),
            UserRole::Vendor => write!(f, "vendor"),
            UserRole::Admin => write!(f, "admin"),
        }
    }
}

impl std::str::FromStr for UserRole {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "couple" => Ok(UserRole::Couple),
            "vendor" => Ok(UserRole::Vendor),
            "admin" => Ok(UserRole::Admin),
            other => Err(crate::Error::ConfigError(format!("Unknown role: {}", other))),
        }
    }
}

/// A signed-in user as handed to us by the auth backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub email: Option<String>,
    pub role: UserRole,
    pub access_token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(user_id: impl Into<String>, role: UserRole) -> Self {
        Self {
            user_id: user_id.into(),
            email: None,
            role,
            access_token: String::new(),
            expires_at: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Auth events the backend emits; only the first two change what we cache
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthEvent {
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChange {
    pub event: AuthEvent,
    pub session: Option<Session>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saved_item_reads_vendor_data_column() {
        let json = r#"{
            "id": "row-1",
            "user_id": "u1",
            "vendor_id": 42,
            "created_at": "2026-05-01T10:00:00Z",
            "vendor_data": {"name": "Petal & Stem", "category": "Florist", "location": "Austin"}
        }"#;

        let item: SavedItem<i64, VendorSnapshot> = serde_json::from_str(json).unwrap();
        assert_eq!(item.vendor_id, 42);
        assert_eq!(item.vendor.unwrap().name, "Petal & Stem");
    }

    #[test]
    fn test_saved_item_without_vendor_data() {
        let json = r#"{"id":"r","user_id":"u","vendor_id":"abc","created_at":"2026-05-01T10:00:00Z"}"#;
        let item: SavedItem<String, VendorSnapshot> = serde_json::from_str(json).unwrap();
        assert!(item.vendor.is_none());
    }

    #[test]
    fn test_vendor_snapshot_copies_display_fields() {
        let vendor = Vendor {
            id: 7,
            name: "Golden Hour Studio".into(),
            category: VendorCategory::Photography,
            location: "Denver".into(),
            logo_url: None,
            price_range: Some("$$$".into()),
            rating: Some(4.8),
        };

        let snap = vendor.snapshot();
        assert_eq!(snap.category, "Photography");
        assert_eq!(snap.price_range.as_deref(), Some("$$$"));
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("Vendor".parse::<UserRole>().unwrap(), UserRole::Vendor);
        assert!("florist".parse::<UserRole>().is_err());
    }

    #[test]
    fn test_auth_event_wire_names() {
        let json = serde_json::to_string(&AuthEvent::SignedOut).unwrap();
        assert_eq!(json, "\"SIGNED_OUT\"");
    }
}
