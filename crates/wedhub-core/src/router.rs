use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::{Session, UserRole};
use crate::Result;

/// Places a user can ask to go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Home,
    Search,
    Vendor(i64),
    SavedVendors,
    CoupleDashboard,
    VendorDashboard,
    AdminDashboard,
    Login { return_to: Option<String> },
    Onboarding(UserRole),
    ApplicationPending,
}

impl Route {
    /// Parse a path like `/vendors/42` or `/login?return_to=%2Fsaved`
    ///
    /// The query string only matters for the login route.
    pub fn from_path(path: &str) -> Option<Self> {
        let (path, query) = path.trim().split_once('?').unwrap_or((path.trim(), ""));
        let trimmed = path.trim_end_matches('/');
        let segments: Vec<&str> = trimmed.split('/').filter(|s| !s.is_empty()).collect();

        match segments.as_slice() {
            [] => Some(Route::Home),
            ["search"] => Some(Route::Search),
            ["vendors", id] => id.parse().ok().map(Route::Vendor),
            ["saved"] => Some(Route::SavedVendors),
            ["dashboard", "couple"] => Some(Route::CoupleDashboard),
            ["dashboard", "vendor"] => Some(Route::VendorDashboard),
            ["dashboard", "admin"] => Some(Route::AdminDashboard),
            ["login"] => Some(Route::Login {
                return_to: query_param(query, "return_to"),
            }),
            ["onboarding", role] => role.parse().ok().map(Route::Onboarding),
            ["application-pending"] => Some(Route::ApplicationPending),
            _ => None,
        }
    }

    pub fn path(&self) -> String {
        match self {
            Route::Home => "/".to_string(),
            Route::Search => "/search".to_string(),
            Route::Vendor(id) => format!("/vendors/{}", id),
            Route::SavedVendors => "/saved".to_string(),
            Route::CoupleDashboard => "/dashboard/couple".to_string(),
            Route::VendorDashboard => "/dashboard/vendor".to_string(),
            Route::AdminDashboard => "/dashboard/admin".to_string(),
            Route::Login { return_to: None } => "/login".to_string(),
            Route::Login {
                return_to: Some(back),
            } => format!("/login?return_to={}", urlencoding::encode(back)),
            Route::Onboarding(role) => format!("/onboarding/{}", role),
            Route::ApplicationPending => "/application-pending".to_string(),
        }
    }

    fn is_public(&self) -> bool {
        matches!(
            self,
            Route::Home | Route::Search | Route::Vendor(_) | Route::Login { .. }
        )
    }

    /// Routes that don't care whether onboarding is done
    fn skips_profile_check(&self) -> bool {
        matches!(self, Route::Onboarding(_) | Route::ApplicationPending)
    }

    fn required_role(&self) -> Option<UserRole> {
        match self {
            Route::CoupleDashboard | Route::SavedVendors => Some(UserRole::Couple),
            Route::VendorDashboard => Some(UserRole::Vendor),
            Route::AdminDashboard => Some(UserRole::Admin),
            _ => None,
        }
    }
}

fn query_param(query: &str, name: &str) -> Option<String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .and_then(|(_, value)| urlencoding::decode(value).ok())
        .map(|value| value.into_owned())
        .filter(|value| !value.is_empty())
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProfileStatus {
    pub completed: bool,
    pub vendor_application: Option<ApplicationStatus>,
}

/// Where a signed-in user lands by default
pub fn home_for(role: UserRole) -> Route {
    match role {
        UserRole::Couple => Route::CoupleDashboard,
        UserRole::Vendor => Route::VendorDashboard,
        UserRole::Admin => Route::AdminDashboard,
    }
}

/// Decide where a navigation actually ends up
pub fn resolve_route(session: Option<&Session>, profile: &ProfileStatus, requested: Route) -> Route {
    let Some(session) = session else {
        if requested.is_public() {
            return requested;
        }
        return Route::Login {
            return_to: Some(requested.path()),
        };
    };

    // Already signed in; the login page has nothing to offer
    if let Route::Login { return_to } = &requested {
        return return_to
            .as_deref()
            .and_then(Route::from_path)
            .filter(|r| !matches!(r, Route::Login { .. }))
            .map(|r| resolve_route(Some(session), profile, r))
            .unwrap_or_else(|| home_for(session.role));
    }

    if !requested.is_public()
        && !requested.skips_profile_check()
        && !profile.completed
        && session.role != UserRole::Admin
    {
        return Route::Onboarding(session.role);
    }

    if session.role == UserRole::Vendor
        && requested == Route::VendorDashboard
        && profile.vendor_application != Some(ApplicationStatus::Approved)
    {
        return Route::ApplicationPending;
    }

    match requested.required_role() {
        Some(role) if role != session.role && session.role != UserRole::Admin => home_for(session.role),
        _ => requested,
    }
}

/// Reads profile completeness from wherever profiles live
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ProfileLookup: Send + Sync {
    async fn profile_status(&self, user_id: &str) -> Result<ProfileStatus>;
}

pub struct AuthRouter<L: ProfileLookup> {
    lookup: L,
}

impl<L: ProfileLookup> AuthRouter<L> {
    pub fn new(lookup: L) -> Self {
        Self { lookup }
    }

    /// Like `resolve_route`, fetching the profile when there is a session
    ///
    /// A failed lookup counts as an unfinished profile, which sends the user
    /// to onboarding instead of erroring.
    pub async fn route(&self, session: Option<&Session>, requested: Route) -> Route {
        let profile = match session {
            Some(s) if !requested.is_public() || matches!(requested, Route::Login { .. }) => {
                match self.lookup.profile_status(&s.user_id).await {
                    Ok(profile) => profile,
                    Err(e) => {
                        warn!("Profile lookup failed for {}: {}", s.user_id, e);
                        ProfileStatus::default()
                    }
                }
            }
            _ => ProfileStatus {
                completed: true,
                vendor_application: None,
            },
        };

        resolve_route(session, &profile, requested)
    }
}
