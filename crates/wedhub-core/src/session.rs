use chrono::{DateTime, Utc};
use std::sync::{PoisonError, RwLock};
use tokio::sync::broadcast;
use tracing::debug;

use crate::models::{AuthChange, AuthEvent, Session};

const CHANNEL_CAPACITY: usize = 16;

/// Who is signed in, plus a stream of changes
///
/// Built once at startup and handed to whatever needs it, rather than read
/// from a global, so the cache and router can be tested with a fake session.
pub struct SessionContext {
    current: RwLock<Option<Session>>,
    tx: broadcast::Sender<AuthChange>,
}

impl SessionContext {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            current: RwLock::new(None),
            tx,
        }
    }

    pub fn with_session(session: Session) -> Self {
        let ctx = Self::new();
        *ctx.current.write().unwrap_or_else(PoisonError::into_inner) = Some(session);
        ctx
    }

    pub fn current(&self) -> Option<Session> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn current_user(&self) -> Option<String> {
        self.current().map(|s| s.user_id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
        self.tx.subscribe()
    }

    pub fn sign_in(&self, session: Session) {
        debug!("Signed in as {}", session.user_id);
        self.replace(AuthEvent::SignedIn, Some(session));
    }

    pub fn sign_out(&self) {
        debug!("Signed out");
        self.replace(AuthEvent::SignedOut, None);
    }

    /// Swap in a fresh access token for the current user
    ///
    /// Returns false when nobody is signed in.
    pub fn refresh_token(&self, access_token: String, expires_at: Option<DateTime<Utc>>) -> bool {
        let Some(mut session) = self.current() else {
            return false;
        };
        session.access_token = access_token;
        session.expires_at = expires_at;
        self.replace(AuthEvent::TokenRefreshed, Some(session));
        true
    }

    fn replace(&self, event: AuthEvent, session: Option<Session>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = session.clone();
        // No subscribers is fine
        let _ = self.tx.send(AuthChange { event, session });
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}
