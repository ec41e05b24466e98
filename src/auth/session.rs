//! Session lifecycle: anonymous creation, OAuth promotion, cookie check,
//! and logout-with-preference-continuity. `spec.md` §3 "Session", §4.7.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use mockable::Clock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    LoggedOut,
    Expired,
    Terminated,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub status: SessionStatus,
    pub oauth_state: Option<String>,
    pub oauth_code_verifier: Option<String>,
    pub redirect_uri: Option<String>,
    pub logged_in_user_id: Option<Uuid>,
    pub logged_in_at: Option<DateTime<Utc>>,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.status == SessionStatus::Active && self.logged_in_user_id.is_some()
    }
}

/// In-memory session store plus the per-session preference map, keyed
/// together since logout must copy preferences atomically with session
/// creation.
pub struct SessionStore {
    sessions: DashMap<Uuid, Session>,
    preferences: DashMap<Uuid, crate::auth::preferences::Preferences>,
    clock: Arc<dyn Clock>,
}

impl SessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            preferences: DashMap::new(),
            clock: Arc::new(mockable::DefaultClock),
        }
    }

    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { sessions: DashMap::new(), preferences: DashMap::new(), clock }
    }

    #[must_use]
    pub fn create_anonymous(&self, user_agent: Option<String>) -> Session {
        let now = self.clock.utc();
        let session = Session {
            id: Uuid::new_v4(),
            status: SessionStatus::Active,
            oauth_state: None,
            oauth_code_verifier: None,
            redirect_uri: None,
            logged_in_user_id: None,
            logged_in_at: None,
            last_activity_at: now,
            expires_at: None,
            user_agent,
            created_at: now,
        };
        self.sessions.insert(session.id, session.clone());
        session
    }

    pub fn create_oauth_pending(&self, state: String, code_verifier: Option<String>, redirect_uri: String) -> Session {
        let now = self.clock.utc();
        let session = Session {
            id: Uuid::new_v4(),
            status: SessionStatus::Active,
            oauth_state: Some(state),
            oauth_code_verifier: code_verifier,
            redirect_uri: Some(redirect_uri),
            logged_in_user_id: None,
            logged_in_at: None,
            last_activity_at: now,
            expires_at: None,
            user_agent: None,
            created_at: now,
        };
        self.sessions.insert(session.id, session.clone());
        session
    }

    pub fn promote_to_logged_in(&self, id: Uuid, user_id: Uuid, token_ttl: Duration) -> Option<Session> {
        let mut entry = self.sessions.get_mut(&id)?;
        let now = self.clock.utc();
        entry.logged_in_user_id = Some(user_id);
        entry.logged_in_at = Some(now);
        entry.last_activity_at = now;
        entry.expires_at = Some(now + token_ttl);
        Some(entry.clone())
    }

    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<Session> {
        self.sessions.get(&id).map(|entry| entry.value().clone())
    }

    /// Returns the session iff it is currently `active`. Touches
    /// `last_activity_at` as a side effect.
    pub fn get_active(&self, id: Uuid) -> Option<Session> {
        let mut entry = self.sessions.get_mut(&id)?;
        if entry.status != SessionStatus::Active {
            return None;
        }
        entry.last_activity_at = self.clock.utc();
        Some(entry.clone())
    }

    pub fn bump_activity(&self, id: Uuid) {
        if let Some(mut entry) = self.sessions.get_mut(&id) {
            entry.last_activity_at = self.clock.utc();
        }
    }

    pub fn mark_logged_out(&self, id: Uuid) {
        if let Some(mut entry) = self.sessions.get_mut(&id) {
            entry.status = SessionStatus::LoggedOut;
        }
    }

    /// Logout: create a fresh anonymous session, copy preferences across,
    /// and mark the old session `logged_out`. Preference continuity across
    /// the logout boundary without leaking identity.
    pub fn logout(&self, id: Uuid) -> Session {
        let fresh = self.create_anonymous(None);
        if let Some(prefs) = self.preferences.get(&id) {
            self.preferences.insert(fresh.id, prefs.value().clone());
        }
        self.mark_logged_out(id);
        fresh
    }

    #[must_use]
    pub fn preferences(&self, id: Uuid) -> crate::auth::preferences::Preferences {
        self.preferences.get(&id).map(|entry| entry.value().clone()).unwrap_or_default()
    }

    pub fn set_preferences(&self, id: Uuid, preferences: crate::auth::preferences::Preferences) {
        self.preferences.insert(id, preferences);
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
