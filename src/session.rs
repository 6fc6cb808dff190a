use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, SystemTime};
use uuid::Uuid;

const SESSION_DURATION: u64 = 24 * 60 * 60; // 24 hours in seconds

/// Per-session state handed explicitly to every controller call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionContext {
    /// Email the user identified with
    pub user_email: Option<String>,

    /// Set once a license check succeeds
    pub authorized: bool,

    /// Records sheet resolved for this session
    pub sheet_id: Option<String>,

    /// Folder holding the sheet and photos (per-user folder variant)
    pub folder_id: Option<String>,
}

impl SessionContext {
    pub fn for_email(email: &str) -> Self {
        SessionContext {
            user_email: Some(email.to_string()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
struct Session {
    context: SessionContext,
    expires_at: SystemTime,
}

/// Live sessions of one server, keyed by the session cookie.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `context` under a fresh session id and return the id.
    pub fn create(&self, context: SessionContext) -> String {
        let session_id = Uuid::new_v4().to_string();
        let expires_at = SystemTime::now() + Duration::from_secs(SESSION_DURATION);

        let mut sessions = self.sessions.write().unwrap_or_else(|p| p.into_inner());
        sessions.retain(|_, s| s.expires_at > SystemTime::now());
        sessions.insert(
            session_id.clone(),
            Session {
                context,
                expires_at,
            },
        );

        session_id
    }

    /// Context of a live session, or `None` if unknown or expired.
    pub fn get(&self, session_id: &str) -> Option<SessionContext> {
        let sessions = self.sessions.read().unwrap_or_else(|p| p.into_inner());

        match sessions.get(session_id) {
            Some(session) if session.expires_at > SystemTime::now() => {
                Some(session.context.clone())
            }
            _ => None,
        }
    }

    /// Write back a context after a controller call changed it.
    pub fn update(&self, session_id: &str, context: SessionContext) {
        let mut sessions = self.sessions.write().unwrap_or_else(|p| p.into_inner());
        if let Some(session) = sessions.get_mut(session_id) {
            session.context = context;
        }
    }

    pub fn remove(&self, session_id: &str) {
        let mut sessions = self.sessions.write().unwrap_or_else(|p| p.into_inner());
        sessions.remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sessions_are_isolated() {
        let registry = SessionRegistry::new();
        let a = registry.create(SessionContext::for_email("a@x.com"));
        let b = registry.create(SessionContext::for_email("b@x.com"));

        let mut ctx = registry.get(&a).unwrap();
        ctx.authorized = true;
        registry.update(&a, ctx);

        assert!(registry.get(&a).unwrap().authorized);
        assert!(!registry.get(&b).unwrap().authorized);

        registry.remove(&a);
        assert!(registry.get(&a).is_none());
        assert!(registry.get("missing").is_none());
    }
}
