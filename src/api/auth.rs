//! Admin auth session.
//!
//! The access token lives in an `AuthSession` value that is handed to the
//! calls that need it. It stops yielding a bearer token once expired and is
//! consumed by [`AuthSession::logout`].

use std::time::{Duration, Instant};

#[derive(Clone)]
pub struct AuthSession {
    token: String,
    expires_at: Instant,
}

impl AuthSession {
    /// Start a session for a freshly issued token
    pub fn issue(token: impl Into<String>, ttl: Duration) -> Self {
        Self::issued_at(token, Instant::now(), ttl)
    }

    fn issued_at(token: impl Into<String>, now: Instant, ttl: Duration) -> Self {
        Self {
            token: token.into(),
            expires_at: now + ttl,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Instant::now())
    }

    fn is_valid_at(&self, now: Instant) -> bool {
        now < self.expires_at
    }

    /// Token for an `Authorization: Bearer` header, `None` once expired
    pub fn bearer(&self) -> Option<&str> {
        self.is_valid().then_some(self.token.as_str())
    }

    /// End the session
    pub fn logout(self) {
        log::info!("Admin session closed");
    }
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_session_yields_token() {
        let session = AuthSession::issue("abc", Duration::from_secs(60));
        assert!(session.is_valid());
        assert_eq!(session.bearer(), Some("abc"));
    }

    #[test]
    fn test_expired_session_yields_nothing() {
        let now = Instant::now();
        let session = AuthSession::issued_at("abc", now, Duration::from_secs(60));
        assert!(session.is_valid_at(now + Duration::from_secs(59)));
        assert!(!session.is_valid_at(now + Duration::from_secs(60)));

        let expired = AuthSession::issue("abc", Duration::ZERO);
        assert_eq!(expired.bearer(), None);
        assert!(!expired.is_valid());
    }

    #[test]
    fn test_debug_hides_token() {
        let session = AuthSession::issue("super-secret", Duration::from_secs(60));
        assert!(!format!("{:?}", session).contains("super-secret"));
    }
}
