//! Control-plane session tokens.
//!
//! Owned by the session keeper and republished to consumers on every
//! rotation. Token material is held in [`SecretString`] so it never lands in
//! debug output or logs; persistence serializes it explicitly through a
//! dedicated struct in the agent crate.

use chrono::{DateTime, TimeZone, Utc};
use secrecy::SecretString;

/// Access/refresh token pair for one authenticated control-plane session.
#[derive(Debug, Clone)]
pub struct SessionTokens {
    /// Bearer token for authenticated endpoints.
    pub access_token: SecretString,

    /// Refresh token, when the grant issued one. Rotates on refresh.
    pub refresh_token: Option<SecretString>,

    /// Access token expiry, milliseconds since the Unix epoch. Strictly
    /// increases across rotations.
    pub expires_at_ms: i64,

    /// User the session belongs to.
    pub user_id: String,

    /// Organization the session belongs to, when the identity provider
    /// supplied one.
    pub org_id: Option<String>,
}

impl SessionTokens {
    /// Access token expiry as a UTC timestamp.
    ///
    /// Returns `None` for an out-of-range millisecond value.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.expires_at_ms).single()
    }

    /// Returns `true` when the access token expires within `window`.
    #[must_use]
    pub fn expires_within(&self, window: std::time::Duration) -> bool {
        let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
        let now_ms = Utc::now().timestamp_millis();
        self.expires_at_ms.saturating_sub(now_ms) <= window_ms
    }

    /// Returns `true` when a refresh token is present.
    #[must_use]
    pub const fn can_refresh(&self) -> bool {
        self.refresh_token.is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn tokens(expires_at_ms: i64) -> SessionTokens {
        SessionTokens {
            access_token: SecretString::new("at-1".to_string()),
            refresh_token: Some(SecretString::new("rt-1".to_string())),
            expires_at_ms,
            user_id: "user-1".to_string(),
            org_id: Some("org-1".to_string()),
        }
    }

    #[test]
    fn test_expires_within_window() {
        let soon = Utc::now().timestamp_millis() + 60_000;
        let tokens = tokens(soon);
        assert!(tokens.expires_within(Duration::from_secs(300)));
        assert!(!tokens.expires_within(Duration::from_secs(10)));
    }

    #[test]
    fn test_already_expired_counts_as_expiring() {
        let past = Utc::now().timestamp_millis() - 1_000;
        assert!(tokens(past).expires_within(Duration::from_secs(300)));
    }

    #[test]
    fn test_debug_redacts_token_material() {
        let tokens = tokens(0);
        let debug = format!("{tokens:?}");
        assert!(!debug.contains("at-1"));
        assert!(!debug.contains("rt-1"));
    }
}
