use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};
use veil::Redact;

use crate::{
    backend::{IdentityUser, TokenResponse, UserId},
    util::now_from_epoch,
};

/// Identity session: bearer token, refresh token and the identity they
/// belong to.
///
/// Persisted across restarts, so expiry is kept as seconds since the epoch.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Redact)]
pub struct UserToken {
    pub user: IdentityUser,

    #[redact]
    pub token: String,

    #[redact]
    pub refresh_token: String,

    pub expires_at: u64,
}

impl UserToken {
    /// Tokens this close to expiry are refreshed before use. This prevents
    /// request errors when expiry is checked with only seconds on the clock.
    pub const EXPIRATION_THRESHOLD: Duration = Duration::from_secs(60);

    #[must_use]
    pub fn user_id(&self) -> &UserId {
        &self.user.id
    }

    #[must_use]
    pub fn time_to_live(&self) -> Duration {
        Duration::from_secs(self.expires_at.saturating_sub(now_from_epoch()))
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.time_to_live() <= Self::EXPIRATION_THRESHOLD
    }
}

impl From<TokenResponse> for UserToken {
    fn from(response: TokenResponse) -> Self {
        Self {
            expires_at: now_from_epoch().saturating_add(response.expires_in),
            user: response.user,
            token: response.access_token,
            refresh_token: response.refresh_token,
        }
    }
}

/// Names the session without revealing its tokens.
impl fmt::Display for UserToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session of user {}", self.user.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::UserMetadata;

    fn token(expires_at: u64) -> UserToken {
        UserToken {
            user: IdentityUser {
                id: UserId::from("u1"),
                email: None,
                user_metadata: UserMetadata::default(),
            },
            token: "secret".to_owned(),
            refresh_token: "refresh".to_owned(),
            expires_at,
        }
    }

    #[test]
    fn expires_within_threshold() {
        assert!(token(now_from_epoch() + 30).is_expired());
        assert!(!token(now_from_epoch() + 3600).is_expired());
        assert_eq!(token(0).time_to_live(), Duration::ZERO);
    }

    #[test]
    fn debug_output_hides_secrets() {
        let debug = format!("{:?}", token(0));
        assert!(!debug.contains("secret"));

        let display = token(0).to_string();
        assert_eq!(display, "session of user u1");
        assert!(!display.contains("refresh"));
    }
}
