//! Request and response bodies of the identity API.
//!
//! # Wire Format
//!
//! Token grants (`/auth/v1/token?grant_type=…`) answer with:
//!
//! ```json
//! {
//!     "access_token": "eyJ…",
//!     "token_type": "bearer",
//!     "expires_in": 3600,
//!     "refresh_token": "r3fr3sh",
//!     "user": {
//!         "id": "5eed…",
//!         "email": "aung@example.com",
//!         "user_metadata": { "name": "aung", "full_name": "Aung Kyaw" }
//!     }
//! }
//! ```
//!
//! Sign-up answers with the same shape when the account is usable right
//! away, and with a bare user object when e-mail confirmation is pending.

use serde::{Deserialize, Serialize};
use veil::Redact;

use super::{profile::SignUpFields, UserId};

/// Identity record as known to the identity service.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Redact)]
pub struct IdentityUser {
    pub id: UserId,

    #[redact(partial)]
    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub user_metadata: UserMetadata,
}

/// Free-form metadata, filled by sign-up or a federated provider.
///
/// E-mail sign-up stores the [`SignUpFields`] here, so `username`,
/// `status` and `country` survive until the profile row is created.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserMetadata {
    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub full_name: Option<String>,

    #[serde(default)]
    pub avatar_url: Option<String>,

    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub country: Option<String>,
}

/// Successful token grant.
#[derive(Clone, PartialEq, Eq, Deserialize, Redact)]
pub struct TokenResponse {
    #[redact]
    pub access_token: String,

    #[serde(default)]
    pub token_type: String,

    /// Lifetime of the access token in seconds.
    pub expires_in: u64,

    #[redact]
    pub refresh_token: String,

    pub user: IdentityUser,
}

/// Sign-up outcome: a session, or a user awaiting e-mail confirmation.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SignUpResponse {
    Session(TokenResponse),
    Pending(IdentityUser),
}

#[derive(Clone, Serialize, Redact)]
pub struct PasswordGrant<'a> {
    #[redact(partial)]
    pub email: &'a str,
    #[redact]
    pub password: &'a str,
}

#[derive(Clone, Serialize, Redact)]
pub struct RefreshGrant<'a> {
    #[redact]
    pub refresh_token: &'a str,
}

#[derive(Clone, Serialize, Redact)]
pub struct SignUpRequest<'a> {
    #[redact(partial)]
    pub email: &'a str,
    #[redact]
    pub password: &'a str,
    pub data: &'a SignUpFields,
}

#[derive(Clone, Serialize, Redact)]
pub struct RecoverRequest<'a> {
    #[redact(partial)]
    pub email: &'a str,
}

/// Error body of the identity API.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default, alias = "error_description", alias = "message")]
    pub msg: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_up_distinguishes_pending_confirmation() {
        let pending = r#"{"id": "u1", "email": "a@example.com"}"#;
        assert!(matches!(
            serde_json::from_str::<SignUpResponse>(pending).unwrap(),
            SignUpResponse::Pending(_)
        ));

        let session = r#"{
            "access_token": "a",
            "token_type": "bearer",
            "expires_in": 3600,
            "refresh_token": "r",
            "user": {"id": "u1"}
        }"#;
        assert!(matches!(
            serde_json::from_str::<SignUpResponse>(session).unwrap(),
            SignUpResponse::Session(_)
        ));
    }

    #[test]
    fn pending_user_keeps_sign_up_fields() {
        let pending = r#"{
            "id": "u1",
            "email": "a@example.com",
            "user_metadata": {"username": "golden_listener", "full_name": "Aung", "country": "Thailand"}
        }"#;
        let SignUpResponse::Pending(user) = serde_json::from_str(pending).unwrap() else {
            panic!("expected a pending user");
        };
        assert_eq!(
            user.user_metadata.username.as_deref(),
            Some("golden_listener")
        );
        assert_eq!(user.user_metadata.country.as_deref(), Some("Thailand"));
        assert_eq!(user.user_metadata.status, None);
    }

    #[test]
    fn secrets_are_redacted() {
        let grant = PasswordGrant {
            email: "a@example.com",
            password: "hunter22",
        };
        assert!(!format!("{grant:?}").contains("hunter22"));
    }
}
