//! Rows of the `users` table: the application profile of an identity.

use serde::{Deserialize, Serialize};
use veil::Redact;

use super::{auth::IdentityUser, UserId};

/// Application profile of a signed-in user.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Redact)]
pub struct Profile {
    pub id: UserId,

    #[redact(partial)]
    #[serde(default)]
    pub email: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub full_name: String,

    /// Free-form status line.
    #[serde(default)]
    pub status: String,

    #[serde(default)]
    pub country: String,

    #[serde(default)]
    pub avatar_url: Option<String>,

    #[serde(default)]
    pub is_premium: bool,

    #[serde(default)]
    pub is_guest: bool,

    #[serde(default)]
    pub created_at: Option<String>,
}

impl Profile {
    /// Minimal profile for an identity whose profile row is missing.
    #[must_use]
    pub fn from_identity(user: &IdentityUser) -> Self {
        let email = user.email.clone().unwrap_or_default();
        Self {
            id: user.id.clone(),
            username: email.split('@').next().unwrap_or_default().to_owned(),
            full_name: user.user_metadata.full_name.clone().unwrap_or_default(),
            avatar_url: user.user_metadata.avatar_url.clone(),
            email,
            status: String::new(),
            country: String::new(),
            is_premium: false,
            is_guest: false,
            created_at: None,
        }
    }
}

/// Profile fields collected at sign-up.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignUpFields {
    pub username: String,
    pub full_name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

/// Body of a profile insert.
#[derive(Clone, PartialEq, Eq, Serialize, Redact)]
pub struct NewProfile {
    pub id: UserId,
    #[redact(partial)]
    pub email: String,
    pub username: String,
    pub full_name: String,
    pub status: String,
    pub country: String,
    pub avatar_url: Option<String>,
    pub is_premium: bool,
    pub is_guest: bool,
}

impl NewProfile {
    /// Status line for accounts that did not choose one.
    pub const DEFAULT_STATUS: &'static str = "Music lover";

    /// Country for accounts that did not choose one.
    pub const DEFAULT_COUNTRY: &'static str = "Myanmar 🇲🇲";

    /// Profile row for a fresh e-mail sign-up.
    #[must_use]
    pub fn from_sign_up(id: UserId, email: &str, fields: &SignUpFields) -> Self {
        Self {
            id,
            email: email.to_owned(),
            username: fields.username.clone(),
            full_name: fields.full_name.clone(),
            status: fields
                .status
                .clone()
                .unwrap_or_else(|| Self::DEFAULT_STATUS.to_owned()),
            country: fields
                .country
                .clone()
                .unwrap_or_else(|| Self::DEFAULT_COUNTRY.to_owned()),
            avatar_url: None,
            is_premium: false,
            is_guest: false,
        }
    }
}

/// Partial profile update. Absent fields are left untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ProfileChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl ProfileChanges {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.username.is_none()
            && self.full_name.is_none()
            && self.status.is_none()
            && self.country.is_none()
            && self.avatar_url.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_up_defaults_status() {
        let fields = SignUpFields {
            username: "aung".to_owned(),
            full_name: "Aung Kyaw".to_owned(),
            ..Default::default()
        };
        let profile = NewProfile::from_sign_up(UserId::from("u1"), "a@example.com", &fields);
        assert_eq!(profile.status, NewProfile::DEFAULT_STATUS);
        assert_eq!(profile.country, NewProfile::DEFAULT_COUNTRY);
        assert!(!profile.is_premium);

        let chosen = SignUpFields {
            country: Some("Thailand".to_owned()),
            ..fields
        };
        let profile = NewProfile::from_sign_up(UserId::from("u1"), "a@example.com", &chosen);
        assert_eq!(profile.country, "Thailand");
    }

    #[test]
    fn changes_skip_absent_fields() {
        let changes = ProfileChanges {
            status: Some("listening".to_owned()),
            ..Default::default()
        };
        let json = serde_json::to_string(&changes).unwrap();
        assert_eq!(json, r#"{"status":"listening"}"#);
        assert!(ProfileChanges::default().is_empty());
    }
}
