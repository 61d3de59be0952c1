//! Wire types of the hosted backend.
//!
//! The backend exposes three surfaces that radiom talks to:
//! * a PostgREST-style table API under `/rest/v1` ([`station`],
//!   [`comment`], [`profile`], [`waitlist`])
//! * a GoTrue-style identity API under `/auth/v1` ([`auth`])
//! * a Phoenix-style realtime websocket under `/realtime/v1` ([`realtime`])
//!
//! Everything here is plain data: (de)serialization only, no I/O. Rows
//! are deserialized leniently: optional columns default when absent so
//! that schema additions on the backend do not break older clients.
//!
//! # Example
//!
//! ```rust
//! use radiom::backend::Station;
//!
//! let json = r#"[{"id": "1", "name": "Golden FM", "stream_url": "https://example.com/live"}]"#;
//! let stations: Vec<Station> = serde_json::from_str(json)?;
//! assert_eq!(stations[0].name, "Golden FM");
//! ```

pub mod auth;
pub mod comment;
pub mod profile;
pub mod realtime;
pub mod station;
pub mod waitlist;

pub use auth::{IdentityUser, TokenResponse, UserMetadata};
pub use comment::{Author, Comment, NewComment};
pub use profile::{NewProfile, Profile, ProfileChanges, SignUpFields};
pub use station::Station;
pub use waitlist::{Price, WaitlistEntry};

/// Declares a string identifier newtype.
///
/// Row ids are UUIDs on the backend, but the built-in demo catalog uses
/// short numeric strings, so ids are kept opaque.
macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Clone,
            Debug,
            Default,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Identifier of a [`Station`].
    StationId
);

string_id!(
    /// Identifier of a user, shared by the identity record and the profile.
    UserId
);

string_id!(
    /// Identifier of a [`Comment`].
    CommentId
);
