//! Rows of the `comments` table, joined with a minimal author summary.
//!
//! # Wire Format
//!
//! ```json
//! {
//!     "id": "c0ffee…",
//!     "user_id": "5eed…",
//!     "station_id": "7b7c…",
//!     "content": "Great song!",
//!     "created_at": "2024-06-09T12:34:56.789+00:00",
//!     "user": { "id": "5eed…", "username": "aung", "avatar_url": null }
//! }
//! ```
//!
//! Comments delivered over the push channel carry no `user` join.

use serde::{Deserialize, Serialize};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use super::{CommentId, StationId, UserId};

/// A short text message posted on a station.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub user_id: UserId,
    pub station_id: StationId,
    pub content: String,
    pub created_at: String,

    #[serde(default)]
    pub user: Option<Author>,
}

/// Author summary joined onto comment reads.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Author {
    pub id: UserId,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Body of a comment insert.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NewComment<'a> {
    pub station_id: &'a StationId,
    pub content: &'a str,
    pub user_id: &'a UserId,
}

impl Comment {
    /// Maximum number of characters in a comment body.
    pub const MAX_LEN: usize = 500;

    /// Name to display for the author.
    #[must_use]
    pub fn author_name(&self) -> &str {
        self.user
            .as_ref()
            .and_then(|author| author.username.as_deref())
            .unwrap_or("Anonymous")
    }

    /// Creation time, if the backend sent a parseable timestamp.
    #[must_use]
    pub fn posted_at(&self) -> Option<OffsetDateTime> {
        OffsetDateTime::parse(&self.created_at, &Rfc3339).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn author_falls_back_to_anonymous() {
        let json = r#"{
            "id": "c1",
            "user_id": "u1",
            "station_id": "s1",
            "content": "hello",
            "created_at": "2024-06-09T12:34:56.789+00:00"
        }"#;
        let comment: Comment = serde_json::from_str(json).unwrap();
        assert_eq!(comment.author_name(), "Anonymous");
        assert_eq!(comment.posted_at().map(|t| t.hour()), Some(12));
    }

    #[test]
    fn joined_author_is_used() {
        let json = r#"{
            "id": "c1",
            "user_id": "u1",
            "station_id": "s1",
            "content": "hello",
            "created_at": "not a timestamp",
            "user": {"id": "u1", "username": "aung", "avatar_url": null}
        }"#;
        let comment: Comment = serde_json::from_str(json).unwrap();
        assert_eq!(comment.author_name(), "aung");
        assert!(comment.posted_at().is_none());
    }
}
