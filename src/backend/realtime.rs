//! Messages of the realtime websocket.
//!
//! The realtime service speaks the Phoenix channel protocol: every frame
//! is a JSON envelope with a topic, an event name, a payload and an
//! optional reference that replies echo back.
//!
//! # Wire Format
//!
//! Joining a topic with a change filter:
//!
//! ```json
//! {
//!     "topic": "realtime:comments:7b7c…",
//!     "event": "phx_join",
//!     "payload": {
//!         "config": {
//!             "postgres_changes": [
//!                 {"event": "*", "schema": "public", "table": "comments", "filter": "station_id=eq.7b7c…"}
//!             ]
//!         }
//!     },
//!     "ref": "1"
//! }
//! ```
//!
//! A change notification:
//!
//! ```json
//! {
//!     "topic": "realtime:comments:7b7c…",
//!     "event": "postgres_changes",
//!     "payload": {
//!         "ids": [123],
//!         "data": {"type": "INSERT", "table": "comments", "record": {…}, "old_record": null}
//!     },
//!     "ref": null
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{comment::Comment, CommentId, StationId};

/// Topic of the server heartbeat.
pub const PHOENIX_TOPIC: &str = "phoenix";

/// Phoenix channel envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

impl Envelope {
    pub const JOIN: &'static str = "phx_join";
    pub const LEAVE: &'static str = "phx_leave";
    pub const REPLY: &'static str = "phx_reply";
    pub const ERROR: &'static str = "phx_error";
    pub const CLOSE: &'static str = "phx_close";
    pub const HEARTBEAT: &'static str = "heartbeat";
    pub const CHANGES: &'static str = "postgres_changes";

    /// Topic carrying the comments of one station.
    #[must_use]
    pub fn comments_topic(station: &StationId) -> String {
        format!("realtime:comments:{station}")
    }

    /// Join request subscribing to comment changes of one station.
    #[must_use]
    pub fn join_comments(station: &StationId, access_token: &str, reference: u64) -> Self {
        Self {
            topic: Self::comments_topic(station),
            event: Self::JOIN.to_owned(),
            payload: json!({
                "config": {
                    "broadcast": { "self": false },
                    "presence": { "key": "" },
                    "postgres_changes": [{
                        "event": "*",
                        "schema": "public",
                        "table": "comments",
                        "filter": format!("station_id=eq.{station}"),
                    }],
                },
                "access_token": access_token,
            }),
            reference: Some(reference.to_string()),
        }
    }

    #[must_use]
    pub fn heartbeat(reference: u64) -> Self {
        Self {
            topic: PHOENIX_TOPIC.to_owned(),
            event: Self::HEARTBEAT.to_owned(),
            payload: json!({}),
            reference: Some(reference.to_string()),
        }
    }

    #[must_use]
    pub fn leave(topic: &str, reference: u64) -> Self {
        Self {
            topic: topic.to_owned(),
            event: Self::LEAVE.to_owned(),
            payload: json!({}),
            reference: Some(reference.to_string()),
        }
    }

    /// Status of a `phx_reply`, like `"ok"` or `"error"`.
    #[must_use]
    pub fn reply_status(&self) -> Option<&str> {
        if self.event == Self::REPLY {
            self.payload.get("status").and_then(Value::as_str)
        } else {
            None
        }
    }
}

/// Kind of a table change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Payload of a `postgres_changes` event.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ChangesPayload {
    pub data: Change,
}

/// One table change.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Change {
    #[serde(rename = "type")]
    pub kind: ChangeKind,

    #[serde(default)]
    pub table: Option<String>,

    /// Row after the change; empty for deletions.
    #[serde(default)]
    pub record: Option<Value>,

    /// Row before the change. For deletions, at least the primary key.
    #[serde(default)]
    pub old_record: Option<Value>,
}

/// Identity of a deleted comment.
///
/// Deletions only carry the full old row when the table replicates it;
/// otherwise only the primary key is known.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct DeletedComment {
    pub id: CommentId,
    #[serde(default)]
    pub station_id: Option<StationId>,
}

impl Change {
    /// Decodes the inserted comment row.
    pub fn inserted_comment(&self) -> serde_json::Result<Option<Comment>> {
        self.record.clone().map(serde_json::from_value).transpose()
    }

    /// Decodes the identity of the deleted comment row.
    pub fn deleted_comment(&self) -> serde_json::Result<Option<DeletedComment>> {
        self.old_record.clone().map(serde_json::from_value).transpose()
    }
}
