//! Rows of the `radio_stations` table.
//!
//! # Wire Format
//!
//! ```json
//! {
//!     "id": "7b7c…",
//!     "name": "Golden FM",
//!     "description": "Traditional and modern hits",
//!     "image_url": "https://…/cover.jpeg",
//!     "stream_url": "https://…/stream",
//!     "category": "music",
//!     "is_active": true,
//!     "current_track": "Modern Pop",
//!     "listeners_count": 42,
//!     "featured": true,
//!     "created_at": "2024-06-09T12:34:56.789+00:00"
//! }
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use super::StationId;

/// A named live-audio stream with descriptive metadata.
///
/// Stations are read-only on the client: their lifecycle is owned by the
/// catalog service.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Station {
    pub id: StationId,

    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Artwork reference.
    #[serde(default)]
    pub image_url: String,

    /// Address of the live stream. Only validated when the output device
    /// attaches to it.
    pub stream_url: String,

    #[serde(default)]
    pub category: String,

    #[serde(default = "default_active")]
    pub is_active: bool,

    /// Live "now playing" label.
    #[serde(default)]
    pub current_track: Option<String>,

    #[serde(default)]
    pub listeners_count: Option<u64>,

    #[serde(default)]
    pub featured: Option<bool>,

    #[serde(default)]
    pub created_at: Option<String>,
}

fn default_active() -> bool {
    true
}

impl Station {
    #[must_use]
    pub fn is_featured(&self) -> bool {
        self.featured.unwrap_or(false)
    }

    /// Case-insensitive substring match over name and description.
    ///
    /// `query` must already be lowercase.
    #[must_use]
    pub fn matches(&self, query: &str) -> bool {
        self.name.to_lowercase().contains(query) || self.description.to_lowercase().contains(query)
    }
}

impl fmt::Display for Station {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_columns_default() {
        let json = r#"{"id": "1", "name": "Yangon FM", "stream_url": "https://example.com/s"}"#;
        let station: Station = serde_json::from_str(json).unwrap();
        assert!(station.is_active);
        assert!(!station.is_featured());
        assert_eq!(station.description, "");
        assert_eq!(station.listeners_count, None);
    }
}
