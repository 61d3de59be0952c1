//! Station catalog view.
//!
//! The catalog is fetched once per view load from the catalog service and
//! then filtered client-side. A failed fetch never leaves the view empty:
//! it degrades to a built-in demo list and remembers why, so the user can
//! be told that demo stations are shown. A catalog that is merely empty is
//! shown as such.

use async_trait::async_trait;

use crate::{
    backend::{Station, StationId},
    error::Result,
};

/// Read access to the station catalog.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// All active stations, newest first.
    ///
    /// Returns `None` when the service answered without a list.
    async fn stations(&self) -> Result<Option<Vec<Station>>>;
}

/// Loaded catalog with client-side filtering.
#[derive(Clone, Debug, Default)]
pub struct CatalogView {
    stations: Vec<Station>,

    /// Why the demo list is shown instead of the service's.
    fallback: Option<String>,
}

impl CatalogView {
    /// Message shown when the demo list replaces the catalog.
    pub const FALLBACK_NOTICE: &'static str = "Failed to load radio stations";

    /// Fetches the catalog, falling back to [`CatalogView::demo_stations`]
    /// when the fetch fails or the service sends no list.
    pub async fn load<C>(catalog: &C) -> Self
    where
        C: Catalog + ?Sized,
    {
        match catalog.stations().await {
            Ok(Some(stations)) => {
                info!("loaded {} stations", stations.len());
                Self {
                    stations,
                    fallback: None,
                }
            }
            Ok(None) => {
                warn!("catalog response had no stations; using demo stations");
                Self::demo(Self::FALLBACK_NOTICE)
            }
            Err(e) => {
                warn!("error loading stations: {e}; using demo stations");
                Self::demo(Self::FALLBACK_NOTICE)
            }
        }
    }

    fn demo(reason: &str) -> Self {
        Self {
            stations: Self::demo_stations(),
            fallback: Some(reason.to_owned()),
        }
    }

    /// Built-in stations shown when the catalog is unavailable.
    #[must_use]
    pub fn demo_stations() -> Vec<Station> {
        [
            (
                "1",
                "Myanmar Radio",
                "Classic Burmese music and news",
                "https://images.pexels.com/photos/1540406/pexels-photo-1540406.jpeg?w=200&h=200&fit=crop",
                "https://stream-relay-geo.ntslive.net/stream",
                "music",
                "Traditional Myanmar Folk Song",
            ),
            (
                "2",
                "Golden FM",
                "Traditional and modern Myanmar hits",
                "https://images.pexels.com/photos/1626481/pexels-photo-1626481.jpeg?w=200&h=200&fit=crop",
                "https://stream-relay-geo.ntslive.net/stream2",
                "music",
                "Modern Burmese Pop",
            ),
            (
                "3",
                "Yangon FM",
                "News, talk shows, and entertainment",
                "https://images.pexels.com/photos/590041/pexels-photo-590041.jpeg?w=200&h=200&fit=crop",
                "https://stream-relay-geo.ntslive.net/stream3",
                "talk",
                "Morning News Update",
            ),
            (
                "4",
                "Buddha FM",
                "Spiritual and meditation content",
                "https://images.pexels.com/photos/736230/pexels-photo-736230.jpeg?w=200&h=200&fit=crop",
                "https://stream-relay-geo.ntslive.net/stream4",
                "spiritual",
                "Meditation Chants",
            ),
        ]
        .into_iter()
        .map(
            |(id, name, description, image_url, stream_url, category, current_track)| Station {
                id: StationId::from(id),
                name: name.to_owned(),
                description: description.to_owned(),
                image_url: image_url.to_owned(),
                stream_url: stream_url.to_owned(),
                category: category.to_owned(),
                is_active: true,
                current_track: Some(current_track.to_owned()),
                listeners_count: None,
                featured: None,
                created_at: None,
            },
        )
        .collect()
    }

    #[must_use]
    pub fn stations(&self) -> &[Station] {
        &self.stations
    }

    /// Whether the demo list is shown instead of the catalog.
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    #[must_use]
    pub fn fallback_notice(&self) -> Option<&str> {
        self.fallback.as_deref()
    }

    /// Stations whose name or description contains `query`, ignoring case.
    ///
    /// The query is matched as typed, whitespace included. An empty query
    /// matches every station.
    pub fn filter<'a>(&'a self, query: &str) -> impl Iterator<Item = &'a Station> + 'a {
        let query = query.to_lowercase();
        self.stations
            .iter()
            .filter(move |station| station.matches(&query))
    }

    pub fn featured(&self) -> impl Iterator<Item = &Station> {
        self.stations.iter().filter(|station| station.is_featured())
    }

    #[must_use]
    pub fn get(&self, id: &StationId) -> Option<&Station> {
        self.stations.iter().find(|station| &station.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    struct Fixed(Result<Option<Vec<Station>>>);

    #[async_trait]
    impl Catalog for Fixed {
        async fn stations(&self) -> Result<Option<Vec<Station>>> {
            match &self.0 {
                Ok(stations) => Ok(stations.clone()),
                Err(e) => Err(Error::new(e.kind, e.to_string())),
            }
        }
    }

    fn station(id: &str, name: &str, description: &str, featured: bool) -> Station {
        Station {
            id: StationId::from(id),
            name: name.to_owned(),
            description: description.to_owned(),
            image_url: String::new(),
            stream_url: format!("https://example.com/{id}"),
            category: "music".to_owned(),
            is_active: true,
            current_track: None,
            listeners_count: Some(3),
            featured: Some(featured),
            created_at: None,
        }
    }

    #[tokio::test]
    async fn failed_fetch_falls_back_to_demo_stations() {
        let view = CatalogView::load(&Fixed(Err(Error::unavailable("offline")))).await;
        assert!(view.is_fallback());
        assert_eq!(view.fallback_notice(), Some(CatalogView::FALLBACK_NOTICE));
        assert_eq!(view.stations().len(), 4);
    }

    #[tokio::test]
    async fn empty_catalog_is_shown_empty() {
        let view = CatalogView::load(&Fixed(Ok(Some(vec![])))).await;
        assert!(!view.is_fallback());
        assert_eq!(view.fallback_notice(), None);
        assert!(view.stations().is_empty());
    }

    #[tokio::test]
    async fn missing_list_falls_back_to_demo_stations() {
        let view = CatalogView::load(&Fixed(Ok(None))).await;
        assert!(view.is_fallback());
        assert_eq!(view.stations(), CatalogView::demo_stations().as_slice());
    }

    #[tokio::test]
    async fn filter_matches_name_and_description_ignoring_case() {
        let view = CatalogView::load(&Fixed(Ok(Some(vec![
            station("a", "Golden FM", "Pop hits", true),
            station("b", "Night Owl", "Late JAZZ and golden oldies", false),
            station("c", "Talk Now", "News", false),
        ]))))
        .await;
        assert!(!view.is_fallback());

        let ids: Vec<_> = view.filter("GOLDEN").map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);

        let ids: Vec<_> = view.filter("jazz").map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["b"]);

        assert_eq!(view.filter("").count(), 3);

        let ids: Vec<_> = view.filter(" golden").map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["b"]);
        assert_eq!(view.filter("classical").count(), 0);
    }

    #[tokio::test]
    async fn featured_and_lookup() {
        let view = CatalogView::load(&Fixed(Ok(Some(vec![
            station("a", "Golden FM", "", true),
            station("b", "Night Owl", "", false),
        ]))))
        .await;
        let featured: Vec<_> = view.featured().map(|s| s.name.as_str()).collect();
        assert_eq!(featured, ["Golden FM"]);
        assert_eq!(
            view.get(&StationId::from("b")).map(|s| s.name.as_str()),
            Some("Night Owl")
        );
        assert!(view.get(&StationId::from("z")).is_none());
    }
}
