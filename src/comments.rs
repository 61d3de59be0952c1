//! Per-station comment feed.
//!
//! The feed shows the comments of one station, newest first. It is filled
//! by a fetch when the station is opened and then kept current by push
//! events from the realtime channel and by the user's own submissions.
//!
//! Every comment is keyed by its id, which makes all updates idempotent:
//! * a submission that the push channel already delivered is not added
//!   twice, nor is a push for a submission already shown
//! * a delete that arrives before its insert leaves a tombstone so the late
//!   insert is dropped. Only the most recent tombstones are kept
//! * anything addressed to a station the feed has moved away from is
//!   ignored, including fetches that complete late
//!
//! Failures never empty the view by surprise. They are reported through
//! [`CommentFeed::notice`] and the feed keeps what it had.

use std::collections::{HashSet, VecDeque};

use async_trait::async_trait;

use crate::{
    backend::{Comment, CommentId, NewComment, StationId, UserId},
    error::{Error, Result},
};

/// Access to stored comments.
#[async_trait]
pub trait CommentService: Send + Sync {
    /// Comments of `station`, newest first.
    async fn comments(&self, station: &StationId) -> Result<Vec<Comment>>;

    /// Stores a comment and returns the record as confirmed by the service.
    async fn post(&self, comment: NewComment<'_>) -> Result<Comment>;
}

/// Change pushed by the realtime channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommentEvent {
    Inserted(Comment),
    Deleted {
        id: CommentId,

        /// Not every delete carries the station.
        station_id: Option<StationId>,
    },
}

/// Comments of the station that is currently open.
#[derive(Clone, Debug, Default)]
pub struct CommentFeed {
    station: Option<StationId>,
    comments: Vec<Comment>,
    /// Ids of deleted comments, oldest first.
    deleted: VecDeque<CommentId>,
    loading: bool,
    notice: Option<String>,
}

impl CommentFeed {
    /// Shown when the feed could not be fetched.
    pub const LOAD_NOTICE: &'static str = "Failed to load comments";

    /// Shown when a submission was rejected by the service.
    pub const POST_NOTICE: &'static str = "Failed to post comment";

    /// Number of deletes remembered to drop late inserts.
    pub const MAX_TOMBSTONES: usize = 256;

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Trims `text` and checks that it can be posted.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` when the trimmed text is empty, and
    /// `OutOfRange` when it is longer than [`Comment::MAX_LEN`] characters.
    pub fn validate(text: &str) -> Result<&str> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::invalid_argument("comment is empty"));
        }

        let len = text.chars().count();
        if len > Comment::MAX_LEN {
            return Err(Error::out_of_range(format!(
                "comment is {len} characters long, the maximum is {}",
                Comment::MAX_LEN
            )));
        }

        Ok(text)
    }

    #[must_use]
    pub fn station(&self) -> Option<&StationId> {
        self.station.as_ref()
    }

    /// Comments, newest first.
    #[must_use]
    pub fn comments(&self) -> &[Comment] {
        &self.comments
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Inline message about the last failure.
    #[must_use]
    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn clear_notice(&mut self) {
        self.notice = None;
    }

    fn is_current(&self, station: &StationId) -> bool {
        self.station.as_ref() == Some(station)
    }

    fn contains(&self, id: &CommentId) -> bool {
        self.comments.iter().any(|comment| &comment.id == id)
    }

    fn is_deleted(&self, id: &CommentId) -> bool {
        self.deleted.contains(id)
    }

    fn bury(&mut self, id: CommentId) {
        if self.is_deleted(&id) {
            return;
        }
        if self.deleted.len() == Self::MAX_TOMBSTONES {
            self.deleted.pop_front();
        }
        self.deleted.push_back(id);
    }

    /// Switches the feed to `station` and marks it as loading.
    ///
    /// The comments of a previous station are dropped right away.
    pub fn begin_load(&mut self, station: StationId) {
        if !self.is_current(&station) {
            self.comments.clear();
            self.deleted.clear();
        }

        self.station = Some(station);
        self.loading = true;
        self.notice = None;
    }

    /// Applies the outcome of a fetch started by [`CommentFeed::begin_load`].
    ///
    /// Comments that were pushed while the fetch was in flight are kept in
    /// front of the fetched ones. Results for a station other than the
    /// current one are ignored.
    pub fn apply_loaded(&mut self, station: &StationId, result: Result<Vec<Comment>>) {
        if !self.is_current(station) {
            debug!("ignoring comments of station {station}: feed moved on");
            return;
        }

        self.loading = false;
        match result {
            Ok(loaded) => {
                let loaded_ids: HashSet<_> = loaded.iter().map(|c| c.id.clone()).collect();
                self.comments.retain(|comment| !loaded_ids.contains(&comment.id));

                let mut seen = HashSet::new();
                self.comments.extend(loaded.into_iter().filter(|comment| {
                    comment.station_id == *station
                        && !self.deleted.contains(&comment.id)
                        && seen.insert(comment.id.clone())
                }));
                debug!(
                    "loaded {} comments for station {station}",
                    self.comments.len()
                );
            }
            Err(e) => {
                error!("error loading comments for station {station}: {e}");
                self.notice = Some(Self::LOAD_NOTICE.to_owned());
            }
        }
    }

    /// Fetches the comments of `station` from `service`.
    pub async fn load<S>(&mut self, service: &S, station: &StationId)
    where
        S: CommentService + ?Sized,
    {
        self.begin_load(station.clone());
        let result = service.comments(station).await;
        self.apply_loaded(station, result);
    }

    /// Puts a record confirmed by the service at the front, unless it is
    /// already shown or addressed to another station. Returns whether the
    /// feed changed.
    pub fn apply_posted(&mut self, comment: Comment) -> bool {
        if !self.is_current(&comment.station_id)
            || self.is_deleted(&comment.id)
            || self.contains(&comment.id)
        {
            return false;
        }

        self.comments.insert(0, comment);
        true
    }

    /// Validates and posts `text` as `author` on `station`.
    ///
    /// Invalid text is rejected before the service is contacted.
    ///
    /// # Errors
    ///
    /// Returns the validation error, or the service error when the
    /// comment could not be stored. The feed is unchanged in both cases.
    pub async fn submit<S>(
        &mut self,
        service: &S,
        station: &StationId,
        text: &str,
        author: &UserId,
    ) -> Result<()>
    where
        S: CommentService + ?Sized,
    {
        let content = Self::validate(text)?;

        let comment = NewComment {
            station_id: station,
            content,
            user_id: author,
        };
        match service.post(comment).await {
            Ok(confirmed) => {
                self.notice = None;
                self.apply_posted(confirmed);
                Ok(())
            }
            Err(e) => {
                error!("error posting comment on station {station}: {e}");
                self.notice = Some(Self::POST_NOTICE.to_owned());
                Err(e)
            }
        }
    }

    /// Applies a push event. Returns whether the feed changed.
    pub fn apply(&mut self, event: CommentEvent) -> bool {
        match event {
            CommentEvent::Inserted(comment) => {
                let changed = self.apply_posted(comment);
                if changed {
                    trace!("comment inserted");
                }
                changed
            }
            CommentEvent::Deleted { id, station_id } => {
                if station_id.is_some_and(|station| !self.is_current(&station)) {
                    return false;
                }

                let before = self.comments.len();
                self.comments.retain(|comment| comment.id != id);
                self.bury(id);
                before != self.comments.len()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    #[derive(Default)]
    struct Fake {
        stored: Mutex<Vec<Comment>>,
        posts: AtomicUsize,
        offline: bool,
    }

    #[async_trait]
    impl CommentService for Fake {
        async fn comments(&self, station: &StationId) -> Result<Vec<Comment>> {
            if self.offline {
                return Err(Error::unavailable("offline"));
            }
            let stored = self.stored.lock().unwrap();
            Ok(stored
                .iter()
                .rev()
                .filter(|c| &c.station_id == station)
                .cloned()
                .collect())
        }

        async fn post(&self, new: NewComment<'_>) -> Result<Comment> {
            let n = self.posts.fetch_add(1, Ordering::SeqCst);
            if self.offline {
                return Err(Error::unavailable("offline"));
            }
            let comment = Comment {
                id: CommentId::from(format!("posted-{n}")),
                user_id: new.user_id.clone(),
                station_id: new.station_id.clone(),
                content: new.content.to_owned(),
                created_at: "2024-06-09T12:00:00Z".to_owned(),
                user: None,
            };
            self.stored.lock().unwrap().push(comment.clone());
            Ok(comment)
        }
    }

    fn comment(id: &str, station: &str) -> Comment {
        Comment {
            id: CommentId::from(id),
            user_id: UserId::from("u1"),
            station_id: StationId::from(station),
            content: format!("comment {id}"),
            created_at: "2024-06-09T12:00:00Z".to_owned(),
            user: None,
        }
    }

    fn ids(feed: &CommentFeed) -> Vec<&str> {
        feed.comments().iter().map(|c| c.id.as_str()).collect()
    }

    #[test]
    fn validation_trims_and_bounds() {
        assert_eq!(CommentFeed::validate("  hi  ").unwrap(), "hi");
        assert!(CommentFeed::validate("").is_err());
        assert!(CommentFeed::validate(" \n\t ").is_err());

        let longest = "ä".repeat(Comment::MAX_LEN);
        assert!(CommentFeed::validate(&longest).is_ok());
        let too_long = "a".repeat(Comment::MAX_LEN + 1);
        assert_eq!(
            CommentFeed::validate(&too_long).unwrap_err().kind,
            crate::error::ErrorKind::OutOfRange
        );
    }

    #[tokio::test]
    async fn empty_comment_is_rejected_without_network() {
        let service = Fake::default();
        let station = StationId::from("s1");
        let mut feed = CommentFeed::new();
        feed.load(&service, &station).await;

        let result = feed
            .submit(&service, &station, "   ", &UserId::from("u1"))
            .await;
        assert!(result.is_err());
        assert_eq!(service.posts.load(Ordering::SeqCst), 0);
        assert!(feed.comments().is_empty());
    }

    #[tokio::test]
    async fn submission_is_prepended_once() {
        let service = Fake::default();
        service.stored.lock().unwrap().push(comment("old", "s1"));
        let station = StationId::from("s1");
        let mut feed = CommentFeed::new();
        feed.load(&service, &station).await;

        feed.submit(&service, &station, " hello ", &UserId::from("u1"))
            .await
            .unwrap();
        assert_eq!(ids(&feed), ["posted-0", "old"]);
        assert_eq!(feed.comments()[0].content, "hello");

        // The push channel echoes the same record.
        let echoed = feed.comments()[0].clone();
        assert!(!feed.apply(CommentEvent::Inserted(echoed)));
        assert_eq!(ids(&feed), ["posted-0", "old"]);
    }

    #[tokio::test]
    async fn failed_submission_keeps_feed_and_reports() {
        let service = Fake {
            offline: true,
            ..Default::default()
        };
        let station = StationId::from("s1");
        let mut feed = CommentFeed::new();
        feed.begin_load(station.clone());
        feed.apply_loaded(&station, Ok(vec![comment("a", "s1")]));

        let result = feed
            .submit(&service, &station, "hello", &UserId::from("u1"))
            .await;
        assert!(result.is_err());
        assert_eq!(ids(&feed), ["a"]);
        assert_eq!(feed.notice(), Some(CommentFeed::POST_NOTICE));
    }

    #[tokio::test]
    async fn failed_load_is_reported_inline() {
        let service = Fake {
            offline: true,
            ..Default::default()
        };
        let mut feed = CommentFeed::new();
        feed.load(&service, &StationId::from("s1")).await;
        assert!(feed.comments().is_empty());
        assert!(!feed.is_loading());
        assert_eq!(feed.notice(), Some(CommentFeed::LOAD_NOTICE));
    }

    #[test]
    fn duplicate_inserts_and_deletes_are_idempotent() {
        let station = StationId::from("s1");
        let mut feed = CommentFeed::new();
        feed.begin_load(station.clone());
        feed.apply_loaded(&station, Ok(vec![comment("a", "s1")]));

        assert!(feed.apply(CommentEvent::Inserted(comment("b", "s1"))));
        assert!(!feed.apply(CommentEvent::Inserted(comment("b", "s1"))));
        assert_eq!(ids(&feed), ["b", "a"]);

        let delete = CommentEvent::Deleted {
            id: CommentId::from("a"),
            station_id: Some(station.clone()),
        };
        assert!(feed.apply(delete.clone()));
        assert!(!feed.apply(delete));
        assert_eq!(ids(&feed), ["b"]);
    }

    #[test]
    fn delete_before_insert_drops_the_insert() {
        let station = StationId::from("s1");
        let mut feed = CommentFeed::new();
        feed.begin_load(station.clone());

        feed.apply(CommentEvent::Deleted {
            id: CommentId::from("x"),
            station_id: None,
        });
        assert!(!feed.apply(CommentEvent::Inserted(comment("x", "s1"))));
        assert!(feed.comments().is_empty());
    }

    #[test]
    fn tombstones_are_bounded() {
        let station = StationId::from("s1");
        let mut feed = CommentFeed::new();
        feed.begin_load(station.clone());

        for n in 0..=CommentFeed::MAX_TOMBSTONES {
            let id = CommentId::from(format!("gone-{n}"));
            feed.apply(CommentEvent::Deleted {
                id: id.clone(),
                station_id: None,
            });
            feed.apply(CommentEvent::Deleted {
                id,
                station_id: None,
            });
        }
        assert_eq!(feed.deleted.len(), CommentFeed::MAX_TOMBSTONES);

        // The oldest tombstone was evicted; the newest still applies.
        assert!(feed.apply(CommentEvent::Inserted(comment("gone-0", "s1"))));
        let newest = format!("gone-{}", CommentFeed::MAX_TOMBSTONES);
        assert!(!feed.apply(CommentEvent::Inserted(comment(&newest, "s1"))));
    }

    #[test]
    fn events_for_other_stations_are_ignored() {
        let station = StationId::from("s1");
        let mut feed = CommentFeed::new();
        feed.begin_load(station.clone());
        feed.apply_loaded(&station, Ok(vec![comment("a", "s1")]));

        assert!(!feed.apply(CommentEvent::Inserted(comment("z", "s2"))));
        assert!(!feed.apply(CommentEvent::Deleted {
            id: CommentId::from("a"),
            station_id: Some(StationId::from("s2")),
        }));
        assert_eq!(ids(&feed), ["a"]);
    }

    #[test]
    fn stale_load_is_ignored() {
        let first = StationId::from("s1");
        let second = StationId::from("s2");
        let mut feed = CommentFeed::new();

        feed.begin_load(first.clone());
        feed.begin_load(second.clone());
        feed.apply_loaded(&first, Ok(vec![comment("a", "s1")]));
        assert!(feed.comments().is_empty());
        assert!(feed.is_loading());

        feed.apply_loaded(&second, Ok(vec![comment("b", "s2")]));
        assert_eq!(ids(&feed), ["b"]);
        assert!(!feed.is_loading());
    }

    #[test]
    fn pushes_during_load_survive_the_load() {
        let station = StationId::from("s1");
        let mut feed = CommentFeed::new();
        feed.begin_load(station.clone());

        feed.apply(CommentEvent::Inserted(comment("new", "s1")));
        feed.apply(CommentEvent::Inserted(comment("both", "s1")));
        feed.apply_loaded(
            &station,
            Ok(vec![comment("both", "s1"), comment("old", "s1")]),
        );
        assert_eq!(ids(&feed), ["new", "both", "old"]);
    }
}
