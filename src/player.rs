//! Playback session: the single owner of the audio output.
//!
//! Every surface that shows or controls playback (a mini-player, a full
//! player page, the sleep timer) goes through the one [`Player`] of the
//! client. Surfaces observe it with [`Player::subscribe`], which yields
//! the complete [`PlaybackState`] on every change, so no surface keeps its
//! own copy of whether something is playing.
//!
//! # Output
//!
//! The audio device is abstracted by [`Output`]. Each load into the output
//! is an *attachment* with its own id. The output reports what happens to
//! the stream asynchronously as [`DeviceEvent`]s tagged with that id;
//! events of an earlier attachment are ignored, so a slow failure of a
//! previous station cannot stop the current one.
//!
//! # State
//!
//! `playing` reflects the output, not intent. It becomes true only when a
//! station is loaded and the output accepted or reported playback, and it
//! falls back to false on pause, buffering, rejection or stream errors.
//! Output failures never propagate to the caller: they are observable as
//! `playing == false` and an [`Event::PlaybackFailed`].
//!
//! # Example
//!
//! ```rust
//! let (output, device_events) = RodioOutput::open()?;
//! let mut player = Player::new(output, device_events);
//! let mut state = player.subscribe();
//!
//! player.select_station(&station);
//! player.set_volume(0.5);
//! player.arm_sleep_timer(30);
//!
//! loop {
//!     tokio::select! {
//!         _ = player.next_event() => {}
//!         Ok(()) = state.changed() => println!("{:?}", *state.borrow()),
//!     }
//! }
//! ```

use std::time::Duration;

use tokio::{
    sync::{mpsc, watch},
    time::Instant,
};

use crate::{
    backend::Station,
    error::Result,
    events::Event,
    sleep::SleepTimer,
};

/// Identifies one load of a stream into the output.
pub type Attachment = u64;

/// What the output reports about an attachment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceEventKind {
    /// The stream is audible.
    Started,

    /// The output is waiting for stream data.
    Buffering,

    /// The stream could not be started or broke off.
    Failed(String),
}

/// Report from the output about one attachment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceEvent {
    pub attachment: Attachment,
    pub kind: DeviceEventKind,
}

/// Audio output device.
///
/// There is exactly one attachment at a time: [`Output::attach`] detaches
/// whatever was playing before it attaches the new stream.
pub trait Output {
    /// Detaches the current stream and starts loading `url`.
    ///
    /// Returns `Err` when loading cannot even begin. Later failures are
    /// reported as [`DeviceEventKind::Failed`].
    fn attach(&mut self, attachment: Attachment, url: &str) -> Result<()>;

    /// Resumes the attached stream.
    ///
    /// Returns `Err` when there is nothing to play.
    fn play(&mut self) -> Result<()>;

    fn pause(&mut self);

    /// Sets the output volume, already clamped to `[0.0, 1.0]`.
    fn set_volume(&mut self, volume: f32);
}

/// Snapshot of the playback session.
#[derive(Clone, Debug, PartialEq)]
pub struct PlaybackState {
    /// Station loaded into the output, if any.
    pub station: Option<Station>,

    /// Whether the output is actually playing.
    pub playing: bool,

    /// Output volume in `[0.0, 1.0]`.
    pub volume: f32,

    /// When the sleep timer will stop playback.
    pub sleep_deadline: Option<Instant>,
}

impl PlaybackState {
    /// Volume of a fresh session.
    pub const DEFAULT_VOLUME: f32 = 0.7;
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            station: None,
            playing: false,
            volume: Self::DEFAULT_VOLUME,
            sleep_deadline: None,
        }
    }
}

/// The playback session.
pub struct Player<O> {
    output: O,
    device_events: mpsc::UnboundedReceiver<DeviceEvent>,

    /// Id of the current attachment. Zero before the first load.
    attachment: Attachment,

    /// Paused by the user since the last attach or resume. `Started`
    /// reports already queued at that point must not resume playback.
    held: bool,

    state: watch::Sender<PlaybackState>,
    sleep_timer: SleepTimer,
    event_tx: Option<mpsc::UnboundedSender<Event>>,
}

/// What woke up [`Player::next_event`].
enum Wake {
    Device(DeviceEvent),
    SleepTimer,
}

impl<O: Output> Player<O> {
    /// Creates a session around `output`, applying the default volume.
    pub fn new(mut output: O, device_events: mpsc::UnboundedReceiver<DeviceEvent>) -> Self {
        let state = PlaybackState::default();
        output.set_volume(state.volume);

        Self {
            output,
            device_events,
            attachment: 0,
            held: false,
            state: watch::channel(state).0,
            sleep_timer: SleepTimer::new(),
            event_tx: None,
        }
    }

    /// Registers a channel to receive [`Event`]s.
    pub fn register(&mut self, event_tx: mpsc::UnboundedSender<Event>) {
        self.event_tx = Some(event_tx);
    }

    fn notify(&self, event: Event) {
        if let Some(event_tx) = &self.event_tx {
            if let Err(e) = event_tx.send(event) {
                error!("failed to send event: {e}");
            }
        }
    }

    /// Returns a receiver that observes every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<PlaybackState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn state(&self) -> PlaybackState {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.state.borrow().playing
    }

    #[must_use]
    pub fn station(&self) -> Option<Station> {
        self.state.borrow().station.clone()
    }

    #[must_use]
    pub fn volume(&self) -> f32 {
        self.state.borrow().volume
    }

    /// Id of the current attachment.
    #[must_use]
    pub fn attachment(&self) -> Attachment {
        self.attachment
    }

    #[must_use]
    pub fn output(&self) -> &O {
        &self.output
    }

    fn set_playing(&self, playing: bool) -> bool {
        self.state.send_if_modified(|state| {
            let playing = playing && state.station.is_some();
            if state.playing == playing {
                false
            } else {
                state.playing = playing;
                true
            }
        })
    }

    /// Loads `station` into the output and starts playing it.
    ///
    /// `playing` is set optimistically and corrected by the output's
    /// reports. A station that cannot be loaded leaves `playing == false`.
    pub fn select_station(&mut self, station: &Station) {
        self.attachment += 1;
        self.held = false;
        let attachment = self.attachment;

        let changed = self.state.send_if_modified(|state| {
            let changed = state.station.as_ref().map(|current| &current.id) != Some(&station.id);
            state.station = Some(station.clone());
            state.playing = true;
            changed
        });
        info!("playing {station}");
        if changed {
            self.notify(Event::StationChanged);
        }

        match self.output.attach(attachment, &station.stream_url) {
            Ok(()) => self.notify(Event::Play),
            Err(e) => {
                error!("failed to load {station}: {e}");
                self.set_playing(false);
                self.notify(Event::PlaybackFailed);
            }
        }
    }

    /// Pauses the output.
    pub fn pause(&mut self) {
        self.held = true;
        self.output.pause();
        if self.set_playing(false) {
            debug!("paused");
            self.notify(Event::Pause);
        }
    }

    /// Resumes the loaded station.
    ///
    /// Without a station this is a no-op and the output is not touched.
    pub fn resume(&mut self) {
        if self.state.borrow().station.is_none() {
            debug!("nothing to resume");
            return;
        }

        match self.output.play() {
            Ok(()) => {
                self.held = false;
                if self.set_playing(true) {
                    debug!("resumed");
                    self.notify(Event::Play);
                }
            }
            Err(e) => {
                warn!("output refused to resume: {e}");
                self.set_playing(false);
                self.notify(Event::PlaybackFailed);
            }
        }
    }

    /// Toggles between [`Player::pause`] and [`Player::resume`].
    pub fn toggle(&mut self) {
        if self.is_playing() {
            self.pause();
        } else {
            self.resume();
        }
    }

    /// Sets the volume, clamped to `[0.0, 1.0]`. Returns the stored value.
    ///
    /// Not-a-number is treated as silence.
    pub fn set_volume(&mut self, volume: f32) -> f32 {
        let volume = if volume.is_nan() {
            0.0
        } else {
            volume.clamp(0.0, 1.0)
        };

        self.output.set_volume(volume);
        self.state.send_if_modified(|state| {
            let changed = (state.volume - volume).abs() > f32::EPSILON;
            state.volume = volume;
            changed
        });
        debug!("volume set to {:.0}%", volume * 100.0);
        volume
    }

    /// Arms the sleep timer, replacing any pending deadline.
    pub fn arm_sleep_timer(&mut self, minutes: u32) -> Instant {
        let deadline = self.sleep_timer.arm(minutes);
        self.state
            .send_modify(|state| state.sleep_deadline = Some(deadline));
        info!("sleep timer set to {minutes} minutes");
        self.notify(Event::SleepTimerArmed);
        deadline
    }

    /// Cancels the sleep timer. Idempotent.
    pub fn cancel_sleep_timer(&mut self) {
        let was_armed = self.sleep_timer.is_armed();
        self.sleep_timer.cancel();
        self.state.send_if_modified(|state| state.sleep_deadline.take().is_some());
        if was_armed {
            info!("sleep timer cancelled");
            self.notify(Event::SleepTimerCancelled);
        }
    }

    /// Arms the sleep timer, or cancels it when it is armed with the same
    /// number of minutes. Returns whether the timer is armed afterwards.
    pub fn toggle_sleep_timer(&mut self, minutes: u32) -> bool {
        if self.sleep_timer.minutes() == Some(minutes) {
            self.cancel_sleep_timer();
            false
        } else {
            self.arm_sleep_timer(minutes);
            true
        }
    }

    /// Time until the sleep timer stops playback; zero when not armed.
    #[must_use]
    pub fn sleep_remaining(&self) -> Duration {
        self.sleep_timer.remaining()
    }

    #[must_use]
    pub fn sleep_timer(&self) -> &SleepTimer {
        &self.sleep_timer
    }

    /// Applies a report of the output.
    ///
    /// Reports of earlier attachments are ignored, as is `Started` after
    /// a pause.
    pub fn handle_device_event(&mut self, event: DeviceEvent) -> Option<Event> {
        if event.attachment != self.attachment {
            trace!(
                "ignoring {:?} of stale attachment {}",
                event.kind,
                event.attachment
            );
            return None;
        }

        match event.kind {
            DeviceEventKind::Started if self.held => {
                trace!("ignoring start of paused attachment {}", event.attachment);
                None
            }
            DeviceEventKind::Started => self.set_playing(true).then_some(Event::Play),
            DeviceEventKind::Buffering => {
                debug!("buffering");
                self.set_playing(false);
                None
            }
            DeviceEventKind::Failed(reason) => {
                error!("playback failed: {reason}");
                self.set_playing(false);
                Some(Event::PlaybackFailed)
            }
        }
        .inspect(|event| self.notify(*event))
    }

    /// Waits for the next output report or sleep timer expiry and applies
    /// it. Returns the resulting event, if any.
    ///
    /// Cancel safe, so it can be polled from a `select!` loop.
    pub async fn next_event(&mut self) -> Option<Event> {
        let wake = tokio::select! {
            Some(event) = self.device_events.recv() => Wake::Device(event),
            () = self.sleep_timer.expired() => Wake::SleepTimer,
        };

        match wake {
            Wake::Device(event) => self.handle_device_event(event),
            Wake::SleepTimer => {
                info!("sleep timer elapsed");
                self.pause();
                self.state
                    .send_if_modified(|state| state.sleep_deadline.take().is_some());
                self.notify(Event::SleepTimerElapsed);
                Some(Event::SleepTimerElapsed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::time::{advance, timeout};

    use crate::{backend::StationId, error::Error};

    #[derive(Clone, Debug, PartialEq)]
    enum Call {
        Attach(Attachment, String),
        Play,
        Pause,
        Volume(f32),
    }

    #[derive(Default)]
    struct FakeOutput {
        calls: Vec<Call>,
        attached: Option<String>,
        refuse_attach: bool,
        refuse_play: bool,
    }

    impl Output for FakeOutput {
        fn attach(&mut self, attachment: Attachment, url: &str) -> Result<()> {
            self.calls.push(Call::Attach(attachment, url.to_owned()));
            if self.refuse_attach {
                self.attached = None;
                return Err(Error::invalid_argument("bad stream"));
            }
            self.attached = Some(url.to_owned());
            Ok(())
        }

        fn play(&mut self) -> Result<()> {
            self.calls.push(Call::Play);
            if self.refuse_play || self.attached.is_none() {
                return Err(Error::failed_precondition("nothing attached"));
            }
            Ok(())
        }

        fn pause(&mut self) {
            self.calls.push(Call::Pause);
        }

        fn set_volume(&mut self, volume: f32) {
            self.calls.push(Call::Volume(volume));
        }
    }

    fn station(id: &str) -> Station {
        Station {
            id: StationId::from(id),
            name: format!("Station {id}"),
            description: String::new(),
            image_url: String::new(),
            stream_url: format!("https://example.com/{id}"),
            category: String::new(),
            is_active: true,
            current_track: None,
            listeners_count: None,
            featured: None,
            created_at: None,
        }
    }

    fn player(output: FakeOutput) -> (Player<FakeOutput>, mpsc::UnboundedSender<DeviceEvent>) {
        let (device_tx, device_rx) = mpsc::unbounded_channel();
        (Player::new(output, device_rx), device_tx)
    }

    #[test]
    fn volume_is_clamped() {
        let (mut player, _device) = player(FakeOutput::default());
        for (input, expected) in [
            (-3.0, 0.0),
            (0.0, 0.0),
            (0.25, 0.25),
            (1.0, 1.0),
            (7.5, 1.0),
            (f32::INFINITY, 1.0),
            (f32::NEG_INFINITY, 0.0),
            (f32::NAN, 0.0),
        ] {
            assert_eq!(player.set_volume(input), expected);
            assert_eq!(player.volume(), expected);
            assert_eq!(player.output().calls.last(), Some(&Call::Volume(expected)));
        }
    }

    #[test]
    fn resume_without_station_does_nothing() {
        let (mut player, _device) = player(FakeOutput::default());
        let before = player.state();
        let calls = player.output().calls.len();

        player.resume();

        assert_eq!(player.state(), before);
        assert_eq!(player.output().calls.len(), calls);
    }

    #[test]
    fn selecting_plays_optimistically() {
        let (mut player, _device) = player(FakeOutput::default());
        player.select_station(&station("a"));
        assert!(player.is_playing());
        assert_eq!(player.station().map(|s| s.id), Some(StationId::from("a")));
    }

    #[test]
    fn load_failure_is_only_observable_as_state() {
        let (mut player, _device) = player(FakeOutput {
            refuse_attach: true,
            ..Default::default()
        });
        let (event_tx, mut events) = mpsc::unbounded_channel();
        player.register(event_tx);

        player.select_station(&station("a"));

        assert!(!player.is_playing());
        assert!(player.station().is_some());
        assert_eq!(events.try_recv(), Ok(Event::StationChanged));
        assert_eq!(events.try_recv(), Ok(Event::PlaybackFailed));
    }

    #[test]
    fn switching_stations_leaves_only_the_last_attached() {
        let (mut player, _device) = player(FakeOutput::default());
        player.select_station(&station("a"));
        player.select_station(&station("b"));

        assert_eq!(
            player.output().attached.as_deref(),
            Some("https://example.com/b")
        );
        let attaches: Vec<_> = player
            .output()
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::Attach(id, _) => Some(*id),
                _ => None,
            })
            .collect();
        assert_eq!(attaches, [1, 2]);
        assert_eq!(player.attachment(), 2);
    }

    #[test]
    fn pause_and_resume() {
        let (mut player, _device) = player(FakeOutput::default());
        player.select_station(&station("a"));

        player.pause();
        assert!(!player.is_playing());
        assert_eq!(player.output().calls.last(), Some(&Call::Pause));

        player.resume();
        assert!(player.is_playing());
        assert_eq!(player.output().calls.last(), Some(&Call::Play));

        player.toggle();
        assert!(!player.is_playing());
    }

    #[test]
    fn rejected_resume_stays_stopped() {
        let (mut player, _device) = player(FakeOutput {
            refuse_play: true,
            ..Default::default()
        });
        player.select_station(&station("a"));
        player.pause();
        player.resume();
        assert!(!player.is_playing());
    }

    #[tokio::test]
    async fn device_reports_drive_playing() {
        let (mut player, device) = player(FakeOutput::default());
        player.select_station(&station("a"));
        let attachment = player.attachment();

        device
            .send(DeviceEvent {
                attachment,
                kind: DeviceEventKind::Buffering,
            })
            .unwrap();
        assert_eq!(player.next_event().await, None);
        assert!(!player.is_playing());

        device
            .send(DeviceEvent {
                attachment,
                kind: DeviceEventKind::Started,
            })
            .unwrap();
        assert_eq!(player.next_event().await, Some(Event::Play));
        assert!(player.is_playing());

        device
            .send(DeviceEvent {
                attachment,
                kind: DeviceEventKind::Failed("connection reset".to_owned()),
            })
            .unwrap();
        assert_eq!(player.next_event().await, Some(Event::PlaybackFailed));
        assert!(!player.is_playing());
    }

    #[tokio::test]
    async fn start_reported_after_pause_keeps_paused() {
        let (mut player, device) = player(FakeOutput::default());
        player.select_station(&station("a"));
        device
            .send(DeviceEvent {
                attachment: player.attachment(),
                kind: DeviceEventKind::Started,
            })
            .unwrap();

        player.pause();
        assert_eq!(player.next_event().await, None);
        assert_eq!(player.output().calls.last(), Some(&Call::Pause));
        assert!(!player.is_playing());

        // After resuming, reports apply again.
        player.resume();
        device
            .send(DeviceEvent {
                attachment: player.attachment(),
                kind: DeviceEventKind::Buffering,
            })
            .unwrap();
        assert_eq!(player.next_event().await, None);
        device
            .send(DeviceEvent {
                attachment: player.attachment(),
                kind: DeviceEventKind::Started,
            })
            .unwrap();
        assert_eq!(player.next_event().await, Some(Event::Play));
        assert!(player.is_playing());
    }

    #[tokio::test]
    async fn stale_reports_are_ignored() {
        let (mut player, device) = player(FakeOutput::default());
        player.select_station(&station("a"));
        let stale = player.attachment();
        player.select_station(&station("b"));

        device
            .send(DeviceEvent {
                attachment: stale,
                kind: DeviceEventKind::Failed("gone".to_owned()),
            })
            .unwrap();
        assert_eq!(player.next_event().await, None);
        assert!(player.is_playing());
    }

    #[tokio::test]
    async fn observers_see_changes() {
        let (mut player, _device) = player(FakeOutput::default());
        let mut observer = player.subscribe();

        player.select_station(&station("a"));
        assert!(observer.has_changed().unwrap());
        assert!(observer.borrow_and_update().playing);

        player.set_volume(0.3);
        assert!((observer.borrow_and_update().volume - 0.3).abs() < f32::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_timer_pauses_playback() {
        let (mut player, _device) = player(FakeOutput::default());
        player.select_station(&station("a"));
        player.arm_sleep_timer(15);
        assert!(player.state().sleep_deadline.is_some());

        assert_eq!(player.next_event().await, Some(Event::SleepTimerElapsed));
        assert!(!player.is_playing());
        assert_eq!(player.sleep_remaining(), Duration::ZERO);
        assert_eq!(player.state().sleep_deadline, None);
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_fires_once_at_the_later_deadline() {
        let start = Instant::now();
        let (mut player, _device) = player(FakeOutput::default());
        player.select_station(&station("a"));
        player.arm_sleep_timer(1);
        player.arm_sleep_timer(1);

        assert_eq!(player.next_event().await, Some(Event::SleepTimerElapsed));
        assert!(start.elapsed() >= Duration::from_secs(60));

        player.resume();
        assert!(timeout(Duration::from_secs(600), player.next_event())
            .await
            .is_err());
        assert!(player.is_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_sleep_timer_never_pauses() {
        let (mut player, _device) = player(FakeOutput::default());
        player.select_station(&station("a"));
        player.arm_sleep_timer(1);

        advance(Duration::from_secs(30)).await;
        player.cancel_sleep_timer();
        assert_eq!(player.sleep_remaining(), Duration::ZERO);

        assert!(timeout(Duration::from_secs(120), player.next_event())
            .await
            .is_err());
        assert!(player.is_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn toggling_the_same_preset_cancels() {
        let (mut player, _device) = player(FakeOutput::default());
        assert!(player.toggle_sleep_timer(30));
        assert!(player.toggle_sleep_timer(60));
        assert_eq!(player.sleep_timer().minutes(), Some(60));
        assert!(!player.toggle_sleep_timer(60));
        assert!(!player.sleep_timer().is_armed());
        assert_eq!(player.state().sleep_deadline, None);
    }
}
