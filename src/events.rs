//! Events emitted by the playback session.
//!
//! State observers (a mini-player, a full player page) usually watch the
//! whole [`PlaybackState`](crate::player::PlaybackState) instead. Events
//! are for reacting to discrete moments: showing a notice when a stream
//! fails, or when the sleep timer stopped playback.
//!
//! # Example
//!
//! ```rust
//! use radiom::events::Event;
//!
//! fn handle_event(event: Event) {
//!     match event {
//!         Event::Play => println!("Playback started"),
//!         Event::PlaybackFailed => println!("Stream could not be played"),
//!         Event::SleepTimerElapsed => println!("Good night"),
//!         _ => {}
//!     }
//! }
//! ```

/// Discrete playback session events.
///
/// Playback Events:
/// * [`Play`](Self::Play) - Output reports or accepts playback
/// * [`Pause`](Self::Pause) - Playback pauses
/// * [`StationChanged`](Self::StationChanged) - A different station is loaded
/// * [`PlaybackFailed`](Self::PlaybackFailed) - The output could not play
///
/// Sleep Timer Events:
/// * [`SleepTimerArmed`](Self::SleepTimerArmed)
/// * [`SleepTimerCancelled`](Self::SleepTimerCancelled)
/// * [`SleepTimerElapsed`](Self::SleepTimerElapsed) - Playback was paused
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Event {
    /// Playback has started or resumed.
    Play,

    /// Playback has paused.
    Pause,

    /// A different station has been loaded into the output.
    StationChanged,

    /// The output rejected or lost the stream.
    PlaybackFailed,

    /// The sleep timer was armed or re-armed.
    SleepTimerArmed,

    /// The sleep timer was cancelled before it fired.
    SleepTimerCancelled,

    /// The sleep timer fired and paused playback.
    SleepTimerElapsed,
}
