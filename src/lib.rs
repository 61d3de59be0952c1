//! # radiom
//!
//! Client library for a hosted internet-radio service: browse a station
//! catalog, play live streams, chat about them in real time and manage a
//! small profile.
//!
//! ## Features
//!
//! * One playback session owns the audio output; every view observes it
//! * Sleep timer with preset durations
//! * Station catalog with search and a built-in fallback list
//! * Live comment feed with push updates
//! * E-mail, federated and guest sign-in with persisted sessions
//!
//! ## Architecture
//!
//! ### Playback
//! * [`player`]: the playback session and its [`Output`](player::Output) seam
//! * [`audio`]: `rodio` output for live HTTP streams
//! * [`sleep`]: one-shot sleep timer
//! * [`events`]: discrete playback events
//!
//! ### Views
//! * [`catalog`]: station list with filtering and fallback
//! * [`comments`]: per-station comment feed
//! * [`auth`]: authentication status and transitions
//!
//! ### Backend
//! * [`gateway`]: REST client implementing the service traits
//! * [`realtime`]: websocket push channel
//! * [`backend`]: wire types
//! * [`http`]: rate-limited HTTP client
//! * [`tokens`]: identity session tokens
//!
//! ### Support
//! * [`config`]: backend configuration
//! * [`store`]: persisted local state
//! * [`error`]: error types
//! * [`signal`]: process signals
//! * [`util`]: small helpers
//!
//! ## Concurrency
//!
//! The client is single-threaded and event-driven. Network calls run as
//! tasks that report back over channels; state is only changed from the
//! loop that owns it.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[macro_use]
extern crate log;

pub mod audio;
pub mod auth;
pub mod backend;
pub mod catalog;
pub mod comments;
pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod http;
pub mod player;
pub mod realtime;
pub mod signal;
pub mod sleep;
pub mod store;
pub mod tokens;
pub mod util;
