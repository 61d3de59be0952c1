//! Process signals: stop on Ctrl-C or SIGTERM, refresh on SIGHUP.
//!
//! On Windows only Ctrl-C is observed.
//!
//! # Example
//!
//! ```no_run
//! use radiom::signal::{Handler, Signal};
//!
//! async fn example() {
//!     let mut signals = Handler::new().unwrap();
//!
//!     match signals.recv().await {
//!         Signal::Interrupt | Signal::Terminate => println!("stopping playback"),
//!         Signal::Refresh => println!("reloading stations"),
//!     }
//! }
//! ```

use std::fmt;

use crate::error::Result;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// A signal the client reacts to.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Signal {
    /// Ctrl-C: stop.
    Interrupt,

    /// SIGTERM: stop.
    Terminate,

    /// SIGHUP: refetch the station catalog.
    Refresh,
}

impl Signal {
    /// Whether the client should shut down.
    #[must_use]
    pub fn is_shutdown(self) -> bool {
        matches!(self, Self::Interrupt | Self::Terminate)
    }
}

/// Listens for process signals.
pub struct Handler {
    #[cfg(unix)]
    sigterm: tokio::signal::unix::Signal,
    #[cfg(unix)]
    sighup: tokio::signal::unix::Signal,
}

impl Handler {
    /// Registers the signal listeners.
    ///
    /// # Errors
    ///
    /// Returns error if signal handlers cannot be registered.
    pub fn new() -> Result<Self> {
        #[cfg(unix)]
        {
            Ok(Self {
                sigterm: signal(SignalKind::terminate())?,
                sighup: signal(SignalKind::hangup())?,
            })
        }

        #[cfg(not(unix))]
        Ok(Self {})
    }

    /// Waits for the next signal. Cancel safe.
    pub async fn recv(&mut self) -> Signal {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => Signal::Interrupt,
                _ = self.sigterm.recv() => Signal::Terminate,
                _ = self.sighup.recv() => Signal::Refresh,
            }
        }

        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            Signal::Interrupt
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Interrupt => write!(f, "Ctrl+C"),
            Signal::Terminate => write!(f, "SIGTERM"),
            Signal::Refresh => write!(f, "SIGHUP"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_refresh_keeps_running() {
        assert!(Signal::Interrupt.is_shutdown());
        assert!(Signal::Terminate.is_shutdown());
        assert!(!Signal::Refresh.is_shutdown());
        assert_eq!(Signal::Refresh.to_string(), "SIGHUP");
    }
}
