//! Local state that survives restarts.
//!
//! A small TOML file holds the guest flag and the identity session:
//!
//! ```toml
//! guest = false
//!
//! [session]
//! token = "eyJhbGciOi…"
//! refresh_token = "v1.Mk…"
//! expires_at = 1717936496
//!
//! [session.user]
//! id = "7b7c…"
//! email = "aung@example.com"
//! ```
//!
//! Every change is written through immediately. A [`Store`] without a
//! path keeps its state in memory only.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use veil::Redact;

use crate::{
    error::{Error, Result},
    tokens::UserToken,
};

/// Persisted state.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize, Redact)]
pub struct State {
    /// Whether the user chose to continue without an account.
    #[serde(default)]
    pub guest: bool,

    #[redact]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<UserToken>,
}

/// Write-through store for [`State`].
#[derive(Debug)]
pub struct Store {
    path: Option<PathBuf>,
    state: State,
}

impl Store {
    /// Maximum size of the state file.
    const MAX_FILE_SIZE: u64 = 64 * 1024;

    /// Opens the state file at `path`, starting empty when it does not
    /// exist yet.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed, or
    /// is unreasonably large.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = match fs::metadata(&path) {
            Ok(metadata) => {
                if metadata.len() > Self::MAX_FILE_SIZE {
                    return Err(Error::out_of_range(format!(
                        "{} is too large ({} bytes)",
                        path.display(),
                        metadata.len()
                    )));
                }
                let contents = fs::read_to_string(&path)?;
                toml::from_str(&contents)?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no state at {}; starting fresh", path.display());
                State::default()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path: Some(path),
            state,
        })
    }

    /// A store that is not backed by a file.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: State::default(),
        }
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    #[must_use]
    pub fn state(&self) -> &State {
        &self.state
    }

    #[must_use]
    pub fn is_guest(&self) -> bool {
        self.state.guest
    }

    #[must_use]
    pub fn session(&self) -> Option<&UserToken> {
        self.state.session.as_ref()
    }

    /// Sets the guest flag and persists it.
    ///
    /// # Errors
    ///
    /// Returns error if the state file cannot be written.
    pub fn set_guest(&mut self, guest: bool) -> Result<()> {
        if self.state.guest == guest {
            return Ok(());
        }
        self.state.guest = guest;
        self.save()
    }

    /// Replaces the identity session and persists it.
    ///
    /// # Errors
    ///
    /// Returns error if the state file cannot be written.
    pub fn set_session(&mut self, session: Option<UserToken>) -> Result<()> {
        if self.state.session == session {
            return Ok(());
        }
        self.state.session = session;
        self.save()
    }

    fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        // Write aside and rename so that a crash never leaves half a file.
        let contents = toml::to_string(&self.state)?;
        let staging = path.with_extension("tmp");
        fs::write(&staging, contents)?;
        fs::rename(&staging, path)?;

        trace!("saved state to {}", path.display());
        Ok(())
    }
}
