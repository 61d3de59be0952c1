//! Client configuration.
//!
//! The backend location and its public API key are read from a small TOML
//! file:
//!
//! ```toml
//! backend_url = "https://project.example.co"
//! api_key = "eyJhbGciOi…"
//! # Where federated sign-in redirects to; optional.
//! redirect_url = "http://localhost:5173/auth/callback"
//! ```
//!
//! The user agent is derived from the build and the host.

use std::{fs, path::Path};

use serde::Deserialize;
use url::Url;
use veil::Redact;

use crate::error::{Error, Result};

/// Contents of the configuration file.
#[derive(Clone, Deserialize, Redact)]
struct ConfigFile {
    backend_url: Url,
    #[redact]
    api_key: String,
    #[serde(default)]
    redirect_url: Option<Url>,
}

#[derive(Clone, PartialEq, Eq, Hash, Redact)]
pub struct Config {
    pub app_name: String,
    pub app_version: String,
    pub app_lang: String,

    pub user_agent: String,

    /// Root of the hosted backend, e.g. `https://project.example.co/`.
    pub backend_url: Url,

    /// Public (anonymous) API key of the backend.
    #[redact]
    pub api_key: String,

    /// Where federated sign-in redirects back to.
    pub redirect_url: Option<Url>,
}

impl Config {
    /// Configuration files are small; refuse anything larger.
    const MAX_FILE_SIZE: u64 = 16 * 1024;

    /// Creates a configuration for the given backend.
    ///
    /// # Errors
    ///
    /// Will return `Err` if:
    /// - the API key is empty
    /// - the backend URL cannot serve as a base URL
    /// - no valid `User-Agent` can be derived from the build and the host
    pub fn new(backend_url: Url, api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(Error::invalid_argument("api key is empty"));
        }
        if backend_url.cannot_be_a_base() {
            return Err(Error::invalid_argument(format!(
                "backend url {backend_url} cannot be a base"
            )));
        }

        let app_name = env!("CARGO_PKG_NAME").to_owned();
        let app_version = env!("CARGO_PKG_VERSION").to_owned();
        let app_lang = "en".to_owned();

        let user_agent = Self::user_agent(&app_name, &app_version, &app_lang)?;
        trace!("user agent: {user_agent}");

        Ok(Self {
            app_name,
            app_version,
            app_lang,
            user_agent,
            backend_url,
            api_key,
            redirect_url: None,
        })
    }

    /// Loads the configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the file cannot be read, is too large, is not
    /// valid TOML or holds invalid values.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        // Prevent out-of-memory conditions: the file should be small.
        let file_size = fs::metadata(path)?.len();
        if file_size > Self::MAX_FILE_SIZE {
            return Err(Error::out_of_range(format!(
                "{} is too large ({file_size} bytes)",
                path.display()
            )));
        }

        let contents = fs::read_to_string(path)?;
        let file: ConfigFile = toml::from_str(&contents)?;

        let mut config = Self::new(file.backend_url, file.api_key)?;
        config.redirect_url = file.redirect_url;
        Ok(config)
    }

    /// Builds a `User-Agent` in the form of
    /// `radiom/0.1.0 (Rust; linux/6.1; Desktop; en)`.
    fn user_agent(app_name: &str, app_version: &str, app_lang: &str) -> Result<String> {
        // Additional `User-Agent` string checks on top of `reqwest::HeaderValue`.
        let illegal_chars = |chr| chr == '/' || chr == ';';
        if app_name.is_empty()
            || app_name.contains(illegal_chars)
            || app_version.is_empty()
            || app_version.contains(illegal_chars)
            || app_lang.chars().count() != 2
            || app_lang.contains(illegal_chars)
        {
            return Err(Error::internal(format!(
                "application name, version and/or language invalid (\"{app_name}\"; \"{app_version}\"; \"{app_lang}\")"
            )));
        }

        let os_name = match std::env::consts::OS {
            "macos" => "osx",
            other => other,
        };
        let os_version = sysinfo::System::os_version()
            .filter(|version| !version.is_empty() && !version.contains(illegal_chars))
            .unwrap_or_else(|| String::from("0"));

        Ok(format!(
            "{app_name}/{app_version} (Rust; {os_name}/{os_version}; Desktop; {app_lang})"
        ))
    }

    /// Resolves a path relative to the backend root.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the result is not a valid URL.
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        self.backend_url.join(path).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> Url {
        Url::parse("https://project.example.co/").unwrap()
    }

    #[test]
    fn rejects_empty_api_key() {
        let err = Config::new(backend(), "  ").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidArgument);
    }

    #[test]
    fn user_agent_names_the_client() {
        let config = Config::new(backend(), "key").unwrap();
        assert!(config.user_agent.starts_with("radiom/"));
        assert!(config.user_agent.ends_with("; Desktop; en)"));
    }

    #[test]
    fn endpoints_resolve_against_backend() {
        let config = Config::new(backend(), "key").unwrap();
        assert_eq!(
            config.endpoint("rest/v1/comments").unwrap().as_str(),
            "https://project.example.co/rest/v1/comments"
        );
    }

    #[test]
    fn api_key_is_redacted() {
        let config = Config::new(backend(), "very-secret-key").unwrap();
        assert!(!format!("{config:?}").contains("very-secret-key"));
    }
}
