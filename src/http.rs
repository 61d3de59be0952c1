//! HTTP client with rate limiting for the hosted backend.
//!
//! This module provides a wrapper around `reqwest::Client` that adds:
//! * Request rate limiting to stay within the backend's fair-use quota
//! * The API key header every backend request needs
//! * Consistent timeouts and headers
//! * Status checking that keeps the backend's error message
//!
//! # Example
//!
//! ```rust
//! use radiom::http::Client;
//!
//! let client = Client::new(&config)?;
//! let request = client.get(url);
//! let stations: Vec<Station> = client.json(request).await?;
//! ```

use std::{num::NonZeroU32, time::Duration};

use governor::{DefaultDirectRateLimiter, Quota};
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, ACCEPT_LANGUAGE, AUTHORIZATION, CONTENT_TYPE},
    Method, Url,
};
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    backend::auth::ErrorBody,
    config::Config,
    error::{Error, ErrorKind, Result},
};

/// HTTP client with built-in rate limiting.
pub struct Client {
    /// Unlimited request client for special cases.
    pub unlimited: reqwest::Client,

    /// Rate limiter for quota compliance.
    rate_limiter: DefaultDirectRateLimiter,
}

impl Client {
    /// Rolling window of the request quota.
    const RATE_LIMIT_INTERVAL: Duration = Duration::from_secs(5);

    /// Maximum calls per window. Requests beyond this are delayed.
    const RATE_LIMIT_CALLS_PER_INTERVAL: u8 = 50;

    /// Duration to keep idle connections alive.
    const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Duration to wait for individual network reads.
    const READ_TIMEOUT: Duration = Duration::from_secs(10);

    /// Header carrying the public API key.
    pub const API_KEY_HEADER: HeaderName = HeaderName::from_static("apikey");

    /// Creates a new client for the backend in `config`.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// * HTTP client creation fails
    /// * Header values are invalid
    /// * Rate limit parameters are zero
    pub fn new(config: &Config) -> Result<Self> {
        let mut headers = HeaderMap::new();

        // Not having `Accept-Language` set is non-fatal.
        if let Ok(lang) = HeaderValue::from_str(&config.app_lang) {
            headers.insert(ACCEPT_LANGUAGE, lang);
        }

        let mut api_key = HeaderValue::from_str(&config.api_key)?;
        api_key.set_sensitive(true);
        headers.insert(Self::API_KEY_HEADER, api_key);

        let http_client = reqwest::Client::builder()
            .tcp_keepalive(Self::KEEPALIVE_TIMEOUT)
            .read_timeout(Self::READ_TIMEOUT)
            .default_headers(headers)
            .user_agent(&config.user_agent);

        // Rate limit own requests as to not overload the backend.
        let replenish_interval =
            Self::RATE_LIMIT_INTERVAL / u32::from(Self::RATE_LIMIT_CALLS_PER_INTERVAL);
        let quota = Quota::with_period(replenish_interval)
            .ok_or_else(|| Error::internal("quota time interval is zero"))?
            .allow_burst(
                NonZeroU32::new(Self::RATE_LIMIT_CALLS_PER_INTERVAL.into())
                    .ok_or_else(|| Error::internal("calls per interval is zero"))?,
            );

        Ok(Self {
            unlimited: http_client.build()?,
            rate_limiter: governor::RateLimiter::direct(quota),
        })
    }

    /// Builds a request with the bearer credentials to act under.
    ///
    /// Anonymous requests authorize with the public API key itself.
    pub fn request(&self, method: Method, url: Url, bearer: &str) -> reqwest::RequestBuilder {
        self.unlimited
            .request(method, url)
            .header(AUTHORIZATION, format!("Bearer {bearer}"))
    }

    /// Builds a request with a JSON body.
    pub fn request_json<T>(
        &self,
        method: Method,
        url: Url,
        bearer: &str,
        body: &T,
    ) -> Result<reqwest::RequestBuilder>
    where
        T: Serialize + ?Sized,
    {
        let body = serde_json::to_vec(body)?;
        Ok(self
            .request(method, url, bearer)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body(body))
    }

    /// Executes a request with rate limiting, failing on non-success status.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// * The request cannot be built
    /// * A network error occurs
    /// * The backend answers with a non-success status; the error carries
    ///   the backend's message when it sent one
    pub async fn execute(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let request = request.build()?;
        trace!("{} {}", request.method(), request.url().path());

        // No need to await with jitter because the level of concurrency is low.
        self.rate_limiter.until_ready().await;
        let response = self.unlimited.execute(request).await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(|error| error.msg)
            .unwrap_or(body);
        Err(Error::new(
            ErrorKind::from_status(status),
            format!("{status}: {message}"),
        ))
    }

    /// Executes a request and parses the JSON response.
    ///
    /// # Errors
    ///
    /// See [`Client::execute`]; additionally fails when the body is not the
    /// expected JSON.
    pub async fn json<T>(&self, request: reqwest::RequestBuilder) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let response = self.execute(request).await?;
        response.json::<T>().await.map_err(Into::into)
    }
}
