//! REST gateway to the hosted backend.
//!
//! [`Gateway`] implements the service traits the views depend on
//! ([`Catalog`], [`CommentService`] and [`Identity`]) over the backend's
//! table and identity APIs.
//!
//! # Authorization
//!
//! Requests carry the public API key. When a user is signed in, they also
//! carry the user's access token as bearer, so that row-level policies
//! apply to the user; otherwise the API key doubles as bearer. Access
//! tokens close to expiry are refreshed with the refresh token before they
//! are used.
//!
//! # Example
//!
//! ```rust
//! let gateway = Gateway::new(&config)?;
//! let view = CatalogView::load(&gateway).await;
//! let comments = gateway.comments(&view.stations()[0].id).await?;
//! ```

use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::{
    header::{HeaderName, HeaderValue},
    Method,
};
use serde::de::IgnoredAny;
use url::Url;

use crate::{
    auth::{Identity, Registration},
    backend::{
        auth::{PasswordGrant, RecoverRequest, RefreshGrant, SignUpRequest, SignUpResponse},
        Comment, IdentityUser, NewComment, NewProfile, Profile, ProfileChanges, SignUpFields,
        Station, StationId, TokenResponse, UserId, WaitlistEntry,
    },
    catalog::Catalog,
    comments::CommentService,
    config::Config,
    error::{Error, ErrorKind, Result},
    http::Client as HttpClient,
    tokens::UserToken,
    util::now_from_epoch,
};

/// Client of the backend's REST surfaces.
pub struct Gateway {
    http_client: HttpClient,
    config: Config,

    /// Session of the signed-in user, if any.
    session: Mutex<Option<UserToken>>,
}

impl Gateway {
    const STATIONS_PATH: &'static str = "rest/v1/radio_stations";
    const COMMENTS_PATH: &'static str = "rest/v1/comments";
    const USERS_PATH: &'static str = "rest/v1/users";
    const WAITLIST_PATH: &'static str = "rest/v1/waiting_list";

    /// Columns of a comment read, with the author joined in.
    const COMMENT_COLUMNS: &'static str = "*,user:users(id,username,avatar_url)";

    /// Makes inserts and updates answer with the stored rows.
    const PREFER: HeaderName = HeaderName::from_static("prefer");
    const RETURN_REPRESENTATION: HeaderValue = HeaderValue::from_static("return=representation");

    /// Lifetime assumed for tokens handed out without one.
    const DEFAULT_EXPIRES_IN: u64 = 3600;

    /// Creates a gateway for the backend in `config`.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            http_client: HttpClient::new(config)?,
            config: config.clone(),
            session: Mutex::new(None),
        })
    }

    fn current(&self) -> Result<Option<UserToken>> {
        Ok(self.session.lock()?.clone())
    }

    fn adopt(&self, session: Option<UserToken>) -> Result<()> {
        *self.session.lock()? = session;
        Ok(())
    }

    /// Bearer credentials for the next request: the access token of the
    /// signed-in user, refreshed when needed, or else the API key.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an expired session cannot be refreshed.
    pub async fn access_token(&self) -> Result<String> {
        match self.current()? {
            None => Ok(self.config.api_key.clone()),
            Some(session) if session.is_expired() => {
                debug!("access token expired; refreshing");
                let fresh = self.refresh(&session).await?;
                let token = fresh.token.clone();
                self.adopt(Some(fresh))?;
                Ok(token)
            }
            Some(session) => Ok(session.token),
        }
    }

    async fn refresh(&self, session: &UserToken) -> Result<UserToken> {
        let mut url = self.config.endpoint("auth/v1/token")?;
        url.query_pairs_mut()
            .append_pair("grant_type", "refresh_token");

        let grant = RefreshGrant {
            refresh_token: &session.refresh_token,
        };
        let request =
            self.http_client
                .request_json(Method::POST, url, &self.config.api_key, &grant)?;
        let response: TokenResponse = self.http_client.json(request).await?;

        let fresh = UserToken::from(response);
        debug!(
            "refreshed session of user {}; valid for {}s",
            fresh.user_id(),
            fresh.time_to_live().as_secs()
        );
        Ok(fresh)
    }

    async fn user(&self, access_token: &str) -> Result<IdentityUser> {
        let url = self.config.endpoint("auth/v1/user")?;
        let request = self.http_client.request(Method::GET, url, access_token);
        self.http_client.json(request).await
    }

    /// Adds `entry` to the waiting list of the upcoming music catalog.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the backend refuses the entry.
    pub async fn join_waiting_list(&self, entry: &WaitlistEntry) -> Result<()> {
        let url = self.config.endpoint(Self::WAITLIST_PATH)?;

        let bearer = self.access_token().await?;
        let request = self
            .http_client
            .request_json(Method::POST, url, &bearer, entry)?;
        self.http_client.execute(request).await?;

        info!("joined the waiting list as {}", entry.name);
        Ok(())
    }

    /// URL of a table read with `query` appended.
    fn table_url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url> {
        let mut url = self.config.endpoint(path)?;
        url.query_pairs_mut().extend_pairs(query);
        Ok(url)
    }

    /// Reads the token grant from the fragment of a federated sign-in
    /// redirect.
    ///
    /// Returns the access token, refresh token and lifetime in seconds.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the provider reported an error or the URL
    /// carries no tokens.
    pub fn parse_callback(callback: &Url) -> Result<(String, String, u64)> {
        let params = callback
            .fragment()
            .map(|fragment| url::form_urlencoded::parse(fragment.as_bytes()))
            .into_iter()
            .flatten()
            .chain(callback.query_pairs());

        let mut access_token = None;
        let mut refresh_token = None;
        let mut expires_in = None;
        let mut error = None;
        for (key, value) in params {
            match key.as_ref() {
                "access_token" => access_token = Some(value.into_owned()),
                "refresh_token" => refresh_token = Some(value.into_owned()),
                "expires_in" => expires_in = value.parse().ok(),
                "error_description" => error = Some(value.into_owned()),
                "error" => {
                    if error.is_none() {
                        error = Some(value.into_owned());
                    }
                }
                _ => {}
            }
        }

        if let Some(error) = error {
            return Err(Error::unauthenticated(error));
        }

        match (access_token, refresh_token) {
            (Some(access_token), Some(refresh_token)) => Ok((
                access_token,
                refresh_token,
                expires_in.unwrap_or(Self::DEFAULT_EXPIRES_IN),
            )),
            _ => Err(Error::invalid_argument("callback carries no session")),
        }
    }
}

#[async_trait]
impl Catalog for Gateway {
    async fn stations(&self) -> Result<Option<Vec<Station>>> {
        let url = self.table_url(
            Self::STATIONS_PATH,
            &[
                ("select", "*"),
                ("is_active", "eq.true"),
                ("order", "created_at.desc"),
            ],
        )?;

        let bearer = self.access_token().await?;
        let request = self.http_client.request(Method::GET, url, &bearer);
        self.http_client.json(request).await
    }
}

#[async_trait]
impl CommentService for Gateway {
    async fn comments(&self, station: &StationId) -> Result<Vec<Comment>> {
        let station_filter = format!("eq.{station}");
        let url = self.table_url(
            Self::COMMENTS_PATH,
            &[
                ("select", Self::COMMENT_COLUMNS),
                ("station_id", &station_filter),
                ("order", "created_at.desc"),
            ],
        )?;

        let bearer = self.access_token().await?;
        let request = self.http_client.request(Method::GET, url, &bearer);
        let comments: Option<Vec<Comment>> = self.http_client.json(request).await?;
        Ok(comments.unwrap_or_default())
    }

    async fn post(&self, comment: NewComment<'_>) -> Result<Comment> {
        let url = self.table_url(Self::COMMENTS_PATH, &[("select", Self::COMMENT_COLUMNS)])?;

        let bearer = self.access_token().await?;
        let request = self
            .http_client
            .request_json(Method::POST, url, &bearer, &comment)?
            .header(Self::PREFER, Self::RETURN_REPRESENTATION);
        let stored: Vec<Comment> = self.http_client.json(request).await?;

        stored
            .into_iter()
            .next()
            .ok_or_else(|| Error::data_loss("comment was not returned after insert"))
    }
}

#[async_trait]
impl Identity for Gateway {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        fields: &SignUpFields,
    ) -> Result<Registration> {
        let url = self.config.endpoint("auth/v1/signup")?;
        let body = SignUpRequest {
            email,
            password,
            data: fields,
        };
        let request =
            self.http_client
                .request_json(Method::POST, url, &self.config.api_key, &body)?;

        match self.http_client.json::<SignUpResponse>(request).await? {
            SignUpResponse::Session(response) => {
                let session = UserToken::from(response);
                self.adopt(Some(session.clone()))?;
                Ok(Registration::Session(session))
            }
            SignUpResponse::Pending(user) => {
                debug!("user {} must confirm their e-mail", user.id);
                Ok(Registration::Pending(user))
            }
        }
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<UserToken> {
        let mut url = self.config.endpoint("auth/v1/token")?;
        url.query_pairs_mut().append_pair("grant_type", "password");

        let grant = PasswordGrant { email, password };
        let request =
            self.http_client
                .request_json(Method::POST, url, &self.config.api_key, &grant)?;
        let response: TokenResponse = self.http_client.json(request).await?;

        let session = UserToken::from(response);
        self.adopt(Some(session.clone()))?;
        Ok(session)
    }

    fn federated_sign_in_url(&self, provider: &str) -> Result<Url> {
        let provider = provider.trim();
        if provider.is_empty() {
            return Err(Error::invalid_argument("no sign-in provider given"));
        }

        let mut url = self.config.endpoint("auth/v1/authorize")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("provider", provider);
            if let Some(redirect) = &self.config.redirect_url {
                query.append_pair("redirect_to", redirect.as_str());
            }
        }
        Ok(url)
    }

    async fn complete_federated_sign_in(&self, callback: &Url) -> Result<UserToken> {
        let (token, refresh_token, expires_in) = Self::parse_callback(callback)?;
        let user = self.user(&token).await?;

        let session = UserToken {
            user,
            token,
            refresh_token,
            expires_at: now_from_epoch().saturating_add(expires_in),
        };
        self.adopt(Some(session.clone()))?;
        Ok(session)
    }

    async fn restore(&self, session: UserToken) -> Result<Option<UserToken>> {
        let rejected = |e: &Error| {
            matches!(
                e.kind,
                ErrorKind::Unauthenticated | ErrorKind::InvalidArgument | ErrorKind::PermissionDenied
            )
        };

        let mut session = if session.is_expired() {
            match self.refresh(&session).await {
                Ok(fresh) => fresh,
                Err(e) if rejected(&e) => {
                    debug!("refresh token rejected: {e}");
                    return Ok(None);
                }
                Err(e) => return Err(e),
            }
        } else {
            session
        };

        match self.user(&session.token).await {
            Ok(user) => session.user = user,
            Err(e) if rejected(&e) => {
                debug!("access token rejected: {e}");
                return Ok(None);
            }
            Err(e) => return Err(e),
        }

        self.adopt(Some(session.clone()))?;
        Ok(Some(session))
    }

    fn session(&self) -> Option<UserToken> {
        self.current().ok().flatten()
    }

    async fn sign_out(&self) -> Result<()> {
        let Some(session) = self.current()? else {
            return Ok(());
        };
        self.adopt(None)?;

        let url = self.config.endpoint("auth/v1/logout")?;
        let request = self.http_client.request(Method::POST, url, &session.token);
        self.http_client.execute(request).await.map(|_| ())
    }

    async fn reset_password(&self, email: &str) -> Result<()> {
        let mut url = self.config.endpoint("auth/v1/recover")?;
        if let Some(redirect) = &self.config.redirect_url {
            url.query_pairs_mut()
                .append_pair("redirect_to", redirect.as_str());
        }

        let body = RecoverRequest { email };
        let request =
            self.http_client
                .request_json(Method::POST, url, &self.config.api_key, &body)?;
        self.http_client.execute(request).await.map(|_| ())
    }

    async fn profile(&self, user: &UserId) -> Result<Option<Profile>> {
        let id_filter = format!("eq.{user}");
        let url = self.table_url(Self::USERS_PATH, &[("select", "*"), ("id", &id_filter)])?;

        let bearer = self.access_token().await?;
        let request = self.http_client.request(Method::GET, url, &bearer);
        let profiles: Vec<Profile> = self.http_client.json(request).await?;
        Ok(profiles.into_iter().next())
    }

    async fn create_profile(&self, profile: &NewProfile) -> Result<Profile> {
        let url = self.table_url(Self::USERS_PATH, &[("select", "*")])?;

        let bearer = self.access_token().await?;
        let request = self
            .http_client
            .request_json(Method::POST, url, &bearer, profile)?
            .header(Self::PREFER, Self::RETURN_REPRESENTATION);
        let stored: Vec<Profile> = self.http_client.json(request).await?;

        stored
            .into_iter()
            .next()
            .ok_or_else(|| Error::data_loss("profile was not returned after insert"))
    }

    async fn update_profile(&self, user: &UserId, changes: &ProfileChanges) -> Result<Profile> {
        let id_filter = format!("eq.{user}");
        let url = self.table_url(Self::USERS_PATH, &[("select", "*"), ("id", &id_filter)])?;

        let bearer = self.access_token().await?;
        let request = self
            .http_client
            .request_json(Method::PATCH, url, &bearer, changes)?
            .header(Self::PREFER, Self::RETURN_REPRESENTATION);
        let stored: Vec<Profile> = self.http_client.json(request).await?;

        stored
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found(format!("profile of user {user} not found")))
    }

    async fn username_taken(&self, username: &str) -> Result<bool> {
        let username_filter = format!("eq.{username}");
        let url = self.table_url(
            Self::USERS_PATH,
            &[("select", "id"), ("username", &username_filter)],
        )?;

        let bearer = self.access_token().await?;
        let request = self.http_client.request(Method::GET, url, &bearer);
        let rows: Vec<IgnoredAny> = self.http_client.json(request).await?;
        Ok(!rows.is_empty())
    }
}
