//! Authentication session.
//!
//! Who the user is, as one value: [`AuthStatus`]. There is no separate
//! "loading" or "guest" flag to keep in sync with it.
//!
//! ```text
//!              init: session found ──────────────► Authenticated(profile)
//!   Loading ── init: no session, guest flag ─────► Guest
//!              init: no session, or check failed ► Unauthenticated
//!
//!   any ── sign_in / sign_up / federated ────────► Authenticated(profile)
//!   any ── continue_as_guest ────────────────────► Guest
//!   any ── sign_out ─────────────────────────────► Unauthenticated
//! ```
//!
//! The guest flag and the identity session are persisted in the
//! [`Store`], so a restart resumes where the user left off.

use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use crate::{
    backend::{IdentityUser, NewProfile, Profile, ProfileChanges, SignUpFields, UserId},
    error::{Error, ErrorKind, Result},
    store::Store,
    tokens::UserToken,
};

/// Access to the identity service and the profile table.
///
/// Implementations keep the bearer token of the current session and
/// refresh it when it expires.
#[async_trait]
pub trait Identity: Send + Sync {
    /// Creates an identity.
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        fields: &SignUpFields,
    ) -> Result<Registration>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<UserToken>;

    /// Where to send the user to sign in with `provider`.
    fn federated_sign_in_url(&self, provider: &str) -> Result<Url>;

    /// Takes the session from the URL the provider redirected back to.
    async fn complete_federated_sign_in(&self, callback: &Url) -> Result<UserToken>;

    /// Adopts a persisted session, refreshing it if it expired.
    ///
    /// Returns `None` when the service no longer accepts it.
    async fn restore(&self, session: UserToken) -> Result<Option<UserToken>>;

    /// The session currently in use, which may have been refreshed since
    /// it was handed out.
    fn session(&self) -> Option<UserToken>;

    async fn sign_out(&self) -> Result<()>;

    /// Requests a password reset e-mail.
    async fn reset_password(&self, email: &str) -> Result<()>;

    async fn profile(&self, user: &UserId) -> Result<Option<Profile>>;

    async fn create_profile(&self, profile: &NewProfile) -> Result<Profile>;

    async fn update_profile(&self, user: &UserId, changes: &ProfileChanges) -> Result<Profile>;

    async fn username_taken(&self, username: &str) -> Result<bool>;
}

/// Identity created by [`Identity::sign_up`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Registration {
    /// The account is usable right away.
    Session(UserToken),

    /// The account must be confirmed by e-mail before it can sign in.
    Pending(IdentityUser),
}

/// Who the user is.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum AuthStatus {
    /// The persisted session has not been checked yet.
    #[default]
    Loading,

    Authenticated(Profile),

    /// Using the client without an account.
    Guest,

    Unauthenticated,
}

/// Outcome of [`AuthSession::sign_up`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignUpOutcome {
    Authenticated,

    /// The account exists but must be confirmed by e-mail first.
    ConfirmationPending,
}

/// The authentication state of the client.
pub struct AuthSession<I: ?Sized> {
    identity: Arc<I>,
    store: Store,
    status: AuthStatus,
}

impl<I> AuthSession<I>
where
    I: Identity + ?Sized,
{
    /// Shortest password accepted.
    pub const MIN_PASSWORD_LEN: usize = 6;

    /// Number of usernames checked before falling back to one derived from
    /// the user id.
    const USERNAME_ATTEMPTS: usize = 5;

    /// Creates a session in [`AuthStatus::Loading`]. Call
    /// [`AuthSession::init`] to resolve it.
    pub fn new(identity: Arc<I>, store: Store) -> Self {
        Self {
            identity,
            store,
            status: AuthStatus::Loading,
        }
    }

    #[must_use]
    pub fn status(&self) -> &AuthStatus {
        &self.status
    }

    #[must_use]
    pub fn profile(&self) -> Option<&Profile> {
        match &self.status {
            AuthStatus::Authenticated(profile) => Some(profile),
            _ => None,
        }
    }

    #[must_use]
    pub fn user_id(&self) -> Option<&UserId> {
        self.profile().map(|profile| &profile.id)
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        matches!(self.status, AuthStatus::Authenticated(_))
    }

    #[must_use]
    pub fn is_guest(&self) -> bool {
        self.status == AuthStatus::Guest
    }

    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Resolves [`AuthStatus::Loading`] from the persisted state.
    ///
    /// Never leaves the status at `Loading`: a failed check ends in
    /// [`AuthStatus::Unauthenticated`].
    pub async fn init(&mut self) -> &AuthStatus {
        self.status = AuthStatus::Loading;

        self.status = match self.restore().await {
            Ok(Some(profile)) => {
                info!("signed in as {}", profile.username);
                AuthStatus::Authenticated(profile)
            }
            Ok(None) if self.store.is_guest() => {
                info!("continuing as guest");
                AuthStatus::Guest
            }
            Ok(None) => AuthStatus::Unauthenticated,
            Err(e) => {
                error!("error checking session: {e}");
                if e.kind == ErrorKind::Unauthenticated {
                    self.forget_session();
                }
                AuthStatus::Unauthenticated
            }
        };

        &self.status
    }

    async fn restore(&mut self) -> Result<Option<Profile>> {
        let Some(session) = self.store.session().cloned() else {
            return Ok(None);
        };

        debug!("restoring session of user {}", session.user_id());
        match self.identity.restore(session).await? {
            Some(fresh) => {
                let user = fresh.user.clone();
                self.store.set_session(Some(fresh))?;
                self.ensure_profile(&user).await.map(Some)
            }
            None => {
                warn!("stored session was rejected");
                self.forget_session();
                Ok(None)
            }
        }
    }

    fn forget_session(&mut self) {
        if let Err(e) = self.store.set_session(None) {
            error!("failed to clear stored session: {e}");
        }
    }

    /// Persists the session the identity service is using now.
    fn save_session(&mut self) {
        if let Some(session) = self.identity.session() {
            if let Err(e) = self.store.set_session(Some(session)) {
                error!("failed to store session: {e}");
            }
        }
    }

    fn authenticate(&mut self, profile: Profile) {
        if let Err(e) = self.store.set_guest(false) {
            error!("failed to clear guest flag: {e}");
        }
        info!("signed in as {}", profile.username);
        self.status = AuthStatus::Authenticated(profile);
    }

    /// Restores a usable status after a failed attempt.
    fn settle(&mut self) {
        if self.status == AuthStatus::Loading {
            self.status = AuthStatus::Unauthenticated;
        }
    }

    /// Checks credentials before they are sent anywhere.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an e-mail address without `@` or a
    /// password shorter than [`AuthSession::MIN_PASSWORD_LEN`].
    pub fn validate_credentials(email: &str, password: &str) -> Result<()> {
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(Error::invalid_argument("invalid e-mail address"));
        }
        if password.chars().count() < Self::MIN_PASSWORD_LEN {
            return Err(Error::invalid_argument(format!(
                "password must be at least {} characters",
                Self::MIN_PASSWORD_LEN
            )));
        }
        Ok(())
    }

    /// Continues without an account. Does not contact the service.
    ///
    /// # Errors
    ///
    /// Returns error if the guest flag cannot be persisted; the status is
    /// `Guest` regardless.
    pub fn continue_as_guest(&mut self) -> Result<()> {
        self.status = AuthStatus::Guest;
        self.store.set_guest(true)
    }

    /// Signs in with e-mail and password.
    ///
    /// # Errors
    ///
    /// Returns error if the credentials are invalid or rejected. The status
    /// is left as it was.
    pub async fn sign_in(&mut self, email: &str, password: &str) -> Result<()> {
        let result = self.try_sign_in(email, password).await;
        if result.is_err() {
            self.settle();
        }
        result
    }

    async fn try_sign_in(&mut self, email: &str, password: &str) -> Result<()> {
        Self::validate_credentials(email, password)?;
        let session = self.identity.sign_in(email.trim(), password).await?;
        let user = session.user.clone();
        self.store.set_session(Some(session))?;

        let profile = self.ensure_profile(&user).await?;
        self.authenticate(profile);
        Ok(())
    }

    /// Creates an account and its profile.
    ///
    /// # Errors
    ///
    /// Returns error if the input is invalid or the service rejects it.
    pub async fn sign_up(
        &mut self,
        email: &str,
        password: &str,
        fields: &SignUpFields,
    ) -> Result<SignUpOutcome> {
        let result = self.try_sign_up(email, password, fields).await;
        if result.is_err() {
            self.settle();
        }
        result
    }

    async fn try_sign_up(
        &mut self,
        email: &str,
        password: &str,
        fields: &SignUpFields,
    ) -> Result<SignUpOutcome> {
        Self::validate_credentials(email, password)?;
        if fields.username.trim().is_empty() {
            return Err(Error::invalid_argument("username is empty"));
        }

        let email = email.trim();
        let session = match self.identity.sign_up(email, password, fields).await? {
            Registration::Session(session) => session,
            Registration::Pending(user) => {
                info!("account created; waiting for e-mail confirmation");
                let new = NewProfile::from_sign_up(user.id, email, fields);
                if let Err(e) = self.identity.create_profile(&new).await {
                    // The sign-up fields are kept in the user metadata and
                    // used when the first sign-in creates the profile.
                    warn!("could not create profile before confirmation: {e}");
                }
                return Ok(SignUpOutcome::ConfirmationPending);
            }
        };

        let id = session.user_id().clone();
        self.store.set_session(Some(session))?;

        let profile = self
            .identity
            .create_profile(&NewProfile::from_sign_up(id, email, fields))
            .await?;
        self.authenticate(profile);
        Ok(SignUpOutcome::Authenticated)
    }

    /// Where to send the user to sign in with `provider`.
    ///
    /// # Errors
    ///
    /// Returns error if the URL cannot be built.
    pub fn federated_sign_in_url(&self, provider: &str) -> Result<Url> {
        self.identity.federated_sign_in_url(provider)
    }

    /// Finishes a federated sign-in from the redirect URL, creating a
    /// profile on first sign-in.
    ///
    /// # Errors
    ///
    /// Returns error if the URL carries no session or the service rejects
    /// it.
    pub async fn complete_federated_sign_in(&mut self, callback: &Url) -> Result<()> {
        let result = self.try_complete_federated_sign_in(callback).await;
        if result.is_err() {
            self.settle();
        }
        result
    }

    async fn try_complete_federated_sign_in(&mut self, callback: &Url) -> Result<()> {
        let session = self.identity.complete_federated_sign_in(callback).await?;
        let user = session.user.clone();
        self.store.set_session(Some(session))?;

        let profile = self.ensure_profile(&user).await?;
        self.authenticate(profile);
        Ok(())
    }

    /// Signs out, both locally and at the service.
    ///
    /// Always ends in [`AuthStatus::Unauthenticated`], even if the service
    /// cannot be reached.
    pub async fn sign_out(&mut self) {
        if let Err(e) = self.identity.sign_out().await {
            warn!("error signing out at the service: {e}");
        }

        if let Err(e) = self.store.set_guest(false) {
            error!("failed to clear guest flag: {e}");
        }
        self.forget_session();

        info!("signed out");
        self.status = AuthStatus::Unauthenticated;
    }

    /// Requests a password reset e-mail.
    ///
    /// # Errors
    ///
    /// Returns error if the address is invalid or the request fails.
    pub async fn reset_password(&self, email: &str) -> Result<()> {
        let email = email.trim();
        if !email.contains('@') {
            return Err(Error::invalid_argument("invalid e-mail address"));
        }
        self.identity.reset_password(email).await
    }

    /// Updates the profile of the signed-in user.
    ///
    /// # Errors
    ///
    /// Returns `FailedPrecondition` when not signed in, or the service
    /// error. The status keeps the old profile on failure.
    pub async fn update_profile(&mut self, changes: &ProfileChanges) -> Result<&Profile> {
        let Some(user) = self.user_id().cloned() else {
            return Err(Error::failed_precondition("not signed in"));
        };

        if changes
            .username
            .as_deref()
            .is_some_and(|username| username.trim().is_empty())
        {
            return Err(Error::invalid_argument("username is empty"));
        }

        let profile = if changes.is_empty() {
            self.identity.profile(&user).await?.ok_or_else(|| {
                Error::not_found(format!("profile of user {user} not found"))
            })?
        } else {
            self.identity.update_profile(&user, changes).await?
        };
        self.save_session();

        self.status = AuthStatus::Authenticated(profile);
        self.profile()
            .ok_or_else(|| Error::internal("profile vanished"))
    }

    /// Fetches the profile of `user`, creating one when it is missing.
    async fn ensure_profile(&mut self, user: &IdentityUser) -> Result<Profile> {
        let profile = self.identity.profile(&user.id).await?;
        self.save_session();
        if let Some(profile) = profile {
            return Ok(profile);
        }

        let Some(email) = user.email.as_deref() else {
            warn!("user {} has no e-mail; using a minimal profile", user.id);
            return Ok(Profile::from_identity(user));
        };

        let metadata = &user.user_metadata;
        let base = [metadata.username.as_deref(), metadata.name.as_deref()]
            .into_iter()
            .flatten()
            .find(|name| !name.trim().is_empty())
            .unwrap_or_else(|| email.split('@').next().unwrap_or_default());
        let username = self.unique_username(base, &user.id).await?;

        // E-mail sign-ups carry their chosen username; their profile gets
        // the sign-up defaults. Federated profiles start blank.
        let signed_up = metadata.username.is_some();
        let or_default = |value: &Option<String>, default: &str| {
            value
                .clone()
                .or_else(|| signed_up.then(|| default.to_owned()))
                .unwrap_or_default()
        };

        let new = NewProfile {
            id: user.id.clone(),
            email: email.to_owned(),
            username,
            full_name: metadata.full_name.clone().unwrap_or_default(),
            status: or_default(&metadata.status, NewProfile::DEFAULT_STATUS),
            country: or_default(&metadata.country, NewProfile::DEFAULT_COUNTRY),
            avatar_url: metadata.avatar_url.clone(),
            is_premium: false,
            is_guest: false,
        };
        debug!("creating profile {}", new.username);
        self.identity.create_profile(&new).await
    }

    /// Picks a username that is not taken yet: `base` itself, then `base`
    /// with random suffixes, then `base` with the start of the user id.
    async fn unique_username(&self, base: &str, user: &UserId) -> Result<String> {
        let base = base.trim();
        let mut candidate = base.to_owned();
        for _ in 0..Self::USERNAME_ATTEMPTS {
            if !self.identity.username_taken(&candidate).await? {
                return Ok(candidate);
            }
            candidate = format!("{base}_{}", fastrand::u32(0..10_000));
        }

        let prefix: String = user.as_str().chars().take(8).collect();
        Ok(format!("{base}_{prefix}"))
    }
}
