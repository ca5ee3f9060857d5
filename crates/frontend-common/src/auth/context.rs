//! Global authentication context and provider
//!
//! [`AuthProvider`] owns the reactive session state for a front-end. It
//! mirrors the client's session events into a `watch` channel and re-checks
//! token expiry on a fixed interval while started.

use super::SessionError;
use super::error_messages::get_login_error;
use crate::config::AuthConfig;
use crm_core::UserProfile;
use crm_http::client::SessionEvent;
use crm_http::{AuthClient, RefreshOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Authentication context data
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthContextData {
    pub user: Option<UserProfile>,
    pub is_authenticated: bool,
    pub is_loading: bool,
    pub error: Option<String>,
}

impl Default for AuthContextData {
    fn default() -> Self {
        Self {
            user: None,
            is_authenticated: false,
            // Loading until the persisted session has been checked.
            is_loading: true,
            error: None,
        }
    }
}

/// Authentication context actions
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthAction {
    Login(UserProfile),
    Logout,
    SetLoading(bool),
    /// A refresh stored a new token pair; `None` keeps the current user
    Refreshed(Option<UserProfile>),
    SessionExpired,
    Error(String),
}

impl AuthContextData {
    #[must_use]
    pub fn reduce(self, action: AuthAction) -> Self {
        match action {
            AuthAction::Login(user) => Self {
                user: Some(user),
                is_authenticated: true,
                is_loading: false,
                error: None,
            },
            AuthAction::Logout => Self {
                is_loading: false,
                ..Self::default()
            },
            AuthAction::SetLoading(is_loading) => Self { is_loading, ..self },
            AuthAction::Refreshed(user) => Self {
                user: user.or(self.user),
                is_authenticated: true,
                is_loading: false,
                error: None,
            },
            AuthAction::SessionExpired => Self {
                user: None,
                is_authenticated: false,
                is_loading: false,
                error: Some(AuthConfig::SESSION_EXPIRED_MESSAGE.to_string()),
            },
            AuthAction::Error(message) => Self {
                is_loading: false,
                error: Some(message),
                ..self
            },
        }
    }
}

/// Result of an expiry check
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExpiryCheck {
    /// Nothing stored
    SignedOut,
    /// Token still usable, nothing done
    Valid,
    Refreshed,
    /// The session ended
    Expired,
}

/// Process-wide session state
pub struct AuthProvider {
    client: AuthClient,
    state: watch::Sender<AuthContextData>,
    interval: Duration,
}

impl AuthProvider {
    pub fn new(client: AuthClient) -> Self {
        Self::with_interval(client, AuthConfig::EXPIRY_CHECK_INTERVAL)
    }

    /// Provider whose expiry timer fires every `interval`
    pub fn with_interval(client: AuthClient, interval: Duration) -> Self {
        Self {
            client,
            state: watch::Sender::new(AuthContextData::default()),
            interval,
        }
    }

    pub const fn client(&self) -> &AuthClient {
        &self.client
    }

    /// Snapshot of the current state
    pub fn state(&self) -> AuthContextData {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthContextData> {
        self.state.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.state.borrow().user.clone()
    }

    /// Signed-in user, or [`SessionError::NotSignedIn`]
    pub fn require_user(&self) -> Result<UserProfile, SessionError> {
        self.user().ok_or(SessionError::NotSignedIn)
    }

    pub fn dispatch(&self, action: AuthAction) {
        self.state.send_modify(|state| {
            *state = state.clone().reduce(action);
        });
    }

    /// Restore the persisted session
    ///
    /// An expired session with a refresh token gets exactly one refresh
    /// attempt before loading finishes.
    pub async fn init(&self) -> AuthContextData {
        self.dispatch(AuthAction::SetLoading(true));
        let store = self.client.token_store();

        if !store.has_session() {
            debug!("No stored session");
            self.dispatch(AuthAction::Logout);
        } else if !store.is_expired() {
            match self.client.current_user() {
                Some(user) => {
                    debug!(user_id = %user.user_id, "Restored stored session");
                    self.dispatch(AuthAction::Login(user));
                }
                None => self.dispatch(AuthAction::Refreshed(None)),
            }
        } else if store.refresh_token().is_some() {
            info!("Stored session expired, attempting refresh");
            self.refresh_expired().await;
        } else {
            info!("Stored session expired without a refresh token, clearing");
            if let Err(err) = store.clear_all() {
                warn!("Failed to clear expired session: {err}");
            }
            self.dispatch(AuthAction::Logout);
        }

        self.state()
    }

    /// Sign in through the client and publish the result
    pub async fn login(&self, email: &str, password: &str) -> Result<UserProfile, SessionError> {
        self.dispatch(AuthAction::SetLoading(true));
        match self.client.login(email, password).await {
            Ok(user) => {
                self.dispatch(AuthAction::Login(user.clone()));
                Ok(user)
            }
            Err(err) => {
                self.dispatch(AuthAction::Error(get_login_error(&err)));
                Err(err.into())
            }
        }
    }

    /// Sign out; local state is reset even when the server is unreachable
    pub async fn logout(&self) -> Result<(), SessionError> {
        // Reset first so the client's LoggedOut event is not read as an expiry.
        self.dispatch(AuthAction::Logout);
        self.client.logout().await.map_err(Into::into)
    }

    /// Refresh if the stored token has expired; otherwise do nothing
    pub async fn check_expiry(&self) -> ExpiryCheck {
        let store = self.client.token_store();
        if !store.has_session() {
            return ExpiryCheck::SignedOut;
        }
        if !store.is_expired() {
            return ExpiryCheck::Valid;
        }
        debug!("Access token expired, refreshing");
        self.refresh_expired().await
    }

    async fn refresh_expired(&self) -> ExpiryCheck {
        match self.client.refresh_session().await {
            RefreshOutcome::Refreshed(_) => {
                self.dispatch(AuthAction::Refreshed(self.client.current_user()));
                ExpiryCheck::Refreshed
            }
            RefreshOutcome::Retained(_) => {
                self.dispatch(AuthAction::Refreshed(None));
                ExpiryCheck::Valid
            }
            RefreshOutcome::LoggedOut => {
                self.dispatch(AuthAction::SessionExpired);
                ExpiryCheck::Expired
            }
            RefreshOutcome::Abandoned => {
                debug!("Refresh abandoned during expiry check");
                self.dispatch(AuthAction::SetLoading(false));
                ExpiryCheck::Valid
            }
        }
    }

    fn apply_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::Authenticated(user) => self.dispatch(AuthAction::Login(user)),
            SessionEvent::Retained => debug!("Refresh failed, current session kept"),
            SessionEvent::LoggedOut => {
                if self.is_authenticated() {
                    self.dispatch(AuthAction::SessionExpired);
                }
            }
        }
    }

    /// Rebuild state from the store after missing events
    fn resync(&self) {
        let store = self.client.token_store();
        match self.client.current_user() {
            Some(user) if store.has_session() => self.dispatch(AuthAction::Login(user)),
            _ => self.dispatch(AuthAction::Logout),
        }
    }

    /// Spawn the session event mirror and the periodic expiry check
    ///
    /// Both tasks stop when the returned handle is dropped.
    pub fn start(self: &Arc<Self>) -> AuthProviderHandle {
        let mut events = self.client.subscribe();
        let provider = Arc::clone(self);
        let mirror = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => provider.apply_event(event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Missed session events, resyncing from store");
                        provider.resync();
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        let provider = Arc::clone(self);
        let period = self.interval;
        let timer = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let check = provider.check_expiry().await;
                debug!(?check, "Periodic expiry check");
            }
        });

        AuthProviderHandle {
            tasks: vec![mirror, timer],
        }
    }
}

/// Keeps the provider's background tasks alive
pub struct AuthProviderHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for AuthProviderHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
