//! Single-flight token refresh
//!
//! At most one `/refresh-token` call is in flight per coordinator. Callers
//! that need a fresh token while it runs are queued and all receive the
//! outcome of that one call, in arrival order. The queue is drained before
//! the in-progress flag is cleared, including when the refreshing future is
//! dropped halfway.
//!
//! Whether a failed refresh ends the session is decided by the locally
//! recorded expiry: an unreachable or broken refresh endpoint keeps an
//! unexpired access token in use, while an explicit rejection of the
//! refresh token always ends the session.

use super::error::StoreError;
use super::navigator::{Navigator, SessionEvent};
use super::token_store::TokenStore;
use super::transport::{ApiRequest, ApiResponse, Transport};
use crm_core::{AuthPayload, Envelope, RefreshRequest, SessionTokens, UserProfile};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, oneshot};

pub const REFRESH_PATH: &str = "/refresh-token";

const EVENT_CAPACITY: usize = 16;

/// What a caller waiting on a refresh gets back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A new access token was issued and stored
    Refreshed(String),
    /// The refresh failed transiently; keep using this unexpired token
    Retained(String),
    /// The session was cleared and the user sent to sign in
    LoggedOut,
    /// The refresh was cancelled before it settled
    Abandoned,
}

impl RefreshOutcome {
    /// Token to replay with, if the session survived
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::Refreshed(token) | Self::Retained(token) => Some(token),
            Self::LoggedOut | Self::Abandoned => None,
        }
    }
}

#[derive(Debug)]
enum RefreshFailure {
    /// 5xx, no response, or an undecodable body
    Unavailable(String),
    /// The backend refused the refresh token
    Rejected(String),
}

#[derive(Default)]
struct RefreshState {
    in_progress: bool,
    pending: VecDeque<oneshot::Sender<RefreshOutcome>>,
}

enum Turn {
    Wait(oneshot::Receiver<RefreshOutcome>),
    Rotated(String),
    Ended,
    Lead,
}

/// Coordinates token refreshes for one session
pub struct RefreshCoordinator {
    store: TokenStore,
    transport: Arc<dyn Transport>,
    navigator: Arc<dyn Navigator>,
    events: broadcast::Sender<SessionEvent>,
    state: Mutex<RefreshState>,
}

impl RefreshCoordinator {
    pub fn new(
        store: TokenStore,
        transport: Arc<dyn Transport>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            transport,
            navigator,
            events,
            state: Mutex::new(RefreshState::default()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn is_refreshing(&self) -> bool {
        self.lock_state().in_progress
    }

    /// Number of callers waiting on the current refresh
    pub fn pending_len(&self) -> usize {
        self.lock_state().pending.len()
    }

    /// Get a usable token after a request sent with `failed_token` got a 401.
    ///
    /// If the stored token already differs from `failed_token`, another
    /// caller refreshed in the meantime and that token is returned directly.
    pub async fn recover(&self, failed_token: Option<&str>) -> RefreshOutcome {
        self.run(Some(failed_token)).await
    }

    /// Refresh unconditionally, joining a refresh that is already running
    pub async fn refresh_now(&self) -> RefreshOutcome {
        self.run(None).await
    }

    async fn run(&self, failed_token: Option<Option<&str>>) -> RefreshOutcome {
        match self.take_turn(failed_token) {
            Turn::Wait(waiter) => waiter.await.unwrap_or(RefreshOutcome::Abandoned),
            Turn::Rotated(token) => {
                debug!("Access token rotated since the request was sent, replaying");
                RefreshOutcome::Refreshed(token)
            }
            Turn::Ended => RefreshOutcome::LoggedOut,
            Turn::Lead => {
                let mut flight = InFlight {
                    coordinator: self,
                    settled: false,
                };
                let outcome = self.refresh().await;
                flight.settle(&outcome);
                outcome
            }
        }
    }

    /// Check-and-set of the in-progress flag, before any network call
    fn take_turn(&self, failed_token: Option<Option<&str>>) -> Turn {
        let mut state = self.lock_state();

        if state.in_progress {
            let (sender, receiver) = oneshot::channel();
            state.pending.push_back(sender);
            debug!(
                queued = state.pending.len(),
                "Token refresh in flight, queueing request"
            );
            return Turn::Wait(receiver);
        }

        if let Some(failed_token) = failed_token {
            match self.store.access_token() {
                Some(current) if failed_token != Some(current.as_str()) => {
                    return Turn::Rotated(current);
                }
                // Sent with a token, and the session has been ended since.
                None if failed_token.is_some() && self.store.refresh_token().is_none() => {
                    return Turn::Ended;
                }
                _ => {}
            }
        }

        state.in_progress = true;
        Turn::Lead
    }

    fn settle(&self, outcome: &RefreshOutcome) {
        let mut state = self.lock_state();
        let drained = state.pending.len();
        for waiter in state.pending.drain(..) {
            // A waiter whose request was cancelled has dropped its receiver.
            let _ = waiter.send(outcome.clone());
        }
        state.in_progress = false;
        if drained > 0 {
            debug!(drained, "Released queued requests");
        }
    }

    async fn refresh(&self) -> RefreshOutcome {
        let Some(refresh_token) = self.store.refresh_token() else {
            warn!("No refresh token stored, ending session");
            self.end_session_logged();
            return RefreshOutcome::LoggedOut;
        };

        info!("Refreshing access token");
        let body = RefreshRequest {
            refresh_token,
            token: self.store.access_token(),
        };
        let result = match ApiRequest::post(REFRESH_PATH).json(&body) {
            Ok(request) => match self.transport.send(request).await {
                Ok(response) => classify(&response),
                Err(err) => Err(RefreshFailure::Unavailable(err.to_string())),
            },
            Err(err) => Err(RefreshFailure::Unavailable(err.to_string())),
        };

        let session = result.and_then(|payload| {
            payload
                .into_session(self.store.now())
                .map_err(|err| RefreshFailure::Unavailable(format!("unusable refresh response: {err}")))
        });

        match session {
            Ok((tokens, user)) => self.apply(tokens, user),
            Err(failure) => self.handle_failure(failure),
        }
    }

    fn apply(&self, tokens: SessionTokens, user: UserProfile) -> RefreshOutcome {
        if let Err(err) = self.store.save_session(&tokens, &user) {
            // The old refresh token is spent; without the new pair the session is lost.
            if self.store.access_token().as_deref() != Some(tokens.access_token.as_str()) {
                error!("Failed to store refreshed session, ending it: {err}");
                self.end_session_logged();
                return RefreshOutcome::LoggedOut;
            }
            warn!("Refreshed session kept in memory only: {err}");
        }
        info!(expires_at = %tokens.expires_at, "Access token refreshed");
        self.publish(SessionEvent::Authenticated(user));
        RefreshOutcome::Refreshed(tokens.access_token)
    }

    fn handle_failure(&self, failure: RefreshFailure) -> RefreshOutcome {
        match failure {
            RefreshFailure::Rejected(reason) => {
                error!(%reason, "Refresh token rejected, ending session");
            }
            RefreshFailure::Unavailable(reason) => {
                if !self.store.is_expired() {
                    if let Some(token) = self.store.access_token() {
                        warn!(%reason, "Token refresh failed, keeping current access token");
                        self.publish(SessionEvent::Retained);
                        return RefreshOutcome::Retained(token);
                    }
                }
                error!(%reason, "Token refresh failed after access token expiry, ending session");
            }
        }
        self.end_session_logged();
        RefreshOutcome::LoggedOut
    }

    /// Clear the store, notify observers, and redirect to sign-in
    pub(crate) fn end_session(&self) -> Result<(), StoreError> {
        let cleared = self.store.clear_all();
        self.publish(SessionEvent::LoggedOut);
        self.navigator.redirect_to_sign_in();
        cleared
    }

    fn end_session_logged(&self) {
        if let Err(err) = self.end_session() {
            error!("Failed to clear session storage: {err}");
        }
    }

    pub(crate) fn publish(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn lock_state(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Settles the queue if the leading refresh is dropped before finishing
struct InFlight<'a> {
    coordinator: &'a RefreshCoordinator,
    settled: bool,
}

impl InFlight<'_> {
    fn settle(&mut self, outcome: &RefreshOutcome) {
        self.coordinator.settle(outcome);
        self.settled = true;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.settled {
            warn!("Token refresh cancelled before completion");
            self.coordinator.settle(&RefreshOutcome::Abandoned);
        }
    }
}

fn classify(response: &ApiResponse) -> Result<AuthPayload, RefreshFailure> {
    let status = response.status;
    if status >= 500 {
        return Err(RefreshFailure::Unavailable(format!(
            "refresh endpoint returned {status}"
        )));
    }
    if matches!(status, 400 | 401 | 403) {
        return Err(RefreshFailure::Rejected(format!(
            "refresh endpoint returned {status}"
        )));
    }
    if !response.is_success() {
        return Err(RefreshFailure::Unavailable(format!(
            "refresh endpoint returned {status}"
        )));
    }

    let envelope: Envelope<AuthPayload> = response.json().map_err(|err| {
        RefreshFailure::Unavailable(format!("malformed refresh response: {err}"))
    })?;
    let rejected = !envelope.is_success;
    match envelope.into_result() {
        Ok(payload) if payload.is_well_formed() => Ok(payload),
        Ok(_) => Err(RefreshFailure::Unavailable(
            "refresh response is missing tokens".to_string(),
        )),
        Err(failure) if rejected => Err(RefreshFailure::Rejected(failure.summary())),
        Err(failure) => Err(RefreshFailure::Unavailable(failure.summary())),
    }
}
