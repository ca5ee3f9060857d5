//! Session endpoints: login, logout and explicit refresh

use super::navigator::SessionEvent;
use super::refresh::RefreshOutcome;
use super::transport::ApiRequest;
use super::{AuthClient, ClientError, decode_envelope};
use crm_core::{AuthPayload, LoginRequest, UserProfile};
use serde_json::json;
use tokio::sync::broadcast;

pub const LOGIN_PATH: &str = "/login";
pub const LOGOUT_PATH: &str = "/logout";

impl AuthClient {
    /// Sign in and persist the new session
    pub async fn login(&self, email: &str, password: &str) -> Result<UserProfile, ClientError> {
        let request = ApiRequest::post(LOGIN_PATH).json(&LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        })?;

        // Sent without the recovering wrapper: a 401 here means bad credentials.
        let response = self.inner.transport.send(request).await?;
        let payload: AuthPayload = decode_envelope(&response)?.into_result()?;
        if !payload.is_well_formed() {
            return Err(ClientError::AuthenticationFailed(
                "login response is missing tokens".to_string(),
            ));
        }

        let (tokens, user) = payload
            .into_session(self.inner.store.now())
            .map_err(|err| {
                ClientError::AuthenticationFailed(format!("unusable login response: {err}"))
            })?;
        self.inner.store.save_session(&tokens, &user)?;
        info!(user_id = %user.user_id, expires_at = %tokens.expires_at, "Signed in");
        self.inner
            .coordinator
            .publish(SessionEvent::Authenticated(user.clone()));
        Ok(user)
    }

    /// Sign out locally, telling the server on a best-effort basis
    ///
    /// The local session is cleared and the user redirected even when the
    /// server cannot be reached.
    pub async fn logout(&self) -> Result<(), ClientError> {
        if let Some(token) = self.inner.store.access_token() {
            let body = self
                .inner
                .store
                .refresh_token()
                .map_or_else(|| json!({}), |refresh| json!({ "refreshToken": refresh }));
            let request = ApiRequest::post(LOGOUT_PATH)
                .with_body(body)
                .bearer(Some(token));
            match self.inner.transport.send(request).await {
                Ok(response) => match decode_envelope::<bool>(&response) {
                    Ok(envelope) => match envelope.into_unit_result() {
                        Ok(()) => debug!("Server session revoked"),
                        Err(failure) => warn!("Server refused logout: {failure}"),
                    },
                    Err(err) => warn!("Server logout failed: {err}"),
                },
                Err(err) => warn!("Server unreachable, signing out locally: {err}"),
            }
        }

        self.inner.coordinator.end_session()?;
        info!("Signed out");
        Ok(())
    }

    /// Refresh the access token now, sharing any refresh already in flight
    pub async fn refresh_session(&self) -> RefreshOutcome {
        self.inner.coordinator.refresh_now().await
    }

    /// Access token present and not past its recorded expiry
    pub fn is_authenticated(&self) -> bool {
        self.inner.store.access_token().is_some() && !self.inner.store.is_expired()
    }

    pub fn current_user(&self) -> Option<UserProfile> {
        self.inner.store.user()
    }

    /// Session transitions (login, refresh, logout)
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.coordinator.subscribe()
    }
}
