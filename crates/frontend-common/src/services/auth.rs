//! Authentication API service

use crate::auth::get_login_error;
use crate::config::AuthConfig;
use crm_core::{ErrorContext, UserProfile};
use crm_http::{AuthClient, RefreshOutcome};

/// Session endpoints with display-ready error strings
#[derive(Clone)]
pub struct AuthApiService {
    client: AuthClient,
}

impl AuthApiService {
    /// Create a new auth API service
    pub const fn new(client: AuthClient) -> Self {
        Self { client }
    }

    /// Sign in with email and password
    pub async fn login(&self, email: &str, password: &str) -> Result<UserProfile, String> {
        self.client
            .login(email, password)
            .await
            .map_err(|e| get_login_error(&e))
    }

    /// Sign out; only a failure to clear local storage is reported
    pub async fn logout(&self) -> Result<(), String> {
        self.client
            .logout()
            .await
            .with_context_str("Failed to clear the stored session")
    }

    /// Stored profile of the signed-in user
    pub fn whoami(&self) -> Result<UserProfile, String> {
        self.client
            .current_user()
            .ok_or_else(|| "Not signed in".to_string())
    }

    /// Refresh the access token now
    pub async fn refresh(&self) -> Result<RefreshOutcome, String> {
        match self.client.refresh_session().await {
            RefreshOutcome::LoggedOut => Err(AuthConfig::SESSION_EXPIRED_MESSAGE.to_string()),
            RefreshOutcome::Abandoned => Err("Token refresh was interrupted".to_string()),
            outcome => Ok(outcome),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crm_http::client::{ApiRequest, ApiResponse, Transport, TransportError};
    use serde_json::json;
    use std::sync::Arc;

    /// Rejects every login and refresh
    struct Rejecting;

    #[async_trait::async_trait]
    impl Transport for Rejecting {
        async fn send(&self, _request: ApiRequest) -> Result<ApiResponse, TransportError> {
            Ok(ApiResponse::new(
                401,
                json!({"isSuccess": false, "message": "Invalid email or password"}).to_string(),
            ))
        }
    }

    fn service() -> AuthApiService {
        let client = AuthClient::builder()
            .transport(Arc::new(Rejecting))
            .build()
            .unwrap();
        AuthApiService::new(client)
    }

    #[tokio::test]
    async fn test_login_failure_is_display_ready() {
        let err = service().login("ana@example.com", "wrong").await.unwrap_err();
        assert_eq!(err, "Invalid email or password.");
    }

    #[tokio::test]
    async fn test_signed_out_service() {
        let service = service();
        assert_eq!(service.whoami().unwrap_err(), "Not signed in");
        assert!(service.logout().await.is_ok());
        assert_eq!(
            service.refresh().await.unwrap_err(),
            AuthConfig::SESSION_EXPIRED_MESSAGE
        );
    }
}
