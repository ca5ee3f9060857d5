//! API wrapper utilities for handling authentication errors

use crate::auth::{AuthAction, AuthProvider, get_user_friendly_error};
use crm_http::ClientError;

/// Expire the session state if `error` means re-authentication is required,
/// and return the message to show the user
pub fn handle_api_error(error: &ClientError, auth: &AuthProvider) -> String {
    if error.is_auth_expired() && auth.is_authenticated() {
        auth.dispatch(AuthAction::SessionExpired);
    }
    get_user_friendly_error(error)
}

/// Wrapper for API calls that handles auth errors
pub async fn with_auth_error_handling<T, F>(
    auth: &AuthProvider,
    api_call: F,
) -> Result<T, ClientError>
where
    F: Future<Output = Result<T, ClientError>>,
{
    match api_call.await {
        Ok(result) => Ok(result),
        Err(error) => {
            let message = handle_api_error(&error, auth);
            debug!(%message, "API call failed");
            Err(error)
        }
    }
}
