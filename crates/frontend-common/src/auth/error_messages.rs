//! User-friendly error message mappings

use crm_http::ClientError;

/// Convert a client error into a message fit for an inline toast
pub fn get_user_friendly_error(error: &ClientError) -> String {
    match error {
        ClientError::AuthenticationFailed(_) => {
            "Your session has expired. Please sign in again.".to_string()
        }
        ClientError::Transport(_) => {
            "Unable to reach the server. Check your connection and try again.".to_string()
        }
        // The server already phrases business failures for display.
        ClientError::Api(failure) => failure.summary(),
        ClientError::Forbidden(_) => "You do not have permission to do that.".to_string(),
        ClientError::NotFound(_) => "The requested record was not found.".to_string(),
        ClientError::ServerError { .. } => {
            "The server had a problem handling the request. Please try again.".to_string()
        }
        other => other.to_string(),
    }
}

/// Like [`get_user_friendly_error`], for a failed sign-in
pub fn get_login_error(error: &ClientError) -> String {
    match error {
        ClientError::AuthenticationFailed(_) => "Invalid email or password.".to_string(),
        other => get_user_friendly_error(other),
    }
}
