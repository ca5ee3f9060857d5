//! Authentication module

pub mod context;
pub mod error_messages;

use crm_http::ClientError;

pub use context::{AuthAction, AuthContextData, AuthProvider, AuthProviderHandle, ExpiryCheck};
pub use error_messages::{get_login_error, get_user_friendly_error};

/// Errors surfaced by the session context
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("Not signed in")]
    NotSignedIn,
}
