//! Hooks through which the client reports session changes

use crm_core::UserProfile;

/// Sends the user back to the sign-in entry point
pub trait Navigator: Send + Sync {
    fn redirect_to_sign_in(&self);
}

/// Navigator that only records the redirect in the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNavigator;

impl Navigator for LogNavigator {
    fn redirect_to_sign_in(&self) {
        info!("Session ended, sign-in required");
    }
}

/// Session transitions broadcast to interested observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Login or refresh stored a new token pair
    Authenticated(UserProfile),
    /// Refresh failed transiently; the current access token is kept
    Retained,
    /// The session was cleared
    LoggedOut,
}
