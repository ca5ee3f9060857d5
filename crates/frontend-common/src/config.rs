//! Front-end configuration

use std::time::Duration;

/// Authentication configuration
pub struct AuthConfig;

impl AuthConfig {
    /// How often a running session re-checks token expiry
    pub const EXPIRY_CHECK_INTERVAL: Duration = Duration::from_secs(5 * 60);

    pub const SESSION_EXPIRED_MESSAGE: &'static str = "Session expired. Please login again.";
}
