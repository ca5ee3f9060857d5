//! Pipeline CRM core types and utilities

pub mod clock;
pub mod envelope;
pub mod error;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use envelope::{ApiFailure, ApiResult, Envelope};
pub use error::{CoreError, CoreResult, ErrorContext};
pub use types::{
    AuthPayload, LoginRequest, RefreshRequest, SessionTokens, UserProfile, expiry_after,
    parse_expiry_millis,
};
