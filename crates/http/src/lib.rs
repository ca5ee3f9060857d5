//! Pipeline CRM HTTP client
//!
//! Every call to the CRM API goes through [`client::AuthClient`], which
//! attaches the stored bearer token, recovers from expired sessions with a
//! single shared token refresh, and replays the failed request once.

#[macro_use]
extern crate tracing;

pub mod client;

pub use client::{
    AuthClient, AuthClientBuilder, ClientConfig, ClientError, Navigator, RefreshOutcome,
    SessionEvent, TokenStore,
};
pub use crm_core::{ApiFailure, Envelope, UserProfile};
