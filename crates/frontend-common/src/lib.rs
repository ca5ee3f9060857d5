//! Session state and shared services for Pipeline CRM front-ends

#[macro_use]
extern crate tracing;

pub mod auth;
pub mod config;
pub mod services;

pub use auth::SessionError;
pub use auth::context::{AuthAction, AuthContextData, AuthProvider, AuthProviderHandle, ExpiryCheck};
pub use config::AuthConfig;
pub use services::AuthApiService;
