pub mod api_wrapper;
pub mod auth;

pub use api_wrapper::{handle_api_error, with_auth_error_handling};
pub use auth::AuthApiService;
