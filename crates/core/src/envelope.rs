//! The response envelope shared by every CRM endpoint.
//!
//! The backend wraps all payloads in `{isSuccess, message, data, errors,
//! responseCode}`. [`Envelope`] is the wire shape; callers convert it once
//! into an [`ApiResult`] and never look at `isSuccess` again.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire envelope returned by the CRM API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    pub is_success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default = "Option::default")]
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Option<Vec<String>>,
    #[serde(default)]
    pub response_code: Option<u16>,
}

/// A business-level failure reported inside an envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiFailure {
    pub message: Option<String>,
    pub errors: Vec<String>,
    pub response_code: Option<u16>,
}

/// Decoded envelope
pub type ApiResult<T> = Result<T, ApiFailure>;

impl<T> Envelope<T> {
    /// Decode into a result, requiring `data` on success
    pub fn into_result(self) -> ApiResult<T> {
        if !self.is_success {
            return Err(self.into_failure());
        }
        match self.data {
            Some(data) => Ok(data),
            None => Err(ApiFailure {
                message: Some("response carried no data".to_string()),
                errors: self.errors.unwrap_or_default(),
                response_code: self.response_code,
            }),
        }
    }

    /// Decode into a result, substituting `T::default()` for absent data
    pub fn into_result_or_default(self) -> ApiResult<T>
    where
        T: Default,
    {
        if self.is_success {
            Ok(self.data.unwrap_or_default())
        } else {
            Err(self.into_failure())
        }
    }

    /// Decode into a result, ignoring `data`
    pub fn into_unit_result(self) -> ApiResult<()> {
        if self.is_success {
            Ok(())
        } else {
            Err(self.into_failure())
        }
    }

    fn into_failure(self) -> ApiFailure {
        ApiFailure {
            message: self.message,
            errors: self.errors.unwrap_or_default(),
            response_code: self.response_code,
        }
    }
}

impl ApiFailure {
    /// Text suitable for an inline error message
    pub fn summary(&self) -> String {
        match (&self.message, self.errors.is_empty()) {
            (Some(message), true) => message.clone(),
            (Some(message), false) => format!("{message}: {}", self.errors.join("; ")),
            (None, false) => self.errors.join("; "),
            (None, true) => "request failed".to_string(),
        }
    }
}

impl fmt::Display for ApiFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

impl std::error::Error for ApiFailure {}
