use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Parse an expiry stored as epoch milliseconds
pub fn parse_expiry_millis(raw: &str) -> CoreResult<DateTime<Utc>> {
    let millis = raw
        .trim()
        .parse::<i64>()
        .map_err(|err| CoreError::malformed("token expiry", err))?;
    DateTime::from_timestamp_millis(millis).ok_or(CoreError::OutOfRange {
        field: "token expiry",
        value: millis,
    })
}

/// `now` plus a server-supplied lifetime in seconds; negative counts as zero
pub fn expiry_after(now: DateTime<Utc>, expires_in: i64) -> CoreResult<DateTime<Utc>> {
    TimeDelta::try_seconds(expires_in.max(0))
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .ok_or(CoreError::OutOfRange {
            field: "expiresIn",
            value: expires_in,
        })
}

/// Access/refresh token pair with its absolute expiry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Profile of the signed-in user, persisted next to the tokens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub email: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
}

impl UserProfile {
    /// Decode a profile as persisted in session storage
    pub fn from_json(raw: &str) -> CoreResult<Self> {
        serde_json::from_str(raw).map_err(|err| CoreError::malformed("user profile", err))
    }

    /// Full name when known, otherwise the email address
    pub fn display_name(&self) -> String {
        let parts: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|part| !part.trim().is_empty())
            .collect();
        if parts.is_empty() {
            self.email.clone()
        } else {
            parts.join(" ")
        }
    }
}

/// `data` of a successful `/login` or `/refresh-token` response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPayload {
    pub token: String,
    pub refresh_token: String,
    /// Lifetime of `token` in seconds
    pub expires_in: i64,
    pub email: String,
    #[serde(deserialize_with = "string_or_number")]
    pub user_id: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

impl AuthPayload {
    /// A payload is usable only when both tokens are present
    pub fn is_well_formed(&self) -> bool {
        !self.token.trim().is_empty() && !self.refresh_token.trim().is_empty()
    }

    /// Split into the token pair (expiry anchored at `now`) and the profile
    ///
    /// Fails when `expiresIn` pushes the expiry past what a timestamp holds.
    pub fn into_session(self, now: DateTime<Utc>) -> CoreResult<(SessionTokens, UserProfile)> {
        let tokens = SessionTokens {
            access_token: self.token,
            refresh_token: self.refresh_token,
            expires_at: expiry_after(now, self.expires_in)?,
        };
        let profile = UserProfile {
            email: self.email,
            user_id: self.user_id,
            first_name: self.first_name,
            last_name: self.last_name,
        };
        Ok((tokens, profile))
    }
}

/// Body of `POST /login`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Body of `POST /refresh-token`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(i64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text,
        Raw::Number(number) => number.to_string(),
    })
}
