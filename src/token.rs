//! Bearer tokens and the three-token session bundle.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

use crate::error::AuthError;

/// An opaque bearer token issued by the user pool.
///
/// The core never verifies signatures; it trusts the server channel and only
/// reads the `exp` claim to decide whether the token is still usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Jwt {
    raw: String,
}

#[derive(Deserialize)]
struct ExpClaim {
    exp: i64,
}

impl Jwt {
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The instant this token stops being acceptable to the service.
    pub fn expires_at(&self) -> Result<DateTime<Utc>, AuthError> {
        let payload = self
            .raw
            .split('.')
            .nth(1)
            .ok_or_else(|| AuthError::Corruption("token is not a JWT".to_string()))?;

        let bytes = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|err| AuthError::Corruption(format!("token payload is not base64: {err}")))?;

        let claim: ExpClaim = serde_json::from_slice(&bytes)
            .map_err(|err| AuthError::Corruption(format!("token payload is not JSON: {err}")))?;

        Utc.timestamp_opt(claim.exp, 0)
            .single()
            .ok_or_else(|| AuthError::Corruption("token expiry is out of range".to_string()))
    }
}

impl From<&str> for Jwt {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// The identity/access/refresh token bundle negotiated by a successful
/// authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    id_token: Jwt,
    access_token: Jwt,
    refresh_token: String,
}

impl Session {
    pub fn new(id_token: Jwt, access_token: Jwt, refresh_token: impl Into<String>) -> Self {
        Self {
            id_token,
            access_token,
            refresh_token: refresh_token.into(),
        }
    }

    pub fn id_token(&self) -> &Jwt {
        &self.id_token
    }

    pub fn access_token(&self) -> &Jwt {
        &self.access_token
    }

    /// The refresh token is opaque even as JWTs go; it carries no readable
    /// expiry and is surfaced verbatim.
    pub fn refresh_token(&self) -> &str {
        &self.refresh_token
    }

    /// Whether the session gates authenticated operations at the given
    /// instant: both expiring tokens parse and neither is past expiry.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        [&self.id_token, &self.access_token]
            .iter()
            .all(|token| matches!(token.expires_at(), Ok(expiry) if expiry > now))
    }

    /// [`Session::is_valid_at`] against the wall clock.
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }
}
