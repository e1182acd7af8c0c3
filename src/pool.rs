//! Immutable user-pool configuration.

use crate::error::AuthError;

/// Default RNG strength for SRP blinding.
pub const DEFAULT_PARANOIA: u8 = 7;

/// Upper bound of the accepted paranoia range.
pub const MAX_PARANOIA: u8 = 10;

/// The user pool a [`CognitoUser`](crate::CognitoUser) authenticates against.
///
/// The pool id has the form `<region>_<suffix>`; the suffix doubles as the
/// realm identifier mixed into the SRP identity hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserPool {
    user_pool_id: String,
    pool_name: String,
    client_id: String,
    paranoia: u8,
}

impl UserPool {
    /// Create a pool configuration with the default paranoia level.
    pub fn new(user_pool_id: &str, client_id: &str) -> Result<Self, AuthError> {
        Self::with_paranoia(user_pool_id, client_id, DEFAULT_PARANOIA)
    }

    /// Create a pool configuration with an explicit paranoia level in
    /// `0..=10`.
    pub fn with_paranoia(
        user_pool_id: &str,
        client_id: &str,
        paranoia: u8,
    ) -> Result<Self, AuthError> {
        if client_id.is_empty() {
            return Err(AuthError::InvalidArgument("client id is empty".to_string()));
        }
        if paranoia > MAX_PARANOIA {
            return Err(AuthError::InvalidArgument(format!(
                "paranoia {paranoia} is outside 0..={MAX_PARANOIA}"
            )));
        }

        let pool_name = user_pool_id
            .split_once('_')
            .map(|(_, suffix)| suffix)
            .filter(|suffix| !suffix.is_empty())
            .ok_or_else(|| {
                AuthError::InvalidArgument(
                    "pool id must be in the form <region>_<suffix>".to_string(),
                )
            })?;

        Ok(Self {
            user_pool_id: user_pool_id.to_string(),
            pool_name: pool_name.to_string(),
            client_id: client_id.to_string(),
            paranoia,
        })
    }

    pub fn user_pool_id(&self) -> &str {
        &self.user_pool_id
    }

    /// The SRP realm identifier: the pool id with its region prefix removed.
    pub fn pool_name(&self) -> &str {
        &self.pool_name
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn paranoia(&self) -> u8 {
        self.paranoia
    }
}
