#![crate_name = "aws_cognito_auth"]

//! # AWS Cognito Auth
//!
//! Client-side authentication core for Amazon Cognito user pools.
//!
//! This crate owns the authentication state machine: the Secure Remote
//! Password (SRP-6a) handshake, the device-SRP sub-handshake, the multi-step
//! challenge loop (`NEW_PASSWORD_REQUIRED` / `SMS_MFA` / `CUSTOM_CHALLENGE`),
//! and the token lifecycle (cache, refresh, invalidate). Transport and
//! persistence are injected at the edges: the [`Transport`] trait carries one
//! JSON request/response exchange per remote operation, and the [`Storage`]
//! trait persists tokens and device secrets under a deterministic key schema.
//!
//! ## Signing in
//!
//! ```no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! use aws_cognito_auth::{
//!     AuthError, AuthOutcome, CognitoUser, MemoryStorage, Transport, UserPool,
//! };
//!
//! struct HttpTransport; // your HTTP client of choice
//!
//! #[async_trait::async_trait]
//! impl Transport for HttpTransport {
//!     async fn call(
//!         &self,
//!         action: &str,
//!         body: serde_json::Value,
//!     ) -> Result<serde_json::Value, AuthError> {
//!         // POST to the regional endpoint with X-Amz-Target set to
//!         // `AWSCognitoIdentityProviderService.<action>`.
//!         unimplemented!()
//!     }
//! }
//!
//! # async fn sign_in() -> Result<(), AuthError> {
//! let pool = UserPool::new("eu-west-2_YCXyp6wjQ", "<client id>")?;
//! let user: CognitoUser = CognitoUser::new(
//!     pool,
//!     "alice",
//!     Arc::new(HttpTransport),
//!     Arc::new(MemoryStorage::new()),
//! )?;
//!
//! match user.authenticate_user("correct horse").await? {
//!     AuthOutcome::Authenticated { session, .. } => {
//!         println!("signed in until {:?}", session.access_token().expires_at());
//!     }
//!     AuthOutcome::MfaRequired { .. } => {
//!         // prompt the user, then:
//!         user.send_mfa_code("123456").await?;
//!     }
//!     AuthOutcome::NewPasswordRequired { required_attributes, .. } => {
//!         let values: HashMap<String, String> = required_attributes
//!             .into_iter()
//!             .map(|name| (name, "value".to_string()))
//!             .collect();
//!         user.complete_new_password_challenge("N3w!password", &values).await?;
//!     }
//!     AuthOutcome::CustomChallenge { .. } => {
//!         user.send_custom_challenge_answer("answer").await?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Resuming a session
//!
//! Later invocations resolve a session without re-prompting for credentials:
//! the in-memory bundle first, then the cache, then a refresh-token exchange.
//!
//! ```no_run
//! # async fn resume(user: aws_cognito_auth::CognitoUser) -> Result<(), aws_cognito_auth::AuthError> {
//! let session = user.get_session().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Device tracking
//!
//! When the pool tracks devices, the first sign-in returns device metadata
//! and the crate runs the confirm-device ceremony automatically: it
//! generates a random device password, registers an SRP verifier for it, and
//! persists the secrets. Subsequent sign-ins answer the `DEVICE_SRP_AUTH`
//! challenge with those secrets instead of prompting the user again.

#[macro_use]
extern crate lazy_static;

pub use crate::error::{AuthError, SrpError};
pub use crate::pool::{UserPool, DEFAULT_PARANOIA, MAX_PARANOIA};
pub use crate::rpc::{types, RpcFacade, Transport};
pub use crate::srp::{PasswordVerifierParameters, SrpEngine};
pub use crate::storage::{DeviceMaterial, FileStorage, MemoryStorage, Storage};
pub use crate::token::{Jwt, Session};
pub use crate::user::{AuthOutcome, Clock, CognitoUser};

mod constant;
mod error;
mod pool;
mod rpc;
mod srp;
mod storage;
mod token;
mod user;

#[cfg(test)]
pub(crate) mod test_support {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
    use rand::RngCore;

    /// Deterministic generator for fixtures: bytes cycle `0, 1, …, 7`.
    pub struct MockRng {
        data: [u8; 8],
        index: usize,
    }

    impl Default for MockRng {
        fn default() -> Self {
            MockRng {
                data: [0, 1, 2, 3, 4, 5, 6, 7],
                index: 0,
            }
        }
    }

    impl RngCore for MockRng {
        fn next_u32(&mut self) -> u32 {
            unimplemented!()
        }

        fn next_u64(&mut self) -> u64 {
            unimplemented!()
        }

        fn fill_bytes(&mut self, dest: &mut [u8]) {
            for byte in dest.iter_mut() {
                *byte = self.data[self.index];
                self.index = (self.index + 1) % self.data.len();
            }
        }

        fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
            self.fill_bytes(dest);
            Ok(())
        }
    }

    /// An unsigned JWT with the given `exp` claim; good enough for a core
    /// that treats tokens as opaque.
    pub fn make_jwt(exp: i64) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp}}}"#));
        format!("{header}.{payload}.signature")
    }
}
