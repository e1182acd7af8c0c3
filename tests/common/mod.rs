//! Shared scaffolding for the end-to-end flows: a scripted transport, a
//! deterministic RNG, a pinned clock and canned service responses.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rand::RngCore;
use serde_json::{json, Value};

use aws_cognito_auth::{AuthError, CognitoUser, MemoryStorage, Transport, UserPool};

/// 2024-04-09T07:04:32Z, the instant every flow in these tests runs at.
pub const FIXED_NOW: i64 = 1712646272;

pub const POOL_ID: &str = "eu-west-2_YCXyp6wjQ";
pub const CLIENT_ID: &str = "client-1";

/// Values the scripted server hands out during the SRP exchange. Paired
/// with `MockRng`, they make the client's proof reproducible down to the
/// byte.
pub const MOCK_B: &str = "36ef01c6dde9fe503da333b1acc758ba";
pub const MOCK_SALT: &str = "8a1268dd8c31494daf223bb45a1b7a09";
pub const MOCK_SECRET_BLOCK: &str = "9ae77ec7154c14dcc487b47707fee4b4920cb96d8a8c045e4c8df879a7b375524aa736acdec6c9ad4ea606774d00621b";

pub fn fixed_clock() -> DateTime<Utc> {
    Utc.timestamp_opt(FIXED_NOW, 0).unwrap()
}

/// Deterministic generator: bytes cycle `0, 1, …, 7`.
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

/// An unsigned JWT with the given `exp` claim.
pub fn make_jwt(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp}}}"#));
    format!("{header}.{payload}.signature")
}

/// Transport that replays a script of response bodies and records every
/// request that reaches the wire.
pub struct MockTransport {
    responses: Mutex<VecDeque<Value>>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl MockTransport {
    pub fn new(responses: Vec<Value>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn call(&self, action: &str, body: Value) -> Result<Value, AuthError> {
        self.calls.lock().push((action.to_string(), body));
        let response = self
            .responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| panic!("unscripted call to {action}"));
        Ok(response)
    }
}

/// Transport that parks forever; used to hold the operation slot open.
pub struct StalledTransport;

#[async_trait]
impl Transport for StalledTransport {
    async fn call(&self, _action: &str, _body: Value) -> Result<Value, AuthError> {
        let parked = tokio::sync::Notify::new();
        parked.notified().await;
        unreachable!()
    }
}

pub fn make_user(
    transport: Arc<dyn Transport>,
    storage: Arc<MemoryStorage>,
) -> CognitoUser<MockRng> {
    let pool = UserPool::new(POOL_ID, CLIENT_ID).unwrap();
    CognitoUser::<MockRng>::new(pool, "alice", transport, storage)
        .unwrap()
        .with_clock(fixed_clock)
        .with_device_name("integration-test-device")
}

/// The `PASSWORD_VERIFIER` challenge the server issues in response to
/// `InitiateAuth`.
pub fn password_verifier_challenge() -> Value {
    json!({
        "ChallengeName": "PASSWORD_VERIFIER",
        "Session": "initiate-session",
        "ChallengeParameters": {
            "USER_ID_FOR_SRP": "alice",
            "SRP_B": MOCK_B,
            "SALT": MOCK_SALT,
            "SECRET_BLOCK": MOCK_SECRET_BLOCK,
        }
    })
}

/// A terminal `AuthenticationResult` with three fresh tokens.
pub fn authentication_result() -> Value {
    json!({
        "AuthenticationResult": {
            "IdToken": make_jwt(FIXED_NOW + 3600),
            "AccessToken": make_jwt(FIXED_NOW + 3600),
            "RefreshToken": "rf.jwt",
            "ExpiresIn": 3600,
            "TokenType": "Bearer"
        }
    })
}

pub fn storage_key(leaf: &str) -> String {
    format!("CognitoIdentityServiceProvider.{CLIENT_ID}.alice.{leaf}")
}
