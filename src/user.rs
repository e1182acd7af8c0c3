//! The per-user authentication state machine.
//!
//! A [`CognitoUser`] owns the whole challenge loop: the SRP handshake, the
//! device-SRP sub-handshake, multi-step challenges (new password, SMS MFA,
//! custom), device confirmation, and the token lifecycle around them. The
//! transport and the persistence backend are injected; the state machine
//! only decides what to send and what to keep.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info};
use parking_lot::RwLock;
use rand::rngs::ThreadRng;
use rand::RngCore;
use tokio::sync::{Mutex, MutexGuard};

use crate::error::AuthError;
use crate::pool::UserPool;
use crate::rpc::types::{
    AttributeType, AuthFlow, AuthResponse, AuthenticationResult, ChallengeName,
    ChangePasswordRequest, CodeDeliveryResponse, ConfirmDeviceRequest, ConfirmForgotPasswordRequest,
    ConfirmSignUpRequest, DeleteUserAttributesRequest, DeleteUserRequest,
    DeviceRememberedStatus, DeviceSecretVerifierConfig, DeviceType, ForgetDeviceRequest,
    ForgotPasswordRequest, GetDeviceRequest, GetUserAttributeVerificationCodeRequest,
    GetUserRequest, GlobalSignOutRequest, InitiateAuthRequest, ListDevicesRequest,
    ListDevicesResponse, MfaOption, NewDeviceMetadata, ResendConfirmationCodeRequest,
    RespondToAuthChallengeRequest, SetUserSettingsRequest, UpdateDeviceStatusRequest,
    UpdateUserAttributesRequest, UpdateUserAttributesResponse, VerifyUserAttributeRequest,
};
use crate::rpc::{RpcFacade, Transport};
use crate::srp::{proof, SrpEngine};
use crate::storage::{DeviceMaterial, Storage, TokenStore};
use crate::token::{Jwt, Session};

/// Prefix the server puts on required-attribute names in the
/// `NEW_PASSWORD_REQUIRED` challenge.
const USER_ATTRIBUTE_PREFIX: &str = "userAttributes.";

/// Injectable time source; tests pin it, production uses the wall clock.
pub type Clock = fn() -> DateTime<Utc>;

/// Outcome of an authentication step: either a terminal session or a
/// challenge the caller must answer before the flow can continue.
///
/// Challenge variants are continuations, not failures; the handshake token
/// they depend on stays parked on the user until the matching answer method
/// is called.
#[derive(Debug, Clone)]
pub enum AuthOutcome {
    /// Terminal: the user is signed in and the tokens are cached.
    Authenticated {
        session: Session,
        /// The server confirmed the device but still wants the user to
        /// verify it through a second factor. Informational; the session is
        /// usable either way.
        user_confirmation_necessary: bool,
    },

    /// The server demands a new password (and possibly values for missing
    /// attributes) before the first sign-in completes. Answer with
    /// [`CognitoUser::complete_new_password_challenge`].
    NewPasswordRequired {
        user_attributes: HashMap<String, String>,
        required_attributes: Vec<String>,
    },

    /// An SMS code is on its way. Answer with [`CognitoUser::send_mfa_code`].
    MfaRequired { parameters: HashMap<String, String> },

    /// An application-defined challenge. Answer with
    /// [`CognitoUser::send_custom_challenge_answer`].
    CustomChallenge { parameters: HashMap<String, String> },
}

#[derive(Debug)]
struct UserState {
    username: String,
    auth_flow: AuthFlow,
    session: Option<Session>,
    /// Opaque handshake token stitching multi-step challenges together.
    /// Echoed verbatim across steps, cleared on terminal results and errors.
    server_session: Option<String>,
    device: Option<DeviceMaterial>,
}

/// A user of a pool, with the full authentication surface.
///
/// A single instance is not re-entrant: while an operation is in flight,
/// further operations fail with [`AuthError::Busy`]. Read-only getters stay
/// available concurrently.
pub struct CognitoUser<R: RngCore + Default = ThreadRng> {
    pool: UserPool,
    rpc: RpcFacade,
    store: TokenStore,
    clock: Clock,
    device_name: String,
    state: RwLock<UserState>,
    // Single-slot guard for the one-operation-in-flight rule.
    op_slot: Mutex<()>,
    _rng: PhantomData<fn() -> R>,
}

impl<R: RngCore + Default> CognitoUser<R> {
    /// Create a user bound to a pool, a transport and a storage backend.
    ///
    /// Device secrets persisted by an earlier confirmation are picked up
    /// from storage on first use.
    pub fn new(
        pool: UserPool,
        username: &str,
        transport: Arc<dyn Transport>,
        storage: Arc<dyn Storage>,
    ) -> Result<Self, AuthError> {
        if username.is_empty() {
            return Err(AuthError::InvalidArgument("username is empty".to_string()));
        }

        let store = TokenStore::new(storage, pool.client_id());
        Ok(Self {
            pool,
            rpc: RpcFacade::new(transport),
            store,
            clock: Utc::now,
            device_name: "rust-device".to_string(),
            state: RwLock::new(UserState {
                username: username.to_string(),
                auth_flow: AuthFlow::UserSrpAuth,
                session: None,
                server_session: None,
                device: None,
            }),
            op_slot: Mutex::new(()),
            _rng: PhantomData,
        })
    }

    /// Rebuild the most recently authenticated user recorded in storage.
    ///
    /// `None` when no user has signed in through this storage backend yet.
    /// Combine with [`CognitoUser::get_session`] to resume without
    /// re-prompting for credentials.
    pub fn from_last_auth_user(
        pool: UserPool,
        transport: Arc<dyn Transport>,
        storage: Arc<dyn Storage>,
    ) -> Result<Option<Self>, AuthError> {
        let store = TokenStore::new(storage.clone(), pool.client_id());
        match store.last_auth_user()? {
            Some(username) => Self::new(pool, &username, transport, storage).map(Some),
            None => Ok(None),
        }
    }

    /// Replace the wall clock. Session validity and proof timestamps follow
    /// this source.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Name reported to the service when confirming a new device.
    #[must_use]
    pub fn with_device_name(mut self, device_name: &str) -> Self {
        self.device_name = device_name.to_string();
        self
    }

    /// Switch between `USER_SRP_AUTH` (default) and `CUSTOM_AUTH` for
    /// subsequent [`CognitoUser::authenticate_user`] calls.
    pub fn set_authentication_flow_type(&self, auth_flow: AuthFlow) {
        self.state.write().auth_flow = auth_flow;
    }

    /// The current username. Starts as the caller-supplied name and is
    /// rewritten to the canonical SRP user id once the server reveals it.
    pub fn username(&self) -> String {
        self.state.read().username.clone()
    }

    /// The in-memory session, if any. Makes no validity judgement.
    pub fn get_sign_in_user_session(&self) -> Option<Session> {
        self.state.read().session.clone()
    }

    fn begin_op(&self) -> Result<MutexGuard<'_, ()>, AuthError> {
        self.op_slot.try_lock().map_err(|_| AuthError::Busy)
    }

    /// Take the parked handshake token. Every operation starts by taking it
    /// so a cancelled or failed flow never leaves a stale token behind; it
    /// is re-parked only when a challenge continuation is surfaced.
    fn take_server_session(&self) -> Option<String> {
        self.state.write().server_session.take()
    }

    fn park_server_session(&self, session: Option<String>) {
        self.state.write().server_session = session;
    }

    /// Access token of a currently valid session, or `NotAuthenticated`.
    /// Evaluated before any RPC goes out.
    fn valid_access_token(&self) -> Result<String, AuthError> {
        let now = (self.clock)();
        let state = self.state.read();
        match &state.session {
            Some(session) if session.is_valid_at(now) => {
                Ok(session.access_token().as_str().to_string())
            }
            _ => Err(AuthError::NotAuthenticated),
        }
    }

    /// Device secrets for the current username, consulting storage once and
    /// caching the result in memory.
    fn device_material(&self) -> Result<Option<DeviceMaterial>, AuthError> {
        if let Some(device) = self.state.read().device.clone() {
            return Ok(Some(device));
        }
        let username = self.username();
        let loaded = self.store.load_device(&username)?;
        if let Some(device) = &loaded {
            self.state.write().device = Some(device.clone());
        }
        Ok(loaded)
    }

    // ── Authentication flow ──────────────────────────────────────────

    /// Run the SRP (or custom-with-SRP) sign-in flow for this user.
    ///
    /// Returns a terminal session or a challenge continuation; see
    /// [`AuthOutcome`].
    pub async fn authenticate_user(&self, password: &str) -> Result<AuthOutcome, AuthError> {
        let _slot = self.begin_op()?;
        self.take_server_session();

        let (username, auth_flow) = {
            let state = self.state.read();
            (state.username.clone(), state.auth_flow)
        };
        if matches!(auth_flow, AuthFlow::RefreshTokenAuth) {
            return Err(AuthError::InvalidArgument(
                "refresh flow cannot start a sign-in; call refresh_session".to_string(),
            ));
        }

        info!(username = username.as_str(); "Initiating authentication");

        let engine = SrpEngine::<R>::new(self.pool.pool_name(), self.pool.paranoia())?;

        let mut auth_parameters = HashMap::from([
            ("USERNAME".to_string(), username),
            ("SRP_A".to_string(), engine.large_a_hex()),
        ]);
        if let Some(device) = self.device_material()? {
            auth_parameters.insert("DEVICE_KEY".to_string(), device.device_key);
        }
        if matches!(auth_flow, AuthFlow::CustomAuth) {
            auth_parameters.insert("CHALLENGE_NAME".to_string(), "SRP_A".to_string());
        }

        let response = self
            .rpc
            .initiate_auth(&InitiateAuthRequest {
                auth_flow,
                client_id: self.pool.client_id().to_string(),
                auth_parameters,
            })
            .await?;

        match response.challenge_name {
            Some(ChallengeName::PasswordVerifier) => {
                let response = self.answer_password_verifier(&engine, password, response).await?;
                self.dispatch_challenge(response).await
            }
            _ => self.dispatch_challenge(response).await,
        }
    }

    /// Compute and send the `PASSWORD_VERIFIER` proof.
    async fn answer_password_verifier(
        &self,
        engine: &SrpEngine<R>,
        password: &str,
        response: AuthResponse,
    ) -> Result<AuthResponse, AuthError> {
        let parameters = response
            .challenge_parameters
            .ok_or_else(|| AuthError::Corruption("password verifier challenge carried no parameters".to_string()))?;

        // The server may rewrite the username to its canonical SRP id; all
        // further hashing and requests use the rewritten name.
        let srp_user_id = match parameters.get("USER_ID_FOR_SRP") {
            Some(id) => {
                self.state.write().username = id.clone();
                id.clone()
            }
            None => self.username(),
        };

        let server_b = require_parameter(&parameters, "SRP_B")?;
        let salt = require_parameter(&parameters, "SALT")?;
        let secret_block = require_parameter(&parameters, "SECRET_BLOCK")?;

        let key = engine.password_authentication_key(&srp_user_id, password, server_b, salt)?;
        let timestamp = crate::srp::helper::format_timestamp((self.clock)());
        let signature = proof::claim_signature(
            &key,
            self.pool.pool_name(),
            &srp_user_id,
            secret_block,
            &timestamp,
        )?;

        let mut challenge_responses = HashMap::from([
            ("USERNAME".to_string(), srp_user_id),
            ("PASSWORD_CLAIM_SECRET_BLOCK".to_string(), secret_block.clone()),
            ("PASSWORD_CLAIM_SIGNATURE".to_string(), signature),
            ("TIMESTAMP".to_string(), timestamp),
        ]);
        if let Some(device) = self.device_material()? {
            challenge_responses.insert("DEVICE_KEY".to_string(), device.device_key);
        }

        self.rpc
            .respond_to_auth_challenge(&RespondToAuthChallengeRequest {
                challenge_name: ChallengeName::PasswordVerifier,
                client_id: self.pool.client_id().to_string(),
                challenge_responses,
                session: response.session,
            })
            .await
    }

    /// The challenge dispatcher: consume server responses until either a
    /// terminal result or a challenge that needs caller input.
    async fn dispatch_challenge(&self, mut response: AuthResponse) -> Result<AuthOutcome, AuthError> {
        loop {
            match response.challenge_name {
                Some(ChallengeName::NewPasswordRequired) => {
                    debug!("Server requires a new password");
                    let parameters = response.challenge_parameters.unwrap_or_default();
                    let user_attributes = parse_json_parameter(&parameters, "userAttributes")?;
                    let required: Vec<String> = parse_json_parameter(&parameters, "requiredAttributes")?;
                    let required_attributes = required
                        .into_iter()
                        .map(|name| {
                            name.strip_prefix(USER_ATTRIBUTE_PREFIX)
                                .map(str::to_string)
                                .unwrap_or(name)
                        })
                        .collect();

                    self.park_server_session(response.session);
                    return Ok(AuthOutcome::NewPasswordRequired {
                        user_attributes,
                        required_attributes,
                    });
                }
                Some(ChallengeName::SmsMfa) => {
                    debug!("Server requires an SMS MFA code");
                    self.park_server_session(response.session);
                    return Ok(AuthOutcome::MfaRequired {
                        parameters: response.challenge_parameters.unwrap_or_default(),
                    });
                }
                Some(ChallengeName::CustomChallenge) => {
                    debug!("Server issued a custom challenge");
                    self.park_server_session(response.session);
                    return Ok(AuthOutcome::CustomChallenge {
                        parameters: response.challenge_parameters.unwrap_or_default(),
                    });
                }
                Some(ChallengeName::DeviceSrpAuth) => {
                    response = self.device_srp_auth(response).await?;
                }
                None => return self.finish_authentication(response, None).await,
                Some(other) => {
                    return Err(AuthError::Service {
                        code: "UnexpectedChallenge".to_string(),
                        message: format!("no answer strategy for challenge {other:?}"),
                    })
                }
            }
        }
    }

    /// The device-SRP sub-handshake: an independent SRP exchange whose realm
    /// is the device group key and whose password is the client-generated
    /// device password.
    async fn device_srp_auth(&self, response: AuthResponse) -> Result<AuthResponse, AuthError> {
        let device = self.device_material()?.ok_or_else(|| {
            AuthError::Corruption(
                "server requested device authentication but no device secrets are cached"
                    .to_string(),
            )
        })?;
        let username = self.username();

        info!(device_key = device.device_key.as_str(); "Entering device authentication");

        let engine = SrpEngine::<R>::new(&device.device_group_key, self.pool.paranoia())?;

        let challenge_responses = HashMap::from([
            ("USERNAME".to_string(), username.clone()),
            ("DEVICE_KEY".to_string(), device.device_key.clone()),
            ("SRP_A".to_string(), engine.large_a_hex()),
        ]);
        let response = self
            .rpc
            .respond_to_auth_challenge(&RespondToAuthChallengeRequest {
                challenge_name: ChallengeName::DeviceSrpAuth,
                client_id: self.pool.client_id().to_string(),
                challenge_responses,
                session: response.session,
            })
            .await?;

        if !matches!(response.challenge_name, Some(ChallengeName::DevicePasswordVerifier)) {
            return Err(AuthError::Corruption(format!(
                "expected the device password verifier challenge, got {:?}",
                response.challenge_name
            )));
        }
        let parameters = response
            .challenge_parameters
            .ok_or_else(|| AuthError::Corruption("device verifier challenge carried no parameters".to_string()))?;

        let server_b = require_parameter(&parameters, "SRP_B")?;
        let salt = require_parameter(&parameters, "SALT")?;
        let secret_block = require_parameter(&parameters, "SECRET_BLOCK")?;

        let key = engine.password_authentication_key(
            &device.device_key,
            &device.random_password,
            server_b,
            salt,
        )?;
        let timestamp = crate::srp::helper::format_timestamp((self.clock)());
        let signature = proof::claim_signature(
            &key,
            &device.device_group_key,
            &device.device_key,
            secret_block,
            &timestamp,
        )?;

        let challenge_responses = HashMap::from([
            ("USERNAME".to_string(), username),
            ("DEVICE_KEY".to_string(), device.device_key),
            ("PASSWORD_CLAIM_SECRET_BLOCK".to_string(), secret_block.clone()),
            ("PASSWORD_CLAIM_SIGNATURE".to_string(), signature),
            ("TIMESTAMP".to_string(), timestamp),
        ]);
        self.rpc
            .respond_to_auth_challenge(&RespondToAuthChallengeRequest {
                challenge_name: ChallengeName::DevicePasswordVerifier,
                client_id: self.pool.client_id().to_string(),
                challenge_responses,
                session: response.session,
            })
            .await
    }

    /// Terminal transition: adopt the authentication result, cache tokens,
    /// and run the confirm-device ceremony when the server asks for it.
    async fn finish_authentication(
        &self,
        response: AuthResponse,
        prior_refresh_token: Option<&str>,
    ) -> Result<AuthOutcome, AuthError> {
        let result = response.authentication_result.ok_or_else(|| {
            AuthError::Corruption(
                "response carried neither a challenge nor an authentication result".to_string(),
            )
        })?;

        let session = session_from_result(&result, prior_refresh_token)?;
        let username = self.username();
        self.store.cache_tokens(&username, &session)?;
        {
            let mut state = self.state.write();
            state.session = Some(session.clone());
            state.server_session = None;
        }
        info!(username = username.as_str(); "Authentication complete");

        let user_confirmation_necessary = match result.new_device_metadata {
            Some(metadata) => self.confirm_new_device(&session, metadata).await?,
            None => false,
        };

        Ok(AuthOutcome::Authenticated {
            session,
            user_confirmation_necessary,
        })
    }

    /// The confirm-device ceremony: generate a verifier for a fresh random
    /// device password, register it, persist the secrets.
    async fn confirm_new_device(
        &self,
        session: &Session,
        metadata: NewDeviceMetadata,
    ) -> Result<bool, AuthError> {
        let verifier = SrpEngine::<R>::generate_hash_device(
            &metadata.device_group_key,
            &metadata.device_key,
        )?;

        let response = self
            .rpc
            .confirm_device(&ConfirmDeviceRequest {
                access_token: session.access_token().as_str().to_string(),
                device_key: metadata.device_key.clone(),
                device_secret_verifier_config: DeviceSecretVerifierConfig {
                    password_verifier: verifier.verifier,
                    salt: verifier.salt,
                },
                device_name: Some(self.device_name.clone()),
            })
            .await?;

        let material = DeviceMaterial {
            device_key: metadata.device_key,
            device_group_key: metadata.device_group_key,
            random_password: verifier.password,
        };
        let username = self.username();
        self.store.cache_device(&username, &material)?;
        info!(username = username.as_str(), device_key = material.device_key.as_str(); "Device confirmed");
        self.state.write().device = Some(material);

        Ok(response.user_confirmation_necessary)
    }

    /// Answer a `NEW_PASSWORD_REQUIRED` challenge.
    ///
    /// `required_attributes` supplies values for the attribute names the
    /// challenge listed; they travel back under the server's attribute
    /// prefix.
    pub async fn complete_new_password_challenge(
        &self,
        new_password: &str,
        required_attributes: &HashMap<String, String>,
    ) -> Result<AuthOutcome, AuthError> {
        let _slot = self.begin_op()?;
        if new_password.is_empty() {
            return Err(AuthError::InvalidArgument("new password is empty".to_string()));
        }
        let server_session = self.take_server_session();

        let mut challenge_responses = HashMap::from([
            ("NEW_PASSWORD".to_string(), new_password.to_string()),
            ("USERNAME".to_string(), self.username()),
        ]);
        for (name, value) in required_attributes {
            challenge_responses.insert(format!("{USER_ATTRIBUTE_PREFIX}{name}"), value.clone());
        }

        let response = self
            .rpc
            .respond_to_auth_challenge(&RespondToAuthChallengeRequest {
                challenge_name: ChallengeName::NewPasswordRequired,
                client_id: self.pool.client_id().to_string(),
                challenge_responses,
                session: server_session,
            })
            .await?;
        self.dispatch_challenge(response).await
    }

    /// Answer an `SMS_MFA` challenge with the code the user received.
    pub async fn send_mfa_code(&self, code: &str) -> Result<AuthOutcome, AuthError> {
        let _slot = self.begin_op()?;
        let server_session = self.take_server_session();

        let mut challenge_responses = HashMap::from([
            ("SMS_MFA_CODE".to_string(), code.to_string()),
            ("USERNAME".to_string(), self.username()),
        ]);
        if let Some(device) = self.device_material()? {
            challenge_responses.insert("DEVICE_KEY".to_string(), device.device_key);
        }

        let response = self
            .rpc
            .respond_to_auth_challenge(&RespondToAuthChallengeRequest {
                challenge_name: ChallengeName::SmsMfa,
                client_id: self.pool.client_id().to_string(),
                challenge_responses,
                session: server_session,
            })
            .await?;
        self.dispatch_challenge(response).await
    }

    /// Answer a `CUSTOM_CHALLENGE`. The server may chain further custom
    /// challenges; each round surfaces as a fresh outcome.
    pub async fn send_custom_challenge_answer(&self, answer: &str) -> Result<AuthOutcome, AuthError> {
        let _slot = self.begin_op()?;
        let server_session = self.take_server_session();

        let challenge_responses = HashMap::from([
            ("ANSWER".to_string(), answer.to_string()),
            ("USERNAME".to_string(), self.username()),
        ]);

        let response = self
            .rpc
            .respond_to_auth_challenge(&RespondToAuthChallengeRequest {
                challenge_name: ChallengeName::CustomChallenge,
                client_id: self.pool.client_id().to_string(),
                challenge_responses,
                session: server_session,
            })
            .await?;
        self.dispatch_challenge(response).await
    }

    // ── Session lifecycle ────────────────────────────────────────────

    /// Exchange a refresh token for fresh id/access tokens.
    ///
    /// Assumes the username is already set (it keys the device lookup and
    /// the token cache). When the server omits a refresh token from the
    /// result, the one passed in is carried forward.
    pub async fn refresh_session(&self, refresh_token: &str) -> Result<Session, AuthError> {
        let _slot = self.begin_op()?;
        self.refresh_session_locked(refresh_token).await
    }

    async fn refresh_session_locked(&self, refresh_token: &str) -> Result<Session, AuthError> {
        let username = self.username();
        debug!(username = username.as_str(); "Refreshing session");

        let mut auth_parameters =
            HashMap::from([("REFRESH_TOKEN".to_string(), refresh_token.to_string())]);
        if let Some(device) = self.device_material()? {
            auth_parameters.insert("DEVICE_KEY".to_string(), device.device_key);
        }

        let response = self
            .rpc
            .initiate_auth(&InitiateAuthRequest {
                auth_flow: AuthFlow::RefreshTokenAuth,
                client_id: self.pool.client_id().to_string(),
                auth_parameters,
            })
            .await?;

        let result = response.authentication_result.ok_or_else(|| {
            AuthError::Corruption("refresh response carried no authentication result".to_string())
        })?;
        let session = session_from_result(&result, Some(refresh_token))?;

        self.store.cache_tokens(&username, &session)?;
        self.state.write().session = Some(session.clone());
        Ok(session)
    }

    /// Resolve a usable session: memory, then cache, then a refresh against
    /// the service, in that order.
    pub async fn get_session(&self) -> Result<Session, AuthError> {
        let _slot = self.begin_op()?;
        let now = (self.clock)();

        if let Some(session) = self.state.read().session.clone() {
            if session.is_valid_at(now) {
                return Ok(session);
            }
        }

        let username = self.username();
        if let Some(cached) = self.store.load_tokens(&username)? {
            if cached.is_valid_at(now) {
                debug!(username = username.as_str(); "Using cached session");
                self.state.write().session = Some(cached.clone());
                return Ok(cached);
            }
            if !cached.refresh_token().is_empty() {
                return self.refresh_session_locked(cached.refresh_token()).await;
            }
        }

        Err(AuthError::NotAuthenticated)
    }

    /// Drop the session locally. Best-effort: cache removal failures are
    /// logged, never surfaced.
    pub fn sign_out(&self) {
        let username = {
            let mut state = self.state.write();
            state.session = None;
            state.server_session = None;
            state.username.clone()
        };
        self.store.clear_tokens(&username);
        info!(username = username.as_str(); "Signed out");
    }

    /// Revoke every session for this user server-side, then drop the local
    /// one.
    pub async fn global_sign_out(&self) -> Result<(), AuthError> {
        {
            let _slot = self.begin_op()?;
            let access_token = self.valid_access_token()?;
            self.rpc
                .global_sign_out(&GlobalSignOutRequest { access_token })
                .await?;
        }
        self.sign_out();
        Ok(())
    }

    // ── Account operations ───────────────────────────────────────────

    /// Confirm a freshly signed-up user with the emailed/texted code.
    pub async fn confirm_registration(
        &self,
        code: &str,
        force_alias_creation: bool,
    ) -> Result<(), AuthError> {
        let _slot = self.begin_op()?;
        self.rpc
            .confirm_sign_up(&ConfirmSignUpRequest {
                client_id: self.pool.client_id().to_string(),
                username: self.username(),
                confirmation_code: code.to_string(),
                force_alias_creation: force_alias_creation.then_some(true),
            })
            .await?;
        Ok(())
    }

    pub async fn resend_confirmation_code(&self) -> Result<CodeDeliveryResponse, AuthError> {
        let _slot = self.begin_op()?;
        self.rpc
            .resend_confirmation_code(&ResendConfirmationCodeRequest {
                client_id: self.pool.client_id().to_string(),
                username: self.username(),
            })
            .await
    }

    /// Start the password-recovery flow. Deliberately unauthenticated.
    pub async fn forgot_password(&self) -> Result<CodeDeliveryResponse, AuthError> {
        let _slot = self.begin_op()?;
        self.rpc
            .forgot_password(&ForgotPasswordRequest {
                client_id: self.pool.client_id().to_string(),
                username: self.username(),
            })
            .await
    }

    /// Finish the password-recovery flow with the delivered code.
    pub async fn confirm_password(&self, code: &str, new_password: &str) -> Result<(), AuthError> {
        let _slot = self.begin_op()?;
        if new_password.is_empty() {
            return Err(AuthError::InvalidArgument("new password is empty".to_string()));
        }
        self.rpc
            .confirm_forgot_password(&ConfirmForgotPasswordRequest {
                client_id: self.pool.client_id().to_string(),
                username: self.username(),
                confirmation_code: code.to_string(),
                password: new_password.to_string(),
            })
            .await?;
        Ok(())
    }

    pub async fn change_password(
        &self,
        previous_password: &str,
        proposed_password: &str,
    ) -> Result<(), AuthError> {
        let _slot = self.begin_op()?;
        if proposed_password.is_empty() {
            return Err(AuthError::InvalidArgument("new password is empty".to_string()));
        }
        let access_token = self.valid_access_token()?;
        self.rpc
            .change_password(&ChangePasswordRequest {
                previous_password: previous_password.to_string(),
                proposed_password: proposed_password.to_string(),
                access_token,
            })
            .await?;
        Ok(())
    }

    pub async fn get_user_attributes(&self) -> Result<Vec<AttributeType>, AuthError> {
        let _slot = self.begin_op()?;
        let access_token = self.valid_access_token()?;
        let response = self.rpc.get_user(&GetUserRequest { access_token }).await?;
        Ok(response.user_attributes)
    }

    pub async fn update_attributes(
        &self,
        attributes: Vec<AttributeType>,
    ) -> Result<UpdateUserAttributesResponse, AuthError> {
        let _slot = self.begin_op()?;
        let access_token = self.valid_access_token()?;
        self.rpc
            .update_user_attributes(&UpdateUserAttributesRequest {
                user_attributes: attributes,
                access_token,
            })
            .await
    }

    pub async fn delete_attributes(&self, attribute_names: Vec<String>) -> Result<(), AuthError> {
        let _slot = self.begin_op()?;
        let access_token = self.valid_access_token()?;
        self.rpc
            .delete_user_attributes(&DeleteUserAttributesRequest {
                user_attribute_names: attribute_names,
                access_token,
            })
            .await?;
        Ok(())
    }

    pub async fn get_attribute_verification_code(
        &self,
        attribute_name: &str,
    ) -> Result<CodeDeliveryResponse, AuthError> {
        let _slot = self.begin_op()?;
        let access_token = self.valid_access_token()?;
        self.rpc
            .get_user_attribute_verification_code(&GetUserAttributeVerificationCodeRequest {
                attribute_name: attribute_name.to_string(),
                access_token,
            })
            .await
    }

    pub async fn verify_attribute(&self, attribute_name: &str, code: &str) -> Result<(), AuthError> {
        let _slot = self.begin_op()?;
        let access_token = self.valid_access_token()?;
        self.rpc
            .verify_user_attribute(&VerifyUserAttributeRequest {
                attribute_name: attribute_name.to_string(),
                code: code.to_string(),
                access_token,
            })
            .await?;
        Ok(())
    }

    pub async fn set_user_settings(&self, mfa_options: Vec<MfaOption>) -> Result<(), AuthError> {
        let _slot = self.begin_op()?;
        let access_token = self.valid_access_token()?;
        self.rpc
            .set_user_settings(&SetUserSettingsRequest {
                access_token,
                mfa_options,
            })
            .await?;
        Ok(())
    }

    /// Delete the user account and drop the local session.
    pub async fn delete_user(&self) -> Result<(), AuthError> {
        {
            let _slot = self.begin_op()?;
            let access_token = self.valid_access_token()?;
            self.rpc.delete_user(&DeleteUserRequest { access_token }).await?;
        }
        self.sign_out();
        Ok(())
    }

    // ── Device management ────────────────────────────────────────────

    fn current_device_key(&self) -> Result<String, AuthError> {
        self.device_material()?
            .map(|device| device.device_key)
            .ok_or_else(|| AuthError::InvalidArgument("no device key is set for this user".to_string()))
    }

    pub async fn get_device(&self) -> Result<DeviceType, AuthError> {
        let _slot = self.begin_op()?;
        let access_token = self.valid_access_token()?;
        let device_key = self.current_device_key()?;
        let response = self
            .rpc
            .get_device(&GetDeviceRequest {
                access_token,
                device_key,
            })
            .await?;
        Ok(response.device)
    }

    /// Unregister the current device and drop its persisted secrets. The
    /// next sign-in runs as a plain, device-less login.
    pub async fn forget_device(&self) -> Result<(), AuthError> {
        let _slot = self.begin_op()?;
        let access_token = self.valid_access_token()?;
        let device_key = self.current_device_key()?;
        self.rpc
            .forget_device(&ForgetDeviceRequest {
                access_token,
                device_key,
            })
            .await?;

        let username = self.username();
        self.state.write().device = None;
        self.store.clear_device(&username);
        info!(username = username.as_str(); "Device forgotten");
        Ok(())
    }

    /// Flip the remembered status of the current device.
    pub async fn set_device_status(&self, remembered: bool) -> Result<(), AuthError> {
        let _slot = self.begin_op()?;
        let access_token = self.valid_access_token()?;
        let device_key = self.current_device_key()?;
        self.rpc
            .update_device_status(&UpdateDeviceStatusRequest {
                access_token,
                device_key,
                device_remembered_status: if remembered {
                    DeviceRememberedStatus::Remembered
                } else {
                    DeviceRememberedStatus::NotRemembered
                },
            })
            .await?;
        Ok(())
    }

    pub async fn list_devices(
        &self,
        limit: Option<i32>,
        pagination_token: Option<String>,
    ) -> Result<ListDevicesResponse, AuthError> {
        let _slot = self.begin_op()?;
        let access_token = self.valid_access_token()?;
        self.rpc
            .list_devices(&ListDevicesRequest {
                access_token,
                limit,
                pagination_token,
            })
            .await
    }
}

/// Extract a required challenge parameter.
fn require_parameter<'a>(
    parameters: &'a HashMap<String, String>,
    key: &str,
) -> Result<&'a String, AuthError> {
    parameters
        .get(key)
        .ok_or_else(|| AuthError::Corruption(format!("challenge response is missing {key}")))
}

/// Challenge parameters that are themselves JSON documents.
fn parse_json_parameter<T: serde::de::DeserializeOwned + Default>(
    parameters: &HashMap<String, String>,
    key: &str,
) -> Result<T, AuthError> {
    parameters
        .get(key)
        .map(|raw| {
            serde_json::from_str(raw)
                .map_err(|err| AuthError::Corruption(format!("{key} is not valid JSON: {err}")))
        })
        .transpose()
        .map(Option::unwrap_or_default)
}

/// Build a session from an authentication result, carrying the prior
/// refresh token forward when the server omits one.
fn session_from_result(
    result: &AuthenticationResult,
    prior_refresh_token: Option<&str>,
) -> Result<Session, AuthError> {
    let id_token = result
        .id_token
        .as_deref()
        .ok_or_else(|| AuthError::Corruption("authentication result is missing IdToken".to_string()))?;
    let access_token = result.access_token.as_deref().ok_or_else(|| {
        AuthError::Corruption("authentication result is missing AccessToken".to_string())
    })?;
    let refresh_token = result
        .refresh_token
        .as_deref()
        .or(prior_refresh_token)
        .ok_or_else(|| {
            AuthError::Corruption("authentication result is missing RefreshToken".to_string())
        })?;

    Ok(Session::new(
        Jwt::new(id_token),
        Jwt::new(access_token),
        refresh_token,
    ))
}
