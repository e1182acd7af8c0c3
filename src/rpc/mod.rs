//! Thin facade over the identity-provider RPC dictionary.
//!
//! The facade owns serialization and service-error mapping; everything
//! below it (HTTP, TLS, retries) lives behind [`Transport`]. The core never
//! sees sockets.

use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::error::AuthError;

pub mod types;

use types::*;

/// One JSON request/response exchange per remote operation.
///
/// `action` is the operation name from the service's RPC dictionary (the
/// `X-Amz-Target` suffix); `body` is the request payload. Implementations
/// return the response body verbatim, including service error bodies, and
/// reserve `Err` for failures that produced no response at all.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn call(&self, action: &str, body: Value) -> Result<Value, AuthError>;
}

/// Typed adapter over a [`Transport`].
#[derive(Clone)]
pub struct RpcFacade {
    transport: Arc<dyn Transport>,
}

impl RpcFacade {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    async fn call<Req, Resp>(&self, action: &str, request: &Req) -> Result<Resp, AuthError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let body = serde_json::to_value(request)
            .map_err(|err| AuthError::InvalidArgument(err.to_string()))?;

        debug!(action = action; "Calling identity provider");
        let response = self.transport.call(action, body).await?;

        // Service errors carry a `__type` discriminator in the body.
        if let Some(code) = response.get("__type").and_then(Value::as_str) {
            let message = response
                .get("message")
                .or_else(|| response.get("Message"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            return Err(AuthError::Service {
                code: code.to_string(),
                message,
            });
        }

        serde_json::from_value(response).map_err(|err| AuthError::Transport(Box::new(err)))
    }

    pub async fn initiate_auth(&self, req: &InitiateAuthRequest) -> Result<AuthResponse, AuthError> {
        self.call("InitiateAuth", req).await
    }

    pub async fn respond_to_auth_challenge(
        &self,
        req: &RespondToAuthChallengeRequest,
    ) -> Result<AuthResponse, AuthError> {
        self.call("RespondToAuthChallenge", req).await
    }

    pub async fn confirm_device(
        &self,
        req: &ConfirmDeviceRequest,
    ) -> Result<ConfirmDeviceResponse, AuthError> {
        self.call("ConfirmDevice", req).await
    }

    pub async fn confirm_sign_up(&self, req: &ConfirmSignUpRequest) -> Result<EmptyResponse, AuthError> {
        self.call("ConfirmSignUp", req).await
    }

    pub async fn resend_confirmation_code(
        &self,
        req: &ResendConfirmationCodeRequest,
    ) -> Result<CodeDeliveryResponse, AuthError> {
        self.call("ResendConfirmationCode", req).await
    }

    pub async fn forgot_password(
        &self,
        req: &ForgotPasswordRequest,
    ) -> Result<CodeDeliveryResponse, AuthError> {
        self.call("ForgotPassword", req).await
    }

    pub async fn confirm_forgot_password(
        &self,
        req: &ConfirmForgotPasswordRequest,
    ) -> Result<EmptyResponse, AuthError> {
        self.call("ConfirmForgotPassword", req).await
    }

    pub async fn change_password(&self, req: &ChangePasswordRequest) -> Result<EmptyResponse, AuthError> {
        self.call("ChangePassword", req).await
    }

    pub async fn get_user(&self, req: &GetUserRequest) -> Result<GetUserResponse, AuthError> {
        self.call("GetUser", req).await
    }

    pub async fn update_user_attributes(
        &self,
        req: &UpdateUserAttributesRequest,
    ) -> Result<UpdateUserAttributesResponse, AuthError> {
        self.call("UpdateUserAttributes", req).await
    }

    pub async fn delete_user_attributes(
        &self,
        req: &DeleteUserAttributesRequest,
    ) -> Result<EmptyResponse, AuthError> {
        self.call("DeleteUserAttributes", req).await
    }

    pub async fn delete_user(&self, req: &DeleteUserRequest) -> Result<EmptyResponse, AuthError> {
        self.call("DeleteUser", req).await
    }

    pub async fn get_user_attribute_verification_code(
        &self,
        req: &GetUserAttributeVerificationCodeRequest,
    ) -> Result<CodeDeliveryResponse, AuthError> {
        self.call("GetUserAttributeVerificationCode", req).await
    }

    pub async fn verify_user_attribute(
        &self,
        req: &VerifyUserAttributeRequest,
    ) -> Result<EmptyResponse, AuthError> {
        self.call("VerifyUserAttribute", req).await
    }

    pub async fn set_user_settings(
        &self,
        req: &SetUserSettingsRequest,
    ) -> Result<EmptyResponse, AuthError> {
        self.call("SetUserSettings", req).await
    }

    pub async fn get_device(&self, req: &GetDeviceRequest) -> Result<GetDeviceResponse, AuthError> {
        self.call("GetDevice", req).await
    }

    pub async fn forget_device(&self, req: &ForgetDeviceRequest) -> Result<EmptyResponse, AuthError> {
        self.call("ForgetDevice", req).await
    }

    pub async fn update_device_status(
        &self,
        req: &UpdateDeviceStatusRequest,
    ) -> Result<EmptyResponse, AuthError> {
        self.call("UpdateDeviceStatus", req).await
    }

    pub async fn list_devices(&self, req: &ListDevicesRequest) -> Result<ListDevicesResponse, AuthError> {
        self.call("ListDevices", req).await
    }

    pub async fn global_sign_out(&self, req: &GlobalSignOutRequest) -> Result<EmptyResponse, AuthError> {
        self.call("GlobalSignOut", req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct CannedTransport(Value);

    #[async_trait]
    impl Transport for CannedTransport {
        async fn call(&self, _action: &str, _body: Value) -> Result<Value, AuthError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_service_error_bodies_map_to_service_errors() {
        let facade = RpcFacade::new(Arc::new(CannedTransport(json!({
            "__type": "NotAuthorizedException",
            "message": "Incorrect username or password."
        }))));

        let result = facade
            .get_user(&GetUserRequest {
                access_token: "token".to_string(),
            })
            .await;

        match result {
            Err(AuthError::Service { code, message }) => {
                assert_eq!(code, "NotAuthorizedException");
                assert_eq!(message, "Incorrect username or password.");
            }
            other => panic!("expected service error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_success_bodies_deserialize() {
        let facade = RpcFacade::new(Arc::new(CannedTransport(json!({
            "Username": "alice",
            "UserAttributes": [{"Name": "email", "Value": "a@b"}]
        }))));

        let response = facade
            .get_user(&GetUserRequest {
                access_token: "token".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(response.username, "alice");
        assert_eq!(response.user_attributes[0].name, "email");
    }
}
