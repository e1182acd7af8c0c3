use std::sync::Arc;

use serde_json::json;

use aws_cognito_auth::{AuthOutcome, MemoryStorage, Storage};

mod common;

use common::{
    authentication_result, make_jwt, make_user, password_verifier_challenge, storage_key,
    MockTransport, FIXED_NOW,
};

/// Fixture values MockRng produces for the confirm-device ceremony.
const DEVICE_PASSWORD: &str = "AAECAwQFBgcAAQIDBAUGBwABAgMEBQYHAAECAwQFBgcAAQIDBAUGBw==";
const DEVICE_SALT: &str = "AQIDBAUGBwABAgMEBQYH";

/// The proof MockRng + the pinned clock must produce for the device
/// password verifier, with the device secrets above.
const EXPECTED_DEVICE_SIGNATURE: &str = "fx/T8nFbBaFfJ8XJJlgMNq2b7NW8mhnFyqkVnkFGIVE=";

fn authentication_result_with_device() -> serde_json::Value {
    json!({
        "AuthenticationResult": {
            "IdToken": make_jwt(FIXED_NOW + 3600),
            "AccessToken": make_jwt(FIXED_NOW + 3600),
            "RefreshToken": "rf.jwt",
            "NewDeviceMetadata": {
                "DeviceGroupKey": "grp",
                "DeviceKey": "dev"
            }
        }
    })
}

#[tokio::test]
async fn test_first_login_confirms_and_persists_the_device() {
    let transport = MockTransport::new(vec![
        password_verifier_challenge(),
        authentication_result_with_device(),
        json!({ "UserConfirmationNecessary": false }),
    ]);
    let storage = Arc::new(MemoryStorage::new());
    let user = make_user(transport.clone(), storage.clone());

    let outcome = user.authenticate_user("correct horse").await.unwrap();
    let AuthOutcome::Authenticated {
        user_confirmation_necessary,
        ..
    } = outcome
    else {
        panic!("expected a terminal session");
    };
    assert!(!user_confirmation_necessary);

    let (action, body) = &transport.calls()[2];
    assert_eq!(action, "ConfirmDevice");
    assert_eq!(body["DeviceKey"], "dev");
    assert_eq!(body["DeviceName"], "integration-test-device");
    assert_eq!(body["DeviceSecretVerifierConfig"]["Salt"], DEVICE_SALT);
    assert!(body["DeviceSecretVerifierConfig"]["PasswordVerifier"].is_string());

    // The device triple is durable: it outlives this session.
    assert_eq!(
        storage.get_item(&storage_key("deviceKey")).unwrap().as_deref(),
        Some("dev")
    );
    assert_eq!(
        storage.get_item(&storage_key("deviceGroupKey")).unwrap().as_deref(),
        Some("grp")
    );
    assert_eq!(
        storage.get_item(&storage_key("randomPasswordKey")).unwrap().as_deref(),
        Some(DEVICE_PASSWORD)
    );
}

#[tokio::test]
async fn test_user_confirmation_necessary_is_surfaced_with_the_session() {
    let transport = MockTransport::new(vec![
        password_verifier_challenge(),
        authentication_result_with_device(),
        json!({ "UserConfirmationNecessary": true }),
    ]);
    let user = make_user(transport, Arc::new(MemoryStorage::new()));

    let outcome = user.authenticate_user("correct horse").await.unwrap();
    let AuthOutcome::Authenticated {
        session,
        user_confirmation_necessary,
    } = outcome
    else {
        panic!("expected a terminal session");
    };

    // The session is usable; the flag only asks the caller to prompt.
    assert!(user_confirmation_necessary);
    assert!(session.is_valid_at(common::fixed_clock()));
}

#[tokio::test]
async fn test_device_bound_login_runs_the_srp_sub_handshake() {
    let storage = Arc::new(MemoryStorage::new());

    // First cycle: password login, device confirmation.
    let transport = MockTransport::new(vec![
        password_verifier_challenge(),
        authentication_result_with_device(),
        json!({ "UserConfirmationNecessary": false }),
    ]);
    let user = make_user(transport, storage.clone());
    user.authenticate_user("correct horse").await.unwrap();

    // Second cycle: a fresh process picks the device secrets up from
    // storage and signs in without the user re-entering a password for the
    // device leg.
    let transport = MockTransport::new(vec![
        password_verifier_challenge(),
        json!({
            "ChallengeName": "DEVICE_SRP_AUTH",
            "Session": "device-session-1",
        }),
        json!({
            "ChallengeName": "DEVICE_PASSWORD_VERIFIER",
            "Session": "device-session-2",
            "ChallengeParameters": {
                "SRP_B": common::MOCK_B,
                "SALT": common::MOCK_SALT,
                "SECRET_BLOCK": common::MOCK_SECRET_BLOCK,
            }
        }),
        authentication_result(),
    ]);
    let user = make_user(transport.clone(), storage);

    let outcome = user.authenticate_user("correct horse").await.unwrap();
    assert!(matches!(outcome, AuthOutcome::Authenticated { .. }));

    let calls = transport.calls();
    assert_eq!(calls.len(), 4);

    assert_eq!(calls[0].1["AuthParameters"]["DEVICE_KEY"], "dev");

    let (action, body) = &calls[2];
    assert_eq!(action, "RespondToAuthChallenge");
    assert_eq!(body["ChallengeName"], "DEVICE_SRP_AUTH");
    assert_eq!(body["Session"], "device-session-1");
    assert_eq!(body["ChallengeResponses"]["USERNAME"], "alice");
    assert_eq!(body["ChallengeResponses"]["DEVICE_KEY"], "dev");
    assert!(body["ChallengeResponses"]["SRP_A"].is_string());

    let (action, body) = &calls[3];
    assert_eq!(action, "RespondToAuthChallenge");
    assert_eq!(body["ChallengeName"], "DEVICE_PASSWORD_VERIFIER");
    assert_eq!(body["Session"], "device-session-2");
    let responses = &body["ChallengeResponses"];
    assert_eq!(responses["DEVICE_KEY"], "dev");
    assert_eq!(responses["TIMESTAMP"], "Tue Apr 9 07:04:32 UTC 2024");
    assert_eq!(responses["PASSWORD_CLAIM_SIGNATURE"], EXPECTED_DEVICE_SIGNATURE);
}

#[tokio::test]
async fn test_forget_device_clears_secrets_and_later_logins_are_deviceless() {
    let storage = Arc::new(MemoryStorage::new());
    let transport = MockTransport::new(vec![
        password_verifier_challenge(),
        authentication_result_with_device(),
        json!({ "UserConfirmationNecessary": false }),
        json!({}), // ForgetDevice
        password_verifier_challenge(),
        authentication_result(),
    ]);
    let user = make_user(transport.clone(), storage.clone());

    user.authenticate_user("correct horse").await.unwrap();
    user.forget_device().await.unwrap();

    let (action, body) = &transport.calls()[3];
    assert_eq!(action, "ForgetDevice");
    assert_eq!(body["DeviceKey"], "dev");
    assert_eq!(storage.get_item(&storage_key("deviceKey")).unwrap(), None);
    assert_eq!(storage.get_item(&storage_key("randomPasswordKey")).unwrap(), None);

    // The next sign-in carries no device key at all.
    let user = make_user(transport.clone(), storage);
    user.authenticate_user("correct horse").await.unwrap();

    let calls = transport.calls();
    assert!(calls[4].1["AuthParameters"].get("DEVICE_KEY").is_none());
    assert!(calls[5].1["ChallengeResponses"].get("DEVICE_KEY").is_none());
}
