use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use portal_auth::auth::{TokenCodec, UserRole};
use portal_auth::clock::{system_clock, FixedClock};
use portal_auth::error::TokenError;

const SECRET: &str = "Rk7vQ2xL9mWp4Tz8Nb3Hc6Jd1Fg5Ys0A";
const OTHER_SECRET: &str = "Hc6Jd1Fg5Ys0ARk7vQ2xL9mWp4Tz8Nb3";

fn codec() -> TokenCodec {
    TokenCodec::new(SECRET, Duration::from_secs(900), system_clock())
}

fn claims_json(role: &str) -> serde_json::Value {
    let now = Utc::now().timestamp();
    json!({
        "user_id": Uuid::new_v4(),
        "role": role,
        "iat": now,
        "exp": now + 900,
    })
}

#[test]
fn test_round_trip_preserves_identity() {
    let codec = codec();
    let user_id = Uuid::new_v4();

    let token = codec.issue_access_token(user_id, UserRole::User).unwrap();
    let claims = codec.verify_access_token(&token).unwrap();

    assert_eq!(claims.user_id, user_id);
    assert_eq!(claims.role, UserRole::User);
    assert_eq!(claims.exp - claims.iat, 900);
}

#[test]
fn test_wrong_secret_is_invalid_signature() {
    let token = codec().issue_access_token(Uuid::new_v4(), UserRole::Admin).unwrap();
    let other = TokenCodec::new(OTHER_SECRET, Duration::from_secs(900), system_clock());

    assert_eq!(other.verify_access_token(&token), Err(TokenError::InvalidSignature));
}

#[test]
fn test_alg_none_is_invalid_signature() {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims_json("admin").to_string());
    let token = format!("{}.{}.", header, payload);

    assert_eq!(codec().verify_access_token(&token), Err(TokenError::InvalidSignature));
}

#[test]
fn test_other_hmac_algorithm_rejected() {
    let token = encode(
        &Header::new(Algorithm::HS512),
        &claims_json("user"),
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap();

    assert_eq!(codec().verify_access_token(&token), Err(TokenError::InvalidSignature));
}

#[test]
fn test_modified_payload_is_invalid_signature() {
    let codec = codec();
    let token = codec.issue_access_token(Uuid::new_v4(), UserRole::User).unwrap();
    let parts: Vec<&str> = token.split('.').collect();

    let forged_payload = URL_SAFE_NO_PAD.encode(claims_json("admin").to_string());
    let forged = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);

    assert_eq!(codec.verify_access_token(&forged), Err(TokenError::InvalidSignature));
}

#[test]
fn test_unknown_role_fails_closed() {
    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims_json("superuser"),
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap();

    assert_eq!(codec().verify_access_token(&token), Err(TokenError::Malformed));
}

#[test]
fn test_missing_exp_is_malformed() {
    let token = encode(
        &Header::new(Algorithm::HS256),
        &json!({ "user_id": Uuid::new_v4(), "role": "user", "iat": 0 }),
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap();

    assert_eq!(codec().verify_access_token(&token), Err(TokenError::Malformed));
}

#[test]
fn test_expiry_follows_clock() {
    let clock = FixedClock::new(Utc::now());
    let codec = TokenCodec::new(SECRET, Duration::from_secs(900), Arc::new(clock.clone()));
    let token = codec.issue_access_token(Uuid::new_v4(), UserRole::User).unwrap();

    clock.advance(chrono::Duration::seconds(899));
    assert!(codec.verify_access_token(&token).is_ok());

    clock.advance(chrono::Duration::seconds(1));
    assert_eq!(codec.verify_access_token(&token), Err(TokenError::Expired));
}
