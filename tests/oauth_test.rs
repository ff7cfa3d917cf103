mod common;

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use warp::http::{Response, StatusCode};
use warp::hyper::body::Bytes;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{browser_cookie, builder, config, cookie_value, json as body_json, set_cookie, FRONTEND_URL};
use portal_auth::auth::oauth::{build_http_client, CallbackParams, HttpOAuthProvider, ProviderEndpoints};
use portal_auth::auth::{ProviderKind, User};
use portal_auth::config::OAuthClientConfig;
use portal_auth::error::{OAuthError, PortalError};
use portal_auth::routes;
use portal_auth::state::AppState;

fn provider(kind: ProviderKind, server: &MockServer) -> Arc<HttpOAuthProvider> {
    let credentials = OAuthClientConfig {
        client_id: format!("{}-client", kind),
        client_secret: format!("{}-client-key", kind),
        redirect_uri: format!("http://localhost:8080/api/auth/{}/callback", kind),
    };
    Arc::new(
        HttpOAuthProvider::with_endpoints(
            kind,
            build_http_client(Duration::from_secs(5)).unwrap(),
            credentials,
            ProviderEndpoints::rebased(kind, &server.uri()),
        )
        .unwrap(),
    )
}

fn state_with(kind: ProviderKind, server: &MockServer) -> AppState {
    builder(config()).provider(provider(kind, server)).build().unwrap()
}

async fn mount_token(server: &MockServer, code: &str, body: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains(format!("code={}", code)))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

async fn mount_yandex_profile(server: &MockServer, profile: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/profile"))
        .and(header("authorization", "OAuth ya-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(profile))
        .mount(server)
        .await;
}

/// Start a login and return the state nonce from the cookie
async fn start(state: &AppState, provider: &str) -> String {
    let response = warp::test::request()
        .path(&format!("/api/auth/{}", provider))
        .reply(&routes(state.clone()))
        .await;
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    cookie_value(&response, "oauth_state").unwrap()
}

async fn callback(
    state: &AppState,
    provider: &str,
    query: &str,
    cookie_state: Option<&str>,
) -> Response<Bytes> {
    let mut request = warp::test::request().path(&format!("/api/auth/{}/callback?{}", provider, query));
    if let Some(cookie_state) = cookie_state {
        request = request.header("cookie", format!("oauth_state={}", cookie_state));
    }
    request.reply(&routes(state.clone())).await
}

async fn yandex_user(state: &AppState, id: &str) -> Option<User> {
    state
        .storage
        .user_storage()
        .find_user_by_provider_id(ProviderKind::Yandex, id)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_start_redirects_to_provider() {
    let server = MockServer::start().await;
    let state = state_with(ProviderKind::Yandex, &server);

    let response = warp::test::request()
        .path("/api/auth/yandex")
        .reply(&routes(state))
        .await;

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    let location = response.headers()["location"].to_str().unwrap().to_string();
    let nonce = cookie_value(&response, "oauth_state").unwrap();

    assert!(location.starts_with(&format!("{}/authorize?", server.uri())));
    assert!(location.contains("response_type=code"));
    assert!(location.contains("client_id=yandex-client"));
    assert!(location.contains(&format!("state={}", nonce)));

    let cookie = set_cookie(&response, "oauth_state").unwrap();
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("SameSite=Lax"));
    assert!(cookie.contains("Max-Age=300"));
}

#[tokio::test]
async fn test_yandex_login_creates_user() {
    let server = MockServer::start().await;
    mount_token(&server, "good-code", json!({ "access_token": "ya-token", "token_type": "bearer" })).await;
    mount_yandex_profile(
        &server,
        json!({
            "id": "1001",
            "display_name": "Иван",
            "default_email": "Ivan@Yandex.ru",
            "default_avatar_id": "31804/abc",
            "is_avatar_empty": false
        }),
    )
    .await;
    let state = state_with(ProviderKind::Yandex, &server);

    let nonce = start(&state, "yandex").await;
    let response = callback(&state, "yandex", &format!("code=good-code&state={}", nonce), Some(&nonce)).await;

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    let location = response.headers()["location"].to_str().unwrap();
    assert_eq!(location, FRONTEND_URL);
    assert!(!location.contains("token"));

    assert!(cookie_value(&response, "access_token").is_some());
    assert!(set_cookie(&response, "refresh_token").unwrap().contains("SameSite=Strict"));
    assert!(set_cookie(&response, "oauth_state").unwrap().contains("Max-Age=0"));

    let user = yandex_user(&state, "1001").await.unwrap();
    assert_eq!(user.display_name, "Иван");
    assert_eq!(user.email.as_deref(), Some("ivan@yandex.ru"));
    assert!(user.password_hash.is_none());
    assert_eq!(
        user.avatar_url.as_deref(),
        Some("https://avatars.yandex.net/get-yapic/31804/abc/islands-200")
    );
}

#[tokio::test]
async fn test_state_mismatch_rejected_with_valid_code() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": "ya-token" })))
        .expect(0)
        .mount(&server)
        .await;
    let state = state_with(ProviderKind::Yandex, &server);

    let nonce = start(&state, "yandex").await;

    let forged = callback(&state, "yandex", &format!("code=good-code&state={}", nonce), Some("forged")).await;
    assert_eq!(forged.status(), StatusCode::BAD_REQUEST);

    let no_cookie = callback(&state, "yandex", &format!("code=good-code&state={}", nonce), None).await;
    assert_eq!(no_cookie.status(), StatusCode::BAD_REQUEST);

    let unknown = callback(&state, "yandex", "code=good-code&state=unknown", Some("unknown")).await;
    assert_eq!(unknown.status(), StatusCode::BAD_REQUEST);

    assert!(state.storage.user_storage().list_users().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_callback_replay_rejected() {
    let server = MockServer::start().await;
    mount_token(&server, "good-code", json!({ "access_token": "ya-token" })).await;
    mount_yandex_profile(&server, json!({ "id": "1001", "display_name": "Иван" })).await;
    let state = state_with(ProviderKind::Yandex, &server);

    let nonce = start(&state, "yandex").await;
    let query = format!("code=good-code&state={}", nonce);

    let first = callback(&state, "yandex", &query, Some(&nonce)).await;
    assert_eq!(first.status(), StatusCode::TEMPORARY_REDIRECT);

    let replay = callback(&state, "yandex", &query, Some(&nonce)).await;
    assert_eq!(replay.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callbacks_have_single_winner() {
    let server = MockServer::start().await;
    mount_token(&server, "good-code", json!({ "access_token": "ya-token" })).await;
    mount_yandex_profile(&server, json!({ "id": "1001", "display_name": "Иван" })).await;
    let state = state_with(ProviderKind::Yandex, &server);

    let nonce = start(&state, "yandex").await;

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let oauth = state.oauth.clone();
            let nonce = nonce.clone();
            tokio::spawn(async move {
                let params = CallbackParams {
                    code: Some("good-code".to_string()),
                    state: Some(nonce.clone()),
                };
                oauth.complete(ProviderKind::Yandex, params, Some(&nonce)).await
            })
        })
        .collect();

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(PortalError::OAuth(OAuthError::StateMismatch)) => {}
            Err(other) => panic!("unexpected callback error: {}", other),
        }
    }

    assert_eq!(winners, 1);
    assert_eq!(state.storage.user_storage().list_users().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_oauth_login_reaches_me_with_bearer_transport() {
    let server = MockServer::start().await;
    mount_token(&server, "good-code", json!({ "access_token": "ya-token" })).await;
    mount_yandex_profile(&server, json!({ "id": "1001", "display_name": "Иван" })).await;
    let state = state_with(ProviderKind::Yandex, &server);

    let nonce = start(&state, "yandex").await;
    let landed = callback(&state, "yandex", &format!("code=good-code&state={}", nonce), Some(&nonce)).await;
    assert_eq!(landed.status(), StatusCode::TEMPORARY_REDIRECT);

    // the frontend trades the refresh cookie for a bearer token
    let cookie = browser_cookie(&landed, "refresh_token", "/api/refresh").unwrap();
    let refreshed = warp::test::request()
        .method("POST")
        .path("/api/refresh")
        .header("cookie", cookie)
        .reply(&routes(state.clone()))
        .await;
    assert_eq!(refreshed.status(), StatusCode::OK);
    let token = body_json(&refreshed)["access_token"].as_str().unwrap().to_string();

    let me = warp::test::request()
        .path("/api/me")
        .header("authorization", format!("Bearer {}", token))
        .reply(&routes(state.clone()))
        .await;
    assert_eq!(me.status(), StatusCode::OK);
    assert_eq!(body_json(&me)["display_name"], "Иван");
}

#[tokio::test]
async fn test_missing_code() {
    let server = MockServer::start().await;
    let state = state_with(ProviderKind::Yandex, &server);

    let nonce = start(&state, "yandex").await;
    let response = callback(&state, "yandex", &format!("state={}", nonce), Some(&nonce)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_and_unconfigured_providers() {
    let server = MockServer::start().await;
    let state = state_with(ProviderKind::Yandex, &server);

    for path in ["/api/auth/google", "/api/auth/vk", "/api/auth/vk/callback?code=x&state=y"] {
        let response = warp::test::request().path(path).reply(&routes(state.clone())).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", path);
    }
}

#[tokio::test]
async fn test_exchange_failure_is_bad_gateway() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let state = state_with(ProviderKind::Yandex, &server);

    let nonce = start(&state, "yandex").await;
    let response = callback(&state, "yandex", &format!("code=bad&state={}", nonce), Some(&nonce)).await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert!(set_cookie(&response, "refresh_token").is_none());
    assert!(state.storage.user_storage().list_users().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_vk_login_uses_token_email() {
    let server = MockServer::start().await;
    mount_token(
        &server,
        "vk-code",
        json!({ "access_token": "vk-token", "user_id": 42, "email": "Petr@Mail.ru" }),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/profile"))
        .and(query_param("access_token", "vk-token"))
        .and(query_param("v", "5.199"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": [{
                "id": 42,
                "first_name": "Пётр",
                "last_name": "Сидоров",
                "photo_200": "https://sun.userapi.com/photo.jpg"
            }]
        })))
        .mount(&server)
        .await;
    let state = state_with(ProviderKind::Vk, &server);

    let nonce = start(&state, "vk").await;
    let response = callback(&state, "vk", &format!("code=vk-code&state={}", nonce), Some(&nonce)).await;
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);

    let user = state
        .storage
        .user_storage()
        .find_user_by_provider_id(ProviderKind::Vk, "42")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.display_name, "Пётр Сидоров");
    assert_eq!(user.email.as_deref(), Some("petr@mail.ru"));
    assert!(user.yandex_id.is_none());
}

#[tokio::test]
async fn test_vk_api_error_is_bad_gateway() {
    let server = MockServer::start().await;
    mount_token(&server, "vk-code", json!({ "access_token": "vk-token" })).await;
    Mock::given(method("GET"))
        .and(path("/profile"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": { "error_code": 5, "error_msg": "User authorization failed" }
        })))
        .mount(&server)
        .await;
    let state = state_with(ProviderKind::Vk, &server);

    let nonce = start(&state, "vk").await;
    let response = callback(&state, "vk", &format!("code=vk-code&state={}", nonce), Some(&nonce)).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_returning_user_profile_updated() {
    let server = MockServer::start().await;
    mount_token(&server, "good-code", json!({ "access_token": "ya-token" })).await;
    Mock::given(method("GET"))
        .and(path("/profile"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "1001", "display_name": "Иван" })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_yandex_profile(&server, json!({ "id": "1001", "display_name": "Иван Петров" })).await;
    let state = state_with(ProviderKind::Yandex, &server);

    for _ in 0..2 {
        let nonce = start(&state, "yandex").await;
        let response = callback(&state, "yandex", &format!("code=good-code&state={}", nonce), Some(&nonce)).await;
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    }

    let users = state.storage.user_storage().list_users().await.unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].display_name, "Иван Петров");
}

#[tokio::test]
async fn test_taken_email_not_attached() {
    let server = MockServer::start().await;
    mount_token(&server, "good-code", json!({ "access_token": "ya-token" })).await;
    mount_yandex_profile(&server, json!({ "id": "1001", "default_email": "ivan@yandex.ru" })).await;
    let state = state_with(ProviderKind::Yandex, &server);

    let local = User::local("ivan".to_string(), "ivan@yandex.ru".to_string(), "hash".to_string());
    state.storage.user_storage().create_user(&local).await.unwrap();

    let nonce = start(&state, "yandex").await;
    let response = callback(&state, "yandex", &format!("code=good-code&state={}", nonce), Some(&nonce)).await;
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);

    let user = yandex_user(&state, "1001").await.unwrap();
    assert_ne!(user.id, local.id);
    assert!(user.email.is_none());
    assert_eq!(user.display_name, "Пользователь");
}
