mod common;

use axum::http::{Method, StatusCode};
use chrono::{Duration, Utc};
use common::TestApp;
use serde_json::json;
use unisphere_api::{error::ApiError, identity::TokenError};
use unisphere_core::domain::RefreshToken;
use unisphere_core::ports::RefreshTokenRepository;

const PASSWORD: &str = "Sunflower42";

async fn register_and_login(app: &TestApp, email: &str) -> serde_json::Value {
    let (status, user) = app
        .call(
            Method::POST,
            "/api/v1/auth/register",
            None,
            Some(json!({ "email": email, "password": PASSWORD })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", user);
    assert_eq!(user["role"], "STUDENT");
    assert_eq!(user["verified"], false);

    let (status, tokens) = app
        .call(
            Method::POST,
            "/api/v1/auth/login",
            None,
            Some(json!({ "email": email, "password": PASSWORD })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", tokens);
    tokens
}

#[tokio::test]
async fn login_issues_a_usable_bearer_pair() {
    let app = TestApp::spawn().await;
    let tokens = register_and_login(&app, "ada@uni.edu").await;

    assert_eq!(tokens["tokenType"], "Bearer");
    assert_eq!(tokens["expiresIn"], 3600);
    let access = tokens["accessToken"].as_str().unwrap();

    let (status, list) = app
        .call(Method::GET, "/api/v1/users/me/communities", Some(access), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list, json!([]));
}

#[tokio::test]
async fn refresh_tokens_are_single_use() {
    let app = TestApp::spawn().await;
    let tokens = register_and_login(&app, "grace@uni.edu").await;
    let refresh = tokens["refreshToken"].as_str().unwrap().to_string();

    let (status, rotated) = app
        .call(
            Method::POST,
            "/api/v1/auth/refresh",
            None,
            Some(json!({ "refreshToken": refresh })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(rotated["refreshToken"], tokens["refreshToken"]);

    let (status, body) = app
        .call(
            Method::POST,
            "/api/v1/auth/refresh",
            None,
            Some(json!({ "refreshToken": refresh })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "Unauthorized");
}

#[tokio::test]
async fn expiry_is_reported_before_revocation() {
    let app = TestApp::spawn().await;
    let user = app.user("dennis@uni.edu");
    let issued = Utc::now() - Duration::days(40);
    app.store
        .insert_refresh_token(RefreshToken {
            token: "stale-and-revoked".to_string(),
            user_id: user,
            expires_at: issued + Duration::days(30),
            revoked: true,
            created_at: issued,
        })
        .await
        .unwrap();

    let err = app.state.identity.refresh("stale-and-revoked").await.unwrap_err();
    assert!(matches!(err, ApiError::Token(TokenError::TokenExpired)), "{:?}", err);

    let (status, _) = app
        .call(
            Method::POST,
            "/api/v1/auth/refresh",
            None,
            Some(json!({ "refreshToken": "stale-and-revoked" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_is_idempotent_but_unknown_tokens_are_rejected() {
    let app = TestApp::spawn().await;
    let tokens = register_and_login(&app, "linus@uni.edu").await;
    let refresh = json!({ "refreshToken": tokens["refreshToken"] });

    for _ in 0..2 {
        let (status, _) = app
            .call(Method::POST, "/api/v1/auth/logout", None, Some(refresh.clone()))
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    let (status, _) = app
        .call(Method::POST, "/api/v1/auth/refresh", None, Some(refresh))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .call(
            Method::POST,
            "/api/v1/auth/logout",
            None,
            Some(json!({ "refreshToken": "never-issued" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn bad_credentials_and_registrations_are_refused() {
    let app = TestApp::spawn().await;
    register_and_login(&app, "barbara@uni.edu").await;

    let (status, _) = app
        .call(
            Method::POST,
            "/api/v1/auth/login",
            None,
            Some(json!({ "email": "barbara@uni.edu", "password": "Wrong1234" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .call(
            Method::POST,
            "/api/v1/auth/register",
            None,
            Some(json!({ "email": "BARBARA@uni.edu", "password": PASSWORD })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .call(
            Method::POST,
            "/api/v1/auth/register",
            None,
            Some(json!({ "email": "root@uni.edu", "password": PASSWORD, "role": "ADMIN" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .call(
            Method::POST,
            "/api/v1/auth/register",
            None,
            Some(json!({ "email": "weak@uni.edu", "password": "password" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn protected_routes_need_a_valid_bearer() {
    let app = TestApp::spawn().await;

    let (status, body) = app
        .call(Method::GET, "/api/v1/users/me/communities", None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "Unauthorized");

    let (status, _) = app
        .call(Method::GET, "/api/v1/users/me/communities", Some("not.a.jwt"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app.call(Method::GET, "/api/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}
