mod common;

use axum::http::{Method, StatusCode};
use common::TestApp;
use serde_json::json;
use unisphere_core::domain::Role;

#[tokio::test]
async fn creating_a_community_makes_the_caller_its_lead() {
    let app = TestApp::spawn().await;
    let lead = app.user("lead@uni.edu");
    let token = app.token(lead);

    let (status, created) = app
        .call(
            Method::POST,
            "/api/v1/communities",
            Some(&token),
            Some(json!({ "name": "  Compilers  ", "abbreviation": "CS4" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", created);
    assert_eq!(created["name"], "Compilers");
    assert_eq!(created["leadId"], lead);
    let id = created["id"].as_i64().unwrap();

    let (status, detail) = app
        .call(Method::GET, &format!("/api/v1/communities/{}", id), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["memberCount"], 1);
    assert_eq!(detail["participants"][0]["id"], lead);

    let (status, _) = app
        .call(
            Method::POST,
            "/api/v1/communities",
            Some(&token),
            Some(json!({ "name": "", "abbreviation": "X" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn join_and_leave_follow_membership_rules() {
    let app = TestApp::spawn().await;
    let lead = app.user("lead@uni.edu");
    let student = app.user("student@uni.edu");
    let cid = app.community(lead, "Algorithms").await;
    let token = app.token(student);

    let join = format!("/api/v1/communities/{}/join", cid);
    let leave = format!("/api/v1/communities/{}/leave", cid);

    let (status, _) = app.call(Method::POST, &join, Some(&token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(app.store.is_member_now(cid, student));

    let (status, body) = app.call(Method::POST, &join, Some(&token), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "Conflict");

    let (status, members) = app
        .call(Method::GET, &format!("/api/v1/communities/{}/members", cid), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<i64> = members
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![lead, student]);

    let (status, _) = app.call(Method::POST, &leave, Some(&token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(!app.store.is_member_now(cid, student));

    let (status, _) = app.call(Method::POST, &leave, Some(&token), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn the_lead_cannot_leave() {
    let app = TestApp::spawn().await;
    let lead = app.user("lead@uni.edu");
    let cid = app.community(lead, "Databases").await;

    let (status, _) = app
        .call(
            Method::POST,
            &format!("/api/v1/communities/{}/leave", cid),
            Some(&app.token(lead)),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(app.store.is_member_now(cid, lead));
}

#[tokio::test]
async fn unknown_communities_are_not_found() {
    let app = TestApp::spawn().await;
    let user = app.user("someone@uni.edu");
    let token = app.token(user);

    for (method, path) in [
        (Method::GET, "/api/v1/communities/999"),
        (Method::POST, "/api/v1/communities/999/join"),
        (Method::POST, "/api/v1/communities/999/leave"),
        (Method::GET, "/api/v1/communities/999/members"),
    ] {
        let (status, _) = app.call(method, path, Some(&token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{}", path);
    }

    let (status, _) = app
        .call(Method::GET, "/api/v1/communities/abc", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn my_communities_lists_memberships_with_counts() {
    let app = TestApp::spawn().await;
    let lead = app.user("lead@uni.edu");
    let student = app.user("student@uni.edu");
    let a = app.community(lead, "Networks").await;
    let b = app.community(lead, "Graphics").await;
    app.join(a, student).await;

    let (status, mine) = app
        .call(Method::GET, "/api/v1/users/me/communities", Some(&app.token(student)), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(mine.as_array().unwrap().len(), 1);
    assert_eq!(mine[0]["id"], a);
    assert_eq!(mine[0]["memberCount"], 2);

    let (_, lead_view) = app
        .call(Method::GET, "/api/v1/users/me/communities", Some(&app.token(lead)), None)
        .await;
    let counts: Vec<(i64, i64)> = lead_view
        .as_array()
        .unwrap()
        .iter()
        .map(|c| (c["id"].as_i64().unwrap(), c["memberCount"].as_i64().unwrap()))
        .collect();
    assert!(counts.contains(&(a, 2)));
    assert!(counts.contains(&(b, 1)));
}

#[tokio::test]
async fn only_the_lead_or_an_admin_deletes_a_community() {
    let app = TestApp::spawn().await;
    let lead = app.user("lead@uni.edu");
    let student = app.user("student@uni.edu");
    let admin = app.store.seed_user("admin@uni.edu", Role::Admin);
    let first = app.community(lead, "Security").await;
    let second = app.community(lead, "Robotics").await;
    app.join(first, student).await;

    let (status, _) = app
        .call(
            Method::POST,
            &format!("/api/v1/communities/{}/chat/text", first),
            Some(&app.token(student)),
            Some(json!({ "messageType": "TEXT", "content": "hello" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = app
        .call(Method::DELETE, &format!("/api/v1/communities/{}", first), Some(&app.token(student)), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .call(Method::DELETE, &format!("/api/v1/communities/{}", first), Some(&app.token(lead)), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(app.store.message_count(first), 0);
    assert!(!app.store.is_member_now(first, student));

    let (status, _) = app
        .call(Method::GET, &format!("/api/v1/communities/{}", first), Some(&app.token(lead)), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .call(Method::DELETE, &format!("/api/v1/communities/{}", second), Some(&app.token(admin)), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}
