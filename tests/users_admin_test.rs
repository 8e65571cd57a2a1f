//! Admin user-management tests, including the self-protection rules.

mod common;

use common::{register_admin, TestHarness};

async fn setup() -> (String, String, reqwest::Client) {
    let (_harness, addr) = TestHarness::with_server().await;
    let base = format!("http://{addr}");
    let client = reqwest::Client::new();
    let (access, _) = register_admin(&client, &base, "admin", "password123").await;
    (base, access, client)
}

async fn own_user_id(client: &reqwest::Client, base: &str, access: &str) -> String {
    let body: serde_json::Value = client
        .get(format!("{base}/api/auth/me"))
        .bearer_auth(access)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    body["user"]["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn list_and_create_users() {
    let (base, access, client) = setup().await;

    let response = client
        .post(format!("{base}/api/auth/users"))
        .bearer_auth(&access)
        .json(&serde_json::json!({"username": "viewer", "password": "password123"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["user"]["username"], "viewer");
    assert_eq!(body["user"]["is_admin"], false);

    let body: serde_json::Value = client
        .get(format!("{base}/api/auth/users"))
        .bearer_auth(&access)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["users"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn non_admin_gets_403() {
    let (base, access, client) = setup().await;

    client
        .post(format!("{base}/api/auth/users"))
        .bearer_auth(&access)
        .json(&serde_json::json!({"username": "viewer", "password": "password123"}))
        .send()
        .await
        .unwrap();

    let login: serde_json::Value = client
        .post(format!("{base}/api/auth/login"))
        .json(&serde_json::json!({"username": "viewer", "password": "password123"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let viewer_access = login["accessToken"].as_str().unwrap();

    let response = client
        .get(format!("{base}/api/auth/users"))
        .bearer_auth(viewer_access)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);
}

#[tokio::test]
async fn update_and_delete_other_users() {
    let (base, access, client) = setup().await;

    let created: serde_json::Value = client
        .post(format!("{base}/api/auth/users"))
        .bearer_auth(&access)
        .json(&serde_json::json!({"username": "target", "password": "password123"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let target_id = created["user"]["id"].as_str().unwrap().to_string();

    // Promote and rename.
    let response = client
        .put(format!("{base}/api/auth/users/{target_id}"))
        .bearer_auth(&access)
        .json(&serde_json::json!({"username": "renamed", "is_admin": true, "email": "t@x.io"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["user"]["username"], "renamed");
    assert_eq!(body["user"]["is_admin"], true);
    assert_eq!(body["user"]["email"], "t@x.io");

    // Unknown id is a 404.
    let ghost = uuid::Uuid::new_v4();
    let response = client
        .put(format!("{base}/api/auth/users/{ghost}"))
        .bearer_auth(&access)
        .json(&serde_json::json!({"is_active": false}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    // Delete.
    let response = client
        .delete(format!("{base}/api/auth/users/{target_id}"))
        .bearer_auth(&access)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["message"].as_str().unwrap().contains("deleted"));

    let response = client
        .delete(format!("{base}/api/auth/users/{target_id}"))
        .bearer_auth(&access)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn admin_self_protection() {
    let (base, access, client) = setup().await;
    let own_id = own_user_id(&client, &base, &access).await;

    // Cannot demote self.
    let response = client
        .put(format!("{base}/api/auth/users/{own_id}"))
        .bearer_auth(&access)
        .json(&serde_json::json!({"is_admin": false}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("Cannot remove"));

    // Cannot deactivate self.
    let response = client
        .put(format!("{base}/api/auth/users/{own_id}"))
        .bearer_auth(&access)
        .json(&serde_json::json!({"is_active": false}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("Cannot deactivate"));

    // Cannot delete self.
    let response = client
        .delete(format!("{base}/api/auth/users/{own_id}"))
        .bearer_auth(&access)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("Cannot delete"));

    // Harmless self-updates still work.
    let response = client
        .put(format!("{base}/api/auth/users/{own_id}"))
        .bearer_auth(&access)
        .json(&serde_json::json!({"email": "admin@home.lan"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn duplicate_rename_collides() {
    let (base, access, client) = setup().await;

    let created: serde_json::Value = client
        .post(format!("{base}/api/auth/users"))
        .bearer_auth(&access)
        .json(&serde_json::json!({"username": "other", "password": "password123"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let other_id = created["user"]["id"].as_str().unwrap();

    let response = client
        .put(format!("{base}/api/auth/users/{other_id}"))
        .bearer_auth(&access)
        .json(&serde_json::json!({"username": "admin"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("already taken"));
}
