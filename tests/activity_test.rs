//! Activity, history, user, and dashboard endpoint tests.

mod common;

use common::{get_with_token, register_admin, TestHarness};
use opsdec_core::{HistoryId, MediaKind, ServerKind, SessionId};
use opsdec_db::models::HistoryRecord;
use opsdec_db::queries::{history, media_users, sessions};

async fn setup() -> (TestHarness, String, String, reqwest::Client) {
    let (harness, addr) = TestHarness::with_server().await;
    let base = format!("http://{addr}");
    let client = reqwest::Client::new();
    let (access, _) = register_admin(&client, &base, "admin", "password123").await;
    (harness, base, access, client)
}

/// Insert a stopped session plus a history record directly.
fn seed_history(harness: &TestHarness, media_id: &str, user_id: &str, watched_at: i64) -> HistoryId {
    let conn = harness.conn();
    let server = harness.create_upstream(
        ServerKind::Plex,
        &format!("srv-{media_id}-{watched_at}"),
        "http://plex.lan:32400",
        "tok",
    );

    let session = opsdec_db::models::Session {
        id: SessionId::new(),
        server_id: server.id,
        session_key: format!("key-{media_id}-{watched_at}"),
        user_id: user_id.into(),
        username: "alice".into(),
        media_kind: MediaKind::Movie,
        media_id: media_id.into(),
        title: "Seeded Film".into(),
        grandparent_title: None,
        parent_title: None,
        season: None,
        episode: None,
        year: Some(2021),
        thumb_url: None,
        state: opsdec_core::PlaybackState::Stopped,
        progress_percent: 80.0,
        current_time: 4000,
        duration: 5000,
        started_at: watched_at - 4000,
        updated_at: watched_at,
        stopped_at: Some(watched_at),
        playback_time: 3600,
        last_position_update: Some(watched_at),
        paused_counter: 1,
        ip_address: None,
        geo_city: None,
        geo_country: None,
    };
    sessions::insert_session(&conn, &session).unwrap();

    media_users::observe_user(&conn, ServerKind::Plex, user_id, "alice", None, watched_at)
        .unwrap();

    let record = HistoryRecord {
        id: HistoryId::new(),
        session_id: session.id,
        server_kind: ServerKind::Plex,
        user_id: user_id.into(),
        username: "alice".into(),
        media_kind: MediaKind::Movie,
        media_id: media_id.into(),
        title: "Seeded Film".into(),
        grandparent_title: None,
        parent_title: None,
        season: None,
        episode: None,
        year: Some(2021),
        thumb_url: None,
        watched_at,
        duration: 5000,
        percent_complete: 80.0,
        stream_duration: 3600,
        ip_address: None,
        geo_city: None,
        geo_country: None,
    };
    assert!(history::insert_history(&conn, &record).unwrap());
    media_users::increment_totals(&conn, ServerKind::Plex, user_id, 1, 3600).unwrap();
    record.id
}

#[tokio::test]
async fn activity_empty_then_populated() {
    let (harness, base, access, client) = setup().await;

    let body: serde_json::Value = get_with_token(&client, &format!("{base}/api/activity"), &access)
        .await
        .json()
        .await
        .unwrap();
    assert!(body["sessions"].as_array().unwrap().is_empty());

    // A live session appears in the view.
    let server = harness.create_upstream(ServerKind::Emby, "e", "http://emby.lan", "t");
    {
        let conn = harness.conn();
        let session = opsdec_db::models::Session {
            id: SessionId::new(),
            server_id: server.id,
            session_key: "live".into(),
            user_id: "u".into(),
            username: "bob".into(),
            media_kind: MediaKind::Episode,
            media_id: "ep".into(),
            title: "Now Playing".into(),
            grandparent_title: Some("Show".into()),
            parent_title: None,
            season: Some(1),
            episode: Some(2),
            year: None,
            thumb_url: None,
            state: opsdec_core::PlaybackState::Playing,
            progress_percent: 10.0,
            current_time: 60,
            duration: 600,
            started_at: 100,
            updated_at: 160,
            stopped_at: None,
            playback_time: 60,
            last_position_update: Some(160),
            paused_counter: 0,
            ip_address: None,
            geo_city: None,
            geo_country: None,
        };
        sessions::insert_session(&conn, &session).unwrap();
    }

    let body: serde_json::Value = get_with_token(&client, &format!("{base}/api/activity"), &access)
        .await
        .json()
        .await
        .unwrap();
    let list = body["sessions"].as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["title"], "Now Playing");
    assert_eq!(list[0]["server_name"], "e");
}

#[tokio::test]
async fn history_paging_and_delete() {
    let (harness, base, access, client) = setup().await;

    for i in 0..5 {
        seed_history(&harness, &format!("m{i}"), "u1", 1000 + i);
    }

    let body: serde_json::Value = get_with_token(
        &client,
        &format!("{base}/api/history?limit=2&offset=0"),
        &access,
    )
    .await
    .json()
    .await
    .unwrap();
    assert_eq!(body["total"], 5);
    assert_eq!(body["items"].as_array().unwrap().len(), 2);
    // newest first
    assert_eq!(body["items"][0]["watched_at"], 1004);

    let first_id = body["items"][0]["id"].as_str().unwrap().to_string();

    // Delete one record.
    let response = client
        .delete(format!("{base}/api/history/{first_id}"))
        .bearer_auth(&access)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let response = client
        .delete(format!("{base}/api/history/{first_id}"))
        .bearer_auth(&access)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    // Filter by user.
    seed_history(&harness, "other", "u2", 2000);
    let body: serde_json::Value = get_with_token(
        &client,
        &format!("{base}/api/history?user_id=u2"),
        &access,
    )
    .await
    .json()
    .await
    .unwrap();
    assert_eq!(body["total"], 1);
    assert_eq!(body["items"][0]["user_id"], "u2");
}

#[tokio::test]
async fn user_listing_stats_and_toggle() {
    let (harness, base, access, client) = setup().await;

    seed_history(&harness, "m1", "u1", 1000);
    seed_history(&harness, "m2", "u1", 2000);

    let body: serde_json::Value = get_with_token(&client, &format!("{base}/api/users"), &access)
        .await
        .json()
        .await
        .unwrap();
    let users = body["users"].as_array().unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0]["total_plays"], 2);
    assert_eq!(users[0]["history_enabled"], true);

    let body: serde_json::Value =
        get_with_token(&client, &format!("{base}/api/users/u1/stats"), &access)
            .await
            .json()
            .await
            .unwrap();
    assert_eq!(body["total_plays"], 2);
    assert_eq!(body["total_duration"], 7200);
    assert_eq!(body["distinct_media"], 2);
    assert_eq!(body["last_watched_at"], 2000);

    // Toggle history recording off.
    let response = client
        .put(format!("{base}/api/users/u1"))
        .bearer_auth(&access)
        .json(&serde_json::json!({"server_kind": "plex", "history_enabled": false}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["user"]["history_enabled"], false);
}

#[tokio::test]
async fn dashboard_rollups() {
    let (harness, base, access, client) = setup().await;

    seed_history(&harness, "m1", "u1", chrono::Utc::now().timestamp() - 60);
    seed_history(&harness, "m2", "u1", 1000);

    let body: serde_json::Value =
        get_with_token(&client, &format!("{base}/api/stats/dashboard"), &access)
            .await
            .json()
            .await
            .unwrap();

    assert_eq!(body["total_plays"], 2);
    assert_eq!(body["total_duration"], 7200);
    assert_eq!(body["plays_last_24h"], 1);
    assert_eq!(body["top_users"][0]["label"], "alice");
    assert_eq!(body["top_users"][0]["plays"], 2);
}

#[tokio::test]
async fn monitoring_restart_is_admin_only() {
    let (_harness, base, access, client) = setup().await;

    let response = client
        .post(format!("{base}/api/monitoring/restart"))
        .bearer_auth(&access)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    // A non-admin is rejected by the admin gate.
    let created = client
        .post(format!("{base}/api/auth/users"))
        .bearer_auth(&access)
        .json(&serde_json::json!({"username": "viewer", "password": "password123"}))
        .send()
        .await
        .unwrap();
    assert_eq!(created.status(), 201);

    let login: serde_json::Value = client
        .post(format!("{base}/api/auth/login"))
        .json(&serde_json::json!({"username": "viewer", "password": "password123"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let response = client
        .post(format!("{base}/api/monitoring/restart"))
        .bearer_auth(login["accessToken"].as_str().unwrap())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);
}
