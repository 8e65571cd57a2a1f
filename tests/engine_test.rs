//! End-to-end session engine tests against a mocked upstream.
//!
//! These exercise the full path: adapter fetch over HTTP, reconciliation
//! in one transaction, history emission, and the hub broadcast.

mod common;

use std::time::Duration;

use common::TestHarness;
use opsdec::engine::SessionEngine;
use opsdec_core::ServerKind;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn plex_payload(sessions: serde_json::Value) -> serde_json::Value {
    serde_json::json!({ "MediaContainer": { "Metadata": sessions } })
}

fn playing_session(view_offset_ms: i64) -> serde_json::Value {
    serde_json::json!({
        "sessionKey": "s1",
        "ratingKey": "movie-9",
        "type": "movie",
        "title": "The Long Film",
        "year": 2020,
        "viewOffset": view_offset_ms,
        "duration": 7_200_000,
        "User": {"id": 42, "title": "alice"},
        "Player": {"state": "playing", "address": "10.1.1.1"}
    })
}

fn engine_for(harness: &TestHarness) -> SessionEngine {
    SessionEngine::new(
        harness.db.clone(),
        harness.ctx.hub.clone(),
        harness.ctx.cipher.clone(),
        harness.ctx.http.clone(),
        Duration::from_secs(5),
        Duration::from_secs(5),
    )
}

#[tokio::test]
async fn full_cycle_tracks_and_broadcasts() {
    let harness = TestHarness::new();
    let upstream = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/status/sessions"))
        .and(header("X-Plex-Token", "tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(plex_payload(
            serde_json::json!([playing_session(60_000)]),
        )))
        .mount(&upstream)
        .await;

    harness.create_upstream(ServerKind::Plex, "mock", &upstream.uri(), "tok");

    let engine = engine_for(&harness);
    let mut rx = harness.ctx.hub.subscribe();

    engine.run_cycle().await.unwrap();

    // The session landed in the store...
    {
        let conn = harness.conn();
        let active = opsdec_db::queries::sessions::load_active_view(&conn).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].title, "The Long Film");
        assert_eq!(active[0].username, "alice");
        assert_eq!(active[0].current_time, 60);
        assert_eq!(active[0].server_name, "mock");

        // ...and the upstream user was observed.
        let user = opsdec_db::queries::media_users::get_user(&conn, ServerKind::Plex, "42")
            .unwrap()
            .unwrap();
        assert_eq!(user.username, "alice");
    }

    // ...and a snapshot reached subscribers.
    let snapshot = rx.try_recv().unwrap();
    assert_eq!(snapshot.len(), 1);
}

#[tokio::test]
async fn adapter_failure_never_terminates() {
    let harness = TestHarness::new();
    let upstream = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/status/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(plex_payload(
            serde_json::json!([playing_session(30_000)]),
        )))
        .mount(&upstream)
        .await;

    harness.create_upstream(ServerKind::Plex, "mock", &upstream.uri(), "tok");
    let engine = engine_for(&harness);

    engine.run_cycle().await.unwrap();
    {
        let conn = harness.conn();
        assert_eq!(opsdec_db::queries::sessions::load_active(&conn).unwrap().len(), 1);
    }

    // Upstream starts erroring: absence-under-error is no information.
    upstream.reset().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&upstream)
        .await;

    engine.run_cycle().await.unwrap();
    {
        let conn = harness.conn();
        let active = opsdec_db::queries::sessions::load_active(&conn).unwrap();
        assert_eq!(active.len(), 1, "error must not stop the session");
    }

    // Upstream recovers with an empty list: now the absence is real.
    upstream.reset().await;
    Mock::given(method("GET"))
        .and(path("/status/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(plex_payload(serde_json::json!([]))))
        .mount(&upstream)
        .await;

    engine.run_cycle().await.unwrap();
    {
        let conn = harness.conn();
        assert!(opsdec_db::queries::sessions::load_active(&conn).unwrap().is_empty());
    }
}

#[tokio::test]
async fn termination_writes_history_per_policy() {
    let harness = TestHarness::new();
    // Real clocks make only seconds pass between cycles; relax the
    // minimum so the record is observable.
    harness.set_setting("history_min_duration", "0");

    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(plex_payload(
            serde_json::json!([playing_session(3_600_000)]),
        )))
        .mount(&upstream)
        .await;

    harness.create_upstream(ServerKind::Plex, "mock", &upstream.uri(), "tok");
    let engine = engine_for(&harness);

    engine.run_cycle().await.unwrap();

    upstream.reset().await;
    Mock::given(method("GET"))
        .and(path("/status/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(plex_payload(serde_json::json!([]))))
        .mount(&upstream)
        .await;

    engine.run_cycle().await.unwrap();

    let conn = harness.conn();
    let records = opsdec_db::queries::history::list_history(
        &conn,
        &opsdec_db::queries::history::HistoryFilter::default(),
        10,
        0,
    )
    .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].title, "The Long Film");
    assert_eq!(records[0].server_kind, ServerKind::Plex);

    let user = opsdec_db::queries::media_users::get_user(&conn, ServerKind::Plex, "42")
        .unwrap()
        .unwrap();
    assert_eq!(user.total_plays, 1);

    // The hub snapshot after termination is empty.
    let latest = harness.ctx.hub.latest().unwrap();
    assert!(latest.is_empty());
}

#[tokio::test]
async fn multiple_servers_polled_independently() {
    let harness = TestHarness::new();

    let plex = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(plex_payload(
            serde_json::json!([playing_session(10_000)]),
        )))
        .mount(&plex)
        .await;

    let emby = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/Sessions"))
        .and(header("X-Emby-Token", "emby-tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{
            "Id": "emby-sess",
            "UserId": "eu-1",
            "UserName": "bob",
            "NowPlayingItem": {
                "Id": "ep-1",
                "Name": "Chapter",
                "Type": "Episode",
                "SeriesName": "Show",
                "RunTimeTicks": 18_000_000_000i64
            },
            "PlayState": {"PositionTicks": 600_000_000i64, "IsPaused": true}
        }])))
        .mount(&emby)
        .await;

    harness.create_upstream(ServerKind::Plex, "plex", &plex.uri(), "tok");
    harness.create_upstream(ServerKind::Emby, "emby", &emby.uri(), "emby-tok");

    let engine = engine_for(&harness);
    engine.run_cycle().await.unwrap();

    let conn = harness.conn();
    let active = opsdec_db::queries::sessions::load_active_view(&conn).unwrap();
    assert_eq!(active.len(), 2);

    let emby_session = active.iter().find(|s| s.username == "bob").unwrap();
    assert_eq!(emby_session.state, opsdec_core::PlaybackState::Paused);
    assert_eq!(emby_session.duration, 1800);
}
