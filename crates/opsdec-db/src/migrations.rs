//! Embedded SQL migrations and runner.
//!
//! Migrations are stored as `&str` constants and executed in order.  A
//! `schema_migrations` table tracks which versions have been applied.
//!
//! Timestamp conventions: session/history timing columns are INTEGER epoch
//! seconds because the engine does arithmetic on them; audit columns
//! (`created_at`, `last_login`, token expiry) are RFC 3339 TEXT.

use rusqlite::Connection;
use opsdec_core::{Error, Result};

/// V1: initial schema -- upstream servers, sessions, history, users.
const V1_INITIAL: &str = r#"
-- Upstream media servers
CREATE TABLE servers (
    id         TEXT PRIMARY KEY,
    kind       TEXT NOT NULL,
    name       TEXT NOT NULL,
    url        TEXT NOT NULL,
    credential TEXT NOT NULL,
    enabled    INTEGER NOT NULL DEFAULT 1,
    origin     TEXT NOT NULL DEFAULT 'user',
    created_at TEXT NOT NULL
);
CREATE UNIQUE INDEX idx_servers_name_kind ON servers(name, kind);

-- Tracked playback sessions. Identity is (server_id, session_key); the
-- partial index lets upstreams reuse a session_key after a stop.
CREATE TABLE sessions (
    id                   TEXT PRIMARY KEY,
    server_id            TEXT NOT NULL REFERENCES servers(id) ON DELETE CASCADE,
    session_key          TEXT NOT NULL,
    user_id              TEXT NOT NULL,
    username             TEXT NOT NULL,
    media_kind           TEXT NOT NULL,
    media_id             TEXT NOT NULL,
    title                TEXT NOT NULL,
    grandparent_title    TEXT,
    parent_title         TEXT,
    season               INTEGER,
    episode              INTEGER,
    year                 INTEGER,
    thumb_url            TEXT,
    state                TEXT NOT NULL,
    progress_percent     REAL NOT NULL DEFAULT 0,
    current_position     INTEGER NOT NULL DEFAULT 0,
    duration             INTEGER NOT NULL DEFAULT 0,
    started_at           INTEGER NOT NULL,
    updated_at           INTEGER NOT NULL,
    stopped_at           INTEGER,
    playback_time        INTEGER NOT NULL DEFAULT 0,
    last_position_update INTEGER,
    paused_counter       INTEGER NOT NULL DEFAULT 0,
    ip_address           TEXT,
    geo_city             TEXT,
    geo_country          TEXT
);
CREATE UNIQUE INDEX idx_sessions_active_key
    ON sessions(server_id, session_key) WHERE state != 'stopped';
CREATE INDEX idx_sessions_state ON sessions(state);

-- Immutable post-mortems of completed sessions
CREATE TABLE history (
    id                TEXT PRIMARY KEY,
    session_id        TEXT NOT NULL REFERENCES sessions(id),
    server_kind       TEXT NOT NULL,
    user_id           TEXT NOT NULL,
    username          TEXT NOT NULL,
    media_kind        TEXT NOT NULL,
    media_id          TEXT NOT NULL,
    title             TEXT NOT NULL,
    grandparent_title TEXT,
    parent_title      TEXT,
    season            INTEGER,
    episode           INTEGER,
    year              INTEGER,
    thumb_url         TEXT,
    watched_at        INTEGER NOT NULL,
    duration          INTEGER NOT NULL,
    percent_complete  REAL NOT NULL,
    stream_duration   INTEGER NOT NULL,
    ip_address        TEXT,
    geo_city          TEXT,
    geo_country       TEXT
);
CREATE UNIQUE INDEX idx_history_session_media ON history(session_id, media_id);
CREATE INDEX idx_history_user ON history(user_id);
CREATE INDEX idx_history_watched ON history(watched_at);

-- Upstream users, as seen across servers
CREATE TABLE media_users (
    id              TEXT NOT NULL,
    server_kind     TEXT NOT NULL,
    username        TEXT NOT NULL,
    thumb_url       TEXT,
    last_seen       INTEGER NOT NULL,
    history_enabled INTEGER NOT NULL DEFAULT 1,
    total_plays     INTEGER NOT NULL DEFAULT 0,
    total_duration  INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (id, server_kind)
);
"#;

/// V2: operator accounts and server-tracked refresh tokens.
const V2_AUTH: &str = r#"
CREATE TABLE auth_users (
    id            TEXT PRIMARY KEY,
    username      TEXT UNIQUE NOT NULL,
    password_hash TEXT NOT NULL,
    is_admin      INTEGER NOT NULL DEFAULT 0,
    is_active     INTEGER NOT NULL DEFAULT 1,
    email         TEXT,
    created_at    TEXT NOT NULL,
    last_login    TEXT
);

CREATE TABLE refresh_tokens (
    id         TEXT PRIMARY KEY,
    user_id    TEXT NOT NULL REFERENCES auth_users(id) ON DELETE CASCADE,
    expires_at TEXT NOT NULL,
    revoked    INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);
CREATE INDEX idx_refresh_tokens_user ON refresh_tokens(user_id);
"#;

/// V3: image cache index and process-wide settings.
const V3_IMAGE_CACHE_SETTINGS: &str = r#"
CREATE TABLE image_cache (
    url_hash         TEXT PRIMARY KEY,
    original_url     TEXT NOT NULL,
    file_path        TEXT NOT NULL,
    content_type     TEXT NOT NULL,
    file_size        INTEGER NOT NULL,
    created_at       INTEGER NOT NULL,
    last_accessed_at INTEGER NOT NULL
);
CREATE INDEX idx_image_cache_accessed ON image_cache(last_accessed_at);

CREATE TABLE settings (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// V4: seed default settings so GET /settings is meaningful on a fresh
/// install. Operators edit these through the API.
const V4_DEFAULT_SETTINGS: &str = r#"
INSERT OR IGNORE INTO settings (key, value) VALUES
    ('history_min_duration', '30'),
    ('history_min_percent', '10'),
    ('history_exclusion_patterns', 'theme'),
    ('timezone', 'UTC'),
    ('image_proxy_allowed_hosts', 'plex.tv,gravatar.com'),
    ('image_cache_max_age_secs', '2592000'),
    ('image_cache_max_size_bytes', '524288000');
"#;

/// Ordered list of (version, sql) pairs.
const MIGRATIONS: &[(i64, &str)] = &[
    (1, V1_INITIAL),
    (2, V2_AUTH),
    (3, V3_IMAGE_CACHE_SETTINGS),
    (4, V4_DEFAULT_SETTINGS),
];

/// Run all pending migrations on `conn`.
///
/// Creates the `schema_migrations` tracking table if it does not exist,
/// then applies each outstanding migration inside a transaction.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )
    .map_err(|e| Error::database(format!("Failed to create schema_migrations: {e}")))?;

    for &(version, sql) in MIGRATIONS {
        let already: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM schema_migrations WHERE version = ?1",
                [version],
                |row| row.get(0),
            )
            .map_err(|e| Error::database(e.to_string()))?;

        if already {
            continue;
        }

        let tx = conn
            .unchecked_transaction()
            .map_err(|e| Error::database(e.to_string()))?;

        tx.execute_batch(sql)
            .map_err(|e| Error::database(format!("Migration V{version} failed: {e}")))?;

        tx.execute(
            "INSERT INTO schema_migrations (version) VALUES (?1)",
            [version],
        )
        .map_err(|e| Error::database(e.to_string()))?;

        tx.commit().map_err(|e| Error::database(e.to_string()))?;
    }

    Ok(())
}
