//! Snapshot reconciliation: the session state machine.
//!
//! One call to [`reconcile_server`] processes one upstream's successful
//! snapshot against its persisted non-stopped sessions. Callers wrap the
//! whole poll cycle in a single transaction so all mutations of a cycle
//! commit atomically. Absence-based stops only ever happen here, on a
//! successful snapshot; a failed fetch never reaches this code.

use rusqlite::Connection;

use opsdec_core::{HistoryId, PlaybackState, Result, SessionId, UpstreamSession};
use opsdec_db::models::{HistoryRecord, Server, Session};
use opsdec_db::queries::{history, media_users, sessions, settings};

/// Counters for one server's reconciliation, used for cycle logging.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub started: usize,
    pub updated: usize,
    pub stopped: usize,
    pub recorded: usize,
}

/// History recording policy, loaded from settings once per cycle.
#[derive(Debug, Clone)]
pub struct HistoryPolicy {
    pub min_duration: i64,
    pub min_percent: f64,
    /// Lowercased substrings; a title containing any of them is excluded.
    pub exclusion_patterns: Vec<String>,
}

impl HistoryPolicy {
    pub fn load(conn: &Connection) -> Result<Self> {
        let patterns = settings::get_setting(conn, "history_exclusion_patterns")?
            .unwrap_or_else(|| "theme".to_string());
        Ok(Self {
            min_duration: settings::get_setting_i64(conn, "history_min_duration", 30)?,
            min_percent: settings::get_setting_f64(conn, "history_min_percent", 10.0)?,
            exclusion_patterns: patterns
                .split(',')
                .map(|p| p.trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        })
    }

    /// Decide whether a terminated session becomes a history record.
    /// Audio content skips the progress check.
    pub fn should_record(&self, s: &Session, stream_duration: i64, history_enabled: bool) -> bool {
        if !history_enabled {
            return false;
        }
        let title = s.title.to_lowercase();
        if self.exclusion_patterns.iter().any(|p| title.contains(p)) {
            return false;
        }
        if stream_duration < self.min_duration {
            return false;
        }
        if !s.media_kind.is_audio() && s.progress_percent < self.min_percent {
            return false;
        }
        true
    }
}

/// Reconcile one server's snapshot at time `now`.
pub fn reconcile_server(
    conn: &Connection,
    server: &Server,
    snapshot: &[UpstreamSession],
    now: i64,
) -> Result<ReconcileOutcome> {
    let policy = HistoryPolicy::load(conn)?;
    reconcile_server_with_policy(conn, server, snapshot, now, &policy)
}

/// Reconcile with an explicit policy (the engine loads it once per cycle).
pub fn reconcile_server_with_policy(
    conn: &Connection,
    server: &Server,
    snapshot: &[UpstreamSession],
    now: i64,
    policy: &HistoryPolicy,
) -> Result<ReconcileOutcome> {
    let mut outcome = ReconcileOutcome::default();

    let mut existing: std::collections::HashMap<String, Session> =
        sessions::load_active_for_server(conn, server.id)?
            .into_iter()
            .map(|s| (s.session_key.clone(), s))
            .collect();

    for up in snapshot {
        media_users::observe_user(conn, server.kind, &up.user_id, &up.username, None, now)?;

        match existing.remove(&up.session_key) {
            None => {
                // A session that is already stopped on first sight was
                // never tracked; there is nothing to record.
                if up.state == PlaybackState::Stopped {
                    continue;
                }
                sessions::insert_session(conn, &new_session(server, up, now))?;
                outcome.started += 1;
            }
            Some(mut prior) => {
                let stop_reported = apply_update(&mut prior, up, now);
                if stop_reported {
                    if terminate(conn, server, prior, now, policy)? {
                        outcome.recorded += 1;
                    }
                    outcome.stopped += 1;
                } else {
                    sessions::update_session(conn, &prior)?;
                    outcome.updated += 1;
                }
            }
        }
    }

    // Anything the upstream no longer reports has stopped.
    for (_, absent) in existing {
        if terminate(conn, server, absent, now, policy)? {
            outcome.recorded += 1;
        }
        outcome.stopped += 1;
    }

    Ok(outcome)
}

/// Build a row for a session observed for the first time.
fn new_session(server: &Server, up: &UpstreamSession, now: i64) -> Session {
    Session {
        id: SessionId::new(),
        server_id: server.id,
        session_key: up.session_key.clone(),
        user_id: up.user_id.clone(),
        username: up.username.clone(),
        media_kind: up.media_kind,
        media_id: up.media_id.clone(),
        title: up.title.clone(),
        grandparent_title: up.grandparent_title.clone(),
        parent_title: up.parent_title.clone(),
        season: up.season,
        episode: up.episode,
        year: up.year,
        thumb_url: up.thumb_url.clone(),
        state: up.state,
        progress_percent: up.progress_percent,
        current_time: up.current_time,
        duration: up.duration,
        started_at: now,
        updated_at: now,
        stopped_at: None,
        playback_time: 0,
        last_position_update: (up.state == PlaybackState::Playing).then_some(now),
        paused_counter: 0,
        ip_address: up.ip_address.clone(),
        geo_city: up.geo_city.clone(),
        geo_country: up.geo_country.clone(),
    }
}

/// Apply one snapshot update to a tracked session. Returns true when the
/// upstream reported the session stopped, in which case the caller runs
/// the termination path (the state field is left at its prior value so
/// the stream-duration fallback can see what the session was last doing).
fn apply_update(prior: &mut Session, up: &UpstreamSession, now: i64) -> bool {
    // Accumulate effective play time across a playing -> playing step.
    if prior.state == PlaybackState::Playing && up.state == PlaybackState::Playing {
        if let Some(lpu) = prior.last_position_update {
            prior.playback_time += now - lpu;
        }
    }

    if prior.state == PlaybackState::Playing && up.state == PlaybackState::Paused {
        prior.paused_counter += 1;
    }

    if up.state == PlaybackState::Playing && up.current_time != prior.current_time {
        prior.last_position_update = Some(now);
    }

    // A long pause deliberately leaves updated_at stale.
    if up.state != PlaybackState::Paused {
        prior.updated_at = now;
    }

    prior.progress_percent = up.progress_percent;
    prior.current_time = up.current_time;
    if up.duration > 0 {
        prior.duration = up.duration;
    }
    if up.thumb_url.is_some() {
        prior.thumb_url = up.thumb_url.clone();
    }
    if up.ip_address.is_some() {
        prior.ip_address = up.ip_address.clone();
    }

    if up.state == PlaybackState::Stopped {
        true
    } else {
        prior.state = up.state;
        false
    }
}

/// Derive the effective watched seconds for a session terminating at `t`.
///
/// Starts from accumulated playback_time; falls back to `t - last
/// position update` for sessions that stopped before the first
/// accumulation step; clamps to wall clock and media length.
pub fn compute_stream_duration(s: &Session, t: i64) -> i64 {
    let mut d = s.playback_time;

    if d < 5 {
        if let Some(lpu) = s.last_position_update {
            if s.state == PlaybackState::Playing {
                d = t - lpu;
            }
        }
    }

    d = d.min(t - s.started_at);
    if s.duration > 0 {
        d = d.min(s.duration);
    }
    d.max(0)
}

/// Terminate a session at time `t`: persist the stop, then evaluate the
/// history policy and record at most one history row per
/// (session, media) pair, bumping the user's totals in the same
/// transaction. Returns whether a record was written.
fn terminate(
    conn: &Connection,
    server: &Server,
    mut session: Session,
    t: i64,
    policy: &HistoryPolicy,
) -> Result<bool> {
    let stream_duration = compute_stream_duration(&session, t);

    session.state = PlaybackState::Stopped;
    session.stopped_at = Some(t);
    session.updated_at = t;
    sessions::update_session(conn, &session)?;

    let history_enabled = media_users::get_user(conn, server.kind, &session.user_id)?
        .map(|u| u.history_enabled)
        .unwrap_or(true);

    if !policy.should_record(&session, stream_duration, history_enabled) {
        return Ok(false);
    }

    let record = HistoryRecord {
        id: HistoryId::new(),
        session_id: session.id,
        server_kind: server.kind,
        user_id: session.user_id.clone(),
        username: session.username.clone(),
        media_kind: session.media_kind,
        media_id: session.media_id.clone(),
        title: session.title.clone(),
        grandparent_title: session.grandparent_title.clone(),
        parent_title: session.parent_title.clone(),
        season: session.season,
        episode: session.episode,
        year: session.year,
        thumb_url: session.thumb_url.clone(),
        watched_at: t,
        duration: session.duration,
        percent_complete: session.progress_percent,
        stream_duration,
        ip_address: session.ip_address.clone(),
        geo_city: session.geo_city.clone(),
        geo_country: session.geo_country.clone(),
    };

    if history::insert_history(conn, &record)? {
        media_users::increment_totals(conn, server.kind, &session.user_id, 1, stream_duration)?;
        Ok(true)
    } else {
        Ok(false)
    }
}
