//! Process-wide key/value settings.

use rusqlite::Connection;
use opsdec_core::{Error, Result};

/// Get a setting value.
pub fn get_setting(conn: &Connection, key: &str) -> Result<Option<String>> {
    let result = conn.query_row(
        "SELECT value FROM settings WHERE key = ?1",
        [key],
        |row| row.get(0),
    );
    match result {
        Ok(v) => Ok(Some(v)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Get a setting parsed as i64, falling back to `default` when the key is
/// missing or unparsable.
pub fn get_setting_i64(conn: &Connection, key: &str, default: i64) -> Result<i64> {
    Ok(get_setting(conn, key)?
        .and_then(|v| v.parse().ok())
        .unwrap_or(default))
}

/// Get a setting parsed as f64, falling back to `default`.
pub fn get_setting_f64(conn: &Connection, key: &str, default: f64) -> Result<f64> {
    Ok(get_setting(conn, key)?
        .and_then(|v| v.parse().ok())
        .unwrap_or(default))
}

/// Set (or overwrite) a setting.
pub fn set_setting(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO settings (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        rusqlite::params![key, value],
    )
    .map_err(|e| Error::database(e.to_string()))?;
    Ok(())
}

/// All settings as (key, value) pairs.
pub fn all_settings(conn: &Connection) -> Result<Vec<(String, String)>> {
    let mut stmt = conn
        .prepare("SELECT key, value FROM settings ORDER BY key")
        .map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .map_err(|e| Error::database(e.to_string()))?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| Error::database(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::init_memory_pool;

    #[test]
    fn seeded_defaults_readable() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();

        assert_eq!(get_setting_i64(&conn, "history_min_duration", 0).unwrap(), 30);
        assert_eq!(get_setting_f64(&conn, "history_min_percent", 0.0).unwrap(), 10.0);
        assert_eq!(
            get_setting(&conn, "history_exclusion_patterns").unwrap().unwrap(),
            "theme"
        );
    }

    #[test]
    fn set_overwrites() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();

        set_setting(&conn, "history_min_duration", "60").unwrap();
        assert_eq!(get_setting_i64(&conn, "history_min_duration", 0).unwrap(), 60);

        set_setting(&conn, "brand_new", "v").unwrap();
        assert_eq!(get_setting(&conn, "brand_new").unwrap().unwrap(), "v");
    }

    #[test]
    fn missing_key_uses_default() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        assert!(get_setting(&conn, "nope").unwrap().is_none());
        assert_eq!(get_setting_i64(&conn, "nope", 7).unwrap(), 7);
    }

    #[test]
    fn unparsable_uses_default() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        set_setting(&conn, "history_min_duration", "soon").unwrap();
        assert_eq!(get_setting_i64(&conn, "history_min_duration", 30).unwrap(), 30);
    }

    #[test]
    fn listing() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let all = all_settings(&conn).unwrap();
        assert!(all.iter().any(|(k, _)| k == "timezone"));
    }
}
