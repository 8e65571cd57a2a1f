//! Image cache index operations.
//!
//! Rows are keyed by the SHA-256 of the source URL. Filesystem effects
//! live in the `ImageCache` service; these functions only maintain the
//! index.

use rusqlite::Connection;
use opsdec_core::{Error, Result};

use crate::models::ImageCacheEntry;

const COLS: &str =
    "url_hash, original_url, file_path, content_type, file_size, created_at, last_accessed_at";

/// Insert or replace a cache entry. Overwrite-in-place is the expected
/// behavior for a re-fetched URL.
pub fn upsert_entry(conn: &Connection, e: &ImageCacheEntry) -> Result<()> {
    conn.execute(
        "INSERT INTO image_cache
            (url_hash, original_url, file_path, content_type, file_size, created_at, last_accessed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(url_hash) DO UPDATE SET
            original_url = excluded.original_url,
            file_path = excluded.file_path,
            content_type = excluded.content_type,
            file_size = excluded.file_size,
            last_accessed_at = excluded.last_accessed_at",
        rusqlite::params![
            e.url_hash,
            e.original_url,
            e.file_path,
            e.content_type,
            e.file_size,
            e.created_at,
            e.last_accessed_at,
        ],
    )
    .map_err(|err| Error::database(err.to_string()))?;
    Ok(())
}

/// Look up an entry by URL hash.
pub fn get_entry(conn: &Connection, url_hash: &str) -> Result<Option<ImageCacheEntry>> {
    let q = format!("SELECT {COLS} FROM image_cache WHERE url_hash = ?1");
    let result = conn.query_row(&q, [url_hash], ImageCacheEntry::from_row);
    match result {
        Ok(e) => Ok(Some(e)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Bump an entry's last access time.
pub fn touch_entry(conn: &Connection, url_hash: &str, now: i64) -> Result<()> {
    conn.execute(
        "UPDATE image_cache SET last_accessed_at = ?2 WHERE url_hash = ?1",
        rusqlite::params![url_hash, now],
    )
    .map_err(|e| Error::database(e.to_string()))?;
    Ok(())
}

/// Delete an entry. Returns true if a row was deleted.
pub fn delete_entry(conn: &Connection, url_hash: &str) -> Result<bool> {
    let n = conn
        .execute("DELETE FROM image_cache WHERE url_hash = ?1", [url_hash])
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Entries not accessed since `cutoff` (for the age sweep).
pub fn entries_older_than(conn: &Connection, cutoff: i64) -> Result<Vec<ImageCacheEntry>> {
    let q = format!("SELECT {COLS} FROM image_cache WHERE last_accessed_at < ?1");
    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map([cutoff], ImageCacheEntry::from_row)
        .map_err(|e| Error::database(e.to_string()))?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| Error::database(e.to_string()))
}

/// All entries in ascending last-access order (LRU first).
pub fn entries_by_lru(conn: &Connection) -> Result<Vec<ImageCacheEntry>> {
    let q = format!("SELECT {COLS} FROM image_cache ORDER BY last_accessed_at ASC");
    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map([], ImageCacheEntry::from_row)
        .map_err(|e| Error::database(e.to_string()))?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| Error::database(e.to_string()))
}

/// (entry count, total bytes) for stats and the size sweep.
pub fn cache_totals(conn: &Connection) -> Result<(i64, i64)> {
    conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(file_size), 0) FROM image_cache",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .map_err(|e| Error::database(e.to_string()))
}

/// Remove every entry, returning the rows that were indexed so the caller
/// can delete the backing files.
pub fn clear_entries(conn: &Connection) -> Result<Vec<ImageCacheEntry>> {
    let all = entries_by_lru(conn)?;
    conn.execute("DELETE FROM image_cache", [])
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(all)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::init_memory_pool;

    fn entry(hash: &str, size: i64, accessed: i64) -> ImageCacheEntry {
        ImageCacheEntry {
            url_hash: hash.to_string(),
            original_url: format!("http://img/{hash}"),
            file_path: format!("{hash}.jpg"),
            content_type: "image/jpeg".into(),
            file_size: size,
            created_at: accessed,
            last_accessed_at: accessed,
        }
    }

    #[test]
    fn upsert_get_touch() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();

        upsert_entry(&conn, &entry("aaa", 100, 10)).unwrap();
        let e = get_entry(&conn, "aaa").unwrap().unwrap();
        assert_eq!(e.file_size, 100);

        touch_entry(&conn, "aaa", 99).unwrap();
        assert_eq!(get_entry(&conn, "aaa").unwrap().unwrap().last_accessed_at, 99);
    }

    #[test]
    fn upsert_overwrites() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();

        upsert_entry(&conn, &entry("bbb", 100, 10)).unwrap();
        let mut e2 = entry("bbb", 250, 20);
        e2.content_type = "image/png".into();
        upsert_entry(&conn, &e2).unwrap();

        let e = get_entry(&conn, "bbb").unwrap().unwrap();
        assert_eq!(e.file_size, 250);
        assert_eq!(e.content_type, "image/png");
        assert_eq!(cache_totals(&conn).unwrap(), (1, 250));
    }

    #[test]
    fn lru_order_and_age_filter() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();

        upsert_entry(&conn, &entry("new", 1, 100)).unwrap();
        upsert_entry(&conn, &entry("old", 1, 10)).unwrap();
        upsert_entry(&conn, &entry("mid", 1, 50)).unwrap();

        let lru = entries_by_lru(&conn).unwrap();
        let hashes: Vec<_> = lru.iter().map(|e| e.url_hash.as_str()).collect();
        assert_eq!(hashes, vec!["old", "mid", "new"]);

        let stale = entries_older_than(&conn, 50).unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].url_hash, "old");
    }

    #[test]
    fn clear_returns_all() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();

        upsert_entry(&conn, &entry("x", 5, 1)).unwrap();
        upsert_entry(&conn, &entry("y", 5, 2)).unwrap();

        let cleared = clear_entries(&conn).unwrap();
        assert_eq!(cleared.len(), 2);
        assert_eq!(cache_totals(&conn).unwrap(), (0, 0));
    }
}
