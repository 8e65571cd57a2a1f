//! Content-addressed disk cache for upstream thumbnails.
//!
//! Files are stored as `<sha256-of-url><ext>` directly under the cache
//! directory; the index lives in the `image_cache` table. The row exists
//! iff the backing file exists: a row whose file has vanished is deleted
//! on the next lookup and treated as a miss. Writes overwrite in place,
//! so a re-fetched URL replaces its prior entry.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use opsdec_core::{Error, Result};
use opsdec_db::models::ImageCacheEntry;
use opsdec_db::pool::{get_conn, DbPool};
use opsdec_db::queries::image_cache as q;

/// A cached image ready to serve.
#[derive(Debug)]
pub struct CachedImage {
    pub bytes: Vec<u8>,
    pub content_type: String,
    /// Epoch seconds when the entry was written; lets the proxy decide
    /// whether to attempt a refresh.
    pub created_at: i64,
}

/// Result of an eviction sweep.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct EvictStats {
    pub removed_by_age: usize,
    pub removed_by_lru: usize,
}

/// Cache size summary.
#[derive(Debug, serde::Serialize)]
pub struct CacheStats {
    pub entries: i64,
    pub total_size_bytes: i64,
}

/// Disk-backed image cache keyed by source URL.
pub struct ImageCache {
    dir: PathBuf,
    db: DbPool,
}

impl ImageCache {
    /// Create the cache rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>, db: DbPool) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, db })
    }

    /// SHA-256 of the normalized URL, lowercase hex.
    pub fn hash_url(url: &str) -> String {
        hex::encode(Sha256::digest(url.trim().as_bytes()))
    }

    /// File extension for a content type; unknown types get `.bin`.
    pub fn ext_for(content_type: &str) -> &'static str {
        // Strip any "; charset=..." parameter before matching.
        let essence = content_type.split(';').next().unwrap_or("").trim();
        match essence {
            "image/jpeg" => ".jpg",
            "image/png" => ".png",
            "image/webp" => ".webp",
            "image/gif" => ".gif",
            "image/svg+xml" => ".svg",
            "image/avif" => ".avif",
            _ => ".bin",
        }
    }

    /// Look up a URL. Returns the bytes and content type, touching the
    /// entry's last access time. A row whose file is gone is removed and
    /// reported as a miss.
    pub fn get(&self, url: &str) -> Result<Option<CachedImage>> {
        let hash = Self::hash_url(url);
        let conn = get_conn(&self.db)?;

        let Some(entry) = q::get_entry(&conn, &hash)? else {
            return Ok(None);
        };

        let path = self.dir.join(&entry.file_path);
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("Cache file missing for {url}; dropping index row");
                q::delete_entry(&conn, &hash)?;
                return Ok(None);
            }
            Err(e) => return Err(Error::Io { source: e }),
        };

        q::touch_entry(&conn, &hash, now())?;

        Ok(Some(CachedImage {
            bytes,
            content_type: entry.content_type,
            created_at: entry.created_at,
        }))
    }

    /// Store bytes for a URL, replacing any prior entry.
    pub fn put(&self, url: &str, bytes: &[u8], content_type: &str) -> Result<()> {
        let hash = Self::hash_url(url);
        let file_name = format!("{hash}{}", Self::ext_for(content_type));
        let path = self.dir.join(&file_name);

        std::fs::write(&path, bytes)?;

        // If the content type changed, the old file has a different
        // extension; remove it so the row-iff-file invariant holds.
        let conn = get_conn(&self.db)?;
        if let Some(prior) = q::get_entry(&conn, &hash)? {
            if prior.file_path != file_name {
                remove_file_quiet(&self.dir.join(&prior.file_path));
            }
        }

        let ts = now();
        q::upsert_entry(
            &conn,
            &ImageCacheEntry {
                url_hash: hash,
                original_url: url.trim().to_string(),
                file_path: file_name,
                content_type: content_type.to_string(),
                file_size: bytes.len() as i64,
                created_at: ts,
                last_accessed_at: ts,
            },
        )
    }

    /// Evict entries: first everything whose last access is older than
    /// `max_age_secs`, then least-recently-used entries until the total
    /// size is at most `max_size_bytes`. Files are deleted before rows;
    /// already-missing files are tolerated.
    pub fn evict(&self, max_age_secs: i64, max_size_bytes: i64) -> Result<EvictStats> {
        let conn = get_conn(&self.db)?;
        let mut stats = EvictStats::default();
        let cutoff = now() - max_age_secs;

        for entry in q::entries_older_than(&conn, cutoff)? {
            remove_file_quiet(&self.dir.join(&entry.file_path));
            q::delete_entry(&conn, &entry.url_hash)?;
            stats.removed_by_age += 1;
        }

        let (_, mut total) = q::cache_totals(&conn)?;
        if total > max_size_bytes {
            for entry in q::entries_by_lru(&conn)? {
                if total <= max_size_bytes {
                    break;
                }
                remove_file_quiet(&self.dir.join(&entry.file_path));
                q::delete_entry(&conn, &entry.url_hash)?;
                total -= entry.file_size;
                stats.removed_by_lru += 1;
            }
        }

        Ok(stats)
    }

    /// Remove every file and row.
    pub fn clear_all(&self) -> Result<()> {
        let conn = get_conn(&self.db)?;
        for entry in q::clear_entries(&conn)? {
            remove_file_quiet(&self.dir.join(&entry.file_path));
        }
        Ok(())
    }

    /// Entry count and total size.
    pub fn stats(&self) -> Result<CacheStats> {
        let conn = get_conn(&self.db)?;
        let (entries, total_size_bytes) = q::cache_totals(&conn)?;
        Ok(CacheStats {
            entries,
            total_size_bytes,
        })
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn remove_file_quiet(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("Failed to remove cache file {}: {e}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsdec_db::pool::init_memory_pool;

    fn cache() -> (ImageCache, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = init_memory_pool().unwrap();
        let cache = ImageCache::new(dir.path(), db).unwrap();
        (cache, dir)
    }

    #[test]
    fn hash_is_lowercase_hex() {
        let h = ImageCache::hash_url("http://example.com/a.jpg");
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_uppercase()));
        // normalization trims whitespace
        assert_eq!(h, ImageCache::hash_url("  http://example.com/a.jpg  "));
    }

    #[test]
    fn ext_mapping() {
        assert_eq!(ImageCache::ext_for("image/jpeg"), ".jpg");
        assert_eq!(ImageCache::ext_for("image/png"), ".png");
        assert_eq!(ImageCache::ext_for("image/webp"), ".webp");
        assert_eq!(ImageCache::ext_for("image/gif"), ".gif");
        assert_eq!(ImageCache::ext_for("image/svg+xml"), ".svg");
        assert_eq!(ImageCache::ext_for("image/avif"), ".avif");
        assert_eq!(ImageCache::ext_for("image/jpeg; charset=binary"), ".jpg");
        assert_eq!(ImageCache::ext_for("application/octet-stream"), ".bin");
    }

    #[test]
    fn put_get_roundtrip() {
        let (cache, _dir) = cache();
        cache.put("http://x/1.png", b"png-bytes", "image/png").unwrap();

        let hit = cache.get("http://x/1.png").unwrap().unwrap();
        assert_eq!(hit.bytes, b"png-bytes");
        assert_eq!(hit.content_type, "image/png");

        assert!(cache.get("http://x/other.png").unwrap().is_none());
    }

    #[test]
    fn put_overwrites_in_place() {
        let (cache, _dir) = cache();
        cache.put("http://x/a", b"v1", "image/jpeg").unwrap();
        cache.put("http://x/a", b"version-two", "image/jpeg").unwrap();

        let hit = cache.get("http://x/a").unwrap().unwrap();
        assert_eq!(hit.bytes, b"version-two");

        let stats = cache.stats().unwrap();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.total_size_bytes, 11);
    }

    #[test]
    fn content_type_change_replaces_file() {
        let (cache, dir) = cache();
        cache.put("http://x/a", b"jpg", "image/jpeg").unwrap();
        cache.put("http://x/a", b"webp", "image/webp").unwrap();

        let hash = ImageCache::hash_url("http://x/a");
        assert!(!dir.path().join(format!("{hash}.jpg")).exists());
        assert!(dir.path().join(format!("{hash}.webp")).exists());
    }

    #[test]
    fn missing_file_drops_row() {
        let (cache, dir) = cache();
        cache.put("http://x/gone", b"bytes", "image/gif").unwrap();

        let hash = ImageCache::hash_url("http://x/gone");
        std::fs::remove_file(dir.path().join(format!("{hash}.gif"))).unwrap();

        assert!(cache.get("http://x/gone").unwrap().is_none());
        assert_eq!(cache.stats().unwrap().entries, 0);
    }

    #[test]
    fn evict_by_size_removes_lru_first() {
        let (cache, _dir) = cache();
        cache.put("u1", &[0u8; 100], "image/jpeg").unwrap();
        cache.put("u2", &[0u8; 100], "image/jpeg").unwrap();
        cache.put("u3", &[0u8; 100], "image/jpeg").unwrap();

        // Backdate entry 1 so it is the LRU candidate.
        {
            let conn = get_conn(&cache.db).unwrap();
            q::touch_entry(&conn, &ImageCache::hash_url("u1"), now() - 10).unwrap();
        }

        let stats = cache.evict(3600, 250).unwrap();
        assert_eq!(
            stats,
            EvictStats {
                removed_by_age: 0,
                removed_by_lru: 1
            }
        );

        assert!(cache.get("u1").unwrap().is_none());
        assert!(cache.get("u2").unwrap().is_some());
        assert!(cache.get("u3").unwrap().is_some());
    }

    #[test]
    fn evict_by_age() {
        let (cache, _dir) = cache();
        cache.put("old", b"x", "image/jpeg").unwrap();
        cache.put("new", b"y", "image/jpeg").unwrap();

        {
            let conn = get_conn(&cache.db).unwrap();
            q::touch_entry(&conn, &ImageCache::hash_url("old"), now() - 7200).unwrap();
        }

        let stats = cache.evict(3600, i64::MAX).unwrap();
        assert_eq!(stats.removed_by_age, 1);
        assert_eq!(stats.removed_by_lru, 0);
        assert!(cache.get("old").unwrap().is_none());
        assert!(cache.get("new").unwrap().is_some());
    }

    #[test]
    fn evict_tolerates_missing_files() {
        let (cache, dir) = cache();
        cache.put("ghost", b"x", "image/jpeg").unwrap();
        let hash = ImageCache::hash_url("ghost");
        std::fs::remove_file(dir.path().join(format!("{hash}.jpg"))).unwrap();

        {
            let conn = get_conn(&cache.db).unwrap();
            q::touch_entry(&conn, &hash, now() - 7200).unwrap();
        }
        let stats = cache.evict(3600, i64::MAX).unwrap();
        assert_eq!(stats.removed_by_age, 1);
    }

    #[test]
    fn clear_all_empties_everything() {
        let (cache, dir) = cache();
        cache.put("a", b"1", "image/png").unwrap();
        cache.put("b", b"2", "image/png").unwrap();

        cache.clear_all().unwrap();

        let stats = cache.stats().unwrap();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.total_size_bytes, 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
