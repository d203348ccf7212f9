//! Durable instant-playback cache.
//!
//! Maps a content key to the completed job that already holds it. Backed by
//! SQLite, loaded into memory on first access and written through on every
//! mutation so entries survive a restart. Each entry carries its own TTL;
//! a TTL of zero never expires.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::backend::PlayableMedia;

use super::{CacheError, EpisodeNumber};

/// Kind of content a playback request is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Movie,
    Series,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Movie => "movie",
            ContentKind::Series => "series",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "movie" => Some(ContentKind::Movie),
            "series" => Some(ContentKind::Series),
            _ => None,
        }
    }
}

/// Identity of a piece of content, independent of any release.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentKey {
    pub kind: ContentKind,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode: Option<EpisodeNumber>,
}

impl ContentKey {
    pub fn movie(id: impl Into<String>) -> Self {
        Self {
            kind: ContentKind::Movie,
            id: id.into(),
            episode: None,
        }
    }

    pub fn episode(id: impl Into<String>, season: u32, episode: u32) -> Self {
        Self {
            kind: ContentKind::Series,
            id: id.into(),
            episode: Some(EpisodeNumber { season, episode }),
        }
    }

    /// Stable string form used as the primary key.
    pub fn storage_key(&self) -> String {
        match self.episode {
            Some(ep) => format!("{}:{}:{}:{}", self.kind.as_str(), self.id, ep.season, ep.episode),
            None => format!("{}:{}", self.kind.as_str(), self.id),
        }
    }
}

/// One cached content-to-job mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstantEntry {
    pub key: ContentKey,
    pub job_id: String,
    pub download_ref: String,
    pub release_name: String,
    pub media: PlayableMedia,
    pub cached_at: DateTime<Utc>,
    /// 0 = never expires.
    pub ttl_secs: u64,
}

impl InstantEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        if self.ttl_secs == 0 {
            return false;
        }
        // A TTL too large to represent never expires.
        let expires_at = i64::try_from(self.ttl_secs)
            .ok()
            .and_then(ChronoDuration::try_seconds)
            .and_then(|ttl| self.cached_at.checked_add_signed(ttl));
        expires_at.is_some_and(|at| now >= at)
    }
}

struct Inner {
    conn: Connection,
    /// `None` until first access.
    entries: Option<HashMap<String, InstantEntry>>,
}

/// SQLite-backed instant cache.
pub struct InstantCache {
    inner: Mutex<Inner>,
    default_ttl_secs: u64,
}

impl InstantCache {
    /// Open (or create) the cache database at `path`.
    pub fn open(path: &Path, default_ttl_secs: u64) -> Result<Self, CacheError> {
        let conn = Connection::open(path).map_err(|e| CacheError::Database(e.to_string()))?;
        Self::with_connection(conn, default_ttl_secs)
    }

    /// In-memory cache (useful for testing).
    pub fn in_memory(default_ttl_secs: u64) -> Result<Self, CacheError> {
        let conn = Connection::open_in_memory().map_err(|e| CacheError::Database(e.to_string()))?;
        Self::with_connection(conn, default_ttl_secs)
    }

    fn with_connection(conn: Connection, default_ttl_secs: u64) -> Result<Self, CacheError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS instant_cache (
                content_key TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                content_id TEXT NOT NULL,
                season INTEGER,
                episode INTEGER,
                job_id TEXT NOT NULL,
                download_ref TEXT NOT NULL,
                release_name TEXT NOT NULL,
                stream_path TEXT NOT NULL,
                stream_url TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                cached_at TEXT NOT NULL,
                ttl_secs INTEGER NOT NULL
            );
            "#,
        )
        .map_err(|e| CacheError::Database(e.to_string()))?;

        Ok(Self {
            inner: Mutex::new(Inner {
                conn,
                entries: None,
            }),
            default_ttl_secs,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Lock and make sure the in-memory map is loaded.
    fn loaded(&self) -> Result<MutexGuard<'_, Inner>, CacheError> {
        let mut inner = self.lock();
        if inner.entries.is_none() {
            let entries = load_all(&inner.conn)?;
            debug!(entries = entries.len(), "Loaded instant cache");
            inner.entries = Some(entries);
        }
        Ok(inner)
    }

    /// Live entry for `key`. An expired entry is deleted on sight.
    pub fn get(&self, key: &ContentKey) -> Result<Option<InstantEntry>, CacheError> {
        let mut inner = self.loaded()?;
        let storage_key = key.storage_key();

        match inner.entries.as_ref().and_then(|m| m.get(&storage_key)) {
            None => return Ok(None),
            Some(entry) if !entry.is_expired(Utc::now()) => return Ok(Some(entry.clone())),
            Some(_) => {}
        }

        debug!(key = %storage_key, "Dropping expired instant cache entry");
        delete_row(&inner.conn, &storage_key)?;
        if let Some(entries) = inner.entries.as_mut() {
            entries.remove(&storage_key);
        }
        Ok(None)
    }

    /// Cache a completed job for `key` with the default TTL.
    pub fn put(
        &self,
        key: ContentKey,
        download_ref: &str,
        release_name: &str,
        media: &PlayableMedia,
    ) -> Result<InstantEntry, CacheError> {
        let entry = InstantEntry {
            key,
            job_id: media.job_id.clone(),
            download_ref: download_ref.to_string(),
            release_name: release_name.to_string(),
            media: media.clone(),
            cached_at: Utc::now(),
            ttl_secs: self.default_ttl_secs,
        };
        self.put_entry(entry.clone())?;
        Ok(entry)
    }

    /// Insert or replace an entry as given.
    pub fn put_entry(&self, entry: InstantEntry) -> Result<(), CacheError> {
        let mut inner = self.loaded()?;
        let storage_key = entry.key.storage_key();
        if let Err(e) = write_row(&inner.conn, &storage_key, &entry) {
            error!(key = %storage_key, error = %e, "Failed to persist instant cache entry");
            return Err(e);
        }
        if let Some(entries) = inner.entries.as_mut() {
            entries.insert(storage_key, entry);
        }
        Ok(())
    }

    pub fn remove(&self, key: &ContentKey) -> Result<bool, CacheError> {
        let mut inner = self.loaded()?;
        let storage_key = key.storage_key();
        delete_row(&inner.conn, &storage_key)?;
        Ok(inner
            .entries
            .as_mut()
            .and_then(|m| m.remove(&storage_key))
            .is_some())
    }

    pub fn clear(&self) -> Result<(), CacheError> {
        let mut inner = self.loaded()?;
        inner
            .conn
            .execute("DELETE FROM instant_cache", [])
            .map_err(|e| CacheError::Database(e.to_string()))?;
        if let Some(entries) = inner.entries.as_mut() {
            entries.clear();
        }
        Ok(())
    }

    /// All live entries, sorted by storage key.
    pub fn entries(&self) -> Result<Vec<InstantEntry>, CacheError> {
        let inner = self.loaded()?;
        let now = Utc::now();
        let mut live: Vec<InstantEntry> = inner
            .entries
            .iter()
            .flat_map(|m| m.values())
            .filter(|e| !e.is_expired(now))
            .cloned()
            .collect();
        live.sort_by_key(|e| e.key.storage_key());
        Ok(live)
    }

    pub fn len(&self) -> Result<usize, CacheError> {
        Ok(self.entries()?.len())
    }
}

fn load_all(conn: &Connection) -> Result<HashMap<String, InstantEntry>, CacheError> {
    let mut stmt = conn
        .prepare(
            "SELECT content_key, kind, content_id, season, episode, job_id, download_ref,
                    release_name, stream_path, stream_url, size_bytes, cached_at, ttl_secs
             FROM instant_cache",
        )
        .map_err(|e| CacheError::Database(e.to_string()))?;

    let rows = stmt
        .query_map([], |row| {
            let kind: String = row.get(1)?;
            let season: Option<u32> = row.get(3)?;
            let episode: Option<u32> = row.get(4)?;
            let cached_at: String = row.get(11)?;
            let job_id: String = row.get(5)?;
            let size_bytes: i64 = row.get(10)?;
            let ttl_secs: i64 = row.get(12)?;
            Ok((
                row.get::<_, String>(0)?,
                kind,
                row.get::<_, String>(2)?,
                season.zip(episode),
                job_id,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, String>(8)?,
                row.get::<_, String>(9)?,
                size_bytes,
                cached_at,
                ttl_secs,
            ))
        })
        .map_err(|e| CacheError::Database(e.to_string()))?;

    let mut entries = HashMap::new();
    for row in rows {
        let (
            storage_key,
            kind,
            id,
            episode,
            job_id,
            download_ref,
            release_name,
            path,
            url,
            size_bytes,
            cached_at,
            ttl_secs,
        ) = row.map_err(|e| CacheError::Database(e.to_string()))?;

        let Some(kind) = ContentKind::parse(&kind) else {
            error!(key = %storage_key, kind = %kind, "Skipping instant cache row with unknown kind");
            continue;
        };
        let Ok(cached_at) = DateTime::parse_from_rfc3339(&cached_at) else {
            error!(key = %storage_key, "Skipping instant cache row with bad timestamp");
            continue;
        };

        entries.insert(
            storage_key,
            InstantEntry {
                key: ContentKey {
                    kind,
                    id,
                    episode: episode.map(|(season, episode)| EpisodeNumber { season, episode }),
                },
                media: PlayableMedia {
                    job_id: job_id.clone(),
                    path,
                    url,
                    size_bytes: size_bytes.max(0) as u64,
                },
                job_id,
                download_ref,
                release_name,
                cached_at: cached_at.with_timezone(&Utc),
                ttl_secs: ttl_secs.max(0) as u64,
            },
        );
    }
    Ok(entries)
}

fn write_row(conn: &Connection, storage_key: &str, entry: &InstantEntry) -> Result<(), CacheError> {
    conn.execute(
        "INSERT OR REPLACE INTO instant_cache
            (content_key, kind, content_id, season, episode, job_id, download_ref,
             release_name, stream_path, stream_url, size_bytes, cached_at, ttl_secs)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            storage_key,
            entry.key.kind.as_str(),
            &entry.key.id,
            entry.key.episode.map(|e| e.season),
            entry.key.episode.map(|e| e.episode),
            &entry.job_id,
            &entry.download_ref,
            &entry.release_name,
            &entry.media.path,
            &entry.media.url,
            entry.media.size_bytes as i64,
            entry.cached_at.to_rfc3339(),
            entry.ttl_secs as i64,
        ],
    )
    .map_err(|e| CacheError::Database(e.to_string()))?;
    Ok(())
}

fn delete_row(conn: &Connection, storage_key: &str) -> Result<(), CacheError> {
    conn.execute(
        "DELETE FROM instant_cache WHERE content_key = ?",
        params![storage_key],
    )
    .map_err(|e| CacheError::Database(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn media(job: &str) -> PlayableMedia {
        PlayableMedia {
            job_id: job.to_string(),
            path: format!("/content/{}/movie.mkv", job),
            url: format!("http://dav/content/{}/movie.mkv", job),
            size_bytes: 4_000_000_000,
        }
    }

    #[test]
    fn test_expiry_with_huge_ttl() {
        let entry = |ttl_secs| InstantEntry {
            key: ContentKey::movie("tt1"),
            job_id: "job".to_string(),
            download_ref: "ref".to_string(),
            release_name: "Movie".to_string(),
            media: media("job"),
            cached_at: Utc::now() - ChronoDuration::hours(1),
            ttl_secs,
        };
        let now = Utc::now();
        assert!(entry(60).is_expired(now));
        assert!(!entry(7200).is_expired(now));
        assert!(!entry(u64::MAX).is_expired(now));
        assert!(!entry(i64::MAX as u64).is_expired(now));
    }

    #[test]
    fn test_storage_keys() {
        assert_eq!(ContentKey::movie("tt0133093").storage_key(), "movie:tt0133093");
        assert_eq!(
            ContentKey::episode("tt0903747", 1, 2).storage_key(),
            "series:tt0903747:1:2"
        );
    }

    #[test]
    fn test_put_and_get() {
        let cache = InstantCache::in_memory(3600).unwrap();
        let key = ContentKey::movie("tt1");
        cache.put(key.clone(), "ref-1", "Movie.2020.1080p", &media("job-1")).unwrap();

        let entry = cache.get(&key).unwrap().unwrap();
        assert_eq!(entry.job_id, "job-1");
        assert_eq!(entry.ttl_secs, 3600);
        assert!(cache.get(&ContentKey::movie("tt2")).unwrap().is_none());
    }

    #[test]
    fn test_round_trip_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("instant.db");

        let live = ContentKey::episode("tt9", 2, 5);
        let forever = ContentKey::movie("tt-forever");
        let stale = ContentKey::movie("tt-stale");
        {
            let cache = InstantCache::open(&path, 3600).unwrap();
            cache.put(live.clone(), "ref-live", "Show.S02E05", &media("job-live")).unwrap();
            cache
                .put_entry(InstantEntry {
                    key: forever.clone(),
                    job_id: "job-forever".to_string(),
                    download_ref: "ref-forever".to_string(),
                    release_name: "Old.Movie.1999".to_string(),
                    media: media("job-forever"),
                    cached_at: Utc::now() - ChronoDuration::days(3650),
                    ttl_secs: 0,
                })
                .unwrap();
            cache
                .put_entry(InstantEntry {
                    key: stale.clone(),
                    job_id: "job-stale".to_string(),
                    download_ref: "ref-stale".to_string(),
                    release_name: "Stale.Movie".to_string(),
                    media: media("job-stale"),
                    cached_at: Utc::now() - ChronoDuration::hours(2),
                    ttl_secs: 60,
                })
                .unwrap();
        }

        let reopened = InstantCache::open(&path, 3600).unwrap();
        let entries = reopened.entries().unwrap();
        let keys: Vec<_> = entries.iter().map(|e| e.key.clone()).collect();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&live));
        assert!(keys.contains(&forever));

        let entry = reopened.get(&live).unwrap().unwrap();
        assert_eq!(entry.media, media("job-live"));
        assert_eq!(entry.key.episode, Some(EpisodeNumber { season: 2, episode: 5 }));
        assert!(reopened.get(&stale).unwrap().is_none());
    }

    #[test]
    fn test_remove_and_clear_are_durable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("instant.db");
        {
            let cache = InstantCache::open(&path, 0).unwrap();
            cache.put(ContentKey::movie("a"), "r", "A", &media("a")).unwrap();
            cache.put(ContentKey::movie("b"), "r", "B", &media("b")).unwrap();
            assert!(cache.remove(&ContentKey::movie("a")).unwrap());
        }
        {
            let cache = InstantCache::open(&path, 0).unwrap();
            assert_eq!(cache.len().unwrap(), 1);
            cache.clear().unwrap();
        }
        let cache = InstantCache::open(&path, 0).unwrap();
        assert_eq!(cache.len().unwrap(), 0);
    }
}
