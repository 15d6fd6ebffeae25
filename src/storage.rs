use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};

pub const KEY_SESSION_TOKEN: &str = "session_token";
pub const KEY_THEME: &str = "theme";
pub const KEY_DOWNLOADED_VIDEOS: &str = "downloaded_videos";

#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRecord {
    pub video_id: String,
    pub file_path: String,
    pub file_name: String,
    pub size_bytes: i64,
    pub checksum: String,
    pub downloaded_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone)]
pub struct Options {
    pub path: Option<PathBuf>,
}

impl Store {
    pub fn open(opts: Options) -> Result<Self> {
        let path = if let Some(path) = opts.path {
            path
        } else {
            default_path().context("storage: resolve default path")?
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("storage: create directory {}", parent.display()))?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("storage: open database at {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("storage: set WAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .context("storage: set busy timeout")?;
        migrate(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("storage: open in-memory database")?;
        migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn get_value(&self, key: &str) -> Result<Option<String>> {
        read_value(&self.conn.lock(), key)
    }

    pub fn set_value(&self, key: &str, value: &str) -> Result<()> {
        if key.is_empty() {
            bail!("storage: key required");
        }
        write_value(&self.conn.lock(), key, value)
    }

    pub fn remove_value(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])
            .with_context(|| format!("storage: delete key {key}"))?;
        Ok(())
    }

    /// Ids of every video downloaded on this machine, read from the JSON mirror.
    pub fn downloaded_ids(&self) -> Result<BTreeSet<String>> {
        read_downloaded_ids(&self.conn.lock())
    }

    pub fn is_downloaded(&self, video_id: &str) -> Result<bool> {
        Ok(self.downloaded_ids()?.contains(video_id))
    }

    pub fn record_download(&self, mut record: DownloadRecord) -> Result<()> {
        if record.video_id.is_empty() {
            bail!("storage: video id required for download record");
        }
        if record.downloaded_at.timestamp() == 0 {
            record.downloaded_at = Utc::now();
        }
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .context("storage: begin download transaction")?;
        tx.execute(
            r#"
INSERT INTO downloads (video_id, file_path, file_name, size_bytes, checksum, downloaded_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
ON CONFLICT(video_id) DO UPDATE SET
  file_path = excluded.file_path,
  file_name = excluded.file_name,
  size_bytes = excluded.size_bytes,
  checksum = excluded.checksum,
  downloaded_at = excluded.downloaded_at
"#,
            params![
                record.video_id,
                record.file_path,
                record.file_name,
                record.size_bytes,
                record.checksum,
                record.downloaded_at.timestamp(),
            ],
        )
        .context("storage: upsert download record")?;

        // The JSON mirror is rewritten under the same lock as the upsert.
        let mut ids = read_downloaded_ids(&tx)?;
        if ids.insert(record.video_id) {
            let encoded = serde_json::to_string(&ids.into_iter().collect::<Vec<_>>())
                .context("storage: encode downloaded video ids")?;
            write_value(&tx, KEY_DOWNLOADED_VIDEOS, &encoded)?;
        }
        tx.commit().context("storage: commit download record")
    }

    pub fn get_download(&self, video_id: &str) -> Result<Option<DownloadRecord>> {
        let conn = self.conn.lock();
        conn.query_row(
            r#"
SELECT video_id, file_path, file_name, size_bytes, checksum, downloaded_at
FROM downloads
WHERE video_id = ?1
"#,
            params![video_id],
            download_from_row,
        )
        .optional()
        .context("storage: query download record")
    }
}

fn download_from_row(row: &Row<'_>) -> rusqlite::Result<DownloadRecord> {
    let downloaded: i64 = row.get(5)?;
    Ok(DownloadRecord {
        video_id: row.get(0)?,
        file_path: row.get(1)?,
        file_name: row.get(2)?,
        size_bytes: row.get(3)?,
        checksum: row.get(4)?,
        downloaded_at: Utc
            .timestamp_opt(downloaded, 0)
            .single()
            .unwrap_or_else(Utc::now),
    })
}

fn read_value(conn: &Connection, key: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM kv WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
    .with_context(|| format!("storage: read key {key}"))
}

fn write_value(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        r#"
INSERT INTO kv (key, value, updated_at)
VALUES (?1, ?2, ?3)
ON CONFLICT(key) DO UPDATE SET
  value = excluded.value,
  updated_at = excluded.updated_at
"#,
        params![key, value, Utc::now().timestamp()],
    )
    .with_context(|| format!("storage: write key {key}"))?;
    Ok(())
}

fn read_downloaded_ids(conn: &Connection) -> Result<BTreeSet<String>> {
    match read_value(conn, KEY_DOWNLOADED_VIDEOS)? {
        Some(raw) if !raw.trim().is_empty() => {
            let ids: Vec<String> =
                serde_json::from_str(&raw).context("storage: decode downloaded video ids")?;
            Ok(ids.into_iter().collect())
        }
        _ => Ok(BTreeSet::new()),
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at INTEGER NOT NULL
)
"#,
        [],
    )?;

    let current: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    for (idx, sql) in migrations().iter().enumerate() {
        let version = (idx + 1) as i64;
        if version <= current {
            continue;
        }
        conn.execute_batch(sql)?;
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![
                version,
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or(Duration::from_secs(0))
                    .as_secs() as i64,
            ],
        )?;
    }
    Ok(())
}

fn migrations() -> Vec<&'static str> {
    vec![
        r#"
CREATE TABLE IF NOT EXISTS kv (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL,
  updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS downloads (
  video_id TEXT PRIMARY KEY,
  file_path TEXT NOT NULL,
  file_name TEXT NOT NULL,
  size_bytes INTEGER NOT NULL,
  checksum TEXT NOT NULL,
  downloaded_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_downloads_downloaded_at ON downloads(downloaded_at);
"#,
    ]
}

pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("otogram").join("state.db"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(id: &str) -> DownloadRecord {
        DownloadRecord {
            video_id: id.to_string(),
            file_path: format!("/tmp/otogram_{id}.mp4"),
            file_name: format!("otogram_{id}.mp4"),
            size_bytes: 42,
            checksum: "abc".into(),
            downloaded_at: Utc.timestamp_opt(0, 0).unwrap(),
        }
    }

    #[test]
    fn open_creates_database_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("state.db");
        let store = Store::open(Options {
            path: Some(path.clone()),
        })
        .unwrap();
        assert!(path.exists());
        drop(store);
    }

    #[test]
    fn values_round_trip_and_remove() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.get_value(KEY_THEME).unwrap(), None);
        store.set_value(KEY_THEME, "light").unwrap();
        store.set_value(KEY_THEME, "dark").unwrap();
        assert_eq!(store.get_value(KEY_THEME).unwrap().as_deref(), Some("dark"));
        store.remove_value(KEY_THEME).unwrap();
        assert_eq!(store.get_value(KEY_THEME).unwrap(), None);
    }

    #[test]
    fn recording_download_marks_id_once() {
        let store = Store::open_in_memory().unwrap();
        assert!(!store.is_downloaded("v42").unwrap());

        store.record_download(record("v42")).unwrap();
        store.record_download(record("v42")).unwrap();
        store.record_download(record("v7")).unwrap();

        let ids = store.downloaded_ids().unwrap();
        assert_eq!(ids.len(), 2);
        assert!(store.is_downloaded("v42").unwrap());

        let saved = store.get_download("v42").unwrap().unwrap();
        assert_eq!(saved.file_name, "otogram_v42.mp4");
        assert!(saved.downloaded_at.timestamp() > 0);
        assert!(store.get_download("missing").unwrap().is_none());
    }

    #[test]
    fn concurrent_downloads_keep_every_id() {
        let dir = tempdir().unwrap();
        let store = Store::open(Options {
            path: Some(dir.path().join("state.db")),
        })
        .unwrap();

        let workers: Vec<_> = (0..8)
            .map(|worker| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for n in 0..10 {
                        store.record_download(record(&format!("w{worker}-{n}"))).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let ids = store.downloaded_ids().unwrap();
        assert_eq!(ids.len(), 80);
        assert!(ids.contains("w0-0"));
        assert!(ids.contains("w7-9"));
    }

    #[test]
    fn migrations_are_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.db");
        let store = Store::open(Options {
            path: Some(path.clone()),
        })
        .unwrap();
        store.set_value(KEY_SESSION_TOKEN, "t").unwrap();
        drop(store);

        let reopened = Store::open(Options { path: Some(path) }).unwrap();
        assert_eq!(
            reopened.get_value(KEY_SESSION_TOKEN).unwrap().as_deref(),
            Some("t")
        );
    }
}
