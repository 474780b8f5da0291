//! The `HashDb` contract (spec §6): a persistent set of "accepted" content
//! hashes with TTL eviction, queried by `Files` targets to decide whether a
//! rebuild is needed.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use derive_more::Debug;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::instrument;

use crate::error::Result;

/// Default retention window for accepted hashes (spec §6).
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Any backing store implementing the `has`/`add` contract. `Ctx` holds one
/// behind `Arc<dyn HashDb>` so every concurrently-running `Files` target
/// shares the same accepted-hash set.
#[async_trait]
pub trait HashDb: Send + Sync + std::fmt::Debug {
    async fn has(&self, hash: &str) -> Result<bool>;
    async fn add(&self, hash: &str) -> Result<()>;
}

type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

fn system_clock() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before UNIX_EPOCH")
        .as_secs()
}

/// `rusqlite`-backed `HashDb`, modeled on the teacher's `LocalMetadata`:
/// a `Connection` behind a mutex, schema created on open, every operation
/// instrumented.
#[derive(Debug)]
pub struct SqliteHashDb {
    #[debug("<connection>")]
    conn: Mutex<Connection>,
    keep: Option<Duration>,
    update_on_access: bool,
    #[debug(skip)]
    now: Clock,
}

impl SqliteHashDb {
    /// Opens (creating if needed) `<dir>/hash.db` with the default 30-day
    /// retention and access-time refresh enabled.
    #[instrument(name = "SqliteHashDb::open", skip(dir))]
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(dir, Some(DEFAULT_RETENTION), true)
    }

    pub fn open_with(
        dir: impl AsRef<Path>,
        keep: Option<Duration>,
        update_on_access: bool,
    ) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .map_err(|err| crate::error::FabError::io(dir, "create hashdb directory", err))?;
        let conn = Connection::open(dir.join("hash.db"))?;
        let db = Self {
            conn: Mutex::new(conn),
            keep,
            update_on_access,
            now: Arc::new(system_clock),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// An in-memory database, for tests and for short-lived invocations that
    /// don't want a `hash.db` left on disk.
    pub fn in_memory(keep: Option<Duration>, update_on_access: bool) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
            keep,
            update_on_access,
            now: Arc::new(system_clock),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Overrides the clock used for `unix_secs`/TTL eviction, so retention
    /// behavior can be tested deterministically without sleeping.
    #[cfg(test)]
    pub fn with_clock(mut self, clock: impl Fn() -> u64 + Send + Sync + 'static) -> Self {
        self.now = Arc::new(clock);
        self
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().expect("hashdb mutex poisoned");
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS hashes (
                hash BLOB PRIMARY KEY,
                unix_secs INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_hashes_unix_secs ON hashes(unix_secs);
            "#,
        )?;
        Ok(())
    }

    fn evict_expired(&self, conn: &Connection) -> Result<()> {
        let Some(keep) = self.keep else { return Ok(()) };
        let threshold = (self.now)().saturating_sub(keep.as_secs());
        conn.execute("DELETE FROM hashes WHERE unix_secs < ?1", params![threshold])?;
        Ok(())
    }
}

#[async_trait]
impl HashDb for SqliteHashDb {
    #[instrument(name = "SqliteHashDb::has", skip(self))]
    async fn has(&self, hash: &str) -> Result<bool> {
        let conn = self.conn.lock().expect("hashdb mutex poisoned");
        let bytes = hex::decode(hash).map_err(|err| {
            crate::error::FabError::Config(format!("hash {hash:?} is not valid hex: {err}"))
        })?;
        let found = conn
            .query_row(
                "SELECT 1 FROM hashes WHERE hash = ?1",
                params![bytes],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if found && self.update_on_access {
            conn.execute(
                "UPDATE hashes SET unix_secs = ?1 WHERE hash = ?2",
                params![(self.now)(), bytes],
            )?;
        }
        Ok(found)
    }

    #[instrument(name = "SqliteHashDb::add", skip(self))]
    async fn add(&self, hash: &str) -> Result<()> {
        let conn = self.conn.lock().expect("hashdb mutex poisoned");
        let bytes = hex::decode(hash).map_err(|err| {
            crate::error::FabError::Config(format!("hash {hash:?} is not valid hex: {err}"))
        })?;
        conn.execute(
            "INSERT OR REPLACE INTO hashes (hash, unix_secs) VALUES (?1, ?2)",
            params![bytes, (self.now)()],
        )?;
        self.evict_expired(&conn)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use pretty_assertions::assert_eq as pretty_assert_eq;

    use super::*;

    fn hash(byte: u8) -> String {
        hex::encode([byte; 4])
    }

    #[tokio::test]
    async fn unknown_hash_is_absent() {
        let db = SqliteHashDb::in_memory(None, true).unwrap();
        pretty_assert_eq!(db.has(&hash(1)).await.unwrap(), false);
    }

    #[tokio::test]
    async fn added_hash_is_present() {
        let db = SqliteHashDb::in_memory(None, true).unwrap();
        db.add(&hash(1)).await.unwrap();
        pretty_assert_eq!(db.has(&hash(1)).await.unwrap(), true);
    }

    #[tokio::test]
    async fn entries_older_than_retention_are_evicted_on_add() {
        let clock = Arc::new(AtomicU64::new(1_000));
        let db = SqliteHashDb::in_memory(Some(Duration::from_secs(100)), false)
            .unwrap()
            .with_clock({
                let clock = clock.clone();
                move || clock.load(Ordering::SeqCst)
            });

        db.add(&hash(1)).await.unwrap();
        clock.store(1_500, Ordering::SeqCst); // 500s later, well past the 100s TTL
        db.add(&hash(2)).await.unwrap(); // triggers eviction

        pretty_assert_eq!(db.has(&hash(1)).await.unwrap(), false);
        pretty_assert_eq!(db.has(&hash(2)).await.unwrap(), true);
    }

    #[tokio::test]
    async fn update_on_access_refreshes_the_timestamp_so_has_does_not_evict_it() {
        let clock = Arc::new(AtomicU64::new(1_000));
        let db = SqliteHashDb::in_memory(Some(Duration::from_secs(100)), true)
            .unwrap()
            .with_clock({
                let clock = clock.clone();
                move || clock.load(Ordering::SeqCst)
            });

        db.add(&hash(1)).await.unwrap();
        clock.store(1_050, Ordering::SeqCst);
        pretty_assert_eq!(db.has(&hash(1)).await.unwrap(), true); // refreshes to 1050
        clock.store(1_120, Ordering::SeqCst); // only 70s since refresh
        db.add(&hash(2)).await.unwrap();
        pretty_assert_eq!(db.has(&hash(1)).await.unwrap(), true);
    }
}
