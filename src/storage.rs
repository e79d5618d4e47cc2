use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use std::time::Duration;

use rusqlite::{Connection, TransactionBehavior, params};
use tracing::debug;

use crate::error::{Result, UnsealError};

/// How long a writer waits for another handle's transaction before giving up
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS buckets (name TEXT PRIMARY KEY);
    CREATE TABLE IF NOT EXISTS entries (
        bucket TEXT NOT NULL REFERENCES buckets(name),
        key BLOB NOT NULL,
        value BLOB NOT NULL,
        PRIMARY KEY (bucket, key)
    );
";

/// Byte keys to byte values inside one named bucket
pub type Bucket = BTreeMap<Vec<u8>, Vec<u8>>;

type Buckets = BTreeMap<String, Bucket>;

/// Working copy of the store handed to a transaction closure
///
/// Changes become visible to other callers only when the enclosing
/// [`KvStore::update`] closure returns `Ok`.
#[derive(Debug, Clone, Default)]
pub struct Transaction {
    buckets: Buckets,
    dirty: bool,
}

impl Transaction {
    fn new(buckets: Buckets) -> Self {
        Self {
            buckets,
            dirty: false,
        }
    }

    pub fn bucket(&self, name: &str) -> Option<&Bucket> {
        self.buckets.get(name)
    }

    /// Mutable access to an existing bucket
    pub fn bucket_mut(&mut self, name: &str) -> Option<&mut Bucket> {
        let bucket = self.buckets.get_mut(name)?;
        self.dirty = true;
        Some(bucket)
    }

    pub fn create_bucket_if_missing(&mut self, name: &str) -> &mut Bucket {
        self.dirty = true;
        self.buckets.entry(name.to_string()).or_default()
    }

    pub fn bucket_names(&self) -> impl Iterator<Item = &str> {
        self.buckets.keys().map(String::as_str)
    }

    pub fn get(&self, bucket: &str, key: &[u8]) -> Option<&[u8]> {
        self.buckets.get(bucket)?.get(key).map(Vec::as_slice)
    }

    /// Stores `value` under `key` in an existing bucket
    ///
    /// # Errors
    /// `BucketNotFound` if the bucket was never created.
    pub fn put(&mut self, bucket: &str, key: &[u8], value: &[u8]) -> Result<()> {
        self.bucket_mut(bucket)
            .ok_or_else(|| UnsealError::BucketNotFound(bucket.to_string()))?
            .insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    /// Removes `key`, returning whether it was present
    pub fn delete(&mut self, bucket: &str, key: &[u8]) -> Result<bool> {
        Ok(self
            .bucket_mut(bucket)
            .ok_or_else(|| UnsealError::BucketNotFound(bucket.to_string()))?
            .remove(key)
            .is_some())
    }
}

/// Transactional key-value capability the unlock protocol persists through
///
/// Implement this trait to plug in a different backend.
///
/// # Example
/// ```
/// use shamir_unseal::{KvStore, MemoryStore};
///
/// let store = MemoryStore::new();
/// store
///     .update(|tx| {
///         tx.create_bucket_if_missing("global");
///         tx.put("global", b"answer", b"42")
///     })
///     .unwrap();
///
/// let value = store.view(|tx| Ok(tx.get("global", b"answer").map(<[u8]>::to_vec))).unwrap();
/// assert_eq!(value, Some(b"42".to_vec()));
/// ```
pub trait KvStore: Send + Sync {
    /// Runs `f` against a read-only snapshot
    fn view<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction) -> Result<T>;

    /// Runs `f` against a working copy and commits it atomically if `f` succeeds
    ///
    /// An `Err` from `f` discards every change it made.
    fn update<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction) -> Result<T>;
}

/// Shares one store between several owners (e.g. lifecycles across a simulated restart)
impl<S: KvStore> KvStore for Arc<S> {
    fn view<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction) -> Result<T>,
    {
        (**self).view(f)
    }

    fn update<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction) -> Result<T>,
    {
        (**self).update(f)
    }
}

/// In-memory store, contents are lost with the process
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<Buckets>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn view<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction) -> Result<T>,
    {
        let data = read_guard(&self.data);
        f(&Transaction::new(data.clone()))
    }

    fn update<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction) -> Result<T>,
    {
        let mut data = write_guard(&self.data);
        let mut tx = Transaction::new(data.clone());
        let out = f(&mut tx)?;
        if tx.dirty {
            *data = tx.buckets;
        }
        Ok(out)
    }
}

/// SQLite-backed store
///
/// Every [`KvStore::update`] runs inside one `BEGIN IMMEDIATE` transaction that re-reads the
/// committed contents, so several handles on the same file (or several processes) see each
/// other's commits and never write from a stale copy. A writer blocked by another handle
/// waits up to [`BUSY_TIMEOUT`].
///
/// # Example
/// ```
/// use shamir_unseal::{FileStore, KvStore};
/// use tempfile::tempdir;
///
/// let dir = tempdir().unwrap();
/// let path = dir.path().join("store.db");
///
/// let store = FileStore::open(&path).unwrap();
/// store.update(|tx| {
///     tx.create_bucket_if_missing("global");
///     tx.put("global", b"k", b"v")
/// }).unwrap();
///
/// let reopened = FileStore::open(&path).unwrap();
/// assert!(reopened.view(|tx| Ok(tx.get("global", b"k").is_some())).unwrap());
/// ```
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl FileStore {
    /// Opens or creates the database at `path`
    ///
    /// # Errors
    /// `CorruptStore` if the file exists but is not a database.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")?;
        conn.execute_batch(SCHEMA)?;

        debug!(path = %path.display(), "opened file store");
        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KvStore for FileStore {
    fn view<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction) -> Result<T>,
    {
        let mut conn = self.lock_conn();
        let db_tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
        let snapshot = load_buckets(&db_tx)?;
        drop(db_tx);
        f(&Transaction::new(snapshot))
    }

    fn update<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction) -> Result<T>,
    {
        let mut conn = self.lock_conn();
        let db_tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let committed = load_buckets(&db_tx)?;

        let mut tx = Transaction::new(committed.clone());
        // an Err drops db_tx, which rolls it back
        let out = f(&mut tx)?;
        if tx.dirty {
            write_changes(&db_tx, &committed, &tx.buckets)?;
        }
        db_tx.commit()?;

        if tx.dirty {
            debug!(path = %self.path.display(), "committed file store transaction");
        }
        Ok(out)
    }
}

// Poisoning only means another thread panicked mid-closure; the committed map is intact
fn read_guard(lock: &RwLock<Buckets>) -> RwLockReadGuard<'_, Buckets> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_guard(lock: &RwLock<Buckets>) -> RwLockWriteGuard<'_, Buckets> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn load_buckets(conn: &Connection) -> Result<Buckets> {
    let mut buckets = Buckets::new();
    {
        let mut stmt = conn.prepare_cached("SELECT name FROM buckets")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            buckets.insert(row.get(0)?, Bucket::new());
        }
    }

    let mut stmt = conn.prepare_cached("SELECT bucket, key, value FROM entries")?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(0)?;
        buckets
            .entry(name)
            .or_default()
            .insert(row.get(1)?, row.get(2)?);
    }
    Ok(buckets)
}

/// Writes only what differs between the committed contents and the working copy
fn write_changes(conn: &Connection, committed: &Buckets, working: &Buckets) -> Result<()> {
    for (name, bucket) in working {
        let previous = committed.get(name);
        if previous.is_none() {
            conn.execute("INSERT INTO buckets (name) VALUES (?1)", params![name])?;
        }

        for (key, value) in bucket {
            if previous.and_then(|b| b.get(key)) != Some(value) {
                conn.execute(
                    "INSERT OR REPLACE INTO entries (bucket, key, value) VALUES (?1, ?2, ?3)",
                    params![name, key, value],
                )?;
            }
        }

        if let Some(previous) = previous {
            for key in previous.keys().filter(|k| !bucket.contains_key(*k)) {
                conn.execute(
                    "DELETE FROM entries WHERE bucket = ?1 AND key = ?2",
                    params![name, key],
                )?;
            }
        }
    }
    Ok(())
}
