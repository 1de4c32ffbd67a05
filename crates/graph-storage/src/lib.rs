//! Block-addressed SQLite storage backend.
//!
//! Grounded on `moire_web::db::{Db, schema::init_sqlite}`: a thin `Db`
//! wrapper that opens a fresh `rusqlite::Connection` per call for
//! file-backed graphs, generalised here from a fixed diagnostics schema to
//! the single `storage(address, data)` table the graph engine spills tree
//! nodes into. `:memory:` graphs instead keep one connection to a
//! shared-cache URL alive for the storage object's lifetime, since a bare
//! `:memory:` database is reclaimed the moment its one connection closes.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::{debug, warn};

pub type Address = u64;
/// Opaque textual block payload; the engine owns its encoding, this layer
/// never interprets it.
pub type Blob = String;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageError(pub String);

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "storage/backend-error: {}", self.0)
    }
}

impl std::error::Error for StorageError {}

impl From<rusqlite::Error> for StorageError {
    fn from(value: rusqlite::Error) -> Self {
        StorageError(value.to_string())
    }
}

/// The small interface the graph engine uses to spill and re-hydrate
/// internal tree nodes.
pub trait BlockStorage: Send + Sync {
    fn store(&self, pairs: &[(Address, Blob)]) -> Result<(), StorageError>;
    fn restore(&self, address: Address) -> Result<Option<Blob>, StorageError>;
    fn list_addresses(&self) -> Result<Vec<Address>, StorageError>;
    fn delete(&self, addresses: &[Address]) -> Result<(), StorageError>;
    fn close(&self);
}

enum Backing {
    File(PathBuf),
    Memory(Mutex<Connection>),
}

pub struct SqliteStorage {
    backing: Backing,
}

const SCHEMA_SQL: &str = "
    CREATE TABLE IF NOT EXISTS storage (
        address INTEGER PRIMARY KEY,
        data TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_storage_address ON storage (address);
";

impl SqliteStorage {
    /// Opens (creating if absent) a file-backed store at `path`.
    pub fn open_file(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let conn = Connection::open(&path)?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            backing: Backing::File(path),
        })
    }

    /// Opens a shared-cache in-memory store, keeping one connection alive
    /// for the returned value's lifetime so the database is not reclaimed.
    pub fn open_memory() -> Result<Self, StorageError> {
        let conn = Connection::open("file::memory:?cache=shared")?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            backing: Backing::Memory(Mutex::new(conn)),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.backing {
            Backing::File(path) => Some(path),
            Backing::Memory(_) => None,
        }
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
    ) -> Result<T, StorageError> {
        match &self.backing {
            Backing::File(path) => {
                let mut conn = Connection::open(path)?;
                Ok(f(&mut conn)?)
            }
            Backing::Memory(conn) => {
                let mut conn = conn.lock().unwrap_or_else(|poison| poison.into_inner());
                Ok(f(&mut conn)?)
            }
        }
    }
}

impl BlockStorage for SqliteStorage {
    fn store(&self, pairs: &[(Address, Blob)]) -> Result<(), StorageError> {
        if pairs.is_empty() {
            return Ok(());
        }
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            for (address, data) in pairs {
                tx.execute(
                    "INSERT OR REPLACE INTO storage (address, data) VALUES (?1, ?2)",
                    rusqlite::params![*address as i64, data],
                )?;
            }
            tx.commit()?;
            debug!(count = pairs.len(), "persisted storage batch");
            Ok(())
        })
    }

    fn restore(&self, address: Address) -> Result<Option<Blob>, StorageError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT data FROM storage WHERE address = ?1",
                rusqlite::params![address as i64],
                |row| row.get::<_, String>(0),
            )
            .map(Some)
            .or_else(|error| match error {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })
        })
    }

    fn list_addresses(&self) -> Result<Vec<Address>, StorageError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT address FROM storage ORDER BY address")?;
            let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row? as Address);
            }
            Ok(out)
        })
    }

    fn delete(&self, addresses: &[Address]) -> Result<(), StorageError> {
        if addresses.is_empty() {
            return Ok(());
        }
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            for address in addresses {
                tx.execute(
                    "DELETE FROM storage WHERE address = ?1",
                    rusqlite::params![*address as i64],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    fn close(&self) {
        // File-backed connections are opened per call and dropped
        // immediately; the shared in-memory connection is released when
        // this `SqliteStorage` is dropped. Nothing to flush explicitly.
        if let Backing::File(path) = &self.backing {
            debug!(?path, "closed file-backed storage");
        } else {
            warn!("closed in-memory storage; contents are now unreachable");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trips_a_batch() {
        let storage = SqliteStorage::open_memory().unwrap();
        storage
            .store(&[(1, "node-a".to_string()), (2, "node-b".to_string())])
            .unwrap();
        assert_eq!(storage.restore(1).unwrap().as_deref(), Some("node-a"));
        assert_eq!(storage.restore(2).unwrap().as_deref(), Some("node-b"));
        assert_eq!(storage.restore(3).unwrap(), None);
    }

    #[test]
    fn list_addresses_is_sorted() {
        let storage = SqliteStorage::open_memory().unwrap();
        storage
            .store(&[(5, "x".into()), (1, "y".into()), (3, "z".into())])
            .unwrap();
        assert_eq!(storage.list_addresses().unwrap(), vec![1, 3, 5]);
    }

    #[test]
    fn delete_removes_addresses() {
        let storage = SqliteStorage::open_memory().unwrap();
        storage.store(&[(1, "a".into()), (2, "b".into())]).unwrap();
        storage.delete(&[1]).unwrap();
        assert_eq!(storage.restore(1).unwrap(), None);
        assert_eq!(storage.restore(2).unwrap().as_deref(), Some("b"));
    }

    #[test]
    fn file_backed_storage_persists_across_reopen() {
        let dir = std::env::temp_dir().join(format!("graphd-storage-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("blocks.sqlite3");
        let _ = std::fs::remove_file(&path);

        {
            let storage = SqliteStorage::open_file(&path).unwrap();
            storage.store(&[(42, "persisted".into())]).unwrap();
        }
        let storage = SqliteStorage::open_file(&path).unwrap();
        assert_eq!(storage.restore(42).unwrap().as_deref(), Some("persisted"));
        let _ = std::fs::remove_file(&path);
    }
}
