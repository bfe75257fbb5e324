//! On-disk hash cache for the sync daemon.
//!
//! Keyed by `(container-uuid, backend-id, path)`, records the content
//! hash (and change token) a path had when the two storages of a synced
//! container last agreed. Conflicts are recorded here too, so they
//! survive restarts and can be listed.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("hash database error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error(transparent)]
    Storage(#[from] storage::base::StorageError),
    #[error("sync conflict on {0}")]
    Conflict(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictRow {
    pub container_uuid: Uuid,
    pub path: String,
    pub detail: String,
}

pub struct HashDb {
    conn: Mutex<Connection>,
}

impl HashDb {
    pub fn open(path: &Path) -> Result<Self, SyncError> {
        Self::init(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, SyncError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, SyncError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS hashes (
                 container_uuid TEXT NOT NULL,
                 backend_id     TEXT NOT NULL,
                 path           TEXT NOT NULL,
                 hash           TEXT NOT NULL,
                 token          INTEGER,
                 PRIMARY KEY (container_uuid, backend_id, path)
             );
             CREATE TABLE IF NOT EXISTS conflicts (
                 container_uuid TEXT NOT NULL,
                 path           TEXT NOT NULL,
                 detail         TEXT NOT NULL,
                 PRIMARY KEY (container_uuid, path)
             );",
        )?;
        Ok(HashDb {
            conn: Mutex::new(conn),
        })
    }

    pub fn store_hash(
        &self,
        container_uuid: Uuid,
        backend_id: &str,
        path: &str,
        hash: &str,
        token: Option<u64>,
    ) -> Result<(), SyncError> {
        self.conn.lock().execute(
            "INSERT INTO hashes (container_uuid, backend_id, path, hash, token)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (container_uuid, backend_id, path)
             DO UPDATE SET hash = ?4, token = ?5",
            params![
                container_uuid.to_string(),
                backend_id,
                path,
                hash,
                token.map(|t| t as i64)
            ],
        )?;
        Ok(())
    }

    pub fn retrieve_hash(
        &self,
        container_uuid: Uuid,
        backend_id: &str,
        path: &str,
    ) -> Result<Option<String>, SyncError> {
        let conn = self.conn.lock();
        let hash = conn
            .query_row(
                "SELECT hash FROM hashes
                 WHERE container_uuid = ?1 AND backend_id = ?2 AND path = ?3",
                params![container_uuid.to_string(), backend_id, path],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hash)
    }

    pub fn remove_hash(
        &self,
        container_uuid: Uuid,
        backend_id: &str,
        path: &str,
    ) -> Result<(), SyncError> {
        self.conn.lock().execute(
            "DELETE FROM hashes
             WHERE container_uuid = ?1 AND backend_id = ?2 AND path = ?3",
            params![container_uuid.to_string(), backend_id, path],
        )?;
        Ok(())
    }

    pub fn record_conflict(
        &self,
        container_uuid: Uuid,
        path: &str,
        detail: &str,
    ) -> Result<(), SyncError> {
        self.conn.lock().execute(
            "INSERT INTO conflicts (container_uuid, path, detail)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (container_uuid, path) DO UPDATE SET detail = ?3",
            params![container_uuid.to_string(), path, detail],
        )?;
        Ok(())
    }

    pub fn clear_conflict(&self, container_uuid: Uuid, path: &str) -> Result<(), SyncError> {
        self.conn.lock().execute(
            "DELETE FROM conflicts WHERE container_uuid = ?1 AND path = ?2",
            params![container_uuid.to_string(), path],
        )?;
        Ok(())
    }

    /// Conflicts for one container, or all of them.
    pub fn list_conflicts(
        &self,
        container_uuid: Option<Uuid>,
    ) -> Result<Vec<ConflictRow>, SyncError> {
        let conn = self.conn.lock();
        let mut rows = Vec::new();
        let mut push = |uuid: String, path: String, detail: String| {
            if let Ok(container_uuid) = uuid.parse() {
                rows.push(ConflictRow {
                    container_uuid,
                    path,
                    detail,
                });
            }
        };
        match container_uuid {
            Some(uuid) => {
                let mut stmt = conn.prepare(
                    "SELECT container_uuid, path, detail FROM conflicts
                     WHERE container_uuid = ?1 ORDER BY path",
                )?;
                let found = stmt.query_map(params![uuid.to_string()], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?;
                for row in found {
                    let (uuid, path, detail) = row?;
                    push(uuid, path, detail);
                }
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT container_uuid, path, detail FROM conflicts ORDER BY path",
                )?;
                let found =
                    stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
                for row in found {
                    let (uuid, path, detail) = row?;
                    push(uuid, path, detail);
                }
            }
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_roundtrip() {
        let db = HashDb::in_memory().unwrap();
        let uuid = Uuid::new_v4();

        assert_eq!(db.retrieve_hash(uuid, "b1", "a.txt").unwrap(), None);
        db.store_hash(uuid, "b1", "a.txt", "h1", Some(42)).unwrap();
        assert_eq!(
            db.retrieve_hash(uuid, "b1", "a.txt").unwrap().as_deref(),
            Some("h1")
        );
        db.store_hash(uuid, "b1", "a.txt", "h2", None).unwrap();
        assert_eq!(
            db.retrieve_hash(uuid, "b1", "a.txt").unwrap().as_deref(),
            Some("h2")
        );
        db.remove_hash(uuid, "b1", "a.txt").unwrap();
        assert_eq!(db.retrieve_hash(uuid, "b1", "a.txt").unwrap(), None);
    }

    #[test]
    fn test_conflict_listing() {
        let db = HashDb::in_memory().unwrap();
        let uuid = Uuid::new_v4();
        db.record_conflict(uuid, "a.txt", "both sides changed")
            .unwrap();
        db.record_conflict(uuid, "a.txt", "still conflicting").unwrap();

        let rows = db.list_conflicts(Some(uuid)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].detail, "still conflicting");

        db.clear_conflict(uuid, "a.txt").unwrap();
        assert!(db.list_conflicts(None).unwrap().is_empty());
    }
}
