//! Shared SQLite connection handling.
//!
//! `StateDatabase` serializes all access to one writable connection behind a
//! mutex and layers a reentrant transaction guard on top: SQLite's own
//! transaction primitive does not nest, so a per-connection recursion counter
//! lets a caller already inside `in_transaction` run further transactional
//! work on the same connection without deadlocking or issuing a second
//! `BEGIN`.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::Connection;

use crate::error::{ContentError, Result};

/// Mutex-guarded writable connection with a transaction recursion counter
pub struct StateDatabase {
    inner: Mutex<ConnInner>,
}

pub struct ConnInner {
    conn: Connection,
    txn_depth: u32,
}

impl StateDatabase {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(Self {
            inner: Mutex::new(ConnInner { conn, txn_depth: 0 }),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            inner: Mutex::new(ConnInner { conn, txn_depth: 0 }),
        })
    }

    /// Run `f` with exclusive access to the connection
    pub fn with<T>(&self, f: impl FnOnce(&mut ConnInner) -> Result<T>) -> Result<T> {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut inner)
    }
}

impl ConnInner {
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run `f` inside a transaction. Nested calls join the outer transaction
    /// instead of beginning a new one; only the outermost call commits, and
    /// any error rolls the whole transaction back.
    pub fn in_transaction<T>(
        &mut self,
        f: impl FnOnce(&mut ConnInner) -> Result<T>,
    ) -> Result<T> {
        if self.txn_depth > 0 {
            self.txn_depth += 1;
            let result = f(self);
            self.txn_depth -= 1;
            return result;
        }

        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        self.txn_depth = 1;
        let result = f(self);
        self.txn_depth = 0;

        match result {
            Ok(value) => {
                self.conn.execute_batch("COMMIT")?;
                Ok(value)
            }
            Err(err) => {
                // Preserve the original error even if rollback also fails
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(err)
            }
        }
    }
}

/// Open a content database (catalog or item package) read-only with the
/// pragmas used for query-only access.
pub fn open_readonly(path: &Path) -> Result<Connection> {
    if !path.exists() {
        return Err(ContentError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("database not found: {}", path.display()),
        )));
    }
    let conn = Connection::open_with_flags(
        path,
        rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.execute_batch(
        "PRAGMA temp_store = MEMORY;\n\
         PRAGMA foreign_keys = OFF;",
    )?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> StateDatabase {
        let db = StateDatabase::open_in_memory().unwrap();
        db.with(|inner| {
            inner
                .conn()
                .execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY)")
                .map_err(Into::into)
        })
        .unwrap();
        db
    }

    fn count(inner: &ConnInner) -> i64 {
        inner
            .conn()
            .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_nested_transactions_commit_once() {
        let db = setup();

        db.with(|inner| {
            inner.in_transaction(|inner| {
                inner.conn().execute("INSERT INTO t (id) VALUES (1)", [])?;
                inner.in_transaction(|inner| {
                    inner.conn().execute("INSERT INTO t (id) VALUES (2)", [])?;
                    Ok(())
                })
            })
        })
        .unwrap();

        db.with(|inner| Ok(assert_eq!(count(inner), 2))).unwrap();
    }

    #[test]
    fn test_inner_error_rolls_back_everything() {
        let db = setup();

        let result: Result<()> = db.with(|inner| {
            inner.in_transaction(|inner| {
                inner.conn().execute("INSERT INTO t (id) VALUES (1)", [])?;
                inner.in_transaction(|inner| {
                    inner.conn().execute("INSERT INTO t (id) VALUES (2)", [])?;
                    // Duplicate primary key forces a constraint failure
                    inner.conn().execute("INSERT INTO t (id) VALUES (2)", [])?;
                    Ok(())
                })
            })
        });

        assert!(result.is_err());
        db.with(|inner| Ok(assert_eq!(count(inner), 0))).unwrap();
    }
}
