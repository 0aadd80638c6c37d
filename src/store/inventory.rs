//! Persistent record of installed, queued, and errored content.
//!
//! Three set-membership tables plus the installed-catalog table, all owned by
//! a single connection. Every operation is an idempotent upsert or delete:
//! absence is never an error, and failures are limited to underlying store
//! I/O which cannot corrupt other rows (each call is one atomic statement or
//! an explicit transaction).

use std::collections::BTreeSet;
use std::path::Path;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::domain::{CatalogMetadata, InstalledVersion};
use crate::error::Result;

use super::db::{ConnInner, StateDatabase};

const CURRENT_VERSION: i64 = 1;

/// Install/version state tracker over the local state database
pub struct InventoryStore {
    db: StateDatabase,
}

impl InventoryStore {
    pub fn open(path: &Path) -> Result<Self> {
        let db = StateDatabase::open(path)?;
        db.with(upgrade)?;
        Ok(Self { db })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let db = StateDatabase::open_in_memory()?;
        db.with(upgrade)?;
        Ok(Self { db })
    }

    /// Replaces any prior record for the item
    pub fn record_installed(
        &self,
        item_id: i64,
        schema_version: i64,
        item_package_version: i64,
    ) -> Result<()> {
        self.db
            .with(|inner| record_installed_on(inner.conn(), item_id, schema_version, item_package_version))
    }

    /// Absence means not installed
    pub fn installed_version(&self, item_id: i64) -> Result<Option<InstalledVersion>> {
        self.db.with(|inner| installed_version_on(inner.conn(), item_id))
    }

    pub fn installed_item_ids(&self) -> Result<Vec<i64>> {
        self.db.with(|inner| {
            let mut stmt = inner
                .conn()
                .prepare("SELECT item_id FROM installed_item ORDER BY item_id")?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<i64>>>()?;
            Ok(ids)
        })
    }

    pub fn is_installed(&self, item_id: i64) -> Result<bool> {
        Ok(self.installed_version(item_id)?.is_some())
    }

    pub fn remove_installed(&self, item_id: i64) -> Result<()> {
        self.db.with(|inner| remove_installed_on(inner.conn(), item_id))
    }

    pub fn enqueue(&self, item_id: i64) -> Result<()> {
        self.db.with(|inner| enqueue_on(inner.conn(), item_id))
    }

    pub fn dequeue(&self, item_id: i64) -> Result<()> {
        self.db.with(|inner| dequeue_on(inner.conn(), item_id))
    }

    pub fn queued_item_ids(&self) -> Result<BTreeSet<i64>> {
        self.db
            .with(|inner| id_set(inner.conn(), "SELECT item_id FROM install_queue"))
    }

    pub fn set_errored(&self, item_id: i64, errored: bool) -> Result<()> {
        self.db.with(|inner| set_errored_on(inner.conn(), item_id, errored))
    }

    pub fn errored_item_ids(&self) -> Result<BTreeSet<i64>> {
        self.db
            .with(|inner| id_set(inner.conn(), "SELECT item_id FROM errored_install"))
    }

    pub fn upsert_catalog(&self, name: &str, url: Option<&str>, version: i64) -> Result<()> {
        self.db.with(|inner| {
            inner.conn().execute(
                "INSERT OR REPLACE INTO installed_catalog (name, url, version) VALUES (?1, ?2, ?3)",
                params![name, url, version],
            )?;
            Ok(())
        })
    }

    pub fn delete_catalogs(&self, names: &[String]) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        self.db.with(|inner| {
            inner.in_transaction(|inner| {
                for name in names {
                    inner
                        .conn()
                        .execute("DELETE FROM installed_catalog WHERE name = ?1", params![name])?;
                }
                Ok(())
            })
        })
    }

    pub fn installed_catalogs(&self) -> Result<Vec<CatalogMetadata>> {
        self.db.with(|inner| {
            let mut stmt = inner
                .conn()
                .prepare("SELECT name, url, version FROM installed_catalog ORDER BY name")?;
            let catalogs = stmt
                .query_map([], |row| {
                    Ok(CatalogMetadata {
                        name: row.get(0)?,
                        url: row.get(1)?,
                        version: row.get(2)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(catalogs)
        })
    }

    pub fn catalog(&self, name: &str) -> Result<Option<CatalogMetadata>> {
        self.db.with(|inner| {
            let catalog = inner
                .conn()
                .query_row(
                    "SELECT name, url, version FROM installed_catalog WHERE name = ?1",
                    params![name],
                    |row| {
                        Ok(CatalogMetadata {
                            name: row.get(0)?,
                            url: row.get(1)?,
                            version: row.get(2)?,
                        })
                    },
                )
                .optional()?;
            Ok(catalog)
        })
    }

    /// Run several inventory operations in one transaction. Nested calls on
    /// the same connection join the outer transaction.
    pub fn in_transaction<T>(
        &self,
        f: impl FnOnce(&mut InventoryTx<'_>) -> Result<T>,
    ) -> Result<T> {
        self.db
            .with(|inner| inner.in_transaction(|inner| f(&mut InventoryTx { inner })))
    }
}

/// Transactional view over the inventory tables
pub struct InventoryTx<'a> {
    inner: &'a mut ConnInner,
}

impl InventoryTx<'_> {
    pub fn installed_version(&self, item_id: i64) -> Result<Option<InstalledVersion>> {
        installed_version_on(self.inner.conn(), item_id)
    }

    pub fn record_installed(
        &self,
        item_id: i64,
        schema_version: i64,
        item_package_version: i64,
    ) -> Result<()> {
        record_installed_on(self.inner.conn(), item_id, schema_version, item_package_version)
    }

    pub fn remove_installed(&self, item_id: i64) -> Result<()> {
        remove_installed_on(self.inner.conn(), item_id)
    }

    pub fn enqueue(&self, item_id: i64) -> Result<()> {
        enqueue_on(self.inner.conn(), item_id)
    }

    pub fn dequeue(&self, item_id: i64) -> Result<()> {
        dequeue_on(self.inner.conn(), item_id)
    }

    pub fn set_errored(&self, item_id: i64, errored: bool) -> Result<()> {
        set_errored_on(self.inner.conn(), item_id, errored)
    }
}

fn upgrade(inner: &mut ConnInner) -> Result<()> {
    let version: i64 = inner
        .conn()
        .query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version >= CURRENT_VERSION {
        return Ok(());
    }

    inner.in_transaction(|inner| {
        if version < 1 {
            inner.conn().execute_batch(
                "CREATE TABLE IF NOT EXISTS installed_item (
                     item_id INTEGER PRIMARY KEY,
                     schema_version INTEGER NOT NULL,
                     item_package_version INTEGER NOT NULL,
                     installed_at TEXT NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS install_queue (
                     item_id INTEGER PRIMARY KEY
                 );
                 CREATE TABLE IF NOT EXISTS errored_install (
                     item_id INTEGER PRIMARY KEY
                 );
                 CREATE TABLE IF NOT EXISTS installed_catalog (
                     name TEXT PRIMARY KEY,
                     url TEXT,
                     version INTEGER NOT NULL
                 );",
            )?;
        }
        inner
            .conn()
            .execute_batch(&format!("PRAGMA user_version = {}", CURRENT_VERSION))?;
        Ok(())
    })
}

fn record_installed_on(
    conn: &Connection,
    item_id: i64,
    schema_version: i64,
    item_package_version: i64,
) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO installed_item
             (item_id, schema_version, item_package_version, installed_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![item_id, schema_version, item_package_version, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

fn installed_version_on(conn: &Connection, item_id: i64) -> Result<Option<InstalledVersion>> {
    let version = conn
        .query_row(
            "SELECT schema_version, item_package_version FROM installed_item WHERE item_id = ?1",
            params![item_id],
            |row| {
                Ok(InstalledVersion {
                    schema_version: row.get(0)?,
                    item_package_version: row.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(version)
}

fn remove_installed_on(conn: &Connection, item_id: i64) -> Result<()> {
    conn.execute("DELETE FROM installed_item WHERE item_id = ?1", params![item_id])?;
    Ok(())
}

fn enqueue_on(conn: &Connection, item_id: i64) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO install_queue (item_id) VALUES (?1)",
        params![item_id],
    )?;
    Ok(())
}

fn dequeue_on(conn: &Connection, item_id: i64) -> Result<()> {
    conn.execute("DELETE FROM install_queue WHERE item_id = ?1", params![item_id])?;
    Ok(())
}

fn set_errored_on(conn: &Connection, item_id: i64, errored: bool) -> Result<()> {
    if errored {
        conn.execute(
            "INSERT OR REPLACE INTO errored_install (item_id) VALUES (?1)",
            params![item_id],
        )?;
    } else {
        conn.execute("DELETE FROM errored_install WHERE item_id = ?1", params![item_id])?;
    }
    Ok(())
}

fn id_set(conn: &Connection, sql: &str) -> Result<BTreeSet<i64>> {
    let mut stmt = conn.prepare(sql)?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<BTreeSet<i64>>>()?;
    Ok(ids)
}
