//! Catalog merging.
//!
//! Combines the default source's catalog database with any number of secure
//! sources into one queryable database, keyed by a fingerprint over all
//! installed (name, version) pairs. Source databases are never mutated; the
//! merge builds a scratch copy and moves it into place atomically, so a
//! partially-built merge is never observable and a failed merge leaves any
//! previous output intact.

use std::path::{Path, PathBuf};

use rusqlite::Connection;
use tracing::{debug, info};

use crate::config::{sanitize_component, Layout};
use crate::domain::CatalogMetadata;
use crate::error::{ContentError, Result};

/// Result of a merge pass
#[derive(Debug)]
pub struct MergeOutcome {
    /// Fingerprint over all installed sources
    pub fingerprint: String,
    /// Path of the merged catalog database
    pub database: PathBuf,
    /// False when the fingerprint-keyed output already existed (memoized)
    pub rebuilt: bool,
}

/// Deterministic cache key: `name+version` pairs concatenated in ascending
/// name order. Never recomputed mid-merge.
pub fn fingerprint(catalogs: &[CatalogMetadata]) -> String {
    let mut sorted: Vec<&CatalogMetadata> = catalogs.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));
    sorted
        .iter()
        .map(|c| format!("{}{}", c.name, c.version))
        .collect()
}

/// Produce the merged catalog database for the given installed sources.
///
/// Memoized by fingerprint: if the keyed output already exists it is returned
/// unchanged. Otherwise the default source is copied as the merge base, each
/// secondary source is folded in under first-write-wins semantics in
/// ascending name order, and the result is renamed into place.
pub fn merge(layout: &Layout, catalogs: &[CatalogMetadata]) -> Result<MergeOutcome> {
    let default = catalogs
        .iter()
        .find(|c| c.is_default())
        .ok_or(ContentError::MissingDefaultSource)?;

    let fingerprint = fingerprint(catalogs);
    let destination = layout.merged_catalog_database(&fingerprint);
    if destination.exists() {
        debug!(%fingerprint, "merged catalog up to date");
        return Ok(MergeOutcome {
            fingerprint,
            database: destination,
            rebuilt: false,
        });
    }

    std::fs::create_dir_all(layout.staging_directory())?;
    let scratch = tempfile::Builder::new()
        .prefix("merge-")
        .suffix(".db")
        .tempfile_in(layout.staging_directory())?;

    let base = layout.catalog_database(&default.name, default.version);
    std::fs::copy(&base, scratch.path())?;

    {
        let conn = Connection::open(scratch.path())?;
        conn.execute_batch("PRAGMA synchronous = OFF; PRAGMA journal_mode = OFF;")?;

        let mut secondaries: Vec<&CatalogMetadata> =
            catalogs.iter().filter(|c| !c.is_default()).collect();
        secondaries.sort_by(|a, b| a.name.cmp(&b.name));

        for source in secondaries {
            let path = layout.catalog_database(&source.name, source.version);
            fold_in_source(&conn, &path, &source.name)?;
        }
    }

    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match scratch.persist_noclobber(&destination) {
        Ok(_) => {}
        // A racing merge of the same fingerprint won; its output is equivalent
        Err(err) if destination.exists() => {
            debug!(%fingerprint, "discarding merge scratch, destination already placed");
            drop(err);
        }
        Err(err) => return Err(err.error.into()),
    }

    info!(%fingerprint, "merged catalog rebuilt");
    Ok(MergeOutcome {
        fingerprint,
        database: destination,
        rebuilt: true,
    })
}

/// Copy one secondary source into the merge base.
///
/// Every table except `metadata` and storage-internal tables is copied with
/// `INSERT OR IGNORE`: rows whose primary key already exists in the base are
/// silently skipped. Metadata keys are re-namespaced as `{source}.{key}` so
/// they never collide with the base's own keys.
fn fold_in_source(conn: &Connection, path: &Path, name: &str) -> Result<()> {
    let alias = attach_alias(name);
    conn.execute(
        &format!("ATTACH DATABASE ?1 AS {}", alias),
        [path.to_string_lossy()],
    )?;

    let copy = (|| -> Result<()> {
        let mut stmt = conn.prepare(&format!(
            "SELECT name FROM {}.sqlite_master
             WHERE type = 'table' AND name NOT IN ('metadata', 'sqlite_sequence')
               AND name NOT LIKE 'sqlite_%'",
            alias
        ))?;
        let tables = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        for table in tables {
            conn.execute_batch(&format!(
                "INSERT OR IGNORE INTO \"{table}\" SELECT * FROM {alias}.\"{table}\""
            ))?;
        }

        conn.execute(
            &format!(
                "INSERT OR IGNORE INTO metadata (key, value)
                 SELECT ?1 || key, value FROM {alias}.metadata"
            ),
            [format!("{}.", name)],
        )?;
        Ok(())
    })();

    // Always detach, even when the copy failed
    let detached = conn.execute_batch(&format!("DETACH DATABASE {}", alias));
    copy?;
    detached?;
    Ok(())
}

/// Attach aliases must be bare identifiers
fn attach_alias(name: &str) -> String {
    let alias: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("src_{}", alias)
}

/// Delete directories no longer referenced by the installed sources or the
/// current merge fingerprint: stale version directories under each source and
/// stale fingerprint directories beside the merged output.
pub fn collect_garbage(
    layout: &Layout,
    catalogs: &[CatalogMetadata],
    fingerprint: &str,
) -> Result<()> {
    for catalog in catalogs {
        let keep = layout.catalog_version_directory(&catalog.name, catalog.version);
        remove_siblings(&layout.catalog_directory(&catalog.name), &keep)?;
    }
    let keep = layout.merged_catalog_directory(fingerprint);
    remove_siblings(&layout.merged_catalogs_directory(), &keep)?;
    Ok(())
}

fn remove_siblings(parent: &Path, keep: &Path) -> Result<()> {
    if !parent.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(parent)? {
        let entry = entry?;
        let path = entry.path();
        if path != keep && path.is_dir() {
            debug!(path = %path.display(), "removing stale catalog directory");
            std::fs::remove_dir_all(&path)?;
        }
    }
    Ok(())
}
