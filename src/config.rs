//! On-disk layout and root directory resolution.
//!
//! The library takes an explicit root directory; everything the engine
//! writes lives underneath it:
//!
//! - `Inventory.db` — install/queue/error state
//! - `Catalogs/{source}/{version}/catalog.db` — one immutable db per (source, version)
//! - `MergedCatalogs/{fingerprint}/catalog.db` — merge output
//! - `Item/{id}/{schema}.{version}/package.db` — one immutable dir per installed item version
//! - `tmp/` — staging area, kept on the same filesystem so renames are atomic
//!
//! The CLI resolves the root from `--root`, `SHELF_ROOT`, or `~/.shelf`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub const INVENTORY_DATABASE: &str = "Inventory.db";
pub const CATALOG_DATABASE: &str = "catalog.db";
pub const PACKAGE_DATABASE: &str = "package.db";

/// Name of the distinguished public source
pub const DEFAULT_SOURCE_NAME: &str = "default";

/// Path derivations for a content root directory
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the root and staging directories if missing
    pub fn ensure(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.staging_directory())
    }

    pub fn inventory_database(&self) -> PathBuf {
        self.root.join(INVENTORY_DATABASE)
    }

    pub fn catalogs_directory(&self) -> PathBuf {
        self.root.join("Catalogs")
    }

    pub fn catalog_directory(&self, source: &str) -> PathBuf {
        self.catalogs_directory().join(sanitize_component(source))
    }

    pub fn catalog_version_directory(&self, source: &str, version: i64) -> PathBuf {
        self.catalog_directory(source).join(version.to_string())
    }

    pub fn catalog_database(&self, source: &str, version: i64) -> PathBuf {
        self.catalog_version_directory(source, version)
            .join(CATALOG_DATABASE)
    }

    pub fn merged_catalogs_directory(&self) -> PathBuf {
        self.root.join("MergedCatalogs")
    }

    pub fn merged_catalog_directory(&self, fingerprint: &str) -> PathBuf {
        self.merged_catalogs_directory()
            .join(sanitize_component(fingerprint))
    }

    pub fn merged_catalog_database(&self, fingerprint: &str) -> PathBuf {
        self.merged_catalog_directory(fingerprint)
            .join(CATALOG_DATABASE)
    }

    pub fn items_directory(&self) -> PathBuf {
        self.root.join("Item")
    }

    pub fn item_directory(&self, item_id: i64) -> PathBuf {
        self.items_directory().join(item_id.to_string())
    }

    pub fn item_version_directory(
        &self,
        item_id: i64,
        schema_version: i64,
        package_version: i64,
    ) -> PathBuf {
        self.item_directory(item_id)
            .join(format!("{}.{}", schema_version, package_version))
    }

    pub fn item_package_database(
        &self,
        item_id: i64,
        schema_version: i64,
        package_version: i64,
    ) -> PathBuf {
        self.item_version_directory(item_id, schema_version, package_version)
            .join(PACKAGE_DATABASE)
    }

    /// Staging directory for downloads, extraction, and merge scratch files
    pub fn staging_directory(&self) -> PathBuf {
        self.root.join("tmp")
    }
}

/// Replace path-hostile characters so source names and fingerprints can be
/// used as directory names.
pub fn sanitize_component(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect()
}

/// Resolve the content root for the CLI: explicit flag, then `SHELF_ROOT`,
/// then `~/.shelf`.
pub fn resolve_root(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(root) = explicit {
        return Ok(root);
    }
    if let Ok(root) = std::env::var("SHELF_ROOT") {
        return Ok(PathBuf::from(root));
    }
    let home = dirs::home_dir().context("Failed to determine home directory")?;
    Ok(home.join(".shelf"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_paths() {
        let layout = Layout::new("/data/shelf");

        assert_eq!(
            layout.inventory_database(),
            PathBuf::from("/data/shelf/Inventory.db")
        );
        assert_eq!(
            layout.catalog_database("default", 6),
            PathBuf::from("/data/shelf/Catalogs/default/6/catalog.db")
        );
        assert_eq!(
            layout.merged_catalog_database("default6extra2"),
            PathBuf::from("/data/shelf/MergedCatalogs/default6extra2/catalog.db")
        );
        assert_eq!(
            layout.item_package_database(42, 3, 11),
            PathBuf::from("/data/shelf/Item/42/3.11/package.db")
        );
    }

    #[test]
    fn test_sanitize_component() {
        assert_eq!(sanitize_component("plain-name"), "plain-name");
        assert_eq!(sanitize_component("a/b:c"), "a_b_c");
    }

    #[test]
    fn test_resolve_root_explicit_wins() {
        let root = resolve_root(Some(PathBuf::from("/custom"))).unwrap();
        assert_eq!(root, PathBuf::from("/custom"));
    }
}
