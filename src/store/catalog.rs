//! Read-only accessors over a catalog database.
//!
//! A catalog is an immutable index of available items, languages, and the
//! library hierarchy. Row schemas belong to the origin; this wrapper only
//! maps the columns the engine consumes.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::domain::{Item, Language, LibraryCollection, LibraryItem, LibraryNode};
use crate::error::Result;

use super::db::open_readonly;

pub struct Catalog {
    conn: Connection,
    path: PathBuf,
}

impl Catalog {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = open_readonly(path)?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Catalog content version from the metadata table (0 if absent)
    pub fn catalog_version(&self) -> i64 {
        self.int_for_metadata_key("catalogVersion").unwrap_or(0)
    }

    /// Schema generation from the metadata table (0 if absent)
    pub fn schema_version(&self) -> i64 {
        self.int_for_metadata_key("schemaVersion").unwrap_or(0)
    }

    pub fn int_for_metadata_key(&self, key: &str) -> Option<i64> {
        self.string_for_metadata_key(key)?.parse().ok()
    }

    pub fn string_for_metadata_key(&self, key: &str) -> Option<String> {
        self.conn
            .query_row(
                "SELECT value FROM metadata WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .ok()
            .flatten()
    }

    pub fn item_with_id(&self, id: i64) -> Result<Option<Item>> {
        let item = self
            .conn
            .query_row(
                &format!("{} WHERE _id = ?1", ITEM_SELECT),
                params![id],
                item_from_row,
            )
            .optional()?;
        Ok(item)
    }

    pub fn item_with_external_id(&self, external_id: &str) -> Result<Option<Item>> {
        let item = self
            .conn
            .query_row(
                &format!("{} WHERE external_id = ?1", ITEM_SELECT),
                params![external_id],
                item_from_row,
            )
            .optional()?;
        Ok(item)
    }

    pub fn items(&self) -> Result<Vec<Item>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{} ORDER BY _id", ITEM_SELECT))?;
        let items = stmt
            .query_map([], item_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    pub fn languages(&self) -> Result<Vec<Language>> {
        let mut stmt = self
            .conn
            .prepare("SELECT _id, iso639_3, bcp47 FROM language ORDER BY _id")?;
        let languages = stmt
            .query_map([], |row| {
                Ok(Language {
                    id: row.get(0)?,
                    iso639_3_code: row.get(1)?,
                    bcp47_code: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(languages)
    }

    /// Collections and items of a library section, in position order
    pub fn library_nodes_for_section(&self, section_id: i64) -> Result<Vec<LibraryNode>> {
        let mut nodes = Vec::new();

        let mut stmt = self.conn.prepare(
            "SELECT _id, external_id, library_section_id, position, title_html
             FROM library_collection WHERE library_section_id = ?1",
        )?;
        let collections = stmt.query_map(params![section_id], |row| {
            Ok(LibraryCollection {
                id: row.get(0)?,
                external_id: row.get(1)?,
                library_section_id: row.get(2)?,
                position: row.get(3)?,
                title_html: row.get(4)?,
            })
        })?;
        for collection in collections {
            nodes.push(LibraryNode::Collection(collection?));
        }

        let mut stmt = self.conn.prepare(
            "SELECT _id, external_id, library_section_id, position, title_html, item_id, obsolete
             FROM library_item WHERE library_section_id = ?1",
        )?;
        let items = stmt.query_map(params![section_id], |row| {
            Ok(LibraryItem {
                id: row.get(0)?,
                external_id: row.get(1)?,
                library_section_id: row.get(2)?,
                position: row.get(3)?,
                title_html: row.get(4)?,
                item_id: row.get(5)?,
                obsolete: row.get(6)?,
            })
        })?;
        for item in items {
            nodes.push(LibraryNode::Item(item?));
        }

        nodes.sort_by_key(|node| node.position());
        Ok(nodes)
    }
}

const ITEM_SELECT: &str = "SELECT _id, external_id, language_id, source_id, uri, title, version, obsolete FROM item";

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<Item> {
    Ok(Item {
        id: row.get(0)?,
        external_id: row.get(1)?,
        language_id: row.get(2)?,
        source_id: row.get(3)?,
        uri: row.get(4)?,
        title: row.get(5)?,
        version: row.get(6)?,
        obsolete: row.get(7)?,
    })
}
