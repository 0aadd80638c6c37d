//! Read-only accessors over an installed item package database.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};

use crate::domain::{NavCollection, NavItem, NavNode, SearchResult};
use crate::error::Result;
use crate::search::{build_query, match_ranges};

use super::db::open_readonly;

pub struct ItemPackage {
    conn: Connection,
    path: PathBuf,
}

impl ItemPackage {
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

    pub fn schema_version(&self) -> i64 {
        self.int_for_metadata_key("schemaVersion").unwrap_or(0)
    }

    pub fn item_package_version(&self) -> i64 {
        self.int_for_metadata_key("itemPackageVersion").unwrap_or(0)
    }

    pub fn int_for_metadata_key(&self, key: &str) -> Option<i64> {
        self.conn
            .query_row(
                "SELECT value FROM metadata WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .ok()
            .flatten()?
            .parse()
            .ok()
    }

    /// Full-text search over subitem content, ordered by subitem id.
    ///
    /// An optional `subitem_id` scopes the query to a single document.
    pub fn search_results(
        &self,
        search_string: &str,
        subitem_id: Option<i64>,
    ) -> Result<Vec<SearchResult>> {
        let query = build_query(search_string);

        let mut sql = String::from(
            "SELECT offsets(subitem_content_fts) AS offsets, \
                    snippet(subitem_content_fts, '<em class=\"searchMatch\">', '</em>', '…', -1, 35) AS snippet, \
                    subitem_content_fts.subitem_id, subitem.title, subitem.uri \
             FROM subitem_content_fts \
             LEFT JOIN subitem ON subitem._id = subitem_content_fts.subitem_id \
             WHERE subitem_content_fts.content_html MATCH ?1",
        );
        if subitem_id.is_some() {
            sql.push_str(" AND subitem._id = ?2");
        }
        sql.push_str(" ORDER BY subitem_content_fts.subitem_id");

        let mut stmt = self.conn.prepare(&sql)?;
        let map_row = |row: &rusqlite::Row<'_>| {
            let offsets: String = row.get(0)?;
            Ok(SearchResult {
                subitem_id: row.get(2)?,
                uri: row.get(4)?,
                title: row.get(3)?,
                snippet: row.get(1)?,
                match_ranges: match_ranges(&offsets, query.mode),
            })
        };

        let results = match subitem_id {
            Some(id) => stmt
                .query_map(params![query.expression, id], map_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?,
            None => stmt
                .query_map(params![query.expression], map_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?,
        };
        Ok(results)
    }

    /// Collections and items of a nav section, in position order
    pub fn nav_nodes_for_section(&self, nav_section_id: i64) -> Result<Vec<NavNode>> {
        let mut nodes = Vec::new();

        let mut stmt = self.conn.prepare(
            "SELECT _id, nav_section_id, position, title_html
             FROM nav_collection WHERE nav_section_id = ?1",
        )?;
        let collections = stmt.query_map(params![nav_section_id], |row| {
            Ok(NavCollection {
                id: row.get(0)?,
                nav_section_id: row.get(1)?,
                position: row.get(2)?,
                title_html: row.get(3)?,
            })
        })?;
        for collection in collections {
            nodes.push(NavNode::Collection(collection?));
        }

        let mut stmt = self.conn.prepare(
            "SELECT _id, nav_section_id, position, title_html, uri
             FROM nav_item WHERE nav_section_id = ?1",
        )?;
        let items = stmt.query_map(params![nav_section_id], |row| {
            Ok(NavItem {
                id: row.get(0)?,
                nav_section_id: row.get(1)?,
                position: row.get(2)?,
                title_html: row.get(3)?,
                uri: row.get(4)?,
            })
        })?;
        for item in items {
            nodes.push(NavNode::Item(item?));
        }

        nodes.sort_by_key(|node| node.position());
        Ok(nodes)
    }
}
