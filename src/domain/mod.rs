//! Core value types shared across the engine.

use serde::{Deserialize, Serialize};

/// Catalog/package schema generation this build understands. Installed
/// packages recorded at a different schema version are not reusable.
pub const SCHEMA_VERSION: i64 = 3;

/// One row per known catalog source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogMetadata {
    /// Unique source name; `"default"` is the distinguished public source
    pub name: String,

    /// Origin base URL, if the source is remote
    pub url: Option<String>,

    /// Monotonic catalog version
    pub version: i64,
}

impl CatalogMetadata {
    pub fn is_default(&self) -> bool {
        self.name == crate::config::DEFAULT_SOURCE_NAME
    }
}

/// The installed package version recorded for an item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstalledVersion {
    pub schema_version: i64,
    pub item_package_version: i64,
}

/// A licensed origin supplied to `update_catalog`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecureSource {
    pub name: String,
    pub base_url: String,
}

/// Scheduling priority for item package installs. `High` transfers jump
/// ahead of queued `Default` transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum InstallPriority {
    #[default]
    Default,
    High,
}

/// A content item as described by a catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    pub external_id: String,
    pub language_id: i64,
    pub source_id: i64,
    pub uri: String,
    pub title: String,
    pub version: i64,
    pub obsolete: bool,
}

/// A content language known to the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Language {
    pub id: i64,
    pub iso639_3_code: String,
    pub bcp47_code: Option<String>,
}

/// A nested grouping of library content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryCollection {
    pub id: i64,
    pub external_id: String,
    pub library_section_id: Option<i64>,
    pub position: i64,
    pub title_html: String,
}

/// A library entry pointing at an installable item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryItem {
    pub id: i64,
    pub external_id: String,
    pub library_section_id: i64,
    pub position: i64,
    pub title_html: String,
    pub item_id: i64,
    pub obsolete: bool,
}

/// A positioned entry in a library section: either a nested collection or a
/// concrete item. Consumers match exhaustively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibraryNode {
    Collection(LibraryCollection),
    Item(LibraryItem),
}

impl LibraryNode {
    pub fn position(&self) -> i64 {
        match self {
            LibraryNode::Collection(c) => c.position,
            LibraryNode::Item(i) => i.position,
        }
    }

    pub fn title_html(&self) -> &str {
        match self {
            LibraryNode::Collection(c) => &c.title_html,
            LibraryNode::Item(i) => &i.title_html,
        }
    }
}

/// A nested navigation grouping within an item package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavCollection {
    pub id: i64,
    pub nav_section_id: i64,
    pub position: i64,
    pub title_html: String,
}

/// A navigation leaf pointing at a subitem URI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavItem {
    pub id: i64,
    pub nav_section_id: i64,
    pub position: i64,
    pub title_html: String,
    pub uri: String,
}

/// A positioned entry in a nav section
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavNode {
    Collection(NavCollection),
    Item(NavItem),
}

impl NavNode {
    pub fn position(&self) -> i64 {
        match self {
            NavNode::Collection(c) => c.position,
            NavNode::Item(i) => i.position,
        }
    }
}

/// A highlighted byte span within a document's content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRange {
    pub byte_offset: usize,
    pub byte_len: usize,
}

impl MatchRange {
    pub fn new(byte_offset: usize, byte_len: usize) -> Self {
        Self {
            byte_offset,
            byte_len,
        }
    }

    pub fn end(&self) -> usize {
        self.byte_offset + self.byte_len
    }
}

/// One full-text search hit, ordered by document id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub subitem_id: i64,
    pub uri: String,
    pub title: String,
    pub snippet: String,
    pub match_ranges: Vec<MatchRange>,
}
