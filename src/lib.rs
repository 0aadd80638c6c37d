//! shelf - Local content synchronization and caching engine
//!
//! Keeps a local content root in sync with a remote origin: versioned
//! catalogs describe the available items, item packages carry the content
//! itself, and everything installed is queryable offline.
//!
//! # Architecture
//!
//! - Catalogs and packages are immutable SQLite databases, keyed on disk by
//!   version; updates download new versions beside the old and swap
//!   atomically
//! - Multiple catalog sources merge into one queryable database, keyed by a
//!   fingerprint over the installed (source, version) pairs
//! - All transfers run through a fixed-width priority pool
//! - State changes surface as typed events on a broadcast bus
//!
//! # Modules
//!
//! - `controller`: orchestration entry points (update, install, uninstall)
//! - `store`: inventory state plus read-only catalog/package accessors
//! - `transport`: transfer pool, downloads, archive extraction
//! - `merge`: multi-source catalog merging
//! - `search`: full-text query building and match-range assembly
//! - `cli`: command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Fetch the latest catalog
//! shelf --origin https://content.example.org update
//!
//! # Install an item and search it
//! shelf --origin https://content.example.org install item-42
//! shelf --origin https://content.example.org search "still waters"
//! ```

pub mod cli;
pub mod config;
pub mod controller;
pub mod domain;
pub mod error;
pub mod events;
pub mod merge;
pub mod search;
pub mod store;
pub mod transport;

// Re-export main types at crate root for convenience
pub use config::Layout;
pub use controller::{CatalogUpdate, ContentController, FailedSource, InstallOutcome};
pub use domain::{
    CatalogMetadata, InstallPriority, InstalledVersion, Item, Language, LibraryNode, MatchRange,
    NavNode, SearchResult, SecureSource, SCHEMA_VERSION,
};
pub use error::{ContentError, Result};
pub use events::{ContentEvent, EventBus};
pub use store::{Catalog, InventoryStore, ItemPackage};
pub use transport::{CatalogFetchOutcome, ProgressFn, Session};
