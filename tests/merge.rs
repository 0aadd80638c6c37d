//! Catalog Merge Integration Tests
//!
//! Exercises first-write-wins row merging, metadata namespacing,
//! fingerprint memoization, and stale-directory collection on disk.

mod common;

use common::{build_catalog_db, FixtureItem};
use shelf::merge::{collect_garbage, merge};
use shelf::{Catalog, CatalogMetadata, Layout};
use tempfile::TempDir;

fn meta(name: &str, version: i64) -> CatalogMetadata {
    CatalogMetadata {
        name: name.to_string(),
        url: None,
        version,
    }
}

/// Default catalog v6 with items 1 and 2; "extra" catalog v2 with a
/// conflicting item 1 and its own item 100
fn seeded_layout() -> (TempDir, Layout) {
    let temp = TempDir::new().unwrap();
    let layout = Layout::new(temp.path());

    build_catalog_db(
        &layout.catalog_database("default", 6),
        6,
        &[
            FixtureItem::new(1, "item-1", "Default One", 5),
            FixtureItem::new(2, "item-2", "Default Two", 3),
        ],
    );
    build_catalog_db(
        &layout.catalog_database("extra", 2),
        2,
        &[
            FixtureItem::new(1, "item-1", "Extra One", 9),
            FixtureItem::new(100, "extra-100", "Extra Hundred", 1),
        ],
    );
    (temp, layout)
}

#[test]
fn test_merge_prefers_default_rows() {
    let (_temp, layout) = seeded_layout();
    let sources = [meta("default", 6), meta("extra", 2)];

    let outcome = merge(&layout, &sources).unwrap();
    assert!(outcome.rebuilt);
    assert_eq!(outcome.fingerprint, "default6extra2");

    let catalog = Catalog::open(&outcome.database).unwrap();
    // Conflicting row keeps the default source's version
    let item = catalog.item_with_id(1).unwrap().unwrap();
    assert_eq!(item.title, "Default One");
    // Non-conflicting rows from both sources are present
    assert!(catalog.item_with_id(2).unwrap().is_some());
    assert!(catalog.item_with_id(100).unwrap().is_some());
}

#[test]
fn test_merge_namespaces_secondary_metadata() {
    let (_temp, layout) = seeded_layout();
    let sources = [meta("default", 6), meta("extra", 2)];

    let outcome = merge(&layout, &sources).unwrap();
    let catalog = Catalog::open(&outcome.database).unwrap();

    assert_eq!(catalog.catalog_version(), 6);
    assert_eq!(
        catalog.string_for_metadata_key("extra.catalogVersion").as_deref(),
        Some("2")
    );
}

#[test]
fn test_merge_is_memoized_by_fingerprint() {
    let (_temp, layout) = seeded_layout();
    let sources = [meta("default", 6), meta("extra", 2)];

    let first = merge(&layout, &sources).unwrap();
    assert!(first.rebuilt);

    let second = merge(&layout, &sources).unwrap();
    assert!(!second.rebuilt);
    assert_eq!(second.fingerprint, first.fingerprint);
    assert_eq!(second.database, first.database);
}

#[test]
fn test_single_source_merge_matches_default() {
    let (_temp, layout) = seeded_layout();

    let outcome = merge(&layout, &[meta("default", 6)]).unwrap();
    assert_eq!(outcome.fingerprint, "default6");

    let catalog = Catalog::open(&outcome.database).unwrap();
    assert!(catalog.item_with_id(100).unwrap().is_none());
}

#[test]
fn test_collect_garbage_drops_stale_directories() {
    let (_temp, layout) = seeded_layout();
    let sources = [meta("default", 6), meta("extra", 2)];
    let outcome = merge(&layout, &sources).unwrap();

    // A superseded catalog version and a superseded merge output
    let stale_catalog = layout.catalog_version_directory("default", 5);
    std::fs::create_dir_all(&stale_catalog).unwrap();
    let stale_merge = layout.merged_catalog_directory("default5extra2");
    std::fs::create_dir_all(&stale_merge).unwrap();

    collect_garbage(&layout, &sources, &outcome.fingerprint).unwrap();

    assert!(!stale_catalog.exists());
    assert!(!stale_merge.exists());
    assert!(layout.catalog_database("default", 6).exists());
    assert!(outcome.database.exists());
}
