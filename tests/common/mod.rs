//! Shared fixtures: catalog and package database builders, zip packing, and
//! a minimal HTTP origin for end-to-end tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use zip::write::FileOptions;

pub struct FixtureItem {
    pub id: i64,
    pub external_id: &'static str,
    pub title: &'static str,
    pub version: i64,
}

impl FixtureItem {
    pub fn new(id: i64, external_id: &'static str, title: &'static str, version: i64) -> Self {
        Self {
            id,
            external_id,
            title,
            version,
        }
    }
}

/// Build a catalog database at `path` with the given content version and items
pub fn build_catalog_db(path: &Path, catalog_version: i64, items: &[FixtureItem]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE metadata (key TEXT PRIMARY KEY, value TEXT NOT NULL);
         CREATE TABLE item (
             _id INTEGER PRIMARY KEY,
             external_id TEXT NOT NULL,
             language_id INTEGER NOT NULL,
             source_id INTEGER NOT NULL,
             uri TEXT NOT NULL,
             title TEXT NOT NULL,
             version INTEGER NOT NULL,
             obsolete INTEGER NOT NULL DEFAULT 0
         );
         CREATE TABLE language (
             _id INTEGER PRIMARY KEY,
             iso639_3 TEXT NOT NULL,
             bcp47 TEXT
         );
         CREATE TABLE library_collection (
             _id INTEGER PRIMARY KEY,
             external_id TEXT NOT NULL,
             library_section_id INTEGER,
             position INTEGER NOT NULL,
             title_html TEXT NOT NULL
         );
         CREATE TABLE library_item (
             _id INTEGER PRIMARY KEY,
             external_id TEXT NOT NULL,
             library_section_id INTEGER NOT NULL,
             position INTEGER NOT NULL,
             title_html TEXT NOT NULL,
             item_id INTEGER NOT NULL,
             obsolete INTEGER NOT NULL DEFAULT 0
         );",
    )
    .unwrap();

    conn.execute(
        "INSERT INTO metadata (key, value) VALUES ('catalogVersion', ?1), ('schemaVersion', '3')",
        params![catalog_version.to_string()],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO language (_id, iso639_3, bcp47) VALUES (1, 'eng', 'en')",
        [],
    )
    .unwrap();
    for item in items {
        conn.execute(
            "INSERT INTO item (_id, external_id, language_id, source_id, uri, title, version, obsolete)
             VALUES (?1, ?2, 1, 1, ?3, ?4, ?5, 0)",
            params![
                item.id,
                item.external_id,
                format!("/item/{}", item.id),
                item.title,
                item.version
            ],
        )
        .unwrap();
    }
}

/// Build an item package database at `path` with full-text indexed subitems
pub fn build_package_db(
    path: &Path,
    schema_version: i64,
    package_version: i64,
    subitems: &[(i64, &str, &str)],
) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE metadata (key TEXT PRIMARY KEY, value TEXT NOT NULL);
         CREATE TABLE subitem (
             _id INTEGER PRIMARY KEY,
             uri TEXT NOT NULL,
             title TEXT NOT NULL
         );
         CREATE VIRTUAL TABLE subitem_content_fts USING fts4 (subitem_id, content_html);
         CREATE TABLE nav_collection (
             _id INTEGER PRIMARY KEY,
             nav_section_id INTEGER NOT NULL,
             position INTEGER NOT NULL,
             title_html TEXT NOT NULL
         );
         CREATE TABLE nav_item (
             _id INTEGER PRIMARY KEY,
             nav_section_id INTEGER NOT NULL,
             position INTEGER NOT NULL,
             title_html TEXT NOT NULL,
             uri TEXT NOT NULL
         );",
    )
    .unwrap();

    conn.execute(
        "INSERT INTO metadata (key, value) VALUES ('schemaVersion', ?1), ('itemPackageVersion', ?2)",
        params![schema_version.to_string(), package_version.to_string()],
    )
    .unwrap();
    for (id, title, content) in subitems {
        conn.execute(
            "INSERT INTO subitem (_id, uri, title) VALUES (?1, ?2, ?3)",
            params![id, format!("/subitem/{}", id), title],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO subitem_content_fts (subitem_id, content_html) VALUES (?1, ?2)",
            params![id, content],
        )
        .unwrap();
    }
}

/// Pack named entries into a zip archive in memory
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let cursor = std::io::Cursor::new(Vec::new());
    let mut writer = zip::ZipWriter::new(cursor);
    let options = FileOptions::default();
    for (name, data) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Pack a single file from disk into a zip archive in memory
pub fn zip_file(source: &Path, name_in_zip: &str) -> Vec<u8> {
    let data = std::fs::read(source).unwrap();
    zip_bytes(&[(name_in_zip, &data)])
}

type Routes = Arc<Mutex<HashMap<String, Vec<u8>>>>;

/// Minimal HTTP origin: serves registered routes, 404 otherwise
pub struct TestOrigin {
    pub base_url: String,
    routes: Routes,
}

impl TestOrigin {
    pub async fn start() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let routes: Routes = Arc::default();

        let serving = Arc::clone(&routes);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let routes = Arc::clone(&serving);
                tokio::spawn(serve_connection(stream, routes));
            }
        });

        Self {
            base_url: format!("http://{}", address),
            routes,
        }
    }

    pub fn route(&self, path: &str, body: Vec<u8>) {
        self.routes.lock().unwrap().insert(path.to_string(), body);
    }

    pub fn route_json(&self, path: &str, json: serde_json::Value) {
        self.route(path, json.to_string().into_bytes());
    }

    pub fn remove_route(&self, path: &str) {
        self.routes.lock().unwrap().remove(path);
    }
}

async fn serve_connection(mut stream: tokio::net::TcpStream, routes: Routes) {
    let mut buffer = vec![0u8; 8192];
    let mut read = 0;
    loop {
        match stream.read(&mut buffer[read..]).await {
            Ok(0) => break,
            Ok(n) => {
                read += n;
                if buffer[..read].windows(4).any(|w| w == b"\r\n\r\n") || read == buffer.len() {
                    break;
                }
            }
            Err(_) => return,
        }
    }

    let request = String::from_utf8_lossy(&buffer[..read]);
    let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();

    let response = match routes.lock().unwrap().get(&path) {
        Some(body) => {
            let mut response = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            )
            .into_bytes();
            response.extend_from_slice(body);
            response
        }
        None => {
            b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_vec()
        }
    };
    let _ = stream.write_all(&response).await;
    let _ = stream.shutdown().await;
}
