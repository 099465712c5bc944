//! Catalog of files to migrate
//!
//! The catalog is the application database that references uploaded files by
//! CID. Rows are read fresh on every run; nothing here is cached.

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::CatalogSource;
use crate::error::Result;

/// Which catalog table a record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Primary uploaded media
    Media,
    /// Clips derived from a media record
    Clip,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Media => write!(f, "media"),
            SourceKind::Clip => write!(f, "clip"),
        }
    }
}

/// A catalog row that references a content address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogItem {
    /// Primary key of the owning row, rendered as text
    pub identifier: String,
    /// CID as stored in the catalog (not yet validated)
    pub content_address: String,
    pub source_kind: SourceKind,
}

impl CatalogItem {
    pub fn new(
        identifier: impl Into<String>,
        content_address: impl Into<String>,
        source_kind: SourceKind,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            content_address: content_address.into(),
            source_kind,
        }
    }
}

/// Source of catalog records.
pub trait Catalog {
    /// All records with a non-empty content address, in discovery order.
    fn fetch_items(&self) -> Result<Vec<CatalogItem>>;
}

/// Catalog backed by a SQLite database, opened read-only.
pub struct SqliteCatalog {
    conn: Connection,
    sources: Vec<CatalogSource>,
}

impl SqliteCatalog {
    /// Open the catalog database. A missing file is an error.
    pub fn open<P: AsRef<Path>>(path: P, sources: Vec<CatalogSource>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        info!(path = %path.display(), sources = sources.len(), "Opened catalog");
        Ok(Self { conn, sources })
    }

    /// Wrap an existing connection (tests, in-memory catalogs).
    pub fn from_connection(conn: Connection, sources: Vec<CatalogSource>) -> Self {
        Self { conn, sources }
    }

    fn fetch_source(&self, source: &CatalogSource) -> Result<Vec<CatalogItem>> {
        // Identifiers are checked by Config::validate_local before we get here.
        let sql = format!(
            "SELECT {id}, {cid} FROM {table} \
             WHERE {cid} IS NOT NULL AND TRIM({cid}) != '' \
             ORDER BY {id}",
            id = source.id_column,
            cid = source.cid_column,
            table = source.table,
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            let id = render_id(row.get_ref(0)?);
            let cid = render_address(row.get_ref(1)?);
            Ok((id, cid))
        })?;

        let mut items = Vec::new();
        for row in rows {
            let (id, cid) = row?;
            let cid = match cid {
                Ok(cid) => cid,
                Err(raw) => {
                    warn!(table = %source.table, id = %id, value = %raw, "Content address is not text");
                    raw
                }
            };
            items.push(CatalogItem::new(id, cid, source.kind));
        }

        debug!(table = %source.table, kind = %source.kind, count = items.len(), "Read catalog source");
        Ok(items)
    }
}

impl Catalog for SqliteCatalog {
    fn fetch_items(&self) -> Result<Vec<CatalogItem>> {
        let mut items = Vec::new();
        for source in &self.sources {
            items.extend(self.fetch_source(source)?);
        }
        info!(total = items.len(), "Fetched catalog items");
        Ok(items)
    }
}

fn render_id(id: ValueRef<'_>) -> String {
    match id {
        ValueRef::Null => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(r) => r.to_string(),
        ValueRef::Text(t) => String::from_utf8_lossy(t).into_owned(),
        ValueRef::Blob(b) => hex::encode(b),
    }
}

/// Text cells come back as-is. Anything else is rendered as an SQL literal
/// in `Err`, which never parses as a CID and so ends up skipped as invalid.
fn render_address(cell: ValueRef<'_>) -> std::result::Result<String, String> {
    match cell {
        ValueRef::Text(t) => match std::str::from_utf8(t) {
            Ok(text) => Ok(text.to_string()),
            Err(_) => Err(format!("X'{}'", hex::encode(t))),
        },
        ValueRef::Blob(b) => Err(format!("X'{}'", hex::encode(b))),
        ValueRef::Integer(i) => Err(i.to_string()),
        ValueRef::Real(r) => Err(r.to_string()),
        ValueRef::Null => Err("NULL".to_string()),
    }
}
