// src/server/file_catalog.rs

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;

use crate::common::error::{ProtocolError, Result};

const MAX_KEY_NAME_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCatalogEntry {
    pub unique_key: String,
    pub original_name: String,
    /// Display name of the uploader at upload time.
    pub uploader: String,
    pub size: u64,
}

/// In-memory index from generated file keys to what was uploaded under them.
///
/// Entries are append-only for the lifetime of the process.
pub struct FileCatalog {
    inner: RwLock<CatalogInner>,
    next_sequence: AtomicU64,
}

#[derive(Default)]
struct CatalogInner {
    entries: HashMap<String, FileCatalogEntry>,
    // Keys in upload order, for listing.
    order: Vec<String>,
}

impl FileCatalog {
    pub fn new() -> Self {
        FileCatalog {
            inner: RwLock::new(CatalogInner::default()),
            next_sequence: AtomicU64::new(1),
        }
    }

    /// Build a fresh key: upload time in milliseconds, a per-process sequence
    /// number and a filesystem-safe form of the original name.
    pub fn generate_key(&self, original_name: &str) -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        format!("{}_{}_{}", millis, sequence, sanitize_name(original_name))
    }

    pub fn insert(&self, entry: FileCatalogEntry) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.entries.contains_key(&entry.unique_key) {
            return Err(ProtocolError::KeyCollision(entry.unique_key));
        }
        inner.order.push(entry.unique_key.clone());
        inner.entries.insert(entry.unique_key.clone(), entry);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<FileCatalogEntry> {
        self.inner.read().entries.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.read().entries.contains_key(key)
    }

    /// All entries in upload order.
    pub fn list(&self) -> Vec<FileCatalogEntry> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|key| inner.entries.get(key).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The `LISTAR_ARQUIVOS` reply: `key|name|uploader` records joined by `;`.
    pub fn serialize(&self) -> String {
        self.list()
            .iter()
            .map(|e| format!("{}|{}|{}", e.unique_key, e.original_name, e.uploader))
            .collect::<Vec<_>>()
            .join(";")
    }
}

impl Default for FileCatalog {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a `LISTAR_ARQUIVOS` reply back into entries. Sizes are not on the
/// wire and come back as zero.
pub fn parse_listing(listing: &str) -> Vec<FileCatalogEntry> {
    listing
        .split(';')
        .filter(|record| !record.is_empty())
        .filter_map(|record| {
            let mut fields = record.splitn(3, '|');
            match (fields.next(), fields.next(), fields.next()) {
                (Some(key), Some(name), Some(uploader)) => Some(FileCatalogEntry {
                    unique_key: key.to_string(),
                    original_name: name.to_string(),
                    uploader: uploader.to_string(),
                    size: 0,
                }),
                _ => None,
            }
        })
        .collect()
}

fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_KEY_NAME_LEN)
        .collect();
    // A key made only of dots would resolve to a directory.
    if cleaned.chars().all(|c| c == '.') {
        "file".to_string()
    } else {
        cleaned
    }
}
