//! File-backed row source and content sink.
//!
//! Deliberately thin mapping code: the row source reads one JSON array per
//! query from disk, the sink writes one JSON file per record. Anything
//! smarter (a real database, a site framework's node store) implements the
//! same two traits.

use async_trait::async_trait;
use pictor_common::{PictorError, Result};
use pictor_pipeline::{ContentSink, Record, RowSource};
use serde_json::Value;
use std::path::PathBuf;

/// Reads rows for query `q` from `<rows_dir>/<q>.json`.
pub struct JsonFileSource {
    rows_dir: PathBuf,
}

impl JsonFileSource {
    pub fn new(rows_dir: PathBuf) -> Self {
        Self { rows_dir }
    }
}

#[async_trait]
impl RowSource for JsonFileSource {
    async fn fetch(&self, query: &str) -> Result<Vec<Record>> {
        let path = self.rows_dir.join(format!("{}.json", query));
        let contents = std::fs::read_to_string(&path)?;
        let rows: Vec<Record> = serde_json::from_str(&contents)?;
        Ok(rows)
    }
}

/// Writes each record to `<out_dir>/<collection>/<id>.json`.
pub struct DirectorySink {
    out_dir: PathBuf,
}

impl DirectorySink {
    pub fn new(out_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&out_dir)?;
        Ok(Self { out_dir })
    }
}

#[async_trait]
impl ContentSink for DirectorySink {
    async fn add_node(&mut self, collection: &str, record: Record) -> Result<()> {
        let dir = self.out_dir.join(collection);
        std::fs::create_dir_all(&dir)?;

        let id = match record.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => {
                return Err(PictorError::MissingId {
                    collection: collection.to_string(),
                })
            }
        };

        let path = dir.join(format!("{}.json", id));
        std::fs::write(path, serde_json::to_string_pretty(&record)?)?;
        Ok(())
    }
}
