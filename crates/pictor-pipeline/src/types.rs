//! Core data model: asset ids, resolved assets, and the run-wide table.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

/// Deterministic digest identifying one logical image across records and
/// runs. Equal normalized inputs always produce equal ids; see
/// [`identity`](crate::identity) for the derivation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(String);

impl AssetId {
    pub(crate) fn from_digest(digest: String) -> Self {
        Self(digest)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Native pixel dimensions reported by the CDN provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// An image that will exist (or already exists) as a file on local disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalImage {
    pub filename: String,
    pub source_url: String,
    pub local_path: PathBuf,
}

/// A CDN-backed responsive image descriptor. Fully resolved at ingestion
/// time; never downloaded locally.
///
/// The serialized shape (camelCase, `srcset` entries as `"<url> <width>w"`)
/// is what the site's image component consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteImage {
    pub src: String,
    pub srcset: Vec<String>,
    pub sizes: String,
    pub data_uri: String,
    pub size: Dimensions,
}

/// The stored outcome of resolving one [`AssetId`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolvedAsset {
    Local(LocalImage),
    Remote(RemoteImage),
}

impl ResolvedAsset {
    /// The value written back into a record's image field: a plain path
    /// string for local files, the structured descriptor for CDN images.
    pub fn to_field_value(&self) -> Value {
        match self {
            ResolvedAsset::Local(local) => Value::String(local.local_path.display().to_string()),
            ResolvedAsset::Remote(remote) => {
                serde_json::to_value(remote).unwrap_or(Value::Null)
            }
        }
    }
}

/// One pending download, derived from a Local entry whose file is absent.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadTask {
    pub url: String,
    pub filepath: PathBuf,
}

/// AssetId -> ResolvedAsset map accumulated across the whole ingestion.
///
/// Append-only during a run: the first writer for an id wins, and later
/// (possibly concurrent) resolutions of the same id discard their result in
/// favor of the stored one. That makes duplicate in-flight resolutions safe
/// without coordinating them up front.
#[derive(Debug, Default)]
pub struct ResolvedAssetTable {
    inner: Mutex<HashMap<AssetId, ResolvedAsset>>,
}

impl ResolvedAssetTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the table from previously cached entries.
    pub fn from_entries(entries: HashMap<AssetId, ResolvedAsset>) -> Self {
        Self {
            inner: Mutex::new(entries),
        }
    }

    pub fn get(&self, id: &AssetId) -> Option<ResolvedAsset> {
        self.lock().get(id).cloned()
    }

    /// First-writer-wins insert. Returns the value actually stored under
    /// `id`, which is the existing entry when the insert lost the race.
    pub fn insert_if_absent(&self, id: AssetId, asset: ResolvedAsset) -> ResolvedAsset {
        self.lock().entry(id).or_insert(asset).clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Snapshot of all entries, for cache serialization and download
    /// derivation after ingestion has finished.
    pub fn entries(&self) -> HashMap<AssetId, ResolvedAsset> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<AssetId, ResolvedAsset>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A record as handed over by the row source: one JSON object.
pub type Record = serde_json::Map<String, Value>;
