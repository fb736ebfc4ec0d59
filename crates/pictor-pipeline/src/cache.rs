//! Chunked remote cache for the resolved-asset table.
//!
//! The remote store has per-object size and rate limits, so the table is
//! split into fixed-size chunks addressed `<root>.<index>`; the root key
//! holds the chunk-key list, the entry count, a format version, and the
//! fingerprint of the serialized table. Loading degrades gracefully: a
//! missing or malformed root means a cold run, and a failed chunk just
//! loses that chunk's entries. Saving is skipped outright when the
//! fingerprint shows nothing changed since load.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use pictor_common::checksum;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

use crate::config::RemoteCacheConfig;
use crate::store::MetadataStore;
use crate::types::{AssetId, ResolvedAsset};
use pictor_common::Result;

/// Bump when the id keying or the serialized shape changes. A root record
/// with a different version is treated as a cold cache rather than being
/// misread.
const CACHE_FORMAT_VERSION: u32 = 2;

/// Index record stored under the root key.
#[derive(Debug, Serialize, Deserialize)]
struct RootRecord {
    version: u32,
    total: usize,
    chunk_keys: Vec<String>,
    fingerprint: String,
    saved_at: DateTime<Utc>,
}

/// One fixed-size partition of the table.
#[derive(Debug, Serialize, Deserialize)]
struct ChunkRecord {
    entries: BTreeMap<AssetId, ResolvedAsset>,
}

/// Outcome of a [`RemoteCache::save`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The fingerprint matched the one recorded at load; zero remote writes.
    Unchanged,
    Saved {
        chunks: usize,
        stale_deleted: usize,
        delete_failures: usize,
    },
}

#[derive(Default)]
struct LoadState {
    fingerprint: Option<String>,
    chunk_keys: Vec<String>,
}

/// Loads and saves the resolved-asset table through a [`MetadataStore`].
pub struct RemoteCache {
    store: Arc<dyn MetadataStore>,
    root_key: String,
    chunk_size: usize,
    concurrency: usize,
    state: Mutex<LoadState>,
}

impl RemoteCache {
    pub fn new(store: Arc<dyn MetadataStore>, config: &RemoteCacheConfig, concurrency: usize) -> Self {
        Self {
            store,
            root_key: config.root_key.clone(),
            chunk_size: config.chunk_size.max(1),
            concurrency: concurrency.max(1),
            state: Mutex::new(LoadState::default()),
        }
    }

    /// Load the cached table. Never fatal: any failure along the way
    /// degrades to a cold (or partial) cache and the run proceeds.
    pub async fn load(&self) -> HashMap<AssetId, ResolvedAsset> {
        let root_bytes = match self.store.get(&self.root_key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                info!(root_key = %self.root_key, "no remote image cache found, starting cold");
                return HashMap::new();
            }
            Err(e) => {
                warn!(error = %e, "failed to read cache root, starting cold");
                return HashMap::new();
            }
        };

        let root: RootRecord = match serde_json::from_slice(&root_bytes) {
            Ok(root) => root,
            Err(e) => {
                warn!(error = %e, "malformed cache root record, starting cold");
                return HashMap::new();
            }
        };

        if root.version != CACHE_FORMAT_VERSION {
            warn!(
                found = root.version,
                expected = CACHE_FORMAT_VERSION,
                "cache format version mismatch, starting cold"
            );
            return HashMap::new();
        }

        let fetched: Vec<Option<BTreeMap<AssetId, ResolvedAsset>>> =
            stream::iter(root.chunk_keys.clone())
                .map(|key| {
                    let store = Arc::clone(&self.store);
                    async move {
                        match store.get(&key).await {
                            Ok(Some(bytes)) => match serde_json::from_slice::<ChunkRecord>(&bytes) {
                                Ok(chunk) => Some(chunk.entries),
                                Err(e) => {
                                    warn!(key = %key, error = %e, "malformed cache chunk, skipping");
                                    None
                                }
                            },
                            Ok(None) => {
                                warn!(key = %key, "cache chunk missing, skipping");
                                None
                            }
                            Err(e) => {
                                warn!(key = %key, error = %e, "failed to fetch cache chunk, skipping");
                                None
                            }
                        }
                    }
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

        let mut table = HashMap::new();
        let mut unavailable = 0usize;
        for chunk in fetched {
            match chunk {
                Some(entries) => table.extend(entries),
                None => unavailable += 1,
            }
        }
        if unavailable > 0 {
            warn!(
                chunks = unavailable,
                "cache chunks unavailable; affected assets will re-resolve"
            );
        }

        info!(
            entries = table.len(),
            chunks = root.chunk_keys.len(),
            "loaded remote image cache"
        );

        let mut state = self.lock_state();
        state.fingerprint = Some(root.fingerprint);
        state.chunk_keys = root.chunk_keys;

        table
    }

    /// Persist the table. Skips every remote write when the fingerprint
    /// matches the loaded one; otherwise rewrites all chunks in place,
    /// updates the root record, and deletes chunk keys the new save no
    /// longer uses (deletion failures are counted, logged, and non-fatal).
    pub async fn save(&self, table: &HashMap<AssetId, ResolvedAsset>) -> Result<SaveOutcome> {
        let sorted: BTreeMap<&AssetId, &ResolvedAsset> = table.iter().collect();
        let serialized = serde_json::to_vec(&sorted)?;
        let fingerprint = checksum::sha256_hex(&serialized);

        if self.lock_state().fingerprint.as_deref() == Some(fingerprint.as_str()) {
            info!("image cache unchanged since load, skipping save");
            return Ok(SaveOutcome::Unchanged);
        }

        let entries: Vec<(AssetId, ResolvedAsset)> = sorted
            .into_iter()
            .map(|(id, asset)| (id.clone(), asset.clone()))
            .collect();
        let total = entries.len();

        let chunk_records: Vec<ChunkRecord> = entries
            .chunks(self.chunk_size)
            .map(|chunk| ChunkRecord {
                entries: chunk.iter().cloned().collect(),
            })
            .collect();
        let chunk_keys: Vec<String> = (0..chunk_records.len())
            .map(|index| format!("{}.{}", self.root_key, index))
            .collect();

        // All chunks must land before the root is updated; a failed chunk
        // write aborts the save and leaves the previous index live.
        let write_results: Vec<Result<()>> =
            stream::iter(chunk_records.into_iter().zip(chunk_keys.clone()))
                .map(|(record, key)| {
                    let store = Arc::clone(&self.store);
                    async move {
                        let bytes = serde_json::to_vec(&record)?;
                        store.put(&key, bytes).await
                    }
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;
        for result in write_results {
            result?;
        }

        let root = RootRecord {
            version: CACHE_FORMAT_VERSION,
            total,
            chunk_keys: chunk_keys.clone(),
            fingerprint: fingerprint.clone(),
            saved_at: Utc::now(),
        };
        self.store
            .put(&self.root_key, serde_json::to_vec(&root)?)
            .await?;

        let previous = std::mem::take(&mut self.lock_state().chunk_keys);
        let stale: Vec<String> = previous
            .into_iter()
            .filter(|key| !chunk_keys.contains(key))
            .collect();
        let stale_total = stale.len();

        let delete_results: Vec<bool> = stream::iter(stale)
            .map(|key| {
                let store = Arc::clone(&self.store);
                async move {
                    match store.delete(&key).await {
                        Ok(()) => true,
                        Err(e) => {
                            warn!(key = %key, error = %e, "failed to delete stale cache chunk");
                            false
                        }
                    }
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        let delete_failures = delete_results.iter().filter(|ok| !**ok).count();
        if delete_failures > 0 {
            warn!(
                failures = delete_failures,
                "stale cache chunks left behind as orphans"
            );
        }

        let mut state = self.lock_state();
        state.fingerprint = Some(fingerprint);
        state.chunk_keys = chunk_keys.clone();
        drop(state);

        info!(
            entries = total,
            chunks = chunk_keys.len(),
            stale_deleted = stale_total - delete_failures,
            "saved remote image cache"
        );

        Ok(SaveOutcome::Saved {
            chunks: chunk_keys.len(),
            stale_deleted: stale_total - delete_failures,
            delete_failures,
        })
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, LoadState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
