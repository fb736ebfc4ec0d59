//! Pipeline orchestration around the ingestion lifecycle.
//!
//! The orchestrator owns the phase ordering: hydrate the table from the
//! remote cache, resolve image references while rows stream through to the
//! sink, drain pending downloads, then flush the table back. Individual
//! asset failures never abort the run; only a row source failure, an
//! empty query set, or a record without an `id` is fatal, because identity
//! and dedup guarantees would be unsound past that point.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::cache::{RemoteCache, SaveOutcome};
use crate::config::PipelineConfig;
use crate::files::{self, FileStore};
use crate::resolve::{AssetResolver, QueryPlan};
use crate::scheduler::{self, DownloadSummary};
use crate::store::MetadataStore;
use crate::types::{DownloadTask, Record, ResolvedAsset, ResolvedAssetTable};
use pictor_common::{PictorError, Result};

/// Yields records for a named query. The relational side of ingestion
/// lives behind this trait.
#[async_trait]
pub trait RowSource: Send + Sync {
    async fn fetch(&self, query: &str) -> Result<Vec<Record>>;
}

/// Receives finished records (image fields already resolved).
#[async_trait]
pub trait ContentSink: Send {
    async fn add_node(&mut self, collection: &str, record: Record) -> Result<()>;
}

/// Lifecycle of one pipeline invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    CacheLoading,
    Ingesting,
    Downloading,
    CacheSaving,
    Done,
}

/// Per-run accounting, one figure per phase.
#[derive(Debug, Default)]
pub struct PipelineReport {
    /// Records handed to the sink.
    pub records: usize,
    /// Resolved assets in the table at the end of the run.
    pub assets: usize,
    /// Local assets whose file already existed on disk.
    pub already_cached: usize,
    pub downloads: DownloadSummary,
    /// `None` when the cache is disabled or the save itself failed.
    pub cache_save: Option<SaveOutcome>,
}

pub struct Pipeline {
    config: PipelineConfig,
    plans: Vec<QueryPlan>,
    store: Option<Arc<dyn MetadataStore>>,
    state: PipelineState,
}

impl Pipeline {
    /// Build a pipeline from configuration. Fails when no queries are
    /// configured, since there would be nothing to ingest.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        if config.queries.is_empty() {
            return Err(PictorError::NoQueries);
        }
        let plans = config.queries.iter().map(QueryPlan::from_config).collect();
        Ok(Self {
            config,
            plans,
            store: None,
            state: PipelineState::Idle,
        })
    }

    /// Attach the remote metadata store backing the cross-run cache.
    pub fn with_store(mut self, store: Arc<dyn MetadataStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replace the parsed plan for one query, e.g. to install a
    /// [`Custom`](crate::resolve::ImageField::Custom) field extractor.
    pub fn with_plan(mut self, plan: QueryPlan) -> Self {
        match self.plans.iter_mut().find(|p| p.name == plan.name) {
            Some(existing) => *existing = plan,
            None => self.plans.push(plan),
        }
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub async fn run<R, S>(&mut self, source: &R, sink: &mut S) -> Result<PipelineReport>
    where
        R: RowSource,
        S: ContentSink,
    {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.config.http_timeout_secs))
            .build()
            .map_err(|e| PictorError::Network(e.to_string()))?;

        let images_enabled = !self.config.ignore_images;

        let cache = if images_enabled && self.config.remote_cache.enabled {
            match &self.store {
                Some(store) => Some(RemoteCache::new(
                    Arc::clone(store),
                    &self.config.remote_cache,
                    self.config.concurrency.cache_io,
                )),
                None => {
                    warn!("remote cache enabled but no metadata store attached, skipping");
                    None
                }
            }
        } else {
            None
        };

        self.state = PipelineState::CacheLoading;
        let seeded = match &cache {
            Some(cache) => cache.load().await,
            None => Default::default(),
        };
        let table = Arc::new(ResolvedAssetTable::from_entries(seeded));

        let resolver = if images_enabled {
            Some(AssetResolver::new(
                &self.config,
                client.clone(),
                Arc::clone(&table),
            )?)
        } else {
            None
        };

        self.state = PipelineState::Ingesting;
        let mut records_total = 0usize;
        for plan in &self.plans {
            let rows = source.fetch(&plan.name).await?;
            info!(query = %plan.name, rows = rows.len(), "retrieved rows");

            for row in &rows {
                if !row.contains_key("id") {
                    return Err(PictorError::MissingId {
                        collection: plan.name.clone(),
                    });
                }
            }

            let resolved: Vec<Record> = match &resolver {
                Some(resolver) if !plan.fields.is_empty() => {
                    stream::iter(rows)
                        .map(|mut record| {
                            let fields = &plan.fields;
                            async move {
                                resolver.resolve_record(&mut record, fields).await;
                                record
                            }
                        })
                        .buffered(self.config.concurrency.resolve.max(1))
                        .collect()
                        .await
                }
                _ => rows,
            };

            for record in resolved {
                sink.add_node(&plan.name, record).await?;
                records_total += 1;
            }
        }

        self.state = PipelineState::Downloading;
        let mut downloads = DownloadSummary::default();
        let mut already_cached = 0usize;
        if images_enabled {
            let image_dir = PathBuf::from(&self.config.image_directory);
            files::ensure_directory(&image_dir)?;

            let mut tasks = Vec::new();
            for asset in table.entries().into_values() {
                if let ResolvedAsset::Local(local) = asset {
                    if files::exists(&local.local_path) {
                        already_cached += 1;
                    } else {
                        tasks.push(DownloadTask {
                            url: local.source_url,
                            filepath: local.local_path,
                        });
                    }
                }
            }

            if tasks.is_empty() {
                info!(cached = already_cached, "no new images to download");
            } else {
                let file_store = FileStore::new(client.clone(), &image_dir)?;
                downloads =
                    scheduler::run_all(&file_store, tasks, self.config.concurrency.download).await;
                if downloads.downloaded == 0 {
                    warn!(
                        failed = downloads.failed,
                        "image download phase completed with no successful downloads"
                    );
                } else {
                    info!(
                        cached = already_cached,
                        downloaded = downloads.downloaded,
                        failed = downloads.failed,
                        "image download phase complete"
                    );
                }
            }
        }

        self.state = PipelineState::CacheSaving;
        let cache_save = match &cache {
            Some(cache) => match cache.save(&table.entries()).await {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    warn!(error = %e, "failed to save remote image cache");
                    None
                }
            },
            None => None,
        };

        self.state = PipelineState::Done;
        let report = PipelineReport {
            records: records_total,
            assets: table.len(),
            already_cached,
            downloads,
            cache_save,
        };
        info!(
            records = report.records,
            assets = report.assets,
            "ingestion complete"
        );
        Ok(report)
    }
}
